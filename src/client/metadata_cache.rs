use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::cluster::PartitionSet;

/// Topic name to the partitions reported at the last metadata refresh.
///
/// The whole map is replaced on every [`replace`](Self::replace); entries are never patched.
#[derive(Debug, Default)]
pub(crate) struct MetadataCache {
    topics: RwLock<HashMap<String, PartitionSet>>,
}

impl MetadataCache {
    pub(crate) fn partitions(&self, topic: &str) -> Option<PartitionSet> {
        self.topics.read().get(topic).cloned()
    }

    /// Sorted topic names.
    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.topics.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub(crate) fn replace(&self, topics: HashMap<String, PartitionSet>) {
        debug!(topics = topics.len(), "replaced metadata cache");
        *self.topics.write() = topics;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_is_wholesale() {
        let cache = MetadataCache::default();
        assert!(cache.partitions("foo").is_none());
        assert!(cache.topics().is_empty());

        cache.replace(HashMap::from([
            ("foo".to_owned(), [0, 1].into_iter().collect()),
            ("bar".to_owned(), [0].into_iter().collect()),
        ]));
        assert_eq!(cache.topics(), vec!["bar", "foo"]);
        assert_eq!(cache.partitions("foo").unwrap().to_vec(), vec![0, 1]);

        cache.replace(HashMap::from([(
            "baz".to_owned(),
            [2].into_iter().collect(),
        )]));
        assert_eq!(cache.topics(), vec!["baz"]);
        assert!(cache.partitions("foo").is_none());
    }
}
