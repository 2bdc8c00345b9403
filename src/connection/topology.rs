use std::{
    collections::{HashMap, hash_map::Entry},
    fmt::{Display, Formatter},
};

use parking_lot::RwLock;
use tracing::info;

use crate::protocol::messages::MetadataResponseBroker;

/// Brokers the cluster told us about, keyed by broker id.
#[derive(Debug, Default)]
pub struct BrokerTopology {
    topology: RwLock<HashMap<i32, BrokerAddress>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: i32,
}

impl Display for BrokerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl<'a> From<&'a MetadataResponseBroker> for BrokerAddress {
    fn from(b: &'a MetadataResponseBroker) -> Self {
        Self {
            host: b.host.0.clone(),
            port: b.port.0,
        }
    }
}

impl BrokerTopology {
    pub fn is_empty(&self) -> bool {
        self.topology.read().is_empty()
    }

    pub fn get_broker(&self, broker_id: i32) -> Option<BrokerAddress> {
        self.topology.read().get(&broker_id).cloned()
    }

    /// Returns the URLs of all known brokers.
    pub fn get_broker_urls(&self) -> Vec<String> {
        self.topology
            .read()
            .values()
            .map(ToString::to_string)
            .collect()
    }

    /// Updates with the provided broker metadata.
    pub fn update(&self, brokers: &[MetadataResponseBroker]) {
        let mut topology = self.topology.write();
        for broker in brokers {
            Self::upsert(&mut topology, broker.node_id.0, BrokerAddress::from(broker));
        }
    }

    /// Records a single broker, e.g. a coordinator that was not part of the last metadata response.
    pub fn insert(&self, broker_id: i32, address: BrokerAddress) {
        Self::upsert(&mut self.topology.write(), broker_id, address);
    }

    fn upsert(topology: &mut HashMap<i32, BrokerAddress>, broker_id: i32, new: BrokerAddress) {
        match topology.entry(broker_id) {
            Entry::Occupied(mut o) => {
                let current = o.get_mut();
                if *current != new {
                    info!(broker = broker_id, from = %current, to = %new, "Broker address changed");
                    *current = new;
                }
            }
            Entry::Vacant(v) => {
                info!(broker = broker_id, url = %new, "Discovered new broker");
                v.insert(new);
            }
        }
    }
}
