use std::{
    collections::HashMap,
    io::Cursor,
    ops::DerefMut,
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf},
    sync::{
        Mutex as AsyncMutex,
        oneshot::{Sender, channel},
    },
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::protocol::{
    api_key::ApiKey,
    api_version::{ApiVersion, ApiVersionRange},
    frame::{AsyncMessageRead, AsyncMessageWrite},
    messages::{
        ApiVersionsRequest, ReadVersionedError, ReadVersionedType, RequestBody, RequestHeader,
        ResponseHeader, WriteVersionedError, WriteVersionedType,
    },
    primitives::{Int32, NullableString},
};

/// Request header version used for every non-flexible request.
const REQUEST_HEADER_VERSION: ApiVersion = ApiVersion::new(1);

/// Response header version used for every non-flexible response.
const RESPONSE_HEADER_VERSION: ApiVersion = ApiVersion::new(0);

#[derive(Debug)]
struct Response {
    #[allow(dead_code)]
    header: ResponseHeader,
    data: Cursor<Vec<u8>>,
}

#[derive(Debug)]
enum MessengerState {
    /// Requests that are waiting for a response, keyed by correlation ID.
    RequestMap(HashMap<i32, Sender<Response>>),

    /// The stream failed; every pending and future request fails with this reason.
    Poisoned(Arc<RequestError>),
}

impl MessengerState {
    /// Poisons the state and drops all pending senders. Keeps the first reason if already poisoned.
    fn poison(&mut self, err: RequestError) -> Arc<RequestError> {
        match self {
            Self::RequestMap(_) => {
                let err = Arc::new(err);
                *self = Self::Poisoned(Arc::clone(&err));
                err
            }
            Self::Poisoned(e) => Arc::clone(e),
        }
    }
}

/// Undoes the bookkeeping of a request whose future is dropped before its response arrived.
///
/// Before the frame write started only the response slot is removed. Once it started the stream may hold a partial
/// frame or owe a response nobody waits for, so the messenger is poisoned.
struct PendingRequestGuard {
    state: Arc<Mutex<MessengerState>>,
    correlation_id: i32,
    write_started: bool,
    finished: bool,
}

impl Drop for PendingRequestGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut state = self.state.lock();
        if self.write_started {
            debug!(
                correlation_id = self.correlation_id,
                "Request abandoned after it was sent, poisoning messenger"
            );
            state.poison(RequestError::Abandoned {
                correlation_id: self.correlation_id,
            });
        } else if let MessengerState::RequestMap(map) = state.deref_mut() {
            map.remove(&self.correlation_id);
        }
    }
}

/// Multiplexes requests over a single broker stream.
///
/// Responses are matched to requests by correlation ID in a background task, so concurrent callers may share one
/// messenger.
pub struct Messenger<RW> {
    stream_write: AsyncMutex<WriteHalf<RW>>,
    client_id: Arc<str>,
    correlation_id: AtomicI32,
    version_ranges: RwLock<HashMap<ApiKey, ApiVersionRange>>,
    state: Arc<Mutex<MessengerState>>,
    join_handle: JoinHandle<()>,
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Cannot find matching version for: {api_key:?}")]
    NoVersionMatch { api_key: ApiKey },

    #[error(transparent)]
    WriteError(#[from] WriteVersionedError),

    #[error(transparent)]
    WriteMessageError(#[from] crate::protocol::frame::WriteError),

    #[error(transparent)]
    ReadError(#[from] ReadVersionedError),

    #[error(transparent)]
    ReadFrameError(#[from] crate::protocol::frame::ReadError),

    #[error(
        "Data left at the end of the message. Got {message_size} bytes but only read {read} bytes. api_key={api_key:?} api_version={api_version}"
    )]
    TooMuchData {
        message_size: u64,
        read: u64,
        api_key: ApiKey,
        api_version: ApiVersion,
    },

    #[error("Cannot read/write data")]
    IO(#[from] std::io::Error),

    #[error("Request {correlation_id} was abandoned after it was sent")]
    Abandoned { correlation_id: i32 },

    #[error("Connection is poisoned: {0}")]
    Poisoned(Arc<RequestError>),
}

#[derive(Error, Debug)]
pub enum SyncVersionsError {
    #[error("Did not find a version for ApiVersion that works with this broker")]
    NoWorkingVersion,

    #[error("Request error: {0}")]
    RequestError(#[from] RequestError),
}

impl<RW> Messenger<RW>
where
    RW: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: RW, max_message_size: usize, client_id: Arc<str>) -> Self {
        let (stream_read, stream_write) = tokio::io::split(stream);
        let state = Arc::new(Mutex::new(MessengerState::RequestMap(HashMap::new())));
        let state_captured = Arc::clone(&state);

        let join_handle = tokio::spawn(async move {
            let mut stream_read = stream_read;

            loop {
                let msg = match stream_read.read_message(max_message_size).await {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(%e, "Broker stream failed, poisoning messenger");
                        state_captured.lock().poison(RequestError::ReadFrameError(e));
                        return;
                    }
                };

                let mut cursor = Cursor::new(msg);
                let header =
                    match ResponseHeader::read_versioned(&mut cursor, RESPONSE_HEADER_VERSION) {
                        Ok(header) => header,
                        Err(e) => {
                            warn!(%e, "Cannot read response header, ignoring message");
                            continue;
                        }
                    };

                let active = match state_captured.lock().deref_mut() {
                    MessengerState::RequestMap(map) => map.remove(&header.correlation_id.0),
                    MessengerState::Poisoned(_) => None,
                };

                match active {
                    Some(tx) => {
                        // we don't care if the other side is gone
                        tx.send(Response {
                            header,
                            data: cursor,
                        })
                        .ok();
                    }
                    None => {
                        warn!(
                            correlation_id = header.correlation_id.0,
                            "Got response for unknown request",
                        );
                    }
                }
            }
        });

        Self {
            stream_write: AsyncMutex::new(stream_write),
            client_id,
            correlation_id: AtomicI32::new(0),
            version_ranges: RwLock::new(HashMap::new()),
            state,
            join_handle,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_version_ranges(&self, ranges: HashMap<ApiKey, ApiVersionRange>) {
        *self.version_ranges.write() = ranges;
    }

    /// Whether the stream failed. A poisoned messenger fails every request.
    pub fn is_poisoned(&self) -> bool {
        matches!(*self.state.lock(), MessengerState::Poisoned(_))
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        match &*self.state.lock() {
            MessengerState::RequestMap(map) => map.len(),
            MessengerState::Poisoned(_) => 0,
        }
    }

    /// Sends `msg` using the highest version both sides support.
    pub async fn request<R>(&self, msg: R) -> Result<R::ResponseBody, RequestError>
    where
        R: RequestBody + Send + WriteVersionedType<Vec<u8>>,
        R::ResponseBody: ReadVersionedType<Cursor<Vec<u8>>>,
    {
        self.request_in_range(msg, R::API_VERSION_RANGE).await
    }

    /// Sends `msg` using the highest version within `range` that both sides support.
    pub async fn request_in_range<R>(
        &self,
        msg: R,
        range: ApiVersionRange,
    ) -> Result<R::ResponseBody, RequestError>
    where
        R: RequestBody + Send + WriteVersionedType<Vec<u8>>,
        R::ResponseBody: ReadVersionedType<Cursor<Vec<u8>>>,
    {
        let version = self
            .version_ranges
            .read()
            .get(&R::API_KEY)
            .and_then(|server| {
                range
                    .intersect(&R::API_VERSION_RANGE)
                    .and_then(|ours| server.best_match(&ours))
            })
            .ok_or(RequestError::NoVersionMatch {
                api_key: R::API_KEY,
            })?;

        self.request_with_version(&msg, version).await
    }

    async fn request_with_version<R>(
        &self,
        msg: &R,
        version: ApiVersion,
    ) -> Result<R::ResponseBody, RequestError>
    where
        R: RequestBody + Send + WriteVersionedType<Vec<u8>>,
        R::ResponseBody: ReadVersionedType<Cursor<Vec<u8>>>,
    {
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::SeqCst);

        let header = RequestHeader {
            request_api_key: R::API_KEY,
            request_api_version: version,
            correlation_id: Int32(correlation_id),
            client_id: NullableString(Some(self.client_id.to_string())),
        };

        let mut buf = Vec::new();
        header.write_versioned(&mut buf, REQUEST_HEADER_VERSION)?;
        msg.write_versioned(&mut buf, version)?;

        let (tx, rx) = channel();

        match self.state.lock().deref_mut() {
            MessengerState::RequestMap(map) => {
                map.insert(correlation_id, tx);
            }
            MessengerState::Poisoned(e) => {
                return Err(RequestError::Poisoned(Arc::clone(e)));
            }
        }

        let mut guard = PendingRequestGuard {
            state: Arc::clone(&self.state),
            correlation_id,
            write_started: false,
            finished: false,
        };

        let written = {
            let mut stream_write = self.stream_write.lock().await;
            guard.write_started = true;
            match stream_write.write_message(&buf).await {
                Ok(()) => stream_write.flush().await.map_err(RequestError::from),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = written {
            guard.finished = true;
            return Err(RequestError::Poisoned(self.state.lock().poison(e)));
        }

        let response = rx.await;
        guard.finished = true;
        let mut response = match response {
            Ok(response) => response,
            Err(_) => {
                // the reader task drops all senders when it poisons the state
                let closed = std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "response channel closed",
                );
                return Err(RequestError::Poisoned(
                    self.state.lock().poison(RequestError::IO(closed)),
                ));
            }
        };

        let body = R::ResponseBody::read_versioned(&mut response.data, version)?;

        let read_bytes = response.data.position();
        let message_bytes = response.data.get_ref().len() as u64;
        if read_bytes != message_bytes {
            return Err(RequestError::TooMuchData {
                message_size: message_bytes,
                read: read_bytes,
                api_key: R::API_KEY,
                api_version: version,
            });
        }

        Ok(body)
    }

    /// Asks the broker which API versions it supports.
    ///
    /// Walks down from our highest `ApiVersions` version, because brokers answer requests for versions they do not
    /// know with a version 0 error response.
    pub async fn sync_versions(&self) -> Result<(), SyncVersionsError> {
        let range = ApiVersionsRequest::API_VERSION_RANGE;

        for v in (range.min().0.0..=range.max().0.0).rev() {
            let version = ApiVersion::new(v);

            match self
                .request_with_version(&ApiVersionsRequest, version)
                .await
            {
                Ok(response) => {
                    if let Some(e) = response.error_code {
                        debug!(%e, %version, "Got error during version sync, trying lower version");
                        continue;
                    }

                    let ranges: HashMap<_, _> = response
                        .api_keys
                        .into_iter()
                        .filter(|x| x.min_version <= x.max_version)
                        .map(|x| (x.api_key, ApiVersionRange::new(x.min_version, x.max_version)))
                        .collect();

                    debug!(versions = ?ranges, "Detected supported broker versions");
                    *self.version_ranges.write() = ranges;
                    return Ok(());
                }
                Err(e @ (RequestError::ReadError(_) | RequestError::TooMuchData { .. })) => {
                    debug!(%e, %version, "Cannot read ApiVersions response, trying lower version");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncVersionsError::NoWorkingVersion)
    }
}

impl<RW> std::fmt::Debug for Messenger<RW> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("client_id", &self.client_id)
            .field("correlation_id", &self.correlation_id)
            .field("version_ranges", &*self.version_ranges.read())
            .finish_non_exhaustive()
    }
}

impl<RW> Drop for Messenger<RW> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}
