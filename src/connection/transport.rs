use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Plain TCP connection to a broker.
pub type Transport = TcpStream;

/// Connects to `broker` (`host:port`), giving up after `timeout` if one is set.
pub async fn connect(broker: &str, timeout: Option<Duration>) -> Result<Transport> {
    let stream = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(broker))
            .await
            .map_err(|_| Error::Timeout(timeout))??,
        None => TcpStream::connect(broker).await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}
