use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection to configuration endpoint failed: {0}")]
    Connection(#[source] std::io::Error),
    #[error("reading discovery response failed: {0}")]
    Scanner(#[source] std::io::Error),
    #[error("malformed discovery response: {0}")]
    MalformedResponse(String),
    #[error("invalid server endpoint {0}")]
    InvalidEndpoint(String),
    #[error("no servers configured or available")]
    NoServers,
    #[error("membership watcher is already running")]
    WatcherRunning,
    #[error("membership watcher is stopped, create a new one to watch again")]
    WatcherStopped,
}

impl Error {
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Scanner(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedResponse(_))
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use crate::error::Error;

    #[test]
    fn test_error_kinds() {
        assert!(Error::Connection(ErrorKind::ConnectionRefused.into()).is_connection());
        assert!(Error::Scanner(ErrorKind::ConnectionReset.into()).is_connection());
        assert!(!Error::MalformedResponse("bad port".to_string()).is_connection());
        assert!(Error::MalformedResponse("bad port".to_string()).is_malformed());
        assert!(!Error::NoServers.is_malformed());
    }
}
