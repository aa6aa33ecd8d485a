//! Fatal process errors.
//!
//! Every variant except [`StartupError::Runtime`] aborts the process before
//! it listens. The binary logs the error and exits with status 1.

use std::path::PathBuf;

use gatehouse_core::ConfigError;

use crate::fanout::FanoutError;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("static directory `{}` is unusable: {source}", path.display())]
    Static {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fan-out adapter could not attach: {0}")]
    Broker(#[from] FanoutError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("module graph failed: {0:#}")]
    Service(anyhow::Error),
    /// The server stopped with an error after it started listening.
    #[error("server failed while running: {0:#}")]
    Runtime(anyhow::Error),
}

impl StartupError {
    /// Whether the process failed before it started serving.
    #[must_use]
    pub fn is_startup(&self) -> bool {
        !matches!(self, Self::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::BrokerError;

    #[test]
    fn messages_name_the_failing_part() {
        let err = StartupError::from(ConfigError::InvalidRole("cron".to_string()));
        assert!(err.to_string().contains("invalid role `cron`"));

        let err = StartupError::Bind {
            addr: "0.0.0.0:4000".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to bind 0.0.0.0:4000"));

        let err = StartupError::Static {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("`/nope`"));
    }

    #[test]
    fn runtime_failures_are_not_startup_failures() {
        let err = StartupError::Runtime(anyhow::anyhow!("accept loop died"));
        assert!(!err.is_startup());
        assert_eq!(err.to_string(), "server failed while running: accept loop died");

        let err = StartupError::Service(anyhow::anyhow!("init failed"));
        assert!(err.is_startup());
    }

    #[test]
    fn broker_errors_convert() {
        let err: StartupError =
            FanoutError::Broker(BrokerError::Unavailable("down".to_string())).into();
        assert!(matches!(err, StartupError::Broker(_)));
    }
}
