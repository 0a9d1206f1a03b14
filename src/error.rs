use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Failures of the serial link itself. These are fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open serial port '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a command/response exchange that did not yield a line.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Transport(TransportError::Io(err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_duration() {
        let err = ChannelError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "no response within 1.5s");
    }

    #[test]
    fn test_io_error_becomes_transport_error() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
        let err: ChannelError = io_err.into();
        assert!(matches!(
            err,
            ChannelError::Transport(TransportError::Io(_))
        ));
        assert!(err.to_string().contains("unplugged"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = ConfigError::Invalid("spreading factor 13 outside 7..=12".into());
        assert!(err.to_string().starts_with("invalid configuration"));
    }
}
