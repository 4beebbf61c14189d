//! Store error types

/// Error type for store client operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("ping failed: {0}")]
    Ping(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error(transparent)]
    Config(#[from] keylock_common::ConfigError),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("no script registered for digest {0}")]
    UnknownScript(String),

    #[error("store is offline")]
    Offline,

    #[error("store client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(StoreError::Closed.to_string(), "store client is closed");
        assert_eq!(StoreError::Offline.to_string(), "store is offline");
        assert_eq!(
            StoreError::UnexpectedReply("Int(7)".to_string()).to_string(),
            "unexpected reply: Int(7)"
        );
    }

    #[test]
    fn test_from_redis_error() {
        let err: StoreError = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe")).into();
        assert!(matches!(err, StoreError::Redis(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err: StoreError = keylock_common::ConfigError::Invalid("ring.shards is empty".into()).into();
        assert_eq!(err.to_string(), "invalid configuration: ring.shards is empty");
    }
}
