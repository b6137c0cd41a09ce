use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced to callers of the monitor. Page-level failures are
/// recoverable and handled inside the loop, so they never appear here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("monitor is not running")]
    MonitorStopped,
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_self_describing() {
        assert_eq!(
            AppError::config("bad tick").to_string(),
            "configuration error: bad tick"
        );
        assert_eq!(AppError::MonitorStopped.to_string(), "monitor is not running");
    }
}
