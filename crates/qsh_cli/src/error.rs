use thiserror::Error;

/// Convenience alias for `Result<T, ConsoleError>`.
pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Errors surfaced by the console while talking to the remote engine or
/// rendering results.
///
/// - `Connection`: engine unreachable or auth rejected; fails the attempted operation only
/// - `Statement`: engine rejected the SQL; reported, session continues
/// - `Cancelled`: user interrupt; reported as a cancellation, not a failure
/// - `CacheRefresh`: completion catalog lookup failed; swallowed by callers
/// - `Scan`: reading a row failed mid-stream; aborts that result stream
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Statement(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("cache refresh failed: {0}")]
    CacheRefresh(String),

    #[error("scan error: {0}")]
    Scan(String),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ConsoleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConsoleError::Cancelled)
    }

    /// Errors that leave the connection itself unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, ConsoleError::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_displays_engine_message_verbatim() {
        let e = ConsoleError::Statement("line 1:8: Column 'x' cannot be resolved".into());
        assert_eq!(e.to_string(), "line 1:8: Column 'x' cannot be resolved");
    }

    #[test]
    fn test_cancelled_is_not_connection() {
        assert!(ConsoleError::Cancelled.is_cancelled());
        assert!(!ConsoleError::Cancelled.is_connection());
        assert!(ConsoleError::Connection("refused".into()).is_connection());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let e: ConsoleError = io.into();
        assert!(matches!(e, ConsoleError::Io(_)));
        assert!(e.to_string().contains("pipe closed"));
    }
}
