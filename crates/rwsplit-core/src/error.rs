//! Error types for rwsplit operations.
//!
//! Two failure families matter to callers of the routing engine:
//!
//! - [`ConnectionError`]: a server could not be reached, authenticated against,
//!   or configured (charset rejected). Raised by connection management.
//! - [`QueryError`]: a dispatched statement failed on the server, or the
//!   statement could not be built from its template. Carries the native error
//!   code and the fully substituted SQL text.
//!
//! The remaining variants cover wire-level and configuration problems.

use std::fmt;

/// The primary error type for all rwsplit operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authenticate, charset)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Protocol errors (wire-level)
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
}

/// Result type alias for rwsplit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    /// Native server error code, when the server sent one
    pub code: Option<u16>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused
    Refused,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// The server rejected the requested character set
    Charset,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Native server error code, when the server sent one
    pub code: Option<u16>,
    pub sqlstate: Option<String>,
    /// The fully substituted SQL text that was sent (or would have been)
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (duplicate key, foreign key)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Deadlock or lock wait timeout
    Deadlock,
    /// Template placeholders and parameters do not line up
    Template,
    /// No connection could be established for the statement
    Connection,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_) => true,
            Error::Query(q) => q.kind == QueryErrorKind::Connection,
            _ => false,
        }
    }

    /// Native server error code, if the failure came from the server.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Connection(c) => c.code,
            Error::Query(q) => q.code,
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the statement text to a query error. Other variants are
    /// returned unchanged.
    #[must_use]
    pub fn with_sql(self, sql: impl Into<String>) -> Self {
        match self {
            Error::Query(mut q) => {
                q.sql = Some(sql.into());
                Error::Query(q)
            }
            other => other,
        }
    }
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

impl From<Error> for ConnectionError {
    /// Collapse any failure seen while opening a connection into a
    /// `ConnectionError`, keeping the original as the source.
    fn from(err: Error) -> Self {
        match err {
            Error::Connection(c) => c,
            other => ConnectionError {
                kind: ConnectionErrorKind::Connect,
                code: other.code(),
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            sqlstate: None,
            sql: None,
            message: message.into(),
            source: None,
        }
    }

    /// A statement could not be sent because its connection failed to open.
    pub fn from_connection(err: ConnectionError) -> Self {
        Self {
            kind: QueryErrorKind::Connection,
            code: err.code,
            sqlstate: None,
            sql: None,
            message: format!("no connection available: {}", err.message),
            source: Some(Box::new(err)),
        }
    }

    /// Is this a duplicate key violation?
    pub fn is_duplicate_key(&self) -> bool {
        self.code == Some(1062)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            Error::Type(_) => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " ({})", code)?;
        }
        if let Some(sql) = &self.sql {
            write!(f, " [ {} ]", sql)?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid configuration document: {}", err),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display_includes_code_and_sql() {
        let mut q = QueryError::new(QueryErrorKind::Syntax, "You have an error in your SQL");
        q.code = Some(1064);
        q.sql = Some("SELEC 1".to_string());
        assert_eq!(
            Error::Query(q).to_string(),
            "Query error: You have an error in your SQL (1064) [ SELEC 1 ]"
        );
    }

    #[test]
    fn test_with_sql_only_touches_query_errors() {
        let err = Error::Query(QueryError::new(QueryErrorKind::Database, "boom")).with_sql("DO 1");
        assert_eq!(err.sql(), Some("DO 1"));

        let err = Error::Config(ConfigError {
            message: "bad".to_string(),
            source: None,
        })
        .with_sql("DO 1");
        assert_eq!(err.sql(), None);
    }

    #[test]
    fn test_connection_error_wrapped_in_query_error() {
        let conn = ConnectionError::new(ConnectionErrorKind::Authentication, "Access denied")
            .with_code(1045);
        let q = QueryError::from_connection(conn);
        assert_eq!(q.kind, QueryErrorKind::Connection);
        assert_eq!(q.code, Some(1045));

        let err = Error::Query(q);
        assert!(err.is_connection_error());
        let source = std::error::Error::source(&err).expect("connection error kept as source");
        assert_eq!(source.to_string(), "Access denied (1045)");
    }

    #[test]
    fn test_error_into_connection_error() {
        let proto = Error::Protocol(ProtocolError {
            message: "Unsupported protocol version: 9".to_string(),
            raw_data: None,
            source: None,
        });
        let conn = ConnectionError::from(proto);
        assert_eq!(conn.kind, ConnectionErrorKind::Connect);
        assert!(conn.message.contains("Unsupported protocol version"));
    }

    #[test]
    fn test_duplicate_key_detection() {
        let mut q = QueryError::new(QueryErrorKind::Constraint, "Duplicate entry");
        q.code = Some(1062);
        assert!(q.is_duplicate_key());
    }
}
