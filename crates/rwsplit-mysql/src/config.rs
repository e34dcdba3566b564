//! Connection parameters for one MySQL server.

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::charset;

/// MySQL connection configuration.
#[derive(Clone)]
pub struct MySqlConfig {
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Default schema selected at handshake
    pub database: Option<String>,
    /// Collation id announced in the handshake response
    pub charset: u8,
    /// Applies to the TCP connect and to every socket read and write
    pub connect_timeout: Duration,
    /// Sent as connection attributes when non-empty
    pub attributes: HashMap<String, String>,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            attributes: HashMap::new(),
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password. An empty password is the same as none.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    /// Set the default schema. An empty name selects none.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        self.database = (!database.is_empty()).then_some(database);
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    /// Announce the collation for a character set name; unknown names keep
    /// the current collation.
    pub fn charset_name(mut self, name: &str) -> Self {
        if let Some(id) = charset::collation_for(name) {
            self.charset = id;
        }
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// `host:port` for `ToSocketAddrs`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Capability flags requested in the handshake response.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS;
        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }
        flags
    }
}
