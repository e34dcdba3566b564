//! Opening client sessions for server descriptors.

use std::time::Duration;

use rwsplit_core::{ConnectionError, SqlClient};
use rwsplit_mysql::{MySqlConfig, MySqlConnection};

use crate::config::ServerDescriptor;

/// Opens one session to one server.
///
/// Charset selection is not the connector's job; the connection manager
/// applies the descriptor's charset once the session is open.
pub trait Connector {
    type Client: SqlClient;

    fn connect(&self, server: &ServerDescriptor) -> Result<Self::Client, ConnectionError>;
}

/// Connects with the blocking MySQL client.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl Default for MySqlConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl MySqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout for the TCP connect and for every socket read and write.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Client configuration for `server`.
    pub fn config_for(&self, server: &ServerDescriptor) -> MySqlConfig {
        MySqlConfig::new()
            .host(server.hostname.as_str())
            .port(server.port)
            .user(server.username.as_str())
            .password(server.password.as_str())
            .database(server.database.as_str())
            .connect_timeout(self.connect_timeout)
            .attribute("program_name", "rwsplit")
    }
}

impl Connector for MySqlConnector {
    type Client = MySqlConnection;

    fn connect(&self, server: &ServerDescriptor) -> Result<MySqlConnection, ConnectionError> {
        MySqlConnection::connect(self.config_for(server)).map_err(ConnectionError::from)
    }
}
