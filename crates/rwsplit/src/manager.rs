//! The primary and replica sessions of one driver.
//!
//! Server 0 of the active profile is the primary; any other server is a
//! replica candidate, and the replica for a new session is drawn from
//! servers `1..N` only. With a single configured server there is exactly
//! one session, reachable as both kinds.

use rwsplit_core::error::{ConnectionError, ConnectionErrorKind, Error};
use rwsplit_core::{Result, SqlClient};
use tracing::{debug, warn};

use crate::config::ServerDescriptor;
use crate::connector::Connector;
use crate::selector::ReplicaSelector;

/// Which session a statement or accessor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// The write server, index 0
    Primary,
    /// A read server drawn from the remaining indices
    Replica,
}

/// What `close` tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseScope {
    Primary,
    Replica,
    #[default]
    Both,
}

impl From<ConnectionKind> for CloseScope {
    fn from(kind: ConnectionKind) -> Self {
        match kind {
            ConnectionKind::Primary => CloseScope::Primary,
            ConnectionKind::Replica => CloseScope::Replica,
        }
    }
}

struct Session<T> {
    client: T,
    /// Index of the server this session talks to
    server: usize,
}

/// Owns at most one primary and one replica session.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    servers: Vec<ServerDescriptor>,
    selector: Box<dyn ReplicaSelector>,
    /// Also the only session when a single server is configured
    primary: Option<Session<C::Client>>,
    replica: Option<Session<C::Client>>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.servers.len())
            .field("primary", &self.server_index(ConnectionKind::Primary))
            .field("replica", &self.server_index(ConnectionKind::Replica))
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// `servers` must be non-empty; configuration validation guarantees it.
    pub fn new(
        connector: C,
        servers: Vec<ServerDescriptor>,
        selector: Box<dyn ReplicaSelector>,
    ) -> Self {
        Self {
            connector,
            servers,
            selector,
            primary: None,
            replica: None,
        }
    }

    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    /// One server: primary and replica are the same session.
    pub fn is_single_server(&self) -> bool {
        self.servers.len() == 1
    }

    fn slot(&self, kind: ConnectionKind) -> Option<&Session<C::Client>> {
        match kind {
            ConnectionKind::Replica if !self.is_single_server() => self.replica.as_ref(),
            _ => self.primary.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: ConnectionKind) -> &mut Option<Session<C::Client>> {
        match kind {
            ConnectionKind::Replica if !self.is_single_server() => &mut self.replica,
            _ => &mut self.primary,
        }
    }

    pub fn is_open(&self, kind: ConnectionKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Index of the server behind the open session of `kind`.
    pub fn server_index(&self, kind: ConnectionKind) -> Option<usize> {
        self.slot(kind).map(|s| s.server)
    }

    /// Shared view of the open session of `kind`.
    pub fn client_ref(&self, kind: ConnectionKind) -> Option<&C::Client> {
        self.slot(kind).map(|s| &s.client)
    }

    /// The open session of `kind`, without connecting.
    pub fn client(&mut self, kind: ConnectionKind) -> Option<&mut C::Client> {
        self.slot_mut(kind).as_mut().map(|s| &mut s.client)
    }

    fn pick_server(&mut self, kind: ConnectionKind) -> usize {
        let replicas = self.servers.len().saturating_sub(1);
        match kind {
            ConnectionKind::Replica if replicas > 0 => {
                1 + self.selector.select(replicas) % replicas
            }
            _ => 0,
        }
    }

    /// Open a fresh session of `kind`, replacing any session in that slot.
    pub fn connect(&mut self, kind: ConnectionKind) -> std::result::Result<(), ConnectionError> {
        if let Err(e) = self.close_slot(kind) {
            warn!(error = %e, ?kind, "Failed to close replaced session");
        }
        let server = self.pick_server(kind);
        let client = self.open(server)?;
        *self.slot_mut(kind) = Some(Session { client, server });
        Ok(())
    }

    /// The session of `kind`, connecting first if none is open.
    pub fn ensure(
        &mut self,
        kind: ConnectionKind,
    ) -> std::result::Result<&mut C::Client, ConnectionError> {
        if !self.is_open(kind) {
            self.connect(kind)?;
        }
        self.client(kind).ok_or_else(|| {
            ConnectionError::new(ConnectionErrorKind::Disconnected, "session vanished after connect")
        })
    }

    fn open(&self, index: usize) -> std::result::Result<C::Client, ConnectionError> {
        let server = self.servers.get(index).ok_or_else(|| {
            ConnectionError::new(
                ConnectionErrorKind::Connect,
                format!("no server configured at index {index}"),
            )
        })?;
        debug!(server = index, address = %server.address(), "Opening connection");

        let mut client = self.connector.connect(server)?;
        if !server.charset.is_empty() {
            if let Err(e) = client.set_charset(&server.charset) {
                if let Err(close_err) = client.close() {
                    debug!(error = %close_err, "Close after charset failure failed");
                }
                return Err(charset_error(&server.charset, e));
            }
        }
        Ok(client)
    }

    fn close_slot(&mut self, kind: ConnectionKind) -> Result<()> {
        let Some(mut session) = self.slot_mut(kind).take() else {
            return Ok(());
        };
        debug!(server = session.server, ?kind, "Closing connection");
        session.client.close()
    }

    /// Close the selected sessions. Closing what is not open succeeds.
    pub fn close(&mut self, scope: CloseScope) -> Result<()> {
        match scope {
            CloseScope::Primary => self.close_slot(ConnectionKind::Primary),
            CloseScope::Replica => self.close_slot(ConnectionKind::Replica),
            CloseScope::Both => {
                let replica = self.close_slot(ConnectionKind::Replica);
                let primary = self.close_slot(ConnectionKind::Primary);
                replica.and(primary)
            }
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close(CloseScope::Both) {
            debug!(error = %e, "Error closing connections on drop");
        }
    }
}

fn charset_error(charset: &str, err: Error) -> ConnectionError {
    ConnectionError {
        kind: ConnectionErrorKind::Charset,
        code: err.code(),
        message: format!("cannot apply charset '{charset}': {err}"),
        source: Some(Box::new(err)),
    }
}
