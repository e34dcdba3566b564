//! The read/write splitting handle.

use rwsplit_core::{ConfigError, Error, QueryError, QueryErrorKind, Result, Row, SqlClient, Value};
use tracing::{debug, trace, warn};

use crate::config::{DbConfig, ServerDescriptor};
use crate::connector::{Connector, MySqlConnector};
use crate::manager::{CloseScope, ConnectionKind, ConnectionManager};
use crate::result::{Lookup, ResultSet};
use crate::selector::{RandomSelector, ReplicaSelector};
use crate::statement::{self, StatementKind};
use crate::transaction::TransactionState;

/// Behavior switches of a [`Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Send reads to the primary once it is open or has taken a write
    pub stick_to_primary_after_write: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            stick_to_primary_after_write: true,
        }
    }
}

/// The most recent failure seen by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub message: String,
    /// Native server error code, when there was one
    pub code: Option<u16>,
}

/// One logical database handle over a primary and its replicas.
///
/// Statements whose text starts with `SELECT` are reads and go to a replica
/// until the primary has been used; every other statement is a write and
/// goes to the primary. Connections open lazily and close on [`close`] or
/// when the driver is dropped.
///
/// [`execute`] reports failures as `Err`. The convenience methods built on
/// it (`select*`, `insert`, `update`, `delete`, `replace` and the array
/// builders) log the failure and return `None` or [`Lookup::Failed`]
/// instead; the error stays readable through [`error`].
///
/// [`close`]: Driver::close
/// [`execute`]: Driver::execute
/// [`error`]: Driver::error
pub struct Driver<C: Connector = MySqlConnector> {
    pub(crate) name: String,
    pub(crate) connections: ConnectionManager<C>,
    options: DriverOptions,
    wrote: bool,
    last_sql: Option<String>,
    result: Option<ResultSet>,
    pub(crate) last_error: Option<LastError>,
    pub(crate) transaction: TransactionState,
}

impl<C: Connector> std::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("connections", &self.connections)
            .field("options", &self.options)
            .field("wrote", &self.wrote)
            .field("last_sql", &self.last_sql)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

impl Driver<MySqlConnector> {
    /// A MySQL-backed driver over the active profile of `config`.
    pub fn new(name: impl Into<String>, config: &DbConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_connector(name, config, MySqlConnector::new())
    }
}

impl<C: Connector> Driver<C> {
    /// Replicas are picked uniformly at random.
    pub fn with_connector(
        name: impl Into<String>,
        config: &DbConfig,
        connector: C,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_selector(name, config, connector, Box::new(RandomSelector::new()))
    }

    pub fn with_selector(
        name: impl Into<String>,
        config: &DbConfig,
        connector: C,
        selector: Box<dyn ReplicaSelector>,
    ) -> std::result::Result<Self, ConfigError> {
        let servers = config.active_servers()?.to_vec();
        let name = name.into();
        debug!(driver = %name, profile = %config.active, servers = servers.len(), "Creating driver");
        Ok(Self {
            name,
            connections: ConnectionManager::new(connector, servers, selector),
            options: DriverOptions::default(),
            wrote: false,
            last_sql: None,
            result: None,
            last_error: None,
            transaction: TransactionState::Idle,
        })
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_stick_to_primary_after_write(&mut self, enabled: bool) {
        self.options.stick_to_primary_after_write = enabled;
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Has a write been sent through this driver?
    pub fn has_written(&self) -> bool {
        self.wrote
    }

    fn route(&self, kind: StatementKind) -> ConnectionKind {
        match kind {
            StatementKind::Write => ConnectionKind::Primary,
            StatementKind::Read
                if self.options.stick_to_primary_after_write
                    && (self.wrote || self.connections.is_open(ConnectionKind::Primary)) =>
            {
                ConnectionKind::Primary
            }
            StatementKind::Read => ConnectionKind::Replica,
        }
    }

    /// Run a statement and keep its result as the current one.
    ///
    /// Parameters are escaped by the chosen connection, get their `%` and
    /// `_` backslash-prefixed, and are substituted into `template` (see
    /// [`statement`]). The previous result is released first. The final
    /// text, or the template when substitution fails, becomes
    /// [`last_query`](Self::last_query) whatever the outcome.
    pub fn execute(&mut self, template: &str, params: &[Value]) -> std::result::Result<&ResultSet, QueryError> {
        let set = self.dispatch(template, params)?;
        Ok(self.result.insert(set))
    }

    #[tracing::instrument(level = "debug", skip(self, params), fields(driver = %self.name))]
    fn dispatch(&mut self, template: &str, params: &[Value]) -> std::result::Result<ResultSet, QueryError> {
        self.free();
        self.last_error = None;

        let kind = StatementKind::classify(template);
        let target = self.route(kind);
        trace!(?kind, ?target, "Routing statement");

        let client = match self.connections.ensure(target) {
            Ok(client) => client,
            Err(e) => return Err(self.fail(template.to_string(), QueryError::from_connection(e))),
        };
        let sql = match statement::render(template, params, |raw| client.escape_string(raw)) {
            Ok(sql) => sql,
            Err(e) => return Err(self.fail(template.to_string(), e)),
        };

        if kind == StatementKind::Write {
            self.wrote = true;
        }
        trace!(sql = %sql, "Dispatching statement");
        match client.query(&sql) {
            Ok(raw) => {
                self.last_sql = Some(sql);
                Ok(ResultSet::new(raw, target))
            }
            Err(e) => Err(self.fail(sql, into_query_error(e))),
        }
    }

    fn fail(&mut self, sql: String, mut err: QueryError) -> QueryError {
        err.sql = Some(sql.clone());
        debug!(driver = %self.name, code = ?err.code, error = %err, "Statement failed");
        self.record_error(err.message.clone(), err.code);
        self.last_sql = Some(sql);
        err
    }

    pub(crate) fn record_error(&mut self, message: String, code: Option<u16>) {
        self.last_error = Some(LastError { message, code });
    }

    /// Run the statement for a convenience method; `false` on failure.
    fn attempt(&mut self, op: &'static str, template: &str, params: &[Value]) -> bool {
        match self.dispatch(template, params) {
            Ok(set) => {
                self.result = Some(set);
                true
            }
            Err(e) => {
                warn!(driver = %self.name, op, error = %e, "Statement failed");
                false
            }
        }
    }

    /// All rows of a query.
    pub fn select(&mut self, template: &str, params: &[Value]) -> Option<&[Row]> {
        if !self.attempt("select", template, params) {
            return None;
        }
        self.result.as_ref().map(ResultSet::rows)
    }

    /// The whole result of a query.
    pub fn select_object(&mut self, template: &str, params: &[Value]) -> Option<&ResultSet> {
        if !self.attempt("select_object", template, params) {
            return None;
        }
        self.result.as_ref()
    }

    /// The first row of a query.
    pub fn select_row(&mut self, template: &str, params: &[Value]) -> Lookup<&Row> {
        if !self.attempt("select_row", template, params) {
            return Lookup::Failed;
        }
        self.result.as_ref().and_then(ResultSet::first_row).into()
    }

    /// Every cell of every row, row-major.
    pub fn select_flat(&mut self, template: &str, params: &[Value]) -> Option<Vec<Value>> {
        if !self.attempt("select_flat", template, params) {
            return None;
        }
        self.result.as_ref().map(ResultSet::flat)
    }

    /// First column of the first row. Falsy values such as `0` or NULL are
    /// returned as found.
    pub fn select_value(&mut self, template: &str, params: &[Value]) -> Lookup<Value> {
        if !self.attempt("select_value", template, params) {
            return Lookup::Failed;
        }
        self.result
            .as_ref()
            .and_then(ResultSet::first_value)
            .cloned()
            .into()
    }

    /// Run an `INSERT` and return the primary's last insert id.
    pub fn insert(&mut self, template: &str, params: &[Value]) -> Option<u64> {
        if !self.attempt("insert", template, params) {
            return None;
        }
        self.insert_id()
    }

    /// Run an `UPDATE` and return the primary's affected-row count.
    pub fn update(&mut self, template: &str, params: &[Value]) -> Option<u64> {
        if !self.attempt("update", template, params) {
            return None;
        }
        self.primary_affected_rows()
    }

    /// Run a `DELETE` and return the primary's affected-row count.
    pub fn delete(&mut self, template: &str, params: &[Value]) -> Option<u64> {
        if !self.attempt("delete", template, params) {
            return None;
        }
        self.primary_affected_rows()
    }

    /// Run a `REPLACE` and return its result.
    pub fn replace(&mut self, template: &str, params: &[Value]) -> Option<&ResultSet> {
        if !self.attempt("replace", template, params) {
            return None;
        }
        self.result.as_ref()
    }

    fn primary_affected_rows(&self) -> Option<u64> {
        self.connections
            .client_ref(ConnectionKind::Primary)
            .map(SqlClient::affected_rows)
    }

    /// Build a statement whose values are escaped by the primary.
    fn build_on_primary<F>(&mut self, op: &'static str, build: F) -> Option<String>
    where
        F: FnOnce(&dyn Fn(&str) -> String) -> std::result::Result<String, QueryError>,
    {
        let built = match self.connections.ensure(ConnectionKind::Primary) {
            Ok(client) => build(&|raw: &str| client.escape_string(raw)),
            Err(e) => Err(QueryError::from_connection(e)),
        };
        match built {
            Ok(sql) => Some(sql),
            Err(e) => {
                warn!(driver = %self.name, op, error = %e, "Could not build statement");
                self.record_error(e.message, e.code);
                None
            }
        }
    }

    /// Insert one row from column/value pairs and return the insert id.
    ///
    /// Values are escaped by the primary and sent as double-quoted
    /// literals; NULL is sent bare.
    pub fn insert_array(&mut self, table: &str, fields: &[(&str, Value)]) -> Option<u64> {
        let sql = self.build_on_primary("insert_array", |escape| {
            statement::build_insert(table, fields, escape)
        })?;
        self.insert(&sql, &[])
    }

    /// Update from column/value pairs, appending `extra` (typically a
    /// `WHERE` clause, which may hold conversions for `params`). Returns
    /// the affected-row count.
    pub fn update_array(
        &mut self,
        table: &str,
        fields: &[(&str, Value)],
        extra: &str,
        params: &[Value],
    ) -> Option<u64> {
        let formatted = !params.is_empty();
        let sql = self.build_on_primary("update_array", |escape| {
            let head = statement::build_update(table, fields, "", escape)?;
            // the formatting pass must leave `%` in built values alone
            let head = if formatted { head.replace('%', "%%") } else { head };
            let extra = extra.trim();
            Ok(if extra.is_empty() { head } else { format!("{head} {extra}") })
        })?;
        self.update(&sql, params)
    }

    /// Message of the most recent failure, if the last operation failed.
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn error_code(&self) -> Option<u16> {
        self.last_error.as_ref().and_then(|e| e.code)
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// The last statement text sent, or attempted.
    pub fn last_query(&self) -> Option<&str> {
        self.last_sql.as_deref()
    }

    /// The current result, if one is held.
    pub fn result(&self) -> Option<&ResultSet> {
        self.result.as_ref()
    }

    /// Row count of the current result; `None` when the last statement
    /// returned no result set, as a write does.
    pub fn rows(&self) -> Option<usize> {
        self.result
            .as_ref()
            .filter(|set| set.has_result_set())
            .map(ResultSet::num_rows)
    }

    /// Affected-row count of the current result.
    pub fn affected_rows(&self) -> Option<u64> {
        self.result.as_ref().map(ResultSet::affected_rows)
    }

    /// Last insert id of the primary session; `None` when it is not open.
    pub fn insert_id(&self) -> Option<u64> {
        self.connections
            .client_ref(ConnectionKind::Primary)
            .map(SqlClient::last_insert_id)
    }

    /// Release the current result. Returns whether there was one.
    pub fn free(&mut self) -> bool {
        let released = self.result.take().is_some();
        if released {
            trace!(driver = %self.name, "Released result");
        }
        released
    }

    /// Close sessions. Closing what is not open succeeds.
    pub fn close(&mut self, scope: CloseScope) -> Result<()> {
        debug!(driver = %self.name, ?scope, "Closing connections");
        self.connections.close(scope)
    }

    pub fn is_connected(&self, kind: ConnectionKind) -> bool {
        self.connections.is_open(kind)
    }

    /// The server behind the open session of `kind`.
    pub fn connected_server(&self, kind: ConnectionKind) -> Option<&ServerDescriptor> {
        self.connections
            .server_index(kind)
            .and_then(|i| self.connections.servers().get(i))
    }

    /// Status line of the open session of `kind`; never connects.
    pub fn stat(&mut self, kind: ConnectionKind) -> Option<String> {
        let client = self.connections.client(kind)?;
        match client.stat() {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(driver = %self.name, ?kind, error = %e, "Could not read server status");
                None
            }
        }
    }

    /// Version number of the open session of `kind`; never connects.
    pub fn server_version(&self, kind: ConnectionKind) -> Option<u32> {
        self.connections
            .client_ref(kind)
            .map(SqlClient::server_version)
    }
}

impl<C: Connector> Drop for Driver<C> {
    fn drop(&mut self) {
        self.free();
        if let Err(e) = self.connections.close(CloseScope::Both) {
            debug!(driver = %self.name, error = %e, "Error closing connections on drop");
        }
    }
}

fn into_query_error(err: Error) -> QueryError {
    match err {
        Error::Query(q) => q,
        Error::Connection(c) => QueryError::from_connection(c),
        other => {
            let kind = if other.is_connection_error() {
                QueryErrorKind::Connection
            } else {
                QueryErrorKind::Database
            };
            QueryError {
                kind,
                code: other.code(),
                sqlstate: None,
                sql: None,
                message: other.to_string(),
                source: Some(Box::new(other)),
            }
        }
    }
}
