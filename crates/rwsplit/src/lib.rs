//! A database handle that splits reads from writes.
//!
//! A [`Driver`] talks to one primary and any number of replicas taken from
//! the active profile of a [`DbConfig`]. Statements starting with `SELECT`
//! are reads and go to a randomly chosen replica; everything else goes to
//! the primary. Once the primary has taken a write, reads follow it so a
//! session always sees its own writes.
//!
//! ```rust,ignore
//! use rwsplit::prelude::*;
//!
//! let config = DbConfig::from_json_str(&std::fs::read_to_string("db.json")?)?;
//! let mut registry = Registry::new(config);
//! let db = registry.instance("default")?;
//!
//! let heroes = db.select("SELECT name FROM heroes WHERE age > %d", &params![18]);
//! let id = db.insert_array("heroes", &[("name", Value::from("Spider-Man"))]);
//! let renamed = db.update_array(
//!     "heroes",
//!     &[("name", Value::from("Spidey"))],
//!     "WHERE id = %d",
//!     &params![id.unwrap_or_default()],
//! );
//! ```
//!
//! Parameters are escaped by the connection that runs the statement and
//! substituted printf-style; see [`statement`] for the exact rules.

pub mod config;
pub mod connector;
pub mod driver;
pub mod manager;
pub mod registry;
pub mod result;
pub mod selector;
pub mod statement;
pub mod transaction;

pub use config::{DbConfig, Profile, ServerDescriptor};
pub use connector::{Connector, MySqlConnector};
pub use driver::{Driver, DriverOptions, LastError};
pub use manager::{CloseScope, ConnectionKind, ConnectionManager};
pub use registry::{DEFAULT_INSTANCE, Registry};
pub use result::{Lookup, ResultSet};
pub use rwsplit_core::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    Row, SqlClient, Value,
};
pub use selector::{RandomSelector, ReplicaSelector};
pub use statement::StatementKind;
pub use transaction::TransactionState;

/// Build a parameter array from values convertible into [`Value`].
///
/// ```rust,ignore
/// db.select("SELECT * FROM t WHERE a = '%s' AND b = %d", &params!["x", 2]);
/// ```
#[macro_export]
macro_rules! params {
    ($($value:expr),* $(,)?) => {
        [$($crate::Value::from($value)),*]
    };
}

pub mod prelude {
    pub use crate::{
        CloseScope, ConnectionKind, DbConfig, Driver, DriverOptions, Error, Lookup, QueryError,
        Registry, Result, ResultSet, Row, ServerDescriptor, Value, params,
    };
}
