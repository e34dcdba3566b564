//! Blocking MySQL client for rwsplit.
//!
//! Speaks the MySQL text protocol over `std::net::TcpStream`:
//!
//! - Packet framing with sequence numbers, split payloads over 16MB
//! - Authentication (`mysql_native_password`, `caching_sha2_password`
//!   including RSA full authentication, auth switch)
//! - `COM_QUERY` with text result sets, `COM_STATISTICS`, `COM_PING`,
//!   `COM_QUIT`
//! - String escaping that honours `NO_BACKSLASH_ESCAPES`
//!
//! [`MySqlConnection`] implements [`rwsplit_core::SqlClient`], which is all
//! the routing engine needs.
//!
//! # Example
//!
//! ```rust,ignore
//! use rwsplit_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let result = conn.query("SELECT 1")?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection};
