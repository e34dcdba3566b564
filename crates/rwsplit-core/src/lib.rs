//! Core types and traits for rwsplit.
//!
//! This crate provides the pieces shared by the routing engine and the
//! database drivers:
//!
//! - [`Value`] and [`Row`] for parameters and result cells
//! - the [`Error`] taxonomy (`ConnectionError`, `QueryError`, ...)
//! - the [`SqlClient`] capability every driver connection implements

pub mod client;
pub mod error;
pub mod row;
pub mod value;

pub use client::{QueryResult, SqlClient};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
