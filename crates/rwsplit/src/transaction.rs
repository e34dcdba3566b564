//! Transaction control on the primary session.
//!
//! Transactions never look at statement text: `begin`, `commit` and
//! `rollback` always use the primary, connecting it if needed. There is
//! no nesting and no savepoints; a second `begin` only turns autocommit
//! off again.

use rwsplit_core::{Error, Result, SqlClient};
use tracing::{debug, warn};

use crate::connector::Connector;
use crate::driver::Driver;
use crate::manager::ConnectionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// Autocommit is on
    #[default]
    Idle,
    /// Autocommit is off until the next commit or rollback
    InTransaction,
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

impl<C: Connector> Driver<C> {
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction == TransactionState::InTransaction
    }

    /// Turn autocommit off on the primary.
    #[tracing::instrument(level = "debug", skip(self), fields(driver = %self.name))]
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            warn!("begin called inside an open transaction; nesting is not supported");
        }
        let outcome = self
            .connections
            .ensure(ConnectionKind::Primary)
            .map_err(Error::from)
            .and_then(|client| client.set_autocommit(false));
        match outcome {
            Ok(()) => {
                self.transaction = TransactionState::InTransaction;
                Ok(())
            }
            Err(e) => Err(self.transaction_failed(e)),
        }
    }

    /// Commit on the primary, then turn autocommit back on.
    #[tracing::instrument(level = "debug", skip(self), fields(driver = %self.name))]
    pub fn commit(&mut self) -> Result<()> {
        self.finish(Finish::Commit)
    }

    /// Roll back on the primary, then turn autocommit back on.
    #[tracing::instrument(level = "debug", skip(self), fields(driver = %self.name))]
    pub fn rollback(&mut self) -> Result<()> {
        self.finish(Finish::Rollback)
    }

    fn finish(&mut self, how: Finish) -> Result<()> {
        if !self.in_transaction() {
            debug!(?how, "No transaction open; sending anyway");
        }
        let client = match self.connections.ensure(ConnectionKind::Primary) {
            Ok(client) => client,
            Err(e) => return Err(self.transaction_failed(e.into())),
        };
        let ended = match how {
            Finish::Commit => client.commit(),
            Finish::Rollback => client.rollback(),
        };
        // autocommit is restored even when the commit itself failed
        let restored = client.set_autocommit(true);
        self.transaction = TransactionState::Idle;

        match ended.and(restored) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.transaction_failed(e)),
        }
    }

    fn transaction_failed(&mut self, err: Error) -> Error {
        warn!(driver = %self.name, error = %err, "Transaction control failed");
        self.record_error(err.to_string(), err.code());
        err
    }
}

