//! Declarative transaction scopes.
//!
//! [`Session::declare_transaction`] hands out a [`TransactionToken`] that borrows the
//! session. The token derefs to the session, so work inside the scope goes through
//! it. A token that opened a transaction level applies its final action when dropped
//! unless it was finished explicitly.

use crate::Session;
use std::ops::{Deref, DerefMut};
use tabula_core::{Result, SqlBackend};

/// How a scope relates to an already active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPropagation {
    /// Join the active transaction or begin one
    Require,
    /// Join the active transaction if there is one
    Support,
    /// Must run outside any transaction
    DontSupport,
}

/// What a token does when it goes out of scope unfinished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    Commit,
    Rollback,
}

/// Guard for one declared transaction scope.
pub struct TransactionToken<'s, B: SqlBackend> {
    session: &'s mut Session<B>,
    propagation: TransactionPropagation,
    final_action: TransactionAction,
    engaged: bool,
    finished: bool,
}

impl<'s, B: SqlBackend> TransactionToken<'s, B> {
    pub(crate) fn new(
        session: &'s mut Session<B>,
        propagation: TransactionPropagation,
        final_action: TransactionAction,
        engaged: bool,
    ) -> Self {
        Self {
            session,
            propagation,
            final_action,
            engaged,
            finished: false,
        }
    }

    pub fn propagation(&self) -> TransactionPropagation {
        self.propagation
    }

    pub fn final_action(&self) -> TransactionAction {
        self.final_action
    }

    pub fn set_final_action(&mut self, action: TransactionAction) {
        self.final_action = action;
    }

    /// Whether this token began the transaction level it will finish.
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Commit the level this token began. A no-op for tokens that began nothing.
    pub fn commit(&mut self) -> Result<()> {
        self.finish(TransactionAction::Commit)
    }

    /// Roll back the level this token began. A no-op for tokens that began nothing.
    pub fn rollback(&mut self) -> Result<()> {
        self.finish(TransactionAction::Rollback)
    }

    fn finish(&mut self, action: TransactionAction) -> Result<()> {
        if !self.engaged || self.finished {
            return Ok(());
        }
        self.finished = true;
        match action {
            TransactionAction::Commit => self.session.commit_transaction(),
            TransactionAction::Rollback => self.session.rollback_transaction(),
        }
    }
}

impl<B: SqlBackend> Deref for TransactionToken<'_, B> {
    type Target = Session<B>;

    fn deref(&self) -> &Session<B> {
        self.session
    }
}

impl<B: SqlBackend> DerefMut for TransactionToken<'_, B> {
    fn deref_mut(&mut self) -> &mut Session<B> {
        self.session
    }
}

impl<B: SqlBackend> Drop for TransactionToken<'_, B> {
    fn drop(&mut self) {
        if self.engaged && !self.finished {
            let action = self.final_action;
            if let Err(e) = self.finish(action) {
                tracing::warn!(action = ?action, error = %e, "Failed to finish transaction scope");
            }
        }
    }
}
