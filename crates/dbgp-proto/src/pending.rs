//! Pending command table.
//!
//! Tracks outstanding commands by transaction id and routes each reply to
//! the caller waiting on it through a oneshot channel. An entry is removed
//! before its reply is delivered, so no caller is resolved twice.
use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::DbgpError;
use crate::message::CommandResponse;

/// What a waiting caller receives.
pub type Reply = Result<CommandResponse, DbgpError>;

/// Who is waiting on a transaction.
#[derive(Debug)]
pub enum Pending {
    /// An API caller holding the receiving half.
    Caller {
        /// Command name, for logs.
        command: String,
        /// Where the reply goes.
        tx: oneshot::Sender<Reply>,
    },
    /// The session's own break-on-first-line `step_into`.
    Bootstrap,
}

/// Outcome of routing a reply.
#[derive(Debug)]
pub enum Resolution {
    /// Delivered to a caller (or the caller had already gone away).
    Delivered,
    /// The reply belongs to the bootstrap command; the session handles it.
    Bootstrap(Reply),
    /// Nothing was waiting on this transaction id.
    Unknown,
}

/// Outstanding transactions of one session.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u32, Pending>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a caller and return the receiver for its reply.
    pub fn register(&mut self, id: u32, command: impl Into<String>) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            Pending::Caller {
                command: command.into(),
                tx,
            },
        );
        rx
    }

    /// Register the bootstrap command.
    pub fn register_bootstrap(&mut self, id: u32) {
        self.entries.insert(id, Pending::Bootstrap);
    }

    /// Route a reply to whoever waits on `id`.
    pub fn resolve(&mut self, id: u32, reply: Reply) -> Resolution {
        match self.entries.remove(&id) {
            Some(Pending::Caller { command, tx }) => {
                if tx.send(reply).is_err() {
                    tracing::debug!(id, %command, "reply receiver dropped");
                }
                Resolution::Delivered
            }
            Some(Pending::Bootstrap) => Resolution::Bootstrap(reply),
            None => {
                tracing::debug!(id, "reply for unknown transaction id");
                Resolution::Unknown
            }
        }
    }

    /// Drop an entry whose deadline passed. Returns true if it was pending.
    pub fn expire(&mut self, id: u32) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Fail every entry with `error`. Returns true if the bootstrap command
    /// was among them.
    pub fn fail_all(&mut self, error: &DbgpError) -> bool {
        let mut bootstrap = false;
        for (_, pending) in self.entries.drain() {
            match pending {
                Pending::Caller { tx, .. } => {
                    let _ = tx.send(Err(error.clone()));
                }
                Pending::Bootstrap => bootstrap = true,
            }
        }
        bootstrap
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// How many transactions are outstanding.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
