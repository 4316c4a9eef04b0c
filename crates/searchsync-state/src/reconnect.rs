//! A lazily (re)established connection shared behind a mutex.
//!
//! Network-backed stores keep one connection and rebuild it on the next call
//! once it is found dead, so a dropped connection costs one failed call
//! instead of every call for the rest of the process.

use std::sync::Mutex;

use crate::error::{self, StateError};

/// How a store opens its connection type and tells whether it still works.
pub(crate) trait Link: Sized {
    /// Open a new connection.
    fn connect(target: &str) -> error::Result<Self>;

    /// Whether the connection can still be used.
    fn is_alive(&self) -> bool;

    /// Whether `err` means the connection itself is gone.
    fn is_fatal(&self, err: &StateError) -> bool;
}

pub(crate) struct Reconnecting<C> {
    target: String,
    slot: Mutex<Option<C>>,
}

impl<C: Link> Reconnecting<C> {
    /// Connect now, failing if the target is unreachable.
    pub(crate) fn open(target: impl Into<String>) -> error::Result<Self> {
        let target = target.into();
        let conn = C::connect(&target)?;
        Ok(Self {
            target,
            slot: Mutex::new(Some(conn)),
        })
    }

    /// Run `op` on a live connection, reconnecting first if needed. A
    /// connection that dies during `op` is dropped so the next call reconnects.
    pub(crate) fn with<T, E>(&self, op: impl FnOnce(&mut C) -> Result<T, E>) -> error::Result<T>
    where
        StateError: From<E>,
    {
        let mut slot = self.slot.lock().map_err(|_| StateError::LockPoisoned)?;
        let conn = match slot.take() {
            Some(conn) if conn.is_alive() => conn,
            stale => {
                if stale.is_some() {
                    tracing::warn!("Checkpoint store connection lost, reconnecting");
                }
                C::connect(&self.target)?
            }
        };
        let conn = slot.insert(conn);
        let result = op(conn).map_err(StateError::from);
        if let Err(err) = &result {
            if !conn.is_alive() || conn.is_fatal(err) {
                *slot = None;
            }
        }
        result
    }
}
