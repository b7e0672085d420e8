//! The in-memory user table.
//!
//! [`Store`] is the single authority over user records for the lifetime of
//! the process. Readers (`get`, `list`, `count`, flush snapshots) share a
//! read lock; writers (`create`, `update`, `delete`) take the write lock, so
//! no reader ever observes a half-applied mutation. Callers always receive
//! owned copies, never references into the table.
//!
//! The store never touches durable storage itself. Persistence is driven
//! from the outside by the flush scheduler, which reads the table through
//! [`Store::with_table`] and may hook mutations through a
//! [`MutationListener`].

use crate::codec::DataFile;
use crate::error::{Result, StoreError};
use crate::types::{User, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Durable state of the store: every record plus the id counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "Users", alias = "users", default)]
    pub users: HashMap<UserId, User>,

    /// Last id handed out. Zero for a fresh store.
    #[serde(rename = "Counter", alias = "counter", default)]
    pub counter: u64,
}

impl Table {
    /// Check the invariants a decoded table must satisfy.
    ///
    /// Every map key must match the record it points to, and the counter
    /// must be at least as large as every id in the table.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, user) in &self.users {
            if *key != user.id {
                return Err(format!("record under key {} carries id {}", key, user.id));
            }
            if key.0 == 0 {
                return Err("record with id 0".to_string());
            }
            if key.0 > self.counter {
                return Err(format!(
                    "record id {} exceeds counter {}",
                    key, self.counter
                ));
            }
        }
        Ok(())
    }
}

/// Hook invoked after every successful mutation.
///
/// The listener runs on the mutating caller's thread after the write lock
/// has been released, so it may read the store again.
pub trait MutationListener: Send + Sync {
    fn mutated(&self, store: &Store);
}

/// Thread-safe user table with monotonically increasing ids.
pub struct Store {
    table: RwLock<Table>,
    listener: RwLock<Option<Arc<dyn MutationListener>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::from_table(Table::default())
    }

    /// Create a store holding previously loaded state.
    pub fn from_table(table: Table) -> Self {
        Self {
            table: RwLock::new(table),
            listener: RwLock::new(None),
        }
    }

    /// Build a store from the contents of `file`.
    ///
    /// A missing file yields an empty store; an unreadable one is an error
    /// and no store is built.
    pub fn open(file: &DataFile) -> Result<Self> {
        Ok(Self::from_table(file.load()?))
    }

    /// Install the mutation listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn MutationListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Remove the mutation listener.
    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    // --- Reads ---

    /// Get a copy of the user with the given id.
    pub fn get(&self, id: UserId) -> Result<User> {
        self.table
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Copy of every user, in no particular order.
    pub fn list(&self) -> Vec<User> {
        self.table.read().users.values().cloned().collect()
    }

    /// Number of users currently stored.
    pub fn count(&self) -> usize {
        self.table.read().users.len()
    }

    /// Last id handed out.
    pub fn counter(&self) -> u64 {
        self.table.read().counter
    }

    /// Owned copy of the full table, taken atomically.
    pub fn snapshot(&self) -> Table {
        self.table.read().clone()
    }

    /// Run `f` against the table while holding the read lock.
    ///
    /// Mutations wait until `f` returns; keep it to a single encoding pass.
    pub fn with_table<T>(&self, f: impl FnOnce(&Table) -> T) -> T {
        f(&self.table.read())
    }

    // --- Writes ---

    /// Insert a new user built from `draft`.
    ///
    /// Any id in the draft is ignored; the stored record gets the next
    /// counter value.
    pub fn create(&self, draft: User) -> Result<User> {
        let user = {
            let mut table = self.table.write();
            table.counter += 1;
            let user = User {
                id: UserId(table.counter),
                ..draft
            };
            table.users.insert(user.id, user.clone());
            user
        };

        debug!(id = %user.id, "created user");
        self.notify();
        Ok(user)
    }

    /// Merge `patch` into the user with the given id.
    ///
    /// Only non-empty fields of the patch are applied; see [`User::merge`].
    pub fn update(&self, id: UserId, patch: &User) -> Result<User> {
        let user = {
            let mut table = self.table.write();
            let user = table.users.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            user.merge(patch);
            user.clone()
        };

        debug!(id = %id, "updated user");
        self.notify();
        Ok(user)
    }

    /// Remove the user with the given id and return it.
    ///
    /// The id is retired: the counter is untouched, so it is never minted
    /// again.
    pub fn delete(&self, id: UserId) -> Result<User> {
        let user = self
            .table
            .write()
            .users
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;

        debug!(id = %id, "deleted user");
        self.notify();
        Ok(user)
    }

    fn notify(&self) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.mutated(self);
        }
    }
}
