//! # User Store
//!
//! A small persistent record store: an in-memory table of users, mutated
//! concurrently, serialized to a single data file by a pluggable flush
//! scheduler.
//!
//! ## Core Concepts
//!
//! - **Store**: the authoritative in-memory table plus the id counter
//! - **Codec**: the fixed-schema encoding of that table (JSON or MessagePack)
//! - **Scheduler**: decides when the table is flushed to disk (manual,
//!   write-through, interval, on request, and always once at shutdown)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use userdb::{DataFile, FlushPolicy, Format, Scheduler, Store, User};
//!
//! # fn main() -> userdb::Result<()> {
//! let file = DataFile::new("data.json", Format::Json);
//! let store = Arc::new(Store::open(&file)?);
//! let mut scheduler = Scheduler::start(Arc::clone(&store), file, FlushPolicy::WriteThrough)?;
//!
//! let user = store.create(User::draft("Vasya", 35))?;
//! store.update(user.id, &User::with_age(36))?;
//!
//! scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

// Re-exports
pub use codec::{Codec, DataFile, Format};
pub use config::{Args, Config};
pub use error::{Result, StoreError};
pub use scheduler::{FlushPolicy, FlushStats, Flusher, Scheduler, SchedulerHandle};
pub use store::{MutationListener, Store, Table};
pub use types::{User, UserId};
