//! Ensemble core library: atomic document store, session registry, lock
//! files, event log, project configuration.
//!
//! Public API surface:
//! - [`store`]: [`DocumentStore`], [`JsonFileStore`], [`MemoryStore`]
//! - [`registry`]: [`SessionRegistry`] (register, list, get, delete, transition)
//! - [`lockfile`]: per-session liveness markers
//! - [`events`]: append-only event log
//! - [`config`]: `config.yaml`
//! - [`paths`]: on-disk layout
//! - [`git`]: git subprocess helpers
//! - [`types`] / [`error`]

pub mod config;
pub mod error;
pub mod events;
pub mod git;
pub mod lockfile;
pub mod paths;
pub mod registry;
pub mod store;
pub mod types;

pub use config::ProjectConfig;
pub use error::{GitError, RegistryError, StoreError};
pub use events::{EventRecord, EventSink, JsonlEventBus, MemoryEventBus, NullEventBus};
pub use paths::Layout;
pub use registry::{
    DeleteOutcome, NewSession, Registration, SessionListing, SessionRegistry,
    TransitionOptions, TransitionOutcome,
};
pub use store::{DocumentStore, JsonFileStore, MemoryStore};
pub use types::{Registry, Session, SessionId, TeamMode, ThreadType};
