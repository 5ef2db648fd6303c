//! Session lifecycle for ensemble: worktree creation, merge integration,
//! merge history, cleanup.
//!
//! Entry point is [`LifecycleManager`]; the modules below it are usable on
//! their own.

pub mod cleanup;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod merge;
pub mod multiplexer;
pub mod spawn;
pub mod validate;
pub mod worktree;

pub use cleanup::{AutoConfirm, CleanupAction, CleanupReport, Confirm, DenyAll, Finding, FindingKind};
pub use error::SessionError;
pub use history::{HistoryEntry, HistoryLog, MergeHistory};
pub use lifecycle::{
    CreateRequest, CreatedSession, EndOptions, EndOutcome, LifecycleManager, SessionStatus,
    StatusReport, SwitchTarget,
};
pub use merge::{IntegrateOptions, MergeBlock, MergeReport, MergeStrategy, Mergeability};
pub use multiplexer::{Multiplexer, MuxSession, NoMultiplexer, TmuxMultiplexer};
pub use spawn::SpawnRequest;
