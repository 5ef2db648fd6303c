//! Team-of-agents coordination: templates, prompts, payloads and the
//! start/stop lifecycle recorded in each worktree's state document.

pub mod coordinator;
pub mod error;
pub mod payload;
pub mod prompt;
pub mod state;
pub mod template;

pub use coordinator::{
    EnvModeProvider, ModeProvider, TeamCoordinator, TeamStartReport, TeamStopReport,
    TEAM_MODE_ENV,
};
pub use error::TeamError;
pub use payload::{
    build_native_team_payload, build_subagent_payload, NativeTeamPayload, NativeTeammate,
    SubagentPayload,
};
pub use prompt::{PromptRenderer, SubTask};
pub use state::{ActiveTeam, SessionState, TeamMetrics};
pub use template::{QualityGates, TeamTemplate, Teammate, TemplateSet};
