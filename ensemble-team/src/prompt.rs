//! Tera-rendered teammate and orchestrator prompts.

use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use ensemble_core::paths::{CONVENTIONS_FILE, SHARED_DIR, STATE_DIR, STATUS_FILE};

use crate::error::TeamError;
use crate::template::{QualityGates, TeamTemplate, Teammate};

const TEAMMATE: &str = "teammate.md";
const ORCHESTRATOR: &str = "orchestrator.md";

const TPLS: &[(&str, &str)] = &[
    (TEAMMATE, include_str!("templates/teammate.md.tera")),
    (ORCHESTRATOR, include_str!("templates/orchestrator.md.tera")),
];

#[derive(Debug, Serialize)]
struct TeammateCtx<'a> {
    team_name: &'a str,
    agent: &'a str,
    role: &'a str,
    domain: &'a str,
    instructions: String,
    gates: Option<&'a QualityGates>,
    conventions_path: String,
    status_path: String,
}

/// One sub-task in the orchestrator prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub agent: String,
    pub role: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
struct OrchestratorCtx<'a> {
    team_name: &'a str,
    description: &'a str,
    tasks: &'a [SubTask],
    status_path: String,
}

/// `.ensemble/shared/<file>`, as seen from a worktree root.
fn shared_file(file: &str) -> String {
    format!("{STATE_DIR}/{SHARED_DIR}/{file}")
}

pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    pub fn new() -> Result<Self, TeamError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TPLS.iter().copied())?;
        Ok(Self { tera })
    }

    /// Role section, quality gates (only when declared), shared context.
    pub fn teammate_prompt(
        &self,
        teammate: &Teammate,
        template: &TeamTemplate,
        team_name: &str,
    ) -> Result<String, TeamError> {
        let ctx = TeammateCtx {
            team_name,
            agent: &teammate.agent,
            role: teammate.role(),
            domain: teammate.domain(),
            instructions: teammate.instructions(),
            gates: template.gates(),
            conventions_path: shared_file(CONVENTIONS_FILE),
            status_path: shared_file(STATUS_FILE),
        };
        let rendered = self
            .tera
            .render(TEAMMATE, &Context::from_serialize(&ctx)?)?;
        Ok(rendered.trim().to_string())
    }

    /// Single prompt that hands every task to its own sub-agent.
    pub fn orchestrator_prompt(
        &self,
        team_name: &str,
        description: &str,
        tasks: &[SubTask],
    ) -> Result<String, TeamError> {
        let ctx = OrchestratorCtx {
            team_name,
            description,
            tasks,
            status_path: shared_file(STATUS_FILE),
        };
        let rendered = self
            .tera
            .render(ORCHESTRATOR, &Context::from_serialize(&ctx)?)?;
        Ok(rendered.trim().to_string())
    }
}
