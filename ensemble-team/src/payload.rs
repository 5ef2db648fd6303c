//! Team creation payloads for both execution modes.

use serde::{Deserialize, Serialize};

use crate::error::TeamError;
use crate::prompt::{PromptRenderer, SubTask};
use crate::template::TeamTemplate;

/// Create-team request for a runtime with native multi-agent teams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTeamPayload {
    pub team_name: String,
    pub description: String,
    pub delegate_mode: bool,
    pub teammates: Vec<NativeTeammate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTeammate {
    /// `<agent>-<n>`, 1-based, unique within the team.
    pub name: String,
    pub agent: String,
    pub role: String,
    pub domain: String,
    pub instructions: String,
    pub prompt: String,
}

/// Fallback mode: one orchestrator prompt that dispatches sub-agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentPayload {
    pub team_name: String,
    pub orchestrator_prompt: String,
    pub tasks: Vec<SubTask>,
}

fn description_or(template: &TeamTemplate, team_name: &str) -> String {
    template
        .description
        .clone()
        .unwrap_or_else(|| format!("{team_name} team"))
}

/// Map a template onto a create-team request; absent fields fall back
/// deterministically (`name` → `fallback_name`, `instructions` →
/// `"{role} agent for {domain}"`).
pub fn build_native_team_payload(
    template: &TeamTemplate,
    fallback_name: &str,
    prompts: &PromptRenderer,
) -> Result<NativeTeamPayload, TeamError> {
    let team_name = template.name_or(fallback_name).to_string();
    let teammates = template
        .teammates
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Ok(NativeTeammate {
                name: format!("{}-{}", t.agent, i + 1),
                agent: t.agent.clone(),
                role: t.role().to_string(),
                domain: t.domain().to_string(),
                instructions: t.instructions(),
                prompt: prompts.teammate_prompt(t, template, &team_name)?,
            })
        })
        .collect::<Result<Vec<_>, TeamError>>()?;
    Ok(NativeTeamPayload {
        description: description_or(template, &team_name),
        team_name,
        delegate_mode: template.delegate_mode,
        teammates,
    })
}

pub fn build_subagent_payload(
    template: &TeamTemplate,
    fallback_name: &str,
    prompts: &PromptRenderer,
) -> Result<SubagentPayload, TeamError> {
    let team_name = template.name_or(fallback_name).to_string();
    let tasks = template
        .teammates
        .iter()
        .map(|t| {
            Ok(SubTask {
                agent: t.agent.clone(),
                role: t.role().to_string(),
                prompt: prompts.teammate_prompt(t, template, &team_name)?,
            })
        })
        .collect::<Result<Vec<_>, TeamError>>()?;
    let description = description_or(template, &team_name);
    let orchestrator_prompt = prompts.orchestrator_prompt(&team_name, &description, &tasks)?;
    Ok(SubagentPayload {
        team_name,
        orchestrator_prompt,
        tasks,
    })
}
