//! `ensemble team start | stop | status | list | tool`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ensemble_team::{TeamCoordinator, TeamError, TeamStartReport};

use super::{age, emit, ok_mark, refused, Globals};

#[derive(Subcommand, Debug)]
pub enum TeamCommand {
    /// Start a team from a template in the current worktree.
    Start {
        /// Template name (built-in or `.ensemble/teams/<name>.yaml`).
        template: String,
    },

    /// Stop the running team and record its metrics.
    Stop,

    /// Show the running team and accumulated metrics.
    Status,

    /// List available templates.
    List,

    /// Record a tool call against the running team's trace.
    Tool {
        name: String,
    },
}

pub fn run(command: TeamCommand, globals: &Globals) -> Result<()> {
    let coordinator =
        TeamCoordinator::open(&globals.cwd).context("failed to open team coordinator")?;
    match command {
        TeamCommand::Start { template } => match coordinator.start_team(&template) {
            Ok(report) => emit(globals, &report, print_start),
            Err(err @ TeamError::TeamAlreadyActive { .. }) => {
                refused(globals, "team_already_active", err)
            }
            Err(err) => Err(err).with_context(|| format!("failed to start team '{template}'")),
        },
        TeamCommand::Stop => match coordinator.stop_team() {
            Ok(report) => emit(globals, &report, |r| {
                println!(
                    "{} Team '{}' stopped after {:.1}s",
                    ok_mark(),
                    r.template,
                    r.duration_ms as f64 / 1000.0
                );
                println!(
                    "  teams completed: {}, tasks completed: {}",
                    r.metrics.teams_completed, r.metrics.tasks_completed
                );
            }),
            Err(err @ TeamError::NoActiveTeam) => refused(globals, "no_active_team", err),
            Err(err) => Err(err).context("failed to stop team"),
        },
        TeamCommand::Status => {
            let state = coordinator.state().context("failed to read session state")?;
            emit(globals, &state, |s| {
                match &s.active_team {
                    Some(team) => println!(
                        "Team '{}' active: {} mode, {} teammates, started {} ago (trace {})",
                        team.template.bold(),
                        team.mode,
                        team.teammates,
                        age(team.started_at),
                        team.trace_id
                    ),
                    None => println!("No active team."),
                }
                println!(
                    "teams completed: {}, tasks completed: {}",
                    s.team_metrics.teams_completed, s.team_metrics.tasks_completed
                );
            })
        }
        TeamCommand::List => list(&coordinator, globals),
        TeamCommand::Tool { name } => {
            let record = coordinator
                .record_tool_invocation(&name)
                .context("failed to record tool invocation")?;
            emit(globals, &record, |_| {})
        }
    }
}

fn print_start(report: &TeamStartReport) {
    println!(
        "{} Team '{}' started ({} mode, {} teammates)",
        ok_mark(),
        report.team_name,
        report.mode,
        report.teammate_count
    );
    println!("  trace: {}", report.trace_id);
    if let Some(native) = &report.native_payload {
        for mate in &native.teammates {
            println!("  {} {} ({})", "•".cyan(), mate.name, mate.role);
        }
    }
    if let Some(sub) = &report.subagent_payload {
        println!();
        println!("{}", sub.orchestrator_prompt);
    }
}

#[derive(Serialize, Tabled)]
struct TemplateRow {
    #[tabled(rename = "template")]
    name: String,
    #[tabled(rename = "teammates")]
    teammates: usize,
    #[tabled(rename = "description")]
    description: String,
}

fn list(coordinator: &TeamCoordinator, globals: &Globals) -> Result<()> {
    let templates = coordinator.templates();
    let rows: Vec<TemplateRow> = templates
        .names()
        .into_iter()
        .filter_map(|name| {
            let template = templates.get(name)?;
            Some(TemplateRow {
                name: name.to_string(),
                teammates: template.teammates.len(),
                description: template.description.clone().unwrap_or_default(),
            })
        })
        .collect();
    emit(globals, &rows, |rows| {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    })
}
