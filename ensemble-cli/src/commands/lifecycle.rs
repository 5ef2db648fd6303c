//! `ensemble create | switch | end | spawn | check | cleanup | history | status`

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use colored::Colorize;
use dialoguer::Confirm as Prompt;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ensemble_core::paths::session_state_path;
use ensemble_core::store::read_document;
use ensemble_core::SessionId;
use ensemble_session::worktree::SharedLink;
use ensemble_session::{
    AutoConfirm, CleanupAction, CleanupReport, CreateRequest, DenyAll, EndOptions,
    Finding, MergeReport, MergeStrategy, SpawnRequest, StatusReport,
};
use ensemble_team::{ActiveTeam, SessionState};

use super::session::session_table;
use super::{age, display_path, emit, ok_mark, Globals};

// ---------------------------------------------------------------------------
// create / spawn
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Branch for the new worktree; created from the integration branch if absent.
    pub branch: String,

    #[arg(long, short = 'n')]
    pub nickname: Option<String>,
}

impl CreateArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let manager = globals.lifecycle()?;
        let branch = self.branch.clone();
        let created = manager
            .create_session(CreateRequest {
                branch: self.branch,
                nickname: self.nickname,
            })
            .with_context(|| format!("failed to create session on '{branch}'"))?;
        emit(globals, &created, |c| {
            println!("{} Created session {} on {}", ok_mark(), c.id, c.branch);
            println!("  path:   {}", display_path(&c.path));
            match &c.shared {
                SharedLink::Symlink { target } => {
                    println!("  shared: symlink -> {}", target.display())
                }
                SharedLink::Copied { files } => {
                    println!("  shared: copied ({files} files; symlink unavailable)")
                }
            }
            println!("  run:    {}", c.launch_command);
        })
    }
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["count", "branches", "from_epic"]),
))]
pub struct SpawnArgs {
    /// Number of sessions on generated `<prefix>-<n>` branches.
    #[arg(long)]
    pub count: Option<usize>,

    /// Branch prefix for `--count`.
    #[arg(long, default_value = "session", requires = "count")]
    pub prefix: String,

    /// Comma-separated branch names.
    #[arg(long, value_delimiter = ',')]
    pub branches: Option<Vec<String>>,

    /// Epic YAML: `{ name, stories: [{ id, title?, branch? }] }`.
    #[arg(long, value_name = "FILE")]
    pub from_epic: Option<PathBuf>,
}

impl SpawnArgs {
    fn request(self) -> SpawnRequest {
        match (self.count, self.branches, self.from_epic) {
            (Some(count), _, _) => SpawnRequest::Count {
                count,
                prefix: self.prefix,
            },
            (None, Some(branches), _) => SpawnRequest::Branches(branches),
            (None, None, Some(path)) => SpawnRequest::Epic(path),
            (None, None, None) => SpawnRequest::Branches(Vec::new()),
        }
    }

    pub fn run(self, globals: &Globals) -> Result<()> {
        let manager = globals.lifecycle()?;
        let created = manager
            .spawn(&self.request())
            .context("spawn failed")?;
        emit(globals, &created, |all| {
            for c in all {
                println!("{} Session {} on {} ({})", ok_mark(), c.id, c.branch, display_path(&c.path));
            }
            println!("{} session(s) created", all.len());
        })
    }
}

// ---------------------------------------------------------------------------
// switch / end / check
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct SwitchArgs {
    pub id: SessionId,
}

impl SwitchArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let target = globals
            .lifecycle()?
            .switch(self.id)
            .with_context(|| format!("cannot switch to session {}", self.id))?;
        emit(globals, &target, |t| println!("{}", t.launch_command))
    }
}

#[derive(Args, Debug)]
pub struct EndArgs {
    pub id: SessionId,

    /// Integrate into the integration branch before ending.
    #[arg(long)]
    pub merge: bool,

    /// squash | merge
    #[arg(long, default_value_t = MergeStrategy::Squash, requires = "merge")]
    pub strategy: MergeStrategy,
}

impl EndArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let outcome = globals
            .lifecycle()?
            .end(
                self.id,
                EndOptions {
                    merge: self.merge,
                    strategy: self.strategy,
                },
            )
            .with_context(|| format!("failed to end session {}", self.id))?;
        emit(globals, &outcome, |o| {
            if o.lock_released {
                println!("{} Released lock for session {}", ok_mark(), o.session_id);
            } else {
                println!("Session {} held no lock", o.session_id);
            }
            if let Some(report) = &o.merge {
                print_merge(report);
            }
            if o.removed {
                println!("{} Session {} removed", ok_mark(), o.session_id);
            }
        })
    }
}

fn print_merge(report: &MergeReport) {
    if report.success {
        println!(
            "{} Merged {} into {} ({}, {} commit(s))",
            ok_mark(),
            report.branch,
            report.target_branch,
            report.strategy,
            report.commits_count
        );
        return;
    }
    if report.has_conflicts {
        println!(
            "{} Conflicts merging {}; target left unchanged:",
            "✗".red().bold(),
            report.branch
        );
        for path in &report.conflicts {
            println!("    {path}");
        }
        return;
    }
    let reason = report
        .reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("{} Not merged: {}", "✗".yellow().bold(), reason);
    if let Some(message) = &report.message {
        println!("    {message}");
    }
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    pub id: SessionId,
}

impl CheckArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let verdict = globals
            .lifecycle()?
            .check_mergeability(self.id)
            .with_context(|| format!("cannot check session {}", self.id))?;
        emit(globals, &verdict, |v| {
            if v.mergeable {
                println!(
                    "{} Session {} is mergeable ({} commit(s) ahead)",
                    ok_mark(),
                    self.id,
                    v.commits_ahead
                );
                return;
            }
            let reason = v.reason.map(|r| r.to_string()).unwrap_or_default();
            println!("{} Session {} is not mergeable: {}", "✗".yellow().bold(), self.id, reason);
            for detail in &v.details {
                println!("    {detail}");
            }
        })
    }
}

// ---------------------------------------------------------------------------
// cleanup
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Apply every suggested action without asking.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Interactive y/N per finding; a failed prompt counts as "no".
fn ask(finding: &Finding) -> bool {
    Prompt::new()
        .with_prompt(format!("{}: {}?", finding.subject, action_label(&finding.action)))
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn action_label(action: &CleanupAction) -> String {
    match action {
        CleanupAction::RemoveWorktree { path } => format!("remove worktree {}", path.display()),
        CleanupAction::DeleteSession {
            id,
            remove_worktree: true,
        } => format!("delete session {id} and its worktree"),
        CleanupAction::DeleteSession { id, .. } => format!("delete session {id}"),
        CleanupAction::KillMultiplexerSession { name } => format!("kill multiplexer session {name}"),
    }
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "subject")]
    subject: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "action")]
    action: String,
}

impl CleanupArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let manager = globals.lifecycle()?;
        let findings = manager.cleanup_scan().context("cleanup scan failed")?;

        if !globals.json && !findings.is_empty() {
            let rows = findings.iter().map(|f| FindingRow {
                kind: serde_json::to_value(f.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                subject: f.subject.clone(),
                detail: f.detail.clone(),
                action: action_label(&f.action),
            });
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }

        let interactive = !globals.json && std::io::stdin().is_terminal();
        let report = if self.yes {
            manager.cleanup_apply(findings, &mut AutoConfirm)
        } else if interactive {
            manager.cleanup_apply(findings, &mut ask)
        } else {
            manager.cleanup_apply(findings, &mut DenyAll)
        };
        emit(globals, &report, |r| print_cleanup(r, self.yes || interactive))
    }
}

fn print_cleanup(report: &CleanupReport, could_apply: bool) {
    if report.findings == 0 {
        println!("{} Nothing to clean up", ok_mark());
        return;
    }
    for applied in &report.applied {
        match &applied.error {
            None => println!("{} {}", ok_mark(), action_label(&applied.finding.action)),
            Some(err) => println!(
                "{} {}: {}",
                "✗".red().bold(),
                action_label(&applied.finding.action),
                err
            ),
        }
    }
    if !report.skipped.is_empty() {
        println!("{} finding(s) left as is", report.skipped.len());
        if !could_apply {
            println!("Run 'ensemble cleanup --yes' to apply every suggested action.");
        }
    }
}

// ---------------------------------------------------------------------------
// history / status
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Newest entries to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "session")]
    session: u64,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "into")]
    target: String,
    #[tabled(rename = "strategy")]
    strategy: String,
    #[tabled(rename = "commits")]
    commits: u32,
    #[tabled(rename = "result")]
    result: String,
}

impl HistoryArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let entries = globals
            .lifecycle()?
            .history(Some(self.limit))
            .context("failed to read merge history")?;
        emit(globals, &entries, |entries| {
            if entries.is_empty() {
                println!("No merges recorded.");
                return;
            }
            let rows = entries.iter().map(|e| HistoryRow {
                when: format!("{} ago", age(e.timestamp)),
                session: e.session_id.0,
                branch: e.branch.clone(),
                target: e.target_branch.clone(),
                strategy: e.strategy.to_string(),
                commits: e.commits_count,
                result: if e.success { "merged" } else { "failed" }.to_string(),
            });
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        })
    }
}

#[derive(Serialize)]
struct StatusView {
    #[serde(flatten)]
    report: StatusReport,
    /// Team running in the current worktree, if any.
    active_team: Option<ActiveTeam>,
}

pub fn status(globals: &Globals) -> Result<()> {
    let report = globals
        .lifecycle()?
        .status()
        .context("failed to read session registry")?;
    let state: SessionState = read_document(&session_state_path(&globals.cwd)).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "unreadable session state document");
        SessionState::default()
    });
    let view = StatusView {
        report,
        active_team: state.active_team,
    };
    emit(globals, &view, |v| {
        println!(
            "Ensemble v{} | {} | {} session(s) | integrates into {}",
            env!("CARGO_PKG_VERSION"),
            v.report.project_name.bold(),
            v.report.sessions.len(),
            v.report.integration_branch
        );
        if let Some(team) = &v.active_team {
            println!(
                "Team '{}' active ({}, {} teammates, started {} ago)",
                team.template,
                team.mode,
                team.teammates,
                age(team.started_at)
            );
        }
        if v.report.sessions.is_empty() {
            println!("No sessions registered.");
            return;
        }
        let sessions: Vec<_> = v.report.sessions.iter().map(|s| s.session.clone()).collect();
        println!("{}", session_table(&sessions));
        for s in &v.report.sessions {
            if !s.path_exists {
                println!(
                    "{} session {}: {} is missing",
                    "!".yellow().bold(),
                    s.session.id,
                    display_path(&s.session.path)
                );
            }
        }
        let live = v.report.sessions.iter().filter(|s| s.live).count();
        println!("{live} live, {} idle", v.report.sessions.len() - live);
    })
}
