//! `ensemble register | list | get | delete | thread`

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use ensemble_core::{RegistryError, Session, SessionId, TransitionOptions};
use ensemble_session::SessionError;

use super::{age, display_path, emit, ok_mark, refused, Globals};

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Human-friendly name for this session.
    #[arg(long, short = 'n')]
    pub nickname: Option<String>,
}

impl RegisterArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let registry = globals.registry()?;
        let registration = registry
            .register(&globals.cwd, self.nickname.as_deref())
            .with_context(|| format!("failed to register '{}'", globals.cwd.display()))?;
        emit(globals, &registration, |r| {
            if r.is_new {
                println!(
                    "{} Registered session {} ({})",
                    ok_mark(),
                    r.id,
                    r.session.branch
                );
            } else {
                println!("Already registered as session {} ({})", r.id, r.session.branch);
            }
        })
    }
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "thread")]
    thread: String,
    #[tabled(rename = "active")]
    active: String,
    #[tabled(rename = "path")]
    path: String,
}

impl From<&Session> for SessionRow {
    fn from(s: &Session) -> Self {
        let id = if s.is_main {
            format!("{} (main)", s.id)
        } else {
            s.id.to_string()
        };
        Self {
            id,
            name: s.display_name().to_string(),
            branch: s.branch.clone(),
            thread: s.thread_type().to_string(),
            active: age(s.last_active),
            path: display_path(&s.path),
        }
    }
}

pub fn session_table(sessions: &[Session]) -> Table {
    let mut table = Table::new(sessions.iter().map(SessionRow::from));
    table.with(Style::rounded());
    table
}

pub fn list(globals: &Globals) -> Result<()> {
    let listing = globals
        .registry()?
        .list()
        .context("failed to read session registry")?;
    emit(globals, &listing, |l| {
        if l.sessions.is_empty() {
            println!("No sessions registered.");
            println!("Run: ensemble register");
            return;
        }
        println!("{}", session_table(&l.sessions));
        if l.cleaned > 0 {
            println!("{}", format!("Removed {} stale lock file(s).", l.cleaned).bright_black());
        }
    })
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub id: SessionId,
}

impl GetArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let session = globals
            .registry()?
            .get(self.id)
            .context("failed to read session registry")?
            .ok_or_else(|| anyhow!("session {} not found", self.id))?;
        emit(globals, &session, |s| {
            println!("{}", session_table(std::slice::from_ref(s)));
            if let Some(merged) = s.merged_at {
                println!("merged {} ago", age(merged));
            }
        })
    }
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub id: SessionId,

    /// Also remove the session's git worktree.
    #[arg(long)]
    pub worktree: bool,
}

impl DeleteArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let manager = globals.lifecycle()?;
        match manager.delete(self.id, self.worktree) {
            Ok(session) => emit(globals, &session, |s| {
                println!("{} Deleted session {} ({})", ok_mark(), s.id, s.branch);
            }),
            Err(SessionError::Registry(err @ RegistryError::CannotDeleteMain(_))) => {
                refused(globals, "cannot_delete_main", err)
            }
            Err(err) => Err(err).with_context(|| format!("failed to delete session {}", self.id)),
        }
    }
}

#[derive(Args, Debug)]
pub struct ThreadArgs {
    pub id: SessionId,

    /// base | parallel | chained | fusion | big | long | zero
    pub thread_type: String,

    /// Apply even if the transition is not in the allowed table.
    #[arg(long)]
    pub force: bool,
}

impl ThreadArgs {
    pub fn run(self, globals: &Globals) -> Result<()> {
        let registry = globals.registry()?;
        let outcome = registry.transition_thread(
            self.id,
            &self.thread_type,
            TransitionOptions { force: self.force },
        );
        match outcome {
            Ok(outcome) => emit(globals, &outcome, |o| {
                if o.noop {
                    println!("Session {} is already {}", o.id, o.to);
                } else if o.forced {
                    println!(
                        "{} Session {}: {} -> {} {}",
                        ok_mark(),
                        o.id,
                        o.from,
                        o.to,
                        "(forced)".yellow()
                    );
                } else {
                    println!("{} Session {}: {} -> {}", ok_mark(), o.id, o.from, o.to);
                }
            }),
            Err(err @ RegistryError::InvalidTransition { .. }) => {
                refused(globals, "invalid_transition", err)
            }
            Err(err) => Err(err).context("thread transition failed"),
        }
    }
}
