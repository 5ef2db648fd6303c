//! Batch session planning: counts, explicit branch lists, epic files.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, SessionError};
use crate::validate::{nickname_from, validate_branch};

/// Upper bound on sessions created by one `spawn`.
pub const MAX_SPAWN: usize = 64;

/// What `spawn` should create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnRequest {
    /// `count` sessions on generated `<prefix>-<n>` branches.
    Count { count: usize, prefix: String },
    Branches(Vec<String>),
    /// Epic YAML file; one session per story.
    Epic(PathBuf),
}

/// One planned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnItem {
    pub branch: String,
    pub nickname: Option<String>,
}

/// `{ name, stories: [{ id, title?, branch? }] }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Epic {
    pub name: String,
    #[serde(default)]
    pub stories: Vec<Story>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

pub fn load_epic(path: &Path) -> Result<Epic, SessionError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| SessionError::Epic {
        path: path.to_path_buf(),
        source,
    })
}

/// Branch slug component: lowercase `[a-z0-9-]`.
fn slug(text: &str) -> String {
    let s: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    s.split('-').filter(|p| !p.is_empty()).collect::<Vec<_>>().join("-")
}

pub fn epic_items(epic: &Epic) -> Vec<SpawnItem> {
    let epic_slug = slug(&epic.name);
    epic.stories
        .iter()
        .map(|story| SpawnItem {
            branch: story
                .branch
                .clone()
                .unwrap_or_else(|| format!("epic/{}/{}", epic_slug, slug(&story.id))),
            nickname: nickname_from(story.title.as_deref().unwrap_or(&story.id)),
        })
        .collect()
}

/// Resolve a request into validated items. `taken` reports branches that
/// already exist so generated names can skip them.
pub fn plan(
    request: &SpawnRequest,
    taken: impl Fn(&str) -> bool,
) -> Result<Vec<SpawnItem>, SessionError> {
    let items = match request {
        SpawnRequest::Count { count, prefix } => {
            if *count > MAX_SPAWN {
                return Err(SessionError::SpawnTooLarge {
                    requested: *count,
                    limit: MAX_SPAWN,
                });
            }
            let mut items = Vec::new();
            let mut n = 1;
            while items.len() < *count {
                let branch = format!("{prefix}-{n}");
                n += 1;
                if taken(&branch) {
                    continue;
                }
                items.push(SpawnItem {
                    branch,
                    nickname: None,
                });
            }
            items
        }
        SpawnRequest::Branches(branches) => branches
            .iter()
            .map(|b| SpawnItem {
                branch: b.trim().to_string(),
                nickname: None,
            })
            .collect(),
        SpawnRequest::Epic(path) => epic_items(&load_epic(path)?),
    };

    if items.is_empty() {
        return Err(SessionError::EmptySpawn(match request {
            SpawnRequest::Count { .. } => "count is zero".to_string(),
            SpawnRequest::Branches(_) => "no branches given".to_string(),
            SpawnRequest::Epic(path) => format!("epic {} has no stories", path.display()),
        }));
    }
    // Validate everything before anything is created.
    for item in &items {
        validate_branch(&item.branch)?;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn count_skips_taken_branches() {
        let items = plan(
            &SpawnRequest::Count {
                count: 3,
                prefix: "parallel".to_string(),
            },
            |b| b == "parallel-2",
        )
        .expect("plan");
        let branches: Vec<&str> = items.iter().map(|i| i.branch.as_str()).collect();
        assert_eq!(branches, vec!["parallel-1", "parallel-3", "parallel-4"]);
    }

    #[test]
    fn invalid_branch_in_list_rejects_whole_batch() {
        let err = plan(
            &SpawnRequest::Branches(vec!["ok".to_string(), "bad name".to_string()]),
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidBranch { .. }));
    }

    #[test]
    fn zero_count_is_empty_spawn() {
        let err = plan(
            &SpawnRequest::Count {
                count: 0,
                prefix: "p".to_string(),
            },
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::EmptySpawn(_)));
    }

    #[test]
    fn oversized_count_is_rejected_up_front() {
        let err = plan(
            &SpawnRequest::Count {
                count: usize::MAX,
                prefix: "p".to_string(),
            },
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::SpawnTooLarge {
                requested: usize::MAX,
                limit: MAX_SPAWN
            }
        ));
        assert!(plan(
            &SpawnRequest::Count {
                count: MAX_SPAWN,
                prefix: "p".to_string(),
            },
            |_| false,
        )
        .is_ok());
    }

    #[test]
    fn epic_stories_become_branches() {
        let dir = assert_fs::TempDir::new().expect("tempdir");
        let file = dir.child("epic.yaml");
        file.write_str(
            "name: Checkout Flow\nstories:\n  - id: S-1\n    title: Cart page\n  - id: S-2\n    branch: feat/payments\n",
        )
        .expect("write");

        let items = plan(&SpawnRequest::Epic(file.path().to_path_buf()), |_| false).expect("plan");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].branch, "epic/checkout-flow/s-1");
        assert_eq!(items[0].nickname.as_deref(), Some("Cart page"));
        assert_eq!(items[1].branch, "feat/payments");
        assert_eq!(items[1].nickname.as_deref(), Some("S-2"));
    }

    #[test]
    fn malformed_epic_reports_path() {
        let dir = assert_fs::TempDir::new().expect("tempdir");
        let file = dir.child("epic.yaml");
        file.write_str("stories: [").expect("write");
        let err = load_epic(file.path()).unwrap_err();
        assert!(err.to_string().contains("epic.yaml"));
    }
}
