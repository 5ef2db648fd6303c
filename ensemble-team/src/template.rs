//! Declarative team templates.
//!
//! Built-ins are embedded at compile time; `<main>/.ensemble/teams/<name>.yaml`
//! overrides a built-in of the same name or adds a new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, TeamError};

const BUILTINS: &[(&str, &str)] = &[
    ("audit", include_str!("templates/teams/audit.yaml")),
    ("feature", include_str!("templates/teams/feature.yaml")),
    ("review", include_str!("templates/teams/review.yaml")),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamTemplate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teammates: Vec<Teammate>,
    #[serde(default)]
    pub delegate_mode: bool,
    #[serde(default)]
    pub quality_gates: Option<QualityGates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teammate {
    pub agent: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Teammate {
    /// Role, defaulting to the agent name.
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.agent)
    }

    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("the assigned area")
    }

    /// Explicit instructions, else `"{role} agent for {domain}"`.
    pub fn instructions(&self) -> String {
        self.instructions
            .clone()
            .unwrap_or_else(|| format!("{} agent for {}", self.role(), self.domain()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGates {
    #[serde(default)]
    pub tests: Option<String>,
    #[serde(default)]
    pub lint: Option<String>,
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub require_validator_approval: bool,
}

impl QualityGates {
    pub fn is_empty(&self) -> bool {
        self.tests.is_none()
            && self.lint.is_none()
            && self.types.is_none()
            && !self.require_validator_approval
    }
}

impl TeamTemplate {
    /// `name`, else `fallback`.
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }

    /// Quality gates, if any gate is actually set.
    pub fn gates(&self) -> Option<&QualityGates> {
        self.quality_gates.as_ref().filter(|g| !g.is_empty())
    }
}

/// Built-ins plus on-disk overrides, keyed by template name.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, TeamTemplate>,
}

impl TemplateSet {
    /// Embedded templates only.
    pub fn builtin() -> Result<Self, TeamError> {
        let mut templates = BTreeMap::new();
        for (name, yaml) in BUILTINS {
            let template = serde_yaml::from_str(yaml).map_err(|source| TeamError::TemplateParse {
                path: PathBuf::from(format!("<builtin>/{name}.yaml")),
                source,
            })?;
            templates.insert((*name).to_string(), template);
        }
        Ok(Self { templates })
    }

    /// Built-ins overlaid with every `*.yaml` / `*.yml` in `teams_dir`.
    pub fn load(teams_dir: &Path) -> Result<Self, TeamError> {
        let mut set = Self::builtin()?;
        if !teams_dir.is_dir() {
            return Ok(set);
        }
        let entries = std::fs::read_dir(teams_dir).map_err(|e| io_err(teams_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(teams_dir, e))?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_yaml || !path.is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let template: TeamTemplate =
                serde_yaml::from_str(&contents).map_err(|source| TeamError::TemplateParse {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!(template = stem, path = %path.display(), "loaded team template");
            set.templates.insert(stem.to_string(), template);
        }
        Ok(set)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TeamTemplate> {
        self.templates.get(name)
    }

    /// Look up `name`; unknown names and teammate-less templates are errors.
    pub fn resolve(&self, name: &str) -> Result<&TeamTemplate, TeamError> {
        let template = self.get(name).ok_or_else(|| TeamError::TemplateNotFound {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        if template.teammates.is_empty() {
            return Err(TeamError::EmptyTemplate(name.to_string()));
        }
        Ok(template)
    }
}
