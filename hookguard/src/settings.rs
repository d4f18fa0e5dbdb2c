//! Loading allow/deny lists from the Claude Code settings hierarchy.
//!
//! Settings are read from, lowest precedence first:
//!
//! 1. User (`~/.claude/settings.json`)
//! 2. Project (`<project>/.claude/settings.json`)
//! 3. Project local (`<project>/.claude/settings.local.json`)
//! 4. System (`/etc/claude-code/managed-settings.json`)
//!
//! Each file is extracted on its own and the layers are combined with
//! [`Merge`]: permission lists are unioned, scalar options from a higher
//! level win.

use std::env;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Format, Json, Serialized};
use hookguard_core::EvaluationContext;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument, warn};

use crate::audit::AuditConfig;

/// The name of the Claude settings directory.
const CLAUDE_DIR: &str = ".claude";

/// The name of the settings file.
const SETTINGS_FILE: &str = "settings.json";

/// The name of the local settings file.
const SETTINGS_LOCAL_FILE: &str = "settings.local.json";

/// The system-wide managed settings path.
const SYSTEM_SETTINGS_PATH: &str = "/etc/claude-code/managed-settings.json";

/// Settings levels, from lowest to highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingsLevel {
    User,
    Project,
    ProjectLocal,
    System,
}

impl SettingsLevel {
    /// All levels, lowest precedence first.
    pub fn all_by_precedence() -> &'static [SettingsLevel] {
        &[
            SettingsLevel::User,
            SettingsLevel::Project,
            SettingsLevel::ProjectLocal,
            SettingsLevel::System,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsLevel::User => "user",
            SettingsLevel::Project => "project",
            SettingsLevel::ProjectLocal => "project-local",
            SettingsLevel::System => "system",
        }
    }
}

/// Trait for types that can be merged with precedence.
pub trait Merge {
    /// Merges self with another value, preferring values from `other` (higher precedence).
    fn merge(&self, other: &Self) -> Self;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl Merge for Permissions {
    fn merge(&self, other: &Self) -> Self {
        Permissions {
            allow: merge_vecs(&self.allow, &other.allow),
            deny: merge_vecs(&self.deny, &other.deny),
        }
    }
}

/// Audit options as they appear in a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Merge for AuditSettings {
    fn merge(&self, other: &Self) -> Self {
        AuditSettings {
            enabled: other.enabled.or(self.enabled),
            path: other.path.clone().or_else(|| self.path.clone()),
        }
    }
}

/// The parts of a settings file hookguard reads. Other keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub audit: AuditSettings,
}

impl Merge for GuardSettings {
    fn merge(&self, other: &Self) -> Self {
        GuardSettings {
            permissions: self.permissions.merge(&other.permissions),
            audit: self.audit.merge(&other.audit),
        }
    }
}

impl GuardSettings {
    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            enabled: self.audit.enabled.unwrap_or(false),
            path: self.audit.path.as_ref().map(PathBuf::from),
        }
    }

    /// The evaluation context for a request issued from `cwd`.
    pub fn evaluation_context(&self, cwd: &Path, home: Option<&Path>) -> EvaluationContext {
        let ctx = EvaluationContext::new(cwd)
            .with_allow(&self.permissions.allow)
            .with_deny(&self.permissions.deny);
        match home {
            Some(home) => ctx.with_home(home),
            None => ctx,
        }
    }
}

/// Merges two vectors, combining all unique elements.
fn merge_vecs<T: Clone + PartialEq>(lower: &[T], higher: &[T]) -> Vec<T> {
    let mut result = higher.to_vec();
    for item in lower {
        if !result.contains(item) {
            result.push(item.clone());
        }
    }
    result
}

/// Resolver for settings file paths.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    /// Override for the home directory (useful for testing).
    home_override: Option<PathBuf>,

    /// Override for the project directory.
    project_override: Option<PathBuf>,

    /// Where the project search starts; the process cwd when unset.
    start_dir: Option<PathBuf>,

    /// Override for the system settings file.
    system_override: Option<PathBuf>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_override = Some(home.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<PathBuf>) -> Self {
        self.project_override = Some(project.into());
        self
    }

    /// Search for the project root from `dir` instead of the process cwd.
    pub fn starting_at(mut self, dir: impl Into<PathBuf>) -> Self {
        self.start_dir = Some(dir.into());
        self
    }

    pub fn with_system_settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_override = Some(path.into());
        self
    }

    pub fn home_dir(&self) -> Option<PathBuf> {
        self.home_override.clone().or_else(dirs::home_dir)
    }

    /// Returns the project directory path.
    ///
    /// If not explicitly set, looks for a .claude directory or .git
    /// directory in the start directory or its parents.
    pub fn project_dir(&self) -> Option<PathBuf> {
        if let Some(ref project) = self.project_override {
            return Some(project.clone());
        }

        let start = self
            .start_dir
            .clone()
            .or_else(|| env::current_dir().ok())?;

        find_ancestor_with(&start, CLAUDE_DIR)
            .or_else(|| find_ancestor_with(&start, ".git"))
            .or(Some(start))
    }

    /// Returns the path for the settings file at the given level.
    pub fn settings_path(&self, level: SettingsLevel) -> Option<PathBuf> {
        match level {
            SettingsLevel::System => Some(
                self.system_override
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(SYSTEM_SETTINGS_PATH)),
            ),
            SettingsLevel::User => Some(self.home_dir()?.join(CLAUDE_DIR).join(SETTINGS_FILE)),
            SettingsLevel::Project => {
                Some(self.project_dir()?.join(CLAUDE_DIR).join(SETTINGS_FILE))
            }
            SettingsLevel::ProjectLocal => {
                Some(self.project_dir()?.join(CLAUDE_DIR).join(SETTINGS_LOCAL_FILE))
            }
        }
    }
}

/// Finds the nearest ancestor directory containing the given name.
fn find_ancestor_with(start: &Path, name: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if current.join(name).exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Loads and merges [`GuardSettings`] from every existing settings file.
#[derive(Debug, Clone, Default)]
pub struct SettingsLoader {
    resolver: PathResolver,
}

impl SettingsLoader {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Existing settings files, lowest precedence first.
    pub fn layers(&self) -> Vec<(SettingsLevel, PathBuf)> {
        SettingsLevel::all_by_precedence()
            .iter()
            .filter_map(|level| {
                let path = self.resolver.settings_path(*level)?;
                path.exists().then_some((*level, path))
            })
            .collect()
    }

    /// Loads and merges all layers. A file that fails to parse is skipped
    /// with a warning.
    #[instrument(level = Level::TRACE, skip(self))]
    pub fn load(&self) -> GuardSettings {
        let mut merged = GuardSettings::default();
        for (level, path) in self.layers() {
            match load_file(&path) {
                Ok(layer) => {
                    debug!(
                        level = level.name(),
                        path = %path.display(),
                        allow = layer.permissions.allow.len(),
                        deny = layer.permissions.deny.len(),
                        "loaded settings layer"
                    );
                    merged = merged.merge(&layer);
                }
                Err(e) => {
                    warn!(level = level.name(), path = %path.display(), error = %e, "Failed to load settings file");
                }
            }
        }
        merged
    }
}

/// Extracts the hookguard view of one settings file.
pub fn load_file(path: &Path) -> Result<GuardSettings, Box<figment::Error>> {
    Figment::from(Serialized::defaults(GuardSettings::default()))
        .merge(Json::file(path))
        .extract()
        .map_err(Box::new)
}
