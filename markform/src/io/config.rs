//! Fill harness configuration (TOML).
//!
//! Precedence, lowest first: built-in defaults, the document's front-matter
//! `harness` hints, then an explicit config file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::model::{DEFAULT_ROLE, HarnessHints};
use crate::io::write_atomic;

/// Resolved harness configuration.
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Total turns across every thread and level.
    pub max_turns: u32,

    /// A batch larger than this is not applied and ends the run.
    pub max_patches_per_turn: u32,

    /// Cap on issues handed to the delegate per turn.
    pub max_issues_per_turn: u32,

    /// Most delegate calls in flight at once when `concurrent` is set.
    pub max_parallel_agents: u32,

    /// Run the delegate calls of a round on scoped OS threads.
    pub concurrent: bool,

    /// Roles whose fields the harness fills; empty means every role.
    pub target_roles: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_turns: 100,
            max_patches_per_turn: 20,
            max_issues_per_turn: 10,
            max_parallel_agents: 4,
            concurrent: false,
            target_roles: vec![DEFAULT_ROLE.to_string()],
        }
    }
}

/// Partial configuration as written in a file; unset keys keep lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub max_turns: Option<u32>,
    pub max_patches_per_turn: Option<u32>,
    pub max_issues_per_turn: Option<u32>,
    pub max_parallel_agents: Option<u32>,
    pub concurrent: Option<bool>,
    pub target_roles: Option<Vec<String>>,
}

impl From<&HarnessHints> for ConfigOverrides {
    fn from(hints: &HarnessHints) -> Self {
        Self {
            max_turns: hints.max_turns,
            max_patches_per_turn: hints.max_patches_per_turn,
            max_issues_per_turn: hints.max_issues_per_turn,
            max_parallel_agents: hints.max_parallel_agents,
            ..Self::default()
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.max_patches_per_turn == 0 {
            return Err(anyhow!("max_patches_per_turn must be > 0"));
        }
        if self.max_issues_per_turn == 0 {
            return Err(anyhow!("max_issues_per_turn must be > 0"));
        }
        if self.max_parallel_agents == 0 {
            return Err(anyhow!("max_parallel_agents must be > 0"));
        }
        if self.target_roles.iter().any(|role| role.trim().is_empty()) {
            return Err(anyhow!("target_roles must not contain empty names"));
        }
        Ok(())
    }

    /// Layer `overrides` on top of this configuration.
    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(value) = overrides.max_turns {
            self.max_turns = value;
        }
        if let Some(value) = overrides.max_patches_per_turn {
            self.max_patches_per_turn = value;
        }
        if let Some(value) = overrides.max_issues_per_turn {
            self.max_issues_per_turn = value;
        }
        if let Some(value) = overrides.max_parallel_agents {
            self.max_parallel_agents = value;
        }
        if let Some(value) = overrides.concurrent {
            self.concurrent = value;
        }
        if let Some(value) = &overrides.target_roles {
            self.target_roles = value.clone();
        }
        self
    }
}

/// Load overrides from a TOML file.
///
/// If the file is missing, returns empty overrides.
pub fn load_overrides(path: &Path) -> Result<ConfigOverrides> {
    if !path.exists() {
        return Ok(ConfigOverrides::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Load a complete config: defaults with the file's keys applied.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let cfg = HarnessConfig::default().apply(&load_overrides(path)?);
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve defaults, then front-matter hints, then an optional config file.
pub fn resolve_config(hints: &HarnessHints, path: Option<&Path>) -> Result<HarnessConfig> {
    let mut cfg = HarnessConfig::default().apply(&ConfigOverrides::from(hints));
    if let Some(path) = path {
        cfg = cfg.apply(&load_overrides(path)?);
    }
    cfg.validate().context("invalid harness configuration")?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, HarnessConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("harness.toml");
        let cfg = HarnessConfig {
            max_turns: 7,
            concurrent: true,
            target_roles: vec!["agent".to_string(), "user".to_string()],
            ..HarnessConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn file_overrides_front_matter_hints() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("harness.toml");
        fs::write(&path, "max_turns = 3\n").expect("write");
        let hints = HarnessHints {
            max_turns: Some(40),
            max_issues_per_turn: Some(2),
            ..HarnessHints::default()
        };

        let cfg = resolve_config(&hints, Some(&path)).expect("resolve");
        assert_eq!(cfg.max_turns, 3);
        assert_eq!(cfg.max_issues_per_turn, 2);
        assert_eq!(cfg.max_patches_per_turn, 20);

        let from_hints = resolve_config(&hints, None).expect("resolve");
        assert_eq!(from_hints.max_turns, 40);
    }

    #[test]
    fn unknown_keys_and_zero_budgets_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("harness.toml");
        fs::write(&path, "max_turn = 3\n").expect("write");
        assert!(load_config(&path).is_err());

        fs::write(&path, "max_patches_per_turn = 0\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
