//! Scaffolding for `improver init`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{EngineConfig, EnginePaths, config_base_dir, write_config};
use super::goal_store;

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite an existing config file. Existing goals are always kept.
    pub force: bool,
}

/// Write a default config at `config_path`, an empty goal file and the memory
/// directory it points at.
pub fn init_workspace(config_path: &Path, options: &InitOptions) -> Result<EnginePaths> {
    if config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    if config_path.is_dir() {
        return Err(anyhow!(
            "init: {} exists but is a directory",
            config_path.display()
        ));
    }

    let cfg = EngineConfig::default();
    write_config(config_path, &cfg)?;
    let paths = cfg.paths(&config_base_dir(config_path));

    create_dir(&paths.memory_dir)?;
    if paths.goals_path.exists() {
        info!(path = %paths.goals_path.display(), "keeping existing goal file");
    } else {
        goal_store::write_empty(&paths.goals_path)?;
    }
    info!(config = %config_path.display(), "workspace initialized");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Goal;
    use crate::io::config::load_config;
    use crate::io::goal_store::GoalStore;

    /// Verifies init writes a loadable config, an empty goal file and the memory dir.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("improver.toml");

        let paths = init_workspace(&config_path, &InitOptions { force: false }).expect("init");

        assert_eq!(load_config(&config_path).expect("load"), EngineConfig::default());
        assert!(paths.memory_dir.is_dir());
        assert!(paths.goals_path.is_file());
        assert!(GoalStore::load(&paths.goals_path).goals().is_empty());
    }

    /// Verifies a second init without --force fails with "already exists".
    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("improver.toml");

        init_workspace(&config_path, &InitOptions { force: false }).expect("init");
        let err = init_workspace(&config_path, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies --force rewrites the config but keeps authored goals.
    #[test]
    fn init_with_force_keeps_goals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("improver.toml");
        let paths = init_workspace(&config_path, &InitOptions { force: false }).expect("init");
        GoalStore::load(&paths.goals_path)
            .add_goal(Goal::new("g1", "add function foo"))
            .expect("add");
        fs::write(&config_path, "[engine]\nmax_cycles = 9\n").expect("customize");

        init_workspace(&config_path, &InitOptions { force: true }).expect("re-init");

        assert_eq!(load_config(&config_path).expect("load").engine.max_cycles, 3);
        assert_eq!(GoalStore::load(&paths.goals_path).goals().len(), 1);
    }
}
