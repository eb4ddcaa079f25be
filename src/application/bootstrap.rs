use crate::infrastructure::config::{ensure_default_config, load_config, workspace_root_for, STATE_DIR};
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_path: PathBuf,
    pub created_config: bool,
}

/// Creates the config and state directories next to `config_path` and writes the default
/// config when none exists. An existing config is validated but never overwritten.
pub fn bootstrap_workspace(config_path: &Path) -> Result<BootstrapResult, InfraError> {
    let workspace_root = workspace_root_for(config_path);
    let state_dir = workspace_root.join(STATE_DIR);

    fs::create_dir_all(&state_dir)?;
    let created_config = ensure_default_config(config_path)?;
    let _ = load_config(config_path)?;

    if created_config {
        info!(path = %config_path.display(), "wrote default config");
    } else {
        info!(path = %config_path.display(), "config already present");
    }

    Ok(BootstrapResult {
        workspace_root,
        config_path: config_path.to_path_buf(),
        created_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::default_config_path;

    #[test]
    fn bootstrap_creates_layout_and_keeps_existing_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_path = default_config_path(dir.path());

        let first = bootstrap_workspace(&config_path).expect("bootstrap");
        assert!(first.created_config);
        assert_eq!(first.workspace_root, dir.path());
        assert!(dir.path().join(STATE_DIR).is_dir());
        assert!(config_path.is_file());

        let second = bootstrap_workspace(&config_path).expect("bootstrap again");
        assert!(!second.created_config);
    }

    #[test]
    fn bootstrap_rejects_an_invalid_existing_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config_path = default_config_path(dir.path());
        fs::create_dir_all(config_path.parent().expect("config dir")).expect("mkdir");
        fs::write(&config_path, r#"{"schema": 7}"#).expect("write config");

        assert!(matches!(
            bootstrap_workspace(&config_path),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
