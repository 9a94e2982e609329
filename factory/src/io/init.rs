//! `.factory/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::atomic::write_atomic;
use super::config::{FactoryConfig, write_config};

/// All canonical paths within `.factory/` for a project root.
#[derive(Debug, Clone)]
pub struct FactoryPaths {
    pub root: PathBuf,
    pub factory_dir: PathBuf,
    pub feature_list_path: PathBuf,
    pub context_dir: PathBuf,
    pub config_path: PathBuf,
}

impl FactoryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let factory_dir = root.join(".factory");
        Self {
            root: root.clone(),
            factory_dir: factory_dir.clone(),
            feature_list_path: factory_dir.join("feature_list.json"),
            context_dir: factory_dir.join("agents-context"),
            config_path: factory_dir.join("config.toml"),
        }
    }
}

/// Options for `init_factory`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing feature list and config.
    pub force: bool,
}

/// Create `.factory/` scaffolding in `root`: an empty feature list, the
/// default config, and the execution log directory.
///
/// Existing files are left alone unless `options.force` is set.
pub fn init_factory(root: &Path, options: &InitOptions) -> Result<FactoryPaths> {
    let paths = FactoryPaths::new(root);
    if paths.factory_dir.exists() && !paths.factory_dir.is_dir() {
        return Err(anyhow!(
            "factory init: .factory exists but is not a directory"
        ));
    }
    fs::create_dir_all(&paths.context_dir)
        .with_context(|| format!("create {}", paths.context_dir.display()))?;

    if options.force || !paths.feature_list_path.exists() {
        write_atomic(&paths.feature_list_path, "[]\n")?;
    }
    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &FactoryConfig::default())?;
    }

    info!(root = %paths.root.display(), "initialized .factory");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_stable() {
        let paths = FactoryPaths::new("/project");
        assert!(paths.feature_list_path.ends_with(".factory/feature_list.json"));
        assert!(paths.context_dir.ends_with(".factory/agents-context"));
        assert!(paths.config_path.ends_with(".factory/config.toml"));
    }

    #[test]
    fn init_keeps_existing_feature_list_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_factory(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.feature_list_path, "[{\"id\":\"f1\"}]").expect("seed");

        init_factory(temp.path(), &InitOptions { force: false }).expect("re-init");
        let contents = fs::read_to_string(&paths.feature_list_path).expect("read");
        assert!(contents.contains("f1"));

        init_factory(temp.path(), &InitOptions { force: true }).expect("force");
        let contents = fs::read_to_string(&paths.feature_list_path).expect("read");
        assert_eq!(contents, "[]\n");
        assert!(paths.context_dir.is_dir());
        assert!(paths.config_path.is_file());
    }
}
