//! Configuration path types for multi-file loading.

use std::path::{Path, PathBuf};

use clap::Args;

/// A configuration source - either a single file or a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigPath {
    File(PathBuf),
    Dir(PathBuf),
}

impl ConfigPath {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self::Dir(path.into())
    }

    /// Combine config files and config directories into a single list.
    ///
    /// Files come first, then directories, preserving order within each group.
    pub fn from_cli_args(config_files: &[PathBuf], config_dirs: &[PathBuf]) -> Vec<Self> {
        config_files
            .iter()
            .map(ConfigPath::file)
            .chain(config_dirs.iter().map(ConfigPath::dir))
            .collect()
    }
}

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Config location flags shared by the drift and floe binaries.
#[derive(Args, Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to configuration file (can be specified multiple times)
    #[arg(short, long)]
    pub config: Vec<PathBuf>,

    /// Path to configuration directory (can be specified multiple times)
    #[arg(short = 'C', long = "config-dir")]
    pub config_dirs: Vec<PathBuf>,
}

impl CliArgs {
    pub fn config_paths(&self) -> Vec<ConfigPath> {
        ConfigPath::from_cli_args(&self.config, &self.config_dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("drift.yaml")));
        assert!(is_yaml_file(Path::new("conf.d/floe.yml")));
        assert!(!is_yaml_file(Path::new("drift.toml")));
        assert!(!is_yaml_file(Path::new("README")));
    }

    #[test]
    fn test_files_precede_dirs() {
        let args = CliArgs {
            config: vec!["a.yaml".into()],
            config_dirs: vec!["conf.d".into()],
        };
        assert_eq!(
            args.config_paths(),
            vec![ConfigPath::file("a.yaml"), ConfigPath::dir("conf.d")]
        );
    }
}
