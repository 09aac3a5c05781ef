//! Multi-file configuration loading.

use std::hash::Hash;
use std::path::Path;

use indexmap::IndexMap;

use super::{ConfigPath, interpolate, is_yaml_file};
use crate::error::ConfigError;

/// Trait for configs that can be merged from multiple files.
///
/// Keyed components are unioned (a key defined twice is an error). Singleton
/// sections are merged by [`Mergeable::merge_sections`], usually through
/// [`merge_section`].
pub trait Mergeable: Sized + Default {
    type Key: Eq + Hash + Clone + std::fmt::Display;
    type Component;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;
    fn merge_sections(&mut self, other: &mut Self) -> Result<(), ConfigError>;
    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components_mut()
            .keys()
            .filter(|key| self.components_mut().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        self.merge_sections(&mut other)?;

        for (key, component) in other.components_mut().drain(..) {
            self.components_mut().insert(key, component);
        }
        Ok(())
    }
}

/// Merge an optional singleton section, rejecting definitions in two files.
pub fn merge_section<T>(
    section: &str,
    slot: &mut Option<T>,
    other: Option<T>,
) -> Result<(), ConfigError> {
    match (slot.is_some(), other) {
        (true, Some(_)) => Err(ConfigError::DuplicateSection {
            section: section.to_string(),
        }),
        (false, Some(value)) => {
            *slot = Some(value);
            Ok(())
        }
        (_, None) => Ok(()),
    }
}

pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let (display, partial) = match path {
            ConfigPath::File(file_path) => (file_path.display(), load_file::<C>(file_path)),
            ConfigPath::Dir(dir_path) => (dir_path.display(), load_dir::<C>(dir_path)),
        };
        match partial.and_then(|partial| config.merge(partial)) {
            Ok(()) => {}
            Err(e) => errors.push(format!("{display}: {e}")),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    C::parse_yaml(&result.text)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    files.sort();

    for path in files {
        match load_file::<C>(&path).and_then(|partial| config.merge(partial)) {
            Ok(()) => {}
            Err(e) => errors.push(format!("{}: {}", path.display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        tenants: IndexMap<String, u32>,
        #[serde(default)]
        scratch: Option<String>,
    }

    impl Mergeable for TestConfig {
        type Key = String;
        type Component = u32;

        fn components_mut(&mut self) -> &mut IndexMap<String, u32> {
            &mut self.tenants
        }

        fn merge_sections(&mut self, other: &mut Self) -> Result<(), ConfigError> {
            merge_section("scratch", &mut self.scratch, other.scratch.take())
        }

        fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_merges_directory_in_name_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.yaml", "tenants:\n  beta: 2\n");
        write(&dir, "a.yml", "tenants:\n  alpha: 1\nscratch: /tmp/drift\n");
        write(&dir, "notes.txt", "ignored");

        let config: TestConfig = load_from_paths(&[ConfigPath::dir(dir.path())]).unwrap();
        let keys: Vec<_> = config.tenants.keys().cloned().collect();
        assert_eq!(keys, vec!["alpha", "beta"]);
        assert_eq!(config.scratch.as_deref(), Some("/tmp/drift"));
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.yaml", "tenants:\n  alpha: 1\n");
        let b = write(&dir, "b.yaml", "tenants:\n  alpha: 2\n");

        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(a), ConfigPath::file(b)])
            .unwrap_err();
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.yaml", "scratch: /a\n");
        let b = write(&dir, "b.yaml", "scratch: /b\n");

        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(a), ConfigPath::file(b)])
            .unwrap_err();
        assert!(err.to_string().contains("scratch"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "drift.toml", "");
        assert!(load_from_paths::<TestConfig>(&[ConfigPath::file(path)]).is_err());
    }
}
