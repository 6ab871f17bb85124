//! The YAML configuration file.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read as _, Write as _};
use std::path::Path;

use serde::{Deserialize, Serialize};
use subst::VariableMap;
use tessera_core::config::{PyramidConfig, SchedulerConfig, StorageConfig};
use tracing::info;

use crate::{TesseraError, TesseraResult};

/// Everything that can be set in a configuration file. Unset sections use their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pyramid: PyramidConfig,
}

impl Config {
    /// Writes the configuration as YAML to `file_name`, or to stdout if it is `-`.
    pub fn save_to_file(&self, file_name: &Path) -> TesseraResult<()> {
        let yaml = serde_yaml::to_string(&self)?;
        if file_name.as_os_str() == OsStr::new("-") {
            info!("Current configuration:");
            println!("\n\n{yaml}\n");
            Ok(())
        } else {
            info!(
                "Saving config to {}, use --config to load it",
                file_name.display()
            );
            File::create(file_name)
                .map_err(|e| TesseraError::ConfigWriteError(e, file_name.to_path_buf()))?
                .write_all(yaml.as_bytes())
                .map_err(|e| TesseraError::ConfigWriteError(e, file_name.to_path_buf()))
        }
    }
}

/// Reads `file_name`, substituting `${VAR}` references from `env`.
pub fn read_config<'a, M>(file_name: &Path, env: &'a M) -> TesseraResult<Config>
where
    M: VariableMap<'a>,
    M::Value: AsRef<str>,
{
    let mut file =
        File::open(file_name).map_err(|e| TesseraError::ConfigLoadError(e, file_name.into()))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| TesseraError::ConfigLoadError(e, file_name.into()))?;
    parse_config(&contents, env, file_name)
}

pub fn parse_config<'a, M>(contents: &str, env: &'a M, file_name: &Path) -> TesseraResult<Config>
where
    M: VariableMap<'a>,
    M::Value: AsRef<str>,
{
    subst::yaml::from_str(contents, env)
        .map_err(|e| TesseraError::ConfigParseError(e, file_name.into()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::num::NonZeroUsize;

    use indoc::indoc;
    use insta::assert_yaml_snapshot;

    use super::*;

    fn parse(yaml: &str, env: &HashMap<&str, &str>) -> TesseraResult<Config> {
        parse_config(yaml, env, Path::new("test.yaml"))
    }

    #[test]
    fn parses_full_config() {
        let config = parse(
            indoc! {"
                scheduler:
                  cpu_threads: 6
                storage:
                  compress: false
                pyramid:
                  tile_size: 512
            "},
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(config.scheduler.cpu_threads, NonZeroUsize::new(6));
        assert!(!config.storage.compress());
        assert_eq!(config.pyramid.tile_size(), 512);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = parse("pyramid:\n  tile_size: 128\n", &HashMap::new()).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse("pyramids:\n  tile_size: 128\n", &HashMap::new()).unwrap_err();
        assert!(matches!(err, TesseraError::ConfigParseError(_, _)));
        let err = parse("storage:\n  level: 3\n", &HashMap::new()).unwrap_err();
        assert!(matches!(err, TesseraError::ConfigParseError(_, _)));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = parse("scheduler:\n  cpu_threads: ${NOPE}\n", &HashMap::new()).unwrap_err();
        assert!(err.to_string().starts_with("Unable to parse config file test.yaml"));
    }

    #[test]
    fn serializes_only_what_is_set() {
        let config = Config {
            storage: StorageConfig {
                compress: Some(true),
                compression_level: Some(6),
            },
            pyramid: PyramidConfig::with_tile_size(1024),
            ..Config::default()
        };
        assert_yaml_snapshot!(config, @r"
        scheduler: {}
        storage:
          compress: true
          compression_level: 6
        pyramid:
          tile_size: 1024
        ");
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.yaml");
        let config = Config {
            scheduler: SchedulerConfig {
                cpu_threads: NonZeroUsize::new(2),
            },
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();
        let reloaded = read_config(&path, &HashMap::<&str, &str>::new()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn missing_file() {
        let err = read_config(Path::new("/nonexistent/tessera.yaml"), &HashMap::<&str, &str>::new())
            .unwrap_err();
        assert!(matches!(err, TesseraError::ConfigLoadError(_, p) if p == Path::new("/nonexistent/tessera.yaml")));
    }
}
