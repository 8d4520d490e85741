use conveyor_utils::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    CliArgs, Config, ConfigSource, EngineConfig, PipelineConfig, PollerConfig, ProducerConfig,
};

/// Directory searched for upward from the working directory
pub const CONFIG_DIR: &str = ".conveyor";

/// File name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CONVEYOR_CONFIG";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    engine: Option<EngineConfig>,
    poller: Option<PollerConfig>,
    pipeline: Option<PipelineConfig>,
    producers: Option<BTreeMap<String, ProducerConfig>>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// The file is taken from `--config`, then `$CONVEYOR_CONFIG`, then the
    /// first `.conveyor/config.toml` found searching upward from the current
    /// directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::InvalidValue {
            key: "current_dir".to_string(),
            value: e.to_string(),
        })?;
        let env_path = std::env::var_os(CONFIG_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::discover_from(&start_dir, cli_args, env_path)
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// `env_path` is the value of `$CONVEYOR_CONFIG`, passed in so callers
    /// (and tests) do not depend on process-global state.
    pub fn discover_from(
        start_dir: &Path,
        cli_args: &CliArgs,
        env_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut source_attribution = BTreeMap::new();
        let mut engine = EngineConfig::default();
        let mut poller = PollerConfig::default();
        let mut pipeline = PipelineConfig::default();
        let mut producers = BTreeMap::new();

        let config_path = match (&cli_args.config_path, env_path) {
            (Some(explicit), _) => Some(explicit.clone()),
            (None, Some(from_env)) => Some(from_env),
            (None, None) => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)?;
            let src = ConfigSource::Config;
            debug!(path = %path.display(), "Loaded configuration file");

            if let Some(file_engine) = file.engine {
                if file_engine.max_concurrent_jobs.is_some() {
                    engine.max_concurrent_jobs = file_engine.max_concurrent_jobs;
                    source_attribution.insert("max_concurrent_jobs".to_string(), src);
                }
                if file_engine.history_limit.is_some() {
                    engine.history_limit = file_engine.history_limit;
                    source_attribution.insert("history_limit".to_string(), src);
                }
                if file_engine.phase_timeout_secs.is_some() {
                    engine.phase_timeout_secs = file_engine.phase_timeout_secs;
                    source_attribution.insert("phase_timeout_secs".to_string(), src);
                }
                if file_engine.log_format.is_some() {
                    engine.log_format = file_engine.log_format;
                    source_attribution.insert("log_format".to_string(), src);
                }
            }

            if let Some(file_poller) = file.poller {
                if file_poller.interval_secs.is_some() {
                    poller.interval_secs = file_poller.interval_secs;
                    source_attribution.insert("poll_interval_secs".to_string(), src);
                }
                if file_poller.max_wait_secs.is_some() {
                    poller.max_wait_secs = file_poller.max_wait_secs;
                    source_attribution.insert("poll_max_wait_secs".to_string(), src);
                }
                if file_poller.query_timeout_secs.is_some() {
                    poller.query_timeout_secs = file_poller.query_timeout_secs;
                    source_attribution.insert("poll_query_timeout_secs".to_string(), src);
                }
            }

            if let Some(file_pipeline) = file.pipeline {
                pipeline = file_pipeline;
                source_attribution.insert("pipeline_phases".to_string(), src);
            }

            if let Some(file_producers) = file.producers {
                producers = file_producers;
                source_attribution.insert("producers".to_string(), src);
            }
        }

        // CLI overrides (highest priority)
        let cli = ConfigSource::Cli;
        if let Some(jobs) = cli_args.max_concurrent_jobs {
            engine.max_concurrent_jobs = Some(jobs);
            source_attribution.insert("max_concurrent_jobs".to_string(), cli);
        }
        if let Some(limit) = cli_args.history_limit {
            engine.history_limit = Some(limit);
            source_attribution.insert("history_limit".to_string(), cli);
        }
        if let Some(timeout) = cli_args.phase_timeout_secs {
            engine.phase_timeout_secs = Some(timeout);
            source_attribution.insert("phase_timeout_secs".to_string(), cli);
        }
        if let Some(format) = &cli_args.log_format {
            engine.log_format = Some(format.clone());
            source_attribution.insert("log_format".to_string(), cli);
        }
        if let Some(interval) = cli_args.poll_interval_secs {
            poller.interval_secs = Some(interval);
            source_attribution.insert("poll_interval_secs".to_string(), cli);
        }
        if let Some(max_wait) = cli_args.poll_max_wait_secs {
            poller.max_wait_secs = Some(max_wait);
            source_attribution.insert("poll_max_wait_secs".to_string(), cli);
        }

        let config = Self {
            engine,
            poller,
            pipeline,
            producers,
            source_attribution,
            config_file: config_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Search upward from `start_dir` for `.conveyor/config.toml`.
    ///
    /// Stops at repository root markers (.git, .hg, .svn) or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if [".git", ".hg", ".svn"]
                .iter()
                .any(|marker| dir.join(marker).exists())
            {
                break;
            }
            current = dir.parent();
        }

        None
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::InvalidFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, content: &str) -> PathBuf {
        let conveyor_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&conveyor_dir).unwrap();
        let path = conveyor_dir.join(CONFIG_FILE);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_upward_search_finds_parent_config() {
        let temp = TempDir::new().unwrap();
        let expected = write(temp.path(), "[engine]\nmax_concurrent_jobs = 3\n");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(Config::discover_config_file_from(&nested), Some(expected));
    }

    #[test]
    fn test_upward_search_stops_at_repository_root() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "");
        let repo = temp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let nested = repo.join("src");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(Config::discover_config_file_from(&nested), None);
    }

    #[test]
    fn test_no_config_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".git")).unwrap();

        let config = Config::discover_from(temp.path(), &CliArgs::default(), None).unwrap();
        assert!(config.config_file.is_none());
        assert_eq!(config.max_concurrent_jobs(), 4);
        assert!(config.source_attribution.is_empty());
    }

    #[test]
    fn test_env_path_beats_discovery_and_cli_beats_env() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "[engine]\nmax_concurrent_jobs = 1\n");
        let env_file = temp.path().join("env.toml");
        fs::write(&env_file, "[engine]\nmax_concurrent_jobs = 2\n").unwrap();
        let cli_file = temp.path().join("cli.toml");
        fs::write(&cli_file, "[engine]\nmax_concurrent_jobs = 3\n").unwrap();

        let from_env = Config::discover_from(
            temp.path(),
            &CliArgs::default(),
            Some(env_file.clone()),
        )
        .unwrap();
        assert_eq!(from_env.max_concurrent_jobs(), 2);

        let cli = CliArgs {
            config_path: Some(cli_file),
            ..CliArgs::default()
        };
        let from_cli = Config::discover_from(temp.path(), &cli, Some(env_file)).unwrap();
        assert_eq!(from_cli.max_concurrent_jobs(), 3);
    }

    #[test]
    fn test_missing_explicit_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cli = CliArgs {
            config_path: Some(temp.path().join("nope.toml")),
            ..CliArgs::default()
        };
        let err = Config::discover_from(temp.path(), &cli, None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_invalid_toml_reports_file() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "[engine\nmax_concurrent_jobs = ");
        let err = Config::discover_from(temp.path(), &CliArgs::default(), None).unwrap_err();
        match err {
            ConfigError::InvalidFile { path: reported, .. } => {
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("expected InvalidFile, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "[engine]\nmax_concurent_jobs = 2\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile { .. }));
    }

    #[test]
    fn test_unknown_producer_kind_is_rejected() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "[producers.x]\nkind = \"carrier_pigeon\"\nprogram = \"coo\"\n",
        );
        let err = Config::discover_from(temp.path(), &CliArgs::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile { .. }));
    }
}
