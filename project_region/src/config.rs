use std::path::Path;

use serde::Deserialize;

use effects::EffectConfig;
use scheduler::SchedulerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickSection {
    pub tps: u32,
}

impl Default for TickSection {
    fn default() -> Self {
        Self { tps: 10 }
    }
}

/// Where restorable effects are kept between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub backend: StoreBackend,
    /// SQLite file, for the `sqlite` backend.
    pub path: String,
    /// Record directory, for the `file` backend.
    pub effects_dir: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "data/effects.db".to_string(),
            effects_dir: "data/effects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentSection {
    pub spells_dir: String,
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            spells_dir: "content".to_string(),
        }
    }
}

/// Synthetic load driven against the region.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub players: u32,
    pub npcs: u32,
    /// Concurrent request tasks issuing casts and cancels.
    pub request_tasks: u32,
    pub actions_per_second: u32,
    /// Seconds between simulated logout/login of one player.
    pub session_churn_secs: u64,
    pub seed: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            players: 8,
            npcs: 16,
            request_tasks: 4,
            actions_per_second: 20,
            session_churn_secs: 15,
            seed: 0x2545_f491_4f6c_dd1d,
        }
    }
}

/// Top-level region server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub region: String,
    pub tick: TickSection,
    pub effects: EffectConfig,
    pub database: DatabaseSection,
    pub content: ContentSection,
    pub simulation: SimulationSection,
}

impl ServerConfig {
    /// Load configuration from an optional TOML file path.
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: Self = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        if config.region.is_empty() {
            config.region = "camelot".to_string();
        }
        Ok(config)
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tps: self.tick.tps,
            max_ticks: 0,
        }
    }
}

/// Parse CLI arguments and load config.
/// Supports: --config <path>
pub fn parse_cli_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(val) = args.get(i + 1) {
                    config_path = Some(val.as_str());
                    i += 2;
                } else {
                    eprintln!("--config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    match ServerConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.region, "camelot");
        assert_eq!(config.tick.tps, 10);
        assert_eq!(config.effects.min_restore_ms, 5000);
        assert!(!config.effects.strict_batches);
        assert_eq!(config.database.backend, StoreBackend::Sqlite);
        assert_eq!(config.content.spells_dir, "content");
        assert_eq!(config.simulation.players, 8);
    }

    #[test]
    fn to_scheduler_config() {
        let sc = ServerConfig::default().to_scheduler_config();
        assert_eq!(sc.tps, 10);
        assert_eq!(sc.max_ticks, 0);
    }

    #[test]
    fn load_nonexistent_file_returns_defaults() {
        let config = ServerConfig::load(Some("/tmp/nonexistent_region_config_12345.toml")).unwrap();
        assert_eq!(config.tick.tps, 10);
    }

    #[test]
    fn load_partial_toml() {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
region = "albion"

[tick]
tps = 20

[effects]
strict_batches = true

[database]
backend = "file"
effects_dir = "/var/lib/region/effects"
"#
        )
        .unwrap();

        let config = ServerConfig::load(Some(f.path().to_str().unwrap())).unwrap();
        assert_eq!(config.region, "albion");
        assert_eq!(config.tick.tps, 20);
        assert!(config.effects.strict_batches);
        assert_eq!(config.effects.concentration_capacity, 20);
        assert_eq!(config.database.backend, StoreBackend::File);
        assert_eq!(config.database.effects_dir, "/var/lib/region/effects");
        assert_eq!(config.database.path, "data/effects.db");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "[tick]\ntps = \"fast\"\n").unwrap();
        assert!(ServerConfig::load(Some(f.path().to_str().unwrap())).is_err());
    }
}
