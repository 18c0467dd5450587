//! CLI command implementations
//!
//! Each command loads the config, opens the node's slot state, does one
//! thing and prints a single JSON response.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::observability::{log_event, Event};
use crate::slot::{
    FileSlotSource, FlushPosition, Lsn, NodeRole, SlotConfig, SlotKind, SlotManager, SlotStore,
    SystemClock,
};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (required)
    pub data_dir: String,

    /// "primary" or "standby" (default: "primary")
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// Inactivity allowed before invalidation (default "0", disabled)
    #[serde(default = "default_inactive_timeout")]
    pub inactive_timeout: String,

    /// Primary's data directory (required for standbys, forbidden for primaries)
    #[serde(default)]
    pub primary_data_dir: Option<String>,

    /// Interval between sync polls (default "30s")
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,

    /// Bound on one sync fetch (default "5s")
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: String,
}

fn default_role() -> NodeRole {
    NodeRole::Primary
}
fn default_inactive_timeout() -> String {
    "0".to_string()
}
fn default_sync_interval() -> String {
    "30s".to_string()
}
fn default_sync_timeout() -> String {
    "5s".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        let path = path.display().to_string();
        log_event(
            Event::ConfigLoaded,
            &[("path", path.as_str()), ("role", config.role.as_str())],
        );
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }

        self.slot_config()?;

        match (self.role, &self.primary_data_dir) {
            (NodeRole::Standby, None) => Err(CliError::config_error(
                "primary_data_dir is required when role is 'standby'",
            )),
            (NodeRole::Primary, Some(_)) => Err(CliError::config_error(
                "primary_data_dir is not allowed when role is 'primary'",
            )),
            _ => Ok(()),
        }
    }

    /// Get data directory as Path
    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// Parsed slot settings.
    pub fn slot_config(&self) -> CliResult<SlotConfig> {
        SlotConfig::parse(
            &self.inactive_timeout,
            &self.sync_interval,
            &self.sync_timeout,
        )
        .map_err(|e| CliError::config_error(e.to_string()))
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Status { config } => status(&config),
        Command::Checkpoint { config } => checkpoint(&config),
        Command::Sync {
            config,
            flushed_lsn,
        } => sync(&config, flushed_lsn.as_deref()),
        Command::CreateSlot {
            config,
            name,
            kind,
            failover,
        } => create_slot(&config, &name, &kind, failover),
        Command::DropSlot { config, name } => drop_slot(&config, &name),
        Command::Promote { config } => promote(&config),
    }
}

/// Initialize slot state
///
/// Writes an empty state file. Refuses to touch an existing one.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let store = SlotStore::new(config.data_path());

    if store.exists() {
        return Err(CliError::already_initialized());
    }

    store.persist(&[])?;

    let path = store.path().display().to_string();
    write_response(json!({"initialized": true, "path": path}))?;
    Ok(())
}

/// Print every slot row
pub fn status(config_path: &Path) -> CliResult<()> {
    let (_, manager) = open_node(config_path)?;
    write_response(json!({
        "role": manager.role(),
        "slots": manager.rows(),
    }))?;
    Ok(())
}

/// One invalidation pass, as the checkpointer would run it
pub fn checkpoint(config_path: &Path) -> CliResult<()> {
    let (_, manager) = open_node(config_path)?;
    let report = manager.run_invalidation_pass()?;
    write_response(json!({
        "report": report,
        "metrics": manager.metrics().snapshot(),
    }))?;
    Ok(())
}

/// One sync poll against the primary's data directory
pub fn sync(config_path: &Path, flushed_lsn: Option<&str>) -> CliResult<()> {
    let (config, manager) = open_node(config_path)?;
    let primary_dir = match (config.role, &config.primary_data_dir) {
        (NodeRole::Standby, Some(dir)) => dir.clone(),
        _ => return Err(CliError::wrong_role("sync runs on standby nodes only")),
    };

    let flushed = match flushed_lsn {
        Some(text) => text
            .parse::<Lsn>()
            .map_err(|e| CliError::config_error(format!("Invalid --flushed-lsn: {}", e)))?,
        None => Lsn::new(u64::MAX),
    };

    let agent = manager.sync_agent(
        Arc::new(FileSlotSource::new(primary_dir)),
        Arc::new(FlushPosition::new(flushed)),
    )?;
    let report = agent.sync_once();
    write_response(json!({ "report": report }))?;
    Ok(())
}

/// Create a local slot
pub fn create_slot(config_path: &Path, name: &str, kind: &str, failover: bool) -> CliResult<()> {
    let kind = match kind {
        "physical" => SlotKind::Physical,
        "logical" => SlotKind::Logical,
        other => {
            return Err(CliError::config_error(format!(
                "Invalid slot kind: '{}'. Must be 'physical' or 'logical'.",
                other
            )))
        }
    };
    let (_, manager) = open_node(config_path)?;
    let row = manager.create_slot(name, kind, failover)?;
    write_response(json!({ "slot": row }))?;
    Ok(())
}

/// Drop a local slot
pub fn drop_slot(config_path: &Path, name: &str) -> CliResult<()> {
    let (_, manager) = open_node(config_path)?;
    manager.drop_slot(name)?;
    write_response(json!({ "dropped": name }))?;
    Ok(())
}

/// Convert every mirror into a locally governed slot
pub fn promote(config_path: &Path) -> CliResult<()> {
    let (config, manager) = open_node(config_path)?;
    if config.role != NodeRole::Standby {
        return Err(CliError::wrong_role("promote runs on standby nodes only"));
    }
    let converted = manager.promote()?;
    write_response(json!({ "converted": converted }))?;
    Ok(())
}

/// Load config and open the node's slot state
fn open_node(config_path: &Path) -> CliResult<(Config, SlotManager)> {
    let config = Config::load(config_path)?;
    log_event(Event::BootStart, &[("role", config.role.as_str())]);

    if !SlotStore::new(config.data_path()).exists() {
        return Err(CliError::not_initialized());
    }

    let manager = SlotManager::open(
        config.data_path(),
        config.slot_config()?,
        config.role,
        Arc::new(SystemClock),
    )?;

    let count = manager.catalog().len().to_string();
    log_event(Event::BootComplete, &[("slots", count.as_str())]);
    Ok((config, manager))
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use crate::slot::InvalidationReason;
    use tempfile::TempDir;

    fn write_config(temp_dir: &TempDir, name: &str, extra: serde_json::Value) -> std::path::PathBuf {
        let config_path = temp_dir.path().join(format!("{}.json", name));
        let data_dir = temp_dir.path().join(name);

        let mut config = json!({ "data_dir": data_dir.to_string_lossy() });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        fs::write(&config_path, config.to_string()).unwrap();
        config_path
    }

    #[test]
    fn test_init_creates_state_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({}));

        init(&config_path).unwrap();
        assert!(temp_dir
            .path()
            .join("node")
            .join("slots")
            .join("state.json")
            .exists());
    }

    #[test]
    fn test_init_refuses_reinit() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({}));

        init(&config_path).unwrap();
        let result = init(&config_path);
        assert_eq!(
            result.unwrap_err().code(),
            &CliErrorCode::AlreadyInitialized
        );
    }

    #[test]
    fn test_status_requires_init() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({}));

        let result = status(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::NotInitialized);
    }

    #[test]
    fn test_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({}));

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.role, NodeRole::Primary);
        let slot_config = config.slot_config().unwrap();
        assert!(!slot_config.timeout_enabled());
        assert_eq!(slot_config.sync_interval, std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_config_padded_timeout_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({"inactive_timeout": " 1s"}));

        let config = Config::load(&config_path).unwrap();
        assert_eq!(
            config.slot_config().unwrap().inactive_timeout,
            std::time::Duration::from_secs(1)
        );
    }

    #[test]
    fn test_config_rejects_bad_duration() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({"inactive_timeout": "soon"}));

        let result = Config::load(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_standby_requires_primary_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({"role": "standby"}));

        let result = Config::load(&config_path);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_sync_refused_on_primary() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({}));
        init(&config_path).unwrap();

        let result = sync(&config_path, None);
        assert_eq!(result.unwrap_err().code(), &CliErrorCode::WrongRole);
    }

    #[test]
    fn test_sync_mirrors_primary_state_file() {
        let temp_dir = TempDir::new().unwrap();
        let primary = write_config(&temp_dir, "primary", json!({}));
        let primary_dir = temp_dir.path().join("primary");
        let standby = write_config(
            &temp_dir,
            "standby",
            json!({
                "role": "standby",
                "primary_data_dir": primary_dir.to_string_lossy(),
            }),
        );

        init(&primary).unwrap();
        init(&standby).unwrap();
        create_slot(&primary, "s1", "logical", true).unwrap();
        sync(&standby, None).unwrap();

        let manager = SlotManager::open(
            &temp_dir.path().join("standby"),
            SlotConfig::disabled(),
            NodeRole::Standby,
            Arc::new(SystemClock),
        )
        .unwrap();
        let rows = manager.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].synced);
        assert_eq!(rows[0].invalidation_reason, None::<InvalidationReason>);
    }

    #[test]
    fn test_checkpoint_invalidates_slot_idle_across_commands() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "node", json!({"inactive_timeout": "200ms"}));

        init(&config_path).unwrap();
        create_slot(&config_path, "s1", "logical", false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(400));
        checkpoint(&config_path).unwrap();

        let (_, manager) = open_node(&config_path).unwrap();
        let rows = manager.rows();
        assert_eq!(
            rows[0].invalidation_reason,
            Some(InvalidationReason::InactiveTimeout)
        );
        assert!(manager.try_acquire("s1").is_err());
    }
}
