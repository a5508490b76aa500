//! Configuration vault – reads/writes `~/.reach/config.toml`.
//!
//! The file has one section per component. Every field is optional; missing
//! fields take the component's defaults.
//!
//! ```toml
//! [link]
//! host = "stretch.local"
//! state_port = 4401
//! command_port = 4402
//!
//! [map]
//! resolution = 0.05
//!
//! [planner]
//! robot_radius = 0.3
//!
//! [task]
//! max_retries = 3
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reach_middleware::{ClientConfig, FollowerConfig};
use reach_perception::VoxelMapConfig;
use reach_planner::PlannerConfig;
use reach_runtime::TaskConfig;
use reach_types::ReachError;
use serde::{Deserialize, Serialize};

/// Where the robot lives and how patient the client is with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub host: String,
    pub state_port: u16,
    pub command_port: u16,
    pub publish_interval_ms: u64,
    pub fast_interval_ms: u64,
    /// Publish a camera frame every this many telemetry ticks.
    pub frame_every: u32,
    pub move_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Telemetry silence after which the link counts as down.
    pub link_timeout_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        let client = ClientConfig::default();
        let follower = FollowerConfig::default();
        Self {
            host: "127.0.0.1".into(),
            state_port: 4401,
            command_port: 4402,
            publish_interval_ms: follower.publish_interval.as_millis() as u64,
            fast_interval_ms: follower.fast_interval.as_millis() as u64,
            frame_every: follower.frame_every,
            move_timeout_ms: client.move_timeout.as_millis() as u64,
            stop_timeout_ms: client.stop_timeout.as_millis() as u64,
            reconnect_initial_ms: client.reconnect_initial.as_millis() as u64,
            reconnect_max_ms: client.reconnect_max.as_millis() as u64,
            link_timeout_ms: client.link_timeout.as_millis() as u64,
        }
    }
}

/// Persisted user configuration stored in `~/.reach/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkSection,
    pub map: VoxelMapConfig,
    pub planner: PlannerConfig,
    pub task: TaskConfig,
}

impl Config {
    pub fn client_config(&self) -> ClientConfig {
        let l = &self.link;
        ClientConfig {
            move_timeout: Duration::from_millis(l.move_timeout_ms),
            stop_timeout: Duration::from_millis(l.stop_timeout_ms),
            reconnect_initial: Duration::from_millis(l.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(l.reconnect_max_ms),
            link_timeout: Duration::from_millis(l.link_timeout_ms),
            ..ClientConfig::default()
        }
    }

    pub fn follower_config(&self) -> FollowerConfig {
        let l = &self.link;
        FollowerConfig {
            publish_interval: Duration::from_millis(l.publish_interval_ms.max(1)),
            fast_interval: Duration::from_millis(l.fast_interval_ms.max(1)),
            frame_every: l.frame_every,
            ..FollowerConfig::default()
        }
    }
}

/// Return the path to `~/.reach/config.toml`.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    config_path_for_home(&home)
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".reach").join("config.toml")
}

/// Load the vault, falling back to defaults when it does not exist.
/// Environment overrides are applied either way.
pub fn load() -> Result<Config, ReachError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path; `None` if the file is absent.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ReachError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ReachError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| ReachError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `REACH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `REACH_ROBOT_HOST` | `link.host` |
/// | `REACH_STATE_PORT` | `link.state_port` |
/// | `REACH_COMMAND_PORT` | `link.command_port` |
/// | `REACH_MOVE_TIMEOUT_MS` | `link.move_timeout_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("REACH_ROBOT_HOST") {
        cfg.link.host = v;
    }
    if let Ok(v) = std::env::var("REACH_STATE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.link.state_port = port;
    }
    if let Ok(v) = std::env::var("REACH_COMMAND_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.link.command_port = port;
    }
    if let Ok(v) = std::env::var("REACH_MOVE_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.link.move_timeout_ms = ms;
    }
}

/// Save the config to disk, creating `~/.reach/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ReachError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ReachError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ReachError::Config(format!("failed to serialise config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        f.write_all(raw.as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path)?;

        let file_mode = fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let parent = path.parent().ok_or("no parent")?;
        let dir_mode = fs::metadata(parent)?.permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        Ok(())
    }

    #[test]
    fn roundtrip_custom_config() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.link.host = "robot.lan".into();
        cfg.map.resolution = 0.1;
        cfg.planner.robot_radius = 0.3;
        cfg.task.max_retries = 5;
        save_to(&cfg, &path)?;

        assert_eq!(load_from(&path)?, Some(cfg));
        Ok(())
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "[planner]\nrobot_radius = 0.4\n")?;
        let cfg = load_from(&path)?.ok_or("missing")?;
        assert_eq!(cfg.planner.robot_radius, 0.4);
        assert_eq!(cfg.planner.max_iterations, PlannerConfig::default().max_iterations);
        assert_eq!(cfg.link, LinkSection::default());
        assert_eq!(cfg.map, VoxelMapConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_file_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "[link]\nstate_port = \"seventy\"\n")?;
        assert!(matches!(load_from(&path), Err(ReachError::Config(_))));
        Ok(())
    }

    #[test]
    fn load_from_returns_none_when_missing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path)?.is_none());
        Ok(())
    }

    #[test]
    fn sections_map_onto_component_configs() {
        let mut cfg = Config::default();
        cfg.link.move_timeout_ms = 1500;
        cfg.link.publish_interval_ms = 50;
        assert_eq!(cfg.client_config().move_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.follower_config().publish_interval, Duration::from_millis(50));
        assert_eq!(Config::default().client_config(), ClientConfig::default());
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("REACH_ROBOT_HOST", "10.0.0.7");
            std::env::set_var("REACH_STATE_PORT", "5501");
            std::env::set_var("REACH_COMMAND_PORT", "not-a-port");
            std::env::set_var("REACH_MOVE_TIMEOUT_MS", "9000");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.link.host, "10.0.0.7");
        assert_eq!(cfg.link.state_port, 5501);
        assert_eq!(cfg.link.command_port, LinkSection::default().command_port);
        assert_eq!(cfg.link.move_timeout_ms, 9000);
        unsafe {
            std::env::remove_var("REACH_ROBOT_HOST");
            std::env::remove_var("REACH_STATE_PORT");
            std::env::remove_var("REACH_COMMAND_PORT");
            std::env::remove_var("REACH_MOVE_TIMEOUT_MS");
        }
    }
}
