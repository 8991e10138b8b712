use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{info, warn};

pub static DEFAULT_WHITELIST_FILE: &str = "scripts/whitelist.toml";
pub static LOGS_DIR: &str = "logs";
pub static LOG_FILE_NAME: &str = "volume_sync.log";

/// The whitelist file: per-service patterns plus the sync settings.
#[derive(Debug, Default, Deserialize)]
pub struct WhitelistConfig {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub services: IndexMap<String, ServicePatterns>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServicePatterns {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Where volumes live and where their files go, relative to the repository.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub volume_prefix: String,
    pub configs_dir: PathBuf,
    /// Logical volume name -> service directory under `configs_dir`
    pub volumes: IndexMap<String, String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            volume_prefix: "home-automation_".to_string(),
            configs_dir: PathBuf::from("configs"),
            volumes: [
                ("home_assistant_config", "home-assistant"),
                ("node_red_data", "node-red"),
                ("zwave_data", "zwave-js-ui"),
            ]
            .into_iter()
            .map(|(volume, service)| (volume.to_string(), service.to_string()))
            .collect(),
        }
    }
}

static DEFAULT_WHITELIST: &str = r#"# Volume sync whitelist.
# Files copied from container volumes into the repository are selected per
# service: exclude patterns are checked first, then include patterns, and a
# file matching neither is left out.

[sync]
volume_prefix = "home-automation_"
configs_dir = "configs"

[sync.volumes]
home_assistant_config = "home-assistant"
node_red_data = "node-red"
zwave_data = "zwave-js-ui"

[services.home-assistant]
# Home Assistant configuration files
include = [
    "configuration.yaml",
    "automations.yaml",
    "scripts.yaml",
    "scenes.yaml",
    "groups.yaml",
    "customize.yaml",
    "secrets.yaml.example",  # Template only, not actual secrets
    "ui-lovelace.yaml",
    "known_devices.yaml",
    "*.yaml",
    "*.yml",
    "blueprints/**/*.yaml",
    "custom_components/**/*.py",
    "custom_components/**/*.yaml",
    "custom_components/**/*.json",
    "custom_components/**/manifest.json",
    "themes/**/*.yaml",
    "packages/**/*.yaml",
    "integrations/**/*.yaml",
    ".storage/lovelace*",  # UI configuration
    ".storage/core.config_entries",
    ".storage/core.device_registry",
    ".storage/core.entity_registry",
    ".storage/auth_provider.homeassistant",
]

exclude = [
    "home-assistant.log*",
    "home-assistant_v2.db*",
    ".storage/auth",
    ".storage/*token*",
    "secrets.yaml",  # Never sync actual secrets
    "*.db",
    "*.db-*",
    "*.sqlite*",
    "*.log*",
    "tts/**",
    "deps/**",
    "__pycache__/**",
    "*.pyc",
    ".cloud/**",
    ".google*",
    "*.pid",
    "*.json.backup",
    ".HA_VERSION",
    "OZW_Log.txt",
]

[services.node-red]
# Node-RED flows and configuration
include = [
    "flows.json",
    "flows_cred.json.example",  # Template only
    "settings.js",
    "package.json",
    "lib/**/*.js",
    "lib/**/*.json",
]

exclude = [
    "flows_cred.json",  # Never sync actual credentials
    ".config.*.json",
    ".sessions.json",
    "node_modules/**",
    ".npm/**",
    "*.log",
    ".node-red-contrib-*/**",  # Downloaded modules
]

[services.zwave-js-ui]
# ZWave-JS-UI configuration and data
include = [
    "settings.json",
    "scenes.jsonl",
    "mqtt.json",
    "store.json",
    "nodes.json",
]

exclude = [
    "zwave-js-ui.log*",
    "*.cache",
    "cache/**",
    "sessions/**",
    "*.tmp",
    "zwavejs_*.json",  # Network cache files
]
"#;

/// Writes the default whitelist when `path` does not exist yet.
/// Returns whether a file was created.
pub fn ensure_whitelist_file<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }

    warn!("Whitelist file not found at {}", path.display());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_WHITELIST)
        .with_context(|| format!("Failed to write default whitelist {}", path.display()))?;
    info!(
        "Created default whitelist configuration at {}, edit it to customize the sync patterns",
        path.display()
    );
    Ok(true)
}

pub fn load_whitelist_config<P: AsRef<Path>>(path: P) -> Result<WhitelistConfig> {
    info!("Loading whitelist from file {}", path.as_ref().display());
    let toml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read whitelist file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&toml_str)?;

    let config = toml::from_str(&expanded)
        .context("Failed to parse TOML whitelist after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let missing: Vec<&str> = re
        .captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| env::var(name).is_err())
        .collect();
    if !missing.is_empty() {
        bail!("Missing environment variable: {}", missing.join(", "));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("VOLUME_SYNC_TEST_VAR", "value123");
        }
        let input = "This is a test: ${VOLUME_SYNC_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("VOLUME_SYNC_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${VOLUME_SYNC_MISSING_VAR}";
        let err = expand_env_vars(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing environment variable: VOLUME_SYNC_MISSING_VAR"
        );
    }

    #[test]
    fn test_expand_env_vars_multiple_vars() {
        unsafe {
            env::set_var("VOLUME_SYNC_VAR1", "foo");
            env::set_var("VOLUME_SYNC_VAR2", "bar");
        }
        let input = "${VOLUME_SYNC_VAR1} and ${VOLUME_SYNC_VAR2}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "foo and bar");
        unsafe {
            env::remove_var("VOLUME_SYNC_VAR1");
            env::remove_var("VOLUME_SYNC_VAR2");
        }
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_whitelist_file() {
        let toml_content = r#"
        [sync]
        volume_prefix = "stack_"

        [sync.volumes]
        mosquitto_data = "mosquitto"

        [services.mosquitto]
        include = ["mosquitto.conf", "conf.d/*"]
        exclude = ["*.db"]
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, toml_content).expect("Failed to write to temp file");

        let config = load_whitelist_config(path).expect("Should load whitelist");

        assert_eq!(config.sync.volume_prefix, "stack_");
        assert_eq!(config.sync.configs_dir, PathBuf::from("configs"));
        assert_eq!(config.sync.volumes.len(), 1);
        assert_eq!(config.sync.volumes["mosquitto_data"], "mosquitto");
        assert_eq!(
            config.services["mosquitto"],
            ServicePatterns {
                include: vec!["mosquitto.conf".into(), "conf.d/*".into()],
                exclude: vec!["*.db".into()],
            }
        );
    }

    #[test]
    fn test_load_whitelist_without_sync_table_uses_defaults() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "[services.node-red]\ninclude = [\"flows.json\"]\n").unwrap();

        let config = load_whitelist_config(tmp_file.path()).expect("Should load whitelist");

        assert_eq!(config.sync, SyncSettings::default());
        assert!(config.services["node-red"].exclude.is_empty());
    }

    #[test]
    fn test_load_whitelist_rejects_malformed_toml() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "[services.node-red\ninclude = 3").unwrap();

        assert!(load_whitelist_config(tmp_file.path()).is_err());
    }

    #[test]
    fn test_ensure_whitelist_file_creates_default_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scripts/whitelist.toml");

        assert!(ensure_whitelist_file(&path).unwrap());
        assert!(!ensure_whitelist_file(&path).unwrap());

        let config = load_whitelist_config(&path).expect("Default whitelist should parse");
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(
            config.services.keys().collect::<Vec<_>>(),
            vec!["home-assistant", "node-red", "zwave-js-ui"]
        );
        assert!(config.services["home-assistant"]
            .exclude
            .contains(&"secrets.yaml".to_string()));
        assert!(config.services["home-assistant"]
            .include
            .contains(&"custom_components/**/manifest.json".to_string()));
        assert_eq!(config.services["home-assistant"].include.len(), 24);
        assert_eq!(
            config.services["node-red"].exclude[0],
            "flows_cred.json",
            "trailing comments must not leak into patterns"
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"secrets.yaml\",  # Never sync actual secrets"));
    }
}
