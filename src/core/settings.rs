//! Application settings persisted as JSON alongside the core

use serde::{Deserialize, Serialize};

use super::profile::ProfileRecord;

/// Settings file name inside the resolved config directory
pub const SETTINGS_FILE: &str = "clashdesk.json";

/// Persisted application settings
///
/// Relative `core_path`/`config_dir` values resolve against the directory the
/// executable lives in, so a portable install keeps working when moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Path to the core executable
    pub core_path: String,
    /// Core config directory (runtime config, profiles, driver file)
    pub config_dir: String,
    /// Base URL of the core's REST control API
    pub api_url: String,
    /// Bearer secret for the control API (empty = none)
    pub api_secret: String,
    /// Id of the profile the runtime config is materialized from
    pub selected_profile_id: Option<String>,
    /// Start the core automatically on launch
    pub auto_start_core: bool,
    /// Whether this app turned the OS proxy setting on
    pub set_system_proxy: bool,
    /// Mixed HTTP/SOCKS listen port injected into the runtime config
    pub mixed_port: u16,
    /// Whether TUN mode is enabled. When false the core runs without TUN even
    /// if the driver file exists on disk; persisted so the choice survives
    /// restarts.
    pub tun_enabled: bool,
    /// Known subscription profiles
    pub profiles: Vec<ProfileRecord>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            core_path: default_core_path(),
            config_dir: "core".to_string(),
            api_url: "http://127.0.0.1:9090".to_string(),
            api_secret: String::new(),
            selected_profile_id: None,
            auto_start_core: true,
            set_system_proxy: false,
            mixed_port: 7890,
            tun_enabled: true,
            profiles: Vec::new(),
        }
    }
}

fn default_core_path() -> String {
    if cfg!(windows) {
        "core\\mihomo-windows-amd64-v3.exe".to_string()
    } else {
        "core/mihomo".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.api_url, "http://127.0.0.1:9090");
        assert_eq!(restored.mixed_port, 7890);
        assert!(restored.auto_start_core);
        assert!(restored.tun_enabled);
        assert!(restored.profiles.is_empty());
    }

    #[test]
    fn fields_serialize_as_camel_case() {
        let json = serde_json::to_string(&AppConfig::default()).unwrap();
        assert!(json.contains("\"apiUrl\""));
        assert!(json.contains("\"mixedPort\""));
        assert!(json.contains("\"tunEnabled\""));
        assert!(json.contains("\"selectedProfileId\""));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: AppConfig = serde_json::from_str(r#"{"mixedPort": 1080}"#).unwrap();
        assert_eq!(parsed.mixed_port, 1080);
        assert_eq!(parsed.config_dir, "core");
        assert!(parsed.selected_profile_id.is_none());
    }
}
