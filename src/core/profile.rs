//! Profile management - subscription profiles and runtime config materialization

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::settings::{AppConfig, SETTINGS_FILE};

/// Name of the generated runtime config read by the core at startup
pub const RUNTIME_CONFIG_FILE: &str = "config.yaml";

/// Sentinel comment marking the managed directive block in the runtime config
const MANAGED_SENTINEL: &str = "# --- clashdesk managed settings ---";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// A saved subscription profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub file_name: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            file_name: format!("{id}.yaml"),
            id,
            name: name.into(),
            url: url.into(),
            updated_at: None,
        }
    }
}

/// Owns the settings file, the downloaded profiles and the generated runtime
/// config. The runtime config is single-writer: nothing else in the process
/// may write it.
pub struct ProfileStore {
    base_dir: PathBuf,
    config: AppConfig,
    http: reqwest::Client,
}

impl ProfileStore {
    /// Open (or initialize) the store rooted at `base_dir`
    pub fn open(base_dir: PathBuf) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(format!("clashdesk/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build profile HTTP client")?;

        let mut store = Self {
            base_dir,
            config: AppConfig::default(),
            http,
        };
        store.load()?;
        Ok(store)
    }

    /// Open the store rooted next to the current executable
    pub fn from_exe_dir() -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot determine executable path")?;
        let base_dir = exe
            .parent()
            .context("Executable has no parent directory")?
            .to_path_buf();
        Self::open(base_dir)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Resolve a possibly relative path against the app base directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            return self.base_dir.clone();
        }
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn resolved_config_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.config_dir)
    }

    pub fn resolved_core_path(&self) -> PathBuf {
        self.resolve_path(&self.config.core_path)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.resolved_config_dir().join(SETTINGS_FILE)
    }

    /// Directory holding the downloaded subscription files
    pub fn profiles_dir(&self) -> PathBuf {
        self.resolved_config_dir().join("profiles")
    }

    pub fn profile_path(&self, profile: &ProfileRecord) -> PathBuf {
        self.profiles_dir().join(&profile.file_name)
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        self.resolved_config_dir().join(RUNTIME_CONFIG_FILE)
    }

    fn load(&mut self) -> Result<()> {
        std::fs::create_dir_all(self.resolved_config_dir())
            .context("Failed to create config directory")?;
        std::fs::create_dir_all(self.profiles_dir())
            .context("Failed to create profiles directory")?;

        let path = self.settings_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str(&json) {
                    Ok(config) => self.config = config,
                    Err(e) => {
                        warn!("settings file is corrupt, using defaults: {e}");
                        self.config = AppConfig::default();
                    }
                },
                Err(e) => warn!("settings file is unreadable, using defaults: {e}"),
            }
        }

        // The loaded config may point the directories somewhere else
        std::fs::create_dir_all(self.resolved_config_dir())
            .context("Failed to create config directory")?;
        std::fs::create_dir_all(self.profiles_dir())
            .context("Failed to create profiles directory")?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.settings_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Download a new subscription and register it
    pub async fn add_profile(&mut self, name: &str, url: &str) -> Result<ProfileRecord> {
        let mut record = ProfileRecord::new(name, url);
        self.download_profile(&mut record).await?;
        self.config.profiles.push(record.clone());
        self.save()?;
        Ok(record)
    }

    /// Re-download an existing subscription
    pub async fn update_profile(&mut self, id: &str) -> Result<()> {
        let index = self
            .config
            .profiles
            .iter()
            .position(|p| p.id == id)
            .context("Unknown profile")?;
        let mut record = self.config.profiles[index].clone();
        self.download_profile(&mut record).await?;
        self.config.profiles[index] = record;
        self.save()
    }

    /// Delete a profile and its downloaded file; deselects it if selected
    pub fn remove_profile(&mut self, id: &str) -> Result<()> {
        let Some(index) = self.config.profiles.iter().position(|p| p.id == id) else {
            return Ok(());
        };
        let record = self.config.profiles.remove(index);
        let path = self.profile_path(&record);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove profile file {}: {e}", path.display());
            }
        }
        if self.config.selected_profile_id.as_deref() == Some(id) {
            self.config.selected_profile_id = None;
        }
        self.save()
    }

    /// Make `id` the selected profile and rewrite the runtime config from it
    pub fn select_profile(&mut self, id: &str) -> Result<()> {
        self.config.selected_profile_id = Some(id.to_string());
        self.write_runtime_config();
        self.save()
    }

    pub fn selected_profile(&self) -> Option<&ProfileRecord> {
        let id = self.config.selected_profile_id.as_deref()?;
        self.config.profiles.iter().find(|p| p.id == id)
    }

    async fn download_profile(&self, record: &mut ProfileRecord) -> Result<()> {
        if record.url.trim().is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .get(&record.url)
            .send()
            .await
            .with_context(|| format!("Failed to download profile from {}", record.url))?
            .error_for_status()
            .context("Profile server rejected the request")?;

        let body = response.bytes().await.context("Profile download aborted")?;
        std::fs::create_dir_all(self.profiles_dir())?;
        std::fs::write(self.profile_path(record), &body)
            .context("Failed to store downloaded profile")?;
        record.updated_at = Some(Utc::now());
        info!("downloaded profile '{}' ({} bytes)", record.name, body.len());
        Ok(())
    }

    /// Rewrite the runtime config from the selected profile with the managed
    /// block injected. Returns false when no profile is selected or its
    /// source file is missing; the existing runtime config is left untouched
    /// in that case.
    pub fn write_runtime_config(&self) -> bool {
        let Some(profile) = self.selected_profile() else {
            debug!("no profile selected, runtime config not rewritten");
            return false;
        };
        let source = self.profile_path(profile);
        let text = match std::fs::read_to_string(&source) {
            Ok(text) => text,
            Err(e) => {
                warn!("profile source {} unreadable: {e}", source.display());
                return false;
            }
        };

        let rendered = inject_managed_settings(
            &text,
            &self.config.api_url,
            &self.config.api_secret,
            self.config.mixed_port,
        );

        let target = self.runtime_config_path();
        if let Some(dir) = target.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match std::fs::write(&target, rendered) {
            Ok(()) => {
                debug!("runtime config rewritten from profile '{}'", profile.name);
                true
            }
            Err(e) => {
                warn!("failed to write runtime config: {e}");
                false
            }
        }
    }

    /// Make sure a runtime config exists so the core can start and expose its
    /// API even before any profile was added
    pub fn ensure_minimal_config(&self) -> Result<()> {
        let target = self.runtime_config_path();
        if target.exists() {
            return Ok(());
        }
        if self.write_runtime_config() {
            return Ok(());
        }

        let mut lines = vec!["# clashdesk minimal config".to_string()];
        lines.extend(managed_directives(
            &self.config.api_url,
            &self.config.api_secret,
            self.config.mixed_port,
        ));
        lines.push("mode: rule".to_string());
        lines.push("log-level: info".to_string());

        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&target, lines.join("\n") + "\n")
            .context("Failed to write minimal runtime config")?;
        info!("wrote minimal runtime config at {}", target.display());
        Ok(())
    }
}

/// `host:port` the control API must listen on, derived from the API base URL
fn external_controller(api_url: &str) -> String {
    match reqwest::Url::parse(api_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("127.0.0.1").to_string();
            let port = url.port_or_known_default().unwrap_or(9090);
            format!("{host}:{port}")
        }
        Err(_) => "127.0.0.1:9090".to_string(),
    }
}

fn managed_directives(api_url: &str, secret: &str, mixed_port: u16) -> Vec<String> {
    let mut lines = vec![format!("external-controller: {}", external_controller(api_url))];
    if !secret.is_empty() {
        lines.push(format!("secret: \"{secret}\""));
    }
    if mixed_port > 0 {
        lines.push(format!("mixed-port: {mixed_port}"));
    }
    lines
}

/// Strip every prior occurrence of the managed directives (even duplicated
/// ones inside the source profile) and append exactly one fresh block.
pub(crate) fn inject_managed_settings(
    source: &str,
    api_url: &str,
    secret: &str,
    mixed_port: u16,
) -> String {
    let mut lines: Vec<String> = source
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !(trimmed.starts_with("external-controller:")
                || trimmed.starts_with("secret:")
                || trimmed.starts_with("mixed-port:")
                || trimmed.starts_with(MANAGED_SENTINEL))
        })
        .map(str::to_string)
        .collect();

    lines.push(String::new());
    lines.push(MANAGED_SENTINEL.to_string());
    lines.extend(managed_directives(api_url, secret, mixed_port));

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_selected_profile(profile_text: &str) -> (TempDir, ProfileStore) {
        let dir = TempDir::new().unwrap();
        let mut store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        let record = ProfileRecord::new("test", "");
        std::fs::write(store.profile_path(&record), profile_text).unwrap();
        let id = record.id.clone();
        store.config_mut().profiles.push(record);
        store.config_mut().selected_profile_id = Some(id);
        (dir, store)
    }

    #[test]
    fn managed_block_is_appended_once() {
        let rendered = inject_managed_settings(
            "proxies: []\nmixed-port: 1234\n",
            "http://127.0.0.1:9090",
            "",
            7890,
        );
        assert_eq!(rendered.matches(MANAGED_SENTINEL).count(), 1);
        assert_eq!(rendered.matches("mixed-port:").count(), 1);
        assert!(rendered.contains("external-controller: 127.0.0.1:9090"));
        assert!(!rendered.contains("mixed-port: 1234"));
        assert!(!rendered.contains("secret:"));
    }

    #[test]
    fn regeneration_is_idempotent() {
        let first = inject_managed_settings(
            "mode: rule\nexternal-controller: 0.0.0.0:1\nexternal-controller: 0.0.0.0:2\n",
            "http://127.0.0.1:9090",
            "s3cret",
            7890,
        );
        let second = inject_managed_settings(&first, "http://127.0.0.1:9090", "s3cret", 7890);
        assert_eq!(second.matches(MANAGED_SENTINEL).count(), 1);
        assert_eq!(second.matches("external-controller:").count(), 1);
        assert_eq!(second.matches("secret:").count(), 1);
        assert!(second.contains("secret: \"s3cret\""));
    }

    #[test]
    fn invalid_api_url_falls_back_to_default_controller() {
        let rendered = inject_managed_settings("", "not a url", "", 0);
        assert!(rendered.contains("external-controller: 127.0.0.1:9090"));
        assert!(!rendered.contains("mixed-port:"));
    }

    #[test]
    fn write_runtime_config_requires_a_selected_profile() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        assert!(!store.write_runtime_config());
        assert!(!store.runtime_config_path().exists());
    }

    #[test]
    fn write_runtime_config_materializes_selected_profile() {
        let (_dir, store) = store_with_selected_profile("proxies: []\n");
        assert!(store.write_runtime_config());
        // A second generation must not stack managed blocks
        assert!(store.write_runtime_config());
        let rendered = std::fs::read_to_string(store.runtime_config_path()).unwrap();
        assert_eq!(rendered.matches(MANAGED_SENTINEL).count(), 1);
        assert!(rendered.contains("proxies: []"));
    }

    #[test]
    fn missing_profile_source_leaves_runtime_config_alone() {
        let (_dir, mut store) = store_with_selected_profile("proxies: []\n");
        assert!(store.write_runtime_config());
        let before = std::fs::read_to_string(store.runtime_config_path()).unwrap();

        let path = {
            let selected = store.selected_profile().unwrap().clone();
            store.profile_path(&selected)
        };
        std::fs::remove_file(path).unwrap();
        assert!(!store.write_runtime_config());
        let after = std::fs::read_to_string(store.runtime_config_path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn ensure_minimal_config_bootstraps_without_profiles() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        store.ensure_minimal_config().unwrap();
        let text = std::fs::read_to_string(store.runtime_config_path()).unwrap();
        assert!(text.contains("external-controller: 127.0.0.1:9090"));
        assert!(text.contains("mode: rule"));
        assert!(text.contains("mixed-port: 7890"));
    }

    #[test]
    fn remove_profile_deselects_and_deletes_file() {
        let (_dir, mut store) = store_with_selected_profile("proxies: []\n");
        let (id, path) = {
            let selected = store.selected_profile().unwrap().clone();
            (selected.id.clone(), store.profile_path(&selected))
        };
        store.remove_profile(&id).unwrap();
        assert!(store.selected_profile().is_none());
        assert!(!path.exists());
        assert!(store.config().profiles.is_empty());
    }

    #[test]
    fn settings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
            store.config_mut().mixed_port = 1080;
            store.config_mut().api_secret = "abc".to_string();
            store.save().unwrap();
        }
        let store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.config().mixed_port, 1080);
        assert_eq!(store.config().api_secret, "abc");
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("core");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(SETTINGS_FILE), "{not json").unwrap();
        let store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.config().mixed_port, 7890);
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.resolved_config_dir(), dir.path().join("core"));
        assert_eq!(store.resolve_path(""), dir.path());
        let absolute = dir.path().join("elsewhere");
        assert_eq!(store.resolve_path(absolute.to_str().unwrap()), absolute);
    }
}
