use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    tracing::{debug, warn},
};

use crate::schema::SynadminConfig;

const CONFIG_FILENAMES: &[&str] = &["synadmin.toml", "synadmin.yaml", "synadmin.yml", "synadmin.json"];

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "synadmin")
}

/// Platform configuration directory (`~/.config/synadmin` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Directory for credentials and pending sessions.
pub fn data_dir(config: &SynadminConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.storage.data_dir {
        return Ok(dir.clone());
    }
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .context("could not determine a data directory; set storage.data_dir")
}

/// Load a config file, picking the format from its extension.
pub fn load_config(path: &Path) -> Result<SynadminConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_ascii_lowercase();

    let config: SynadminConfig = match ext.as_str() {
        "toml" => toml::from_str(&raw)
            .with_context(|| format!("invalid TOML in {}", path.display()))?,
        "yaml" | "yml" => serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in {}", path.display()))?,
        "json" => serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?,
        other => bail!("unsupported config format '.{other}' for {}", path.display()),
    };
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

/// Load the explicit path if given, otherwise the first config file found in
/// the platform config directory, otherwise defaults. Environment overrides
/// are applied last.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<SynadminConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => match config_dir().as_deref().and_then(find_in) {
            Some(path) => load_config(&path)?,
            None => {
                debug!("no config file found, using defaults");
                SynadminConfig::default()
            },
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply `SYNADMIN_*` overrides. `lookup` abstracts the environment.
pub fn apply_env_overrides(config: &mut SynadminConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(name) = lookup("SYNADMIN_SERVER_NAME").filter(|v| !v.trim().is_empty()) {
        config.server.name = Some(name.trim().to_string());
    }
    if let Some(suffix) = lookup("SYNADMIN_SERVER_SUFFIX").filter(|v| !v.trim().is_empty()) {
        config.server.suffix = Some(suffix.trim().to_string());
    }
    if let Some(dir) = lookup("SYNADMIN_DATA_DIR").filter(|v| !v.is_empty()) {
        config.storage.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(port) = lookup("SYNADMIN_CALLBACK_PORT") {
        match port.parse() {
            Ok(port) => config.oauth.callback_port = port,
            Err(e) => warn!(%port, %e, "ignoring invalid SYNADMIN_CALLBACK_PORT"),
        }
    }
    if let Some(ms) = lookup("SYNADMIN_POLL_INTERVAL_MS") {
        match ms.parse() {
            Ok(ms) => config.poll.interval_ms = ms,
            Err(e) => warn!(%ms, %e, "ignoring invalid SYNADMIN_POLL_INTERVAL_MS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::schema::RetryConfig;

    #[test]
    fn test_load_toml_with_partial_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("synadmin.toml");
        std::fs::write(
            &path,
            "[server]\nname = \"example.org\"\n\n[poll]\ninterval_ms = 250\n\n[poll.retry]\nkind = \"fixed\"\ndelay_ms = 500\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.name.as_deref(), Some("example.org"));
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.retry, RetryConfig::Fixed { delay_ms: 500 });
        assert_eq!(config.rooms.page_size, 100);
        assert_eq!(config.oauth.callback_port, 19485);
    }

    #[test]
    fn test_load_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("synadmin.yaml");
        std::fs::write(&path, "server:\n  suffix: example.org\ncache:\n  stale_secs: 5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.suffix.as_deref(), Some("example.org"));
        assert_eq!(config.cache.stale_secs, 5);
        assert_eq!(config.cache.gc_secs, 300);
    }

    #[test]
    fn test_load_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("synadmin.json");
        std::fs::write(&path, r#"{"rooms": {"page_size": 10}}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.rooms.page_size, 10);
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("synadmin.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_find_in_prefers_toml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("synadmin.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("synadmin.toml"), "").unwrap();
        assert_eq!(find_in(tmp.path()), Some(tmp.path().join("synadmin.toml")));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SYNADMIN_SERVER_NAME", " chat.example.org "),
            ("SYNADMIN_CALLBACK_PORT", "8080"),
            ("SYNADMIN_POLL_INTERVAL_MS", "not-a-number"),
            ("SYNADMIN_DATA_DIR", "/tmp/synadmin"),
        ]);
        let mut config = SynadminConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.name.as_deref(), Some("chat.example.org"));
        assert_eq!(config.oauth.callback_port, 8080);
        assert_eq!(config.poll.interval_ms, 1_000);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/synadmin")));
        assert_eq!(config.oauth.redirect_uri(), "http://127.0.0.1:8080/callback");
    }

    #[test]
    fn test_data_dir_prefers_configured_path() {
        let mut config = SynadminConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/srv/synadmin"));
        assert_eq!(data_dir(&config).unwrap(), PathBuf::from("/srv/synadmin"));
    }
}
