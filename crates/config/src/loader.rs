use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{Error, Result, env_subst::substitute_env, schema::MedbotConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["medbot.toml", "medbot.yaml", "medbot.yml", "medbot.json"];

pub const TOKEN_ENV: &str = "DISCORD_TOKEN";
pub const DATABASE_URL_ENV: &str = "MEDBOT_DATABASE_URL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<MedbotConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./medbot.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/medbot/medbot.{toml,yaml,yml,json}`
///
/// Returns `MedbotConfig::default()` if no config file is found or it fails
/// to parse.
pub fn discover_and_load() -> MedbotConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MedbotConfig::default()
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "medbot").map(|d| d.config_dir().to_path_buf())
}

/// Let `DISCORD_TOKEN` and `MEDBOT_DATABASE_URL` win over file values.
pub fn apply_env_overrides(config: &mut MedbotConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut MedbotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
        config.discord.token = Some(Secret::new(token));
    }
    if let Some(url) = lookup(DATABASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
        config.database.url = url;
    }
}

fn find_config_file() -> Option<PathBuf> {
    find_config_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_config_in(&dir)))
}

fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<MedbotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            ext: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn loads_toml_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("medbot.toml");
        std::fs::write(&toml_path, "[database]\nmax_connections = 2\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().database.max_connections, 2);

        let yaml_path = dir.path().join("medbot.yaml");
        std::fs::write(&yaml_path, "scheduler:\n  enabled: false\n").unwrap();
        assert!(!load_config(&yaml_path).unwrap().scheduler.enabled);

        let json_path = dir.path().join("medbot.json");
        std::fs::write(&json_path, r#"{"fetch":{"max_redirects":5}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().fetch.max_redirects, 5);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medbot.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/medbot.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/medbot.toml"));
    }

    #[test]
    fn finds_first_known_filename() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_in(dir.path()).is_none());
        std::fs::write(dir.path().join("medbot.yml"), "").unwrap();
        std::fs::write(dir.path().join("medbot.json"), "{}").unwrap();
        assert_eq!(
            find_config_in(dir.path()).unwrap(),
            dir.path().join("medbot.yml")
        );
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = MedbotConfig::default();
        apply_env_overrides_with(&mut config, |name| match name {
            TOKEN_ENV => Some("env-token".into()),
            DATABASE_URL_ENV => Some("sqlite::memory:".into()),
            _ => None,
        });
        assert_eq!(
            config.discord.token.as_ref().unwrap().expose_secret(),
            "env-token"
        );
        assert_eq!(config.database.url, "sqlite::memory:");

        let mut untouched = MedbotConfig::default();
        apply_env_overrides_with(&mut untouched, |_| Some("  ".into()));
        assert!(untouched.discord.token.is_none());
    }
}
