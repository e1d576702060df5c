//! Service configuration and input preparation for the `mailprobe` binary.

use std::path::{Path, PathBuf};

use mailprobe_common::{SmtpConfig, ValidationError, logging::LoggingConfig, presets, validate};
use mailprobe_web::WebConfig;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Environment variable naming the service config file.
pub const CONFIG_ENV: &str = "MAILPROBE_CONFIG";

/// Places searched, in order, when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "./mailprobe.config.ron",
    "/etc/mailprobe/mailprobe.config.ron",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Loads the service config using the following precedence:
    /// 1. `MAILPROBE_CONFIG` environment variable
    /// 2. ./mailprobe.config.ron (current working directory)
    /// 3. /etc/mailprobe/mailprobe.config.ron (system-wide config)
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if `MAILPROBE_CONFIG` names a missing file, or if the
    /// chosen file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let env = std::env::var(CONFIG_ENV).ok();
        let candidates = DEFAULT_CONFIG_PATHS.map(PathBuf::from);

        match find_config_file(env.as_deref(), &candidates)? {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid RON.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }
}

/// Picks the config file. `None` means run on defaults.
///
/// # Errors
///
/// Returns an error if `env` is set but names a file that does not exist.
pub fn find_config_file(
    env: Option<&str>,
    candidates: &[PathBuf],
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    Ok(candidates.iter().find(|path| path.exists()).cloned())
}

/// Why a probe input file could not become a config.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Probe input must be a JSON object")]
    NotAnObject,

    #[error("Unknown provider preset: {0}")]
    UnknownPreset(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Fills connection fields from `preset` (if any) and validates.
///
/// Fields already present in `raw` win over the preset.
///
/// # Errors
///
/// Returns an error if `raw` is not an object, the preset is unknown, or the
/// resulting config does not validate.
pub fn prepare(mut raw: Value, preset: Option<&str>) -> Result<SmtpConfig, InputError> {
    let object = raw.as_object_mut().ok_or(InputError::NotAnObject)?;

    if let Some(name) = preset {
        presets::lookup(name)
            .ok_or_else(|| InputError::UnknownPreset(name.to_string()))?
            .apply(object);
    }

    Ok(validate(&raw)?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use mailprobe_common::{Security, logging::LogFormat};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = ServiceConfig::default();
        assert_eq!(config.web.listen_address, "[::]:3000");
        assert_eq!(config.web.helo_name, "mailprobe.localhost");
        assert!(config.web.cors);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config: ServiceConfig = ron::from_str(
            r#"(
                web: (listen_address: "127.0.0.1:8080"),
                logging: (level: Some("debug"), format: json),
            )"#,
        )
        .unwrap();

        assert_eq!(config.web.listen_address, "127.0.0.1:8080");
        assert_eq!(config.web.helo_name, "mailprobe.localhost");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn reads_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(web: (cors: false))").unwrap();

        let config = ServiceConfig::from_path(file.path()).unwrap();
        assert!(!config.web.cors);
    }

    #[test]
    fn bad_ron_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(web: ").unwrap();

        let error = ServiceConfig::from_path(file.path()).unwrap_err();
        assert!(error.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn env_path_must_exist() {
        let error = find_config_file(Some("/nonexistent/mailprobe.config.ron"), &[]).unwrap_err();
        assert!(error.to_string().contains(CONFIG_ENV));
    }

    #[test]
    fn env_path_wins_over_candidates() {
        let chosen = tempfile::NamedTempFile::new().unwrap();
        let other = tempfile::NamedTempFile::new().unwrap();

        let found = find_config_file(
            chosen.path().to_str(),
            &[other.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(found.as_deref(), Some(chosen.path()));
    }

    #[test]
    fn first_existing_candidate_is_used() {
        let present = tempfile::NamedTempFile::new().unwrap();
        let candidates = [
            PathBuf::from("/nonexistent/mailprobe.config.ron"),
            present.path().to_path_buf(),
        ];

        let found = find_config_file(None, &candidates).unwrap();
        assert_eq!(found.as_deref(), Some(present.path()));
        assert_eq!(find_config_file(None, &candidates[..1]).unwrap(), None);
    }

    fn input() -> Value {
        json!({
            "username": "alice@gmail.com",
            "password": "app-password",
            "fromEmail": "alice@gmail.com",
            "toEmail": "bob@example.com",
            "subject": "SMTP test",
            "message": "hello",
        })
    }

    #[test]
    fn preset_fills_connection_fields() {
        let config = prepare(input(), Some("gmail")).unwrap();
        assert_eq!(config.host, "smtp.gmail.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.security, Security::Starttls);
        assert!(config.require_auth);
    }

    #[test]
    fn explicit_fields_beat_the_preset() {
        let mut raw = input();
        raw["port"] = json!(2525);

        let config = prepare(raw, Some("gmail")).unwrap();
        assert_eq!(config.port, 2525);
    }

    #[test]
    fn input_errors() {
        assert!(matches!(prepare(json!([]), None), Err(InputError::NotAnObject)));
        assert!(matches!(
            prepare(input(), Some("carrier-pigeon")),
            Err(InputError::UnknownPreset(_))
        ));

        let Err(InputError::Invalid(error)) = prepare(input(), None) else {
            panic!("a config without a host must not validate");
        };
        assert!(error.has_field("host"));
    }
}
