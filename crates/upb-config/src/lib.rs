//! Shared configuration for UPB tools.
//!
//! TOML profiles, environment overrides, and translation to
//! `upb_core::GatewayConfig`. The CLI layers its own flags on top through
//! [`Overrides`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use upb_core::{Flags, GatewayConfig};
use upb_proto::PimUrl;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found (and no URL given)")]
    ProfileNotFound { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named PIM profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Seconds allowed per connect attempt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_connect_timeout() -> u64 {
    30
}

/// A named PIM profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// PIM URL (e.g., "tcp://192.168.1.20:2101" or "serial:///dev/ttyUSB0").
    pub url: String,

    /// Comma-separated flag string (e.g., "no_sync,tx_count=2").
    #[serde(default)]
    pub flags: String,

    /// UPStart export to import on startup.
    pub upstart_file: Option<PathBuf>,

    /// Override the per-write response timeout.
    pub response_timeout_ms: Option<u64>,

    /// Override the idle heartbeat; 0 disables it.
    pub heartbeat_sec: Option<u64>,

    /// Override the connect timeout.
    pub connect_timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "upb", "upb").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("upb");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path` + environment. A missing file yields defaults.
///
/// Nested keys come from `UPB_` variables with `__` as separator, e.g.
/// `UPB_DEFAULTS__OUTPUT=json`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("UPB_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Render a config as TOML.
pub fn to_toml(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

// ── Profile resolution ──────────────────────────────────────────────

/// Values that win over the profile. The CLI fills these from its flags;
/// other consumers use [`Overrides::from_env`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub profile: Option<String>,
    pub url: Option<String>,
    pub flags: Option<String>,
}

impl Overrides {
    /// `UPB_PROFILE`, `UPB_URL` and `UPB_FLAGS`.
    pub fn from_env() -> Self {
        Self {
            profile: std::env::var("UPB_PROFILE").ok(),
            url: std::env::var("UPB_URL").ok(),
            flags: std::env::var("UPB_FLAGS").ok(),
        }
    }
}

/// Name of the profile to use: explicit override, then the config's
/// default, then `"default"`.
pub fn active_profile_name(cfg: &Config, overrides: &Overrides) -> String {
    overrides
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Pick the active profile and apply overrides to it. A URL override
/// works without any profile at all.
pub fn resolve_profile(cfg: &Config, overrides: &Overrides) -> Result<(String, Profile), ConfigError> {
    let name = active_profile_name(cfg, overrides);
    let mut profile = match (cfg.profiles.get(&name), &overrides.url) {
        (Some(p), _) => p.clone(),
        (None, Some(_)) => Profile::default(),
        (None, None) => return Err(ConfigError::ProfileNotFound { profile: name }),
    };
    if let Some(url) = &overrides.url {
        profile.url.clone_from(url);
    }
    if let Some(flags) = &overrides.flags {
        profile.flags.clone_from(flags);
    }
    Ok((name, profile))
}

/// Build a `GatewayConfig` from a profile.
pub fn profile_to_gateway_config(profile: &Profile, defaults: &Defaults) -> Result<GatewayConfig, ConfigError> {
    let url: PimUrl = profile.url.parse().map_err(|e: upb_proto::Error| ConfigError::Validation {
        field: "url".into(),
        reason: e.to_string(),
    })?;
    let flags: Flags = profile.flags.parse().unwrap_or_default();

    let mut config = GatewayConfig::new(url, flags);
    config.connect_timeout =
        Duration::from_secs(profile.connect_timeout.unwrap_or(defaults.connect_timeout));
    if let Some(ms) = profile.response_timeout_ms {
        config.response_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = profile.heartbeat_sec {
        if !config.url.is_serial() {
            config.heartbeat = (secs > 0).then(|| Duration::from_secs(secs));
        }
    }
    config.upstart_file.clone_from(&profile.upstart_file);
    Ok(config)
}

/// Load, select and convert in one step.
pub fn resolve(cfg: &Config, overrides: &Overrides) -> Result<GatewayConfig, ConfigError> {
    let (_, profile) = resolve_profile(cfg, overrides)?;
    profile_to_gateway_config(&profile, &cfg.defaults)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
output = "json"

[profiles.home]
url = "tcp://10.0.0.20"
flags = "report_state, tx_count=2"
upstart_file = "/etc/upb/home.upe"
heartbeat_sec = 60

[profiles.bench]
url = "serial:///dev/ttyUSB0:9600"
heartbeat_sec = 60
"#;

    fn sample() -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        load_config_from(file.path()).unwrap()
    }

    #[test]
    fn loads_profiles_and_defaults() {
        let cfg = sample();
        assert_eq!(cfg.default_profile.as_deref(), Some("home"));
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.defaults.color, "auto");
        assert_eq!(cfg.profiles.len(), 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_config_from(Path::new("/nonexistent/upb.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn default_profile_resolves_to_gateway_config() {
        let cfg = sample();
        let gw = resolve(&cfg, &Overrides::default()).unwrap();
        assert_eq!(gw.url.to_string(), "tcp://10.0.0.20:2101");
        assert!(gw.flags.report_state());
        assert_eq!(gw.flags.tx_count(), 2);
        assert_eq!(gw.heartbeat, Some(Duration::from_secs(60)));
        assert_eq!(gw.connect_timeout, Duration::from_secs(30));
        assert_eq!(gw.upstart_file, Some(PathBuf::from("/etc/upb/home.upe")));
    }

    #[test]
    fn serial_profiles_never_get_a_heartbeat() {
        let cfg = sample();
        let overrides = Overrides {
            profile: Some("bench".into()),
            ..Overrides::default()
        };
        let gw = resolve(&cfg, &overrides).unwrap();
        assert!(gw.url.is_serial());
        assert_eq!(gw.heartbeat, None);
    }

    #[test]
    fn overrides_win_and_url_alone_is_enough() {
        let cfg = Config::default();
        assert!(matches!(
            resolve(&cfg, &Overrides::default()),
            Err(ConfigError::ProfileNotFound { .. })
        ));

        let overrides = Overrides {
            url: Some("tcp://pim.local:3000".into()),
            flags: Some("no_sync".into()),
            ..Overrides::default()
        };
        let gw = resolve(&cfg, &overrides).unwrap();
        assert_eq!(gw.url.to_string(), "tcp://pim.local:3000");
        assert!(gw.flags.no_sync());
    }

    #[test]
    fn bad_url_is_a_validation_error() {
        let profile = Profile {
            url: "http://nope".into(),
            ..Profile::default()
        };
        let err = profile_to_gateway_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));
    }

    #[test]
    fn zero_heartbeat_disables_it() {
        let profile = Profile {
            url: "tcp://pim".into(),
            heartbeat_sec: Some(0),
            ..Profile::default()
        };
        let gw = profile_to_gateway_config(&profile, &Defaults::default()).unwrap();
        assert_eq!(gw.heartbeat, None);
    }

    #[test]
    fn renders_back_to_toml() {
        let text = to_toml(&sample()).unwrap();
        assert!(text.contains("[profiles.home]"));
    }
}
