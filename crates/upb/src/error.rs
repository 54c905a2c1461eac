//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use upb_config::ConfigError;
use upb_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the PIM at {url}")]
    #[diagnostic(
        code(upb::connection_failed),
        help(
            "Check that the PIM (or its network bridge) is powered and reachable.\n\
             URL: {url}\n\
             Try: upb monitor -vv"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("No response from {target}")]
    #[diagnostic(
        code(upb::timeout),
        help("The device may be out of range or unpowered. Raise --timeout to wait longer.")
    )]
    Timeout { target: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(upb::not_found),
        help("Run: upb {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(upb::validation))]
    Validation { field: String, reason: String },

    #[error("Malformed UPB message: {0}")]
    #[diagnostic(
        code(upb::decode),
        help("Pass the hex body that follows the PU prefix, checksum included.")
    )]
    Decode(#[from] upb_proto::DecodeError),

    #[error("UPStart import failed: {message}")]
    #[diagnostic(code(upb::import))]
    Import { message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(upb::profile_not_found),
        help(
            "Add a [profiles.{name}] section to {path}\n\
             or pass the PIM address with --url."
        )
    )]
    ProfileNotFound { name: String, path: String },

    #[error(transparent)]
    #[diagnostic(code(upb::config))]
    Config(Box<ConfigError>),

    // ── Gateway ──────────────────────────────────────────────────────

    #[error("{0}")]
    #[diagnostic(code(upb::gateway))]
    Gateway(String),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Decode(_) | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { profile } => CliError::ProfileNotFound {
                name: profile,
                path: upb_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::ProtocolTimeout { target, .. } => CliError::Timeout { target },

            CoreError::DeviceNotFound { index } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: index,
                list_command: "devices list".into(),
            },

            CoreError::LinkNotFound { index } => CliError::NotFound {
                resource_type: "link".into(),
                identifier: index,
                list_command: "links list".into(),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Decode(e) => CliError::Decode(e),

            CoreError::Import { message } => CliError::Import { message },

            other @ (CoreError::Disconnected | CoreError::Handler { .. }) => {
                CliError::Gateway(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_map_to_not_found() {
        let err = CliError::from(CoreError::LinkNotFound {
            index: "194_5".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(matches!(err, CliError::NotFound { ref list_command, .. } if list_command == "links list"));
    }

    #[test]
    fn transport_failures_use_the_connection_code() {
        let err = CliError::from(CoreError::Transport {
            url: "tcp://pim:2101".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn missing_profile_is_a_usage_error() {
        let err = CliError::from(ConfigError::ProfileNotFound {
            profile: "attic".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
