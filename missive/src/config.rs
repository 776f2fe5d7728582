//! RON configuration for the `missive` binary.
//!
//! ```ron
//! Config(
//!     server: "smtp.example.com:587",
//!     credentials: Some((username: "alice", password: "secret")),
//!     transport: start_tls,
//!     tls: (policy: required),
//!     sender: Some((name: "Alice", address: "alice@example.com")),
//! )
//! ```

use std::path::{Path, PathBuf};

use missive_common::config::{ClientTimeouts, TlsConfig};
use missive_smtp::{Credentials, Mailer, RecipientScope, ServerAddress, SessionConfig, Transport};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "MISSIVE_CONFIG";

/// Searched in order when neither the flag nor the environment names a file.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./missive.config.ron", "/etc/missive/missive.config.ron"];

/// The `From:` used when a command line does not give one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `host:port` of the relay.
    pub server: ServerAddress,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub timeouts: ClientTimeouts,

    #[serde(default)]
    pub recipients: RecipientScope,

    /// Overrides the name announced in EHLO/HELO.
    #[serde(default)]
    pub helo_name: Option<String>,

    #[serde(default)]
    pub sender: Option<Sender>,
}

impl Config {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` is not a valid configuration.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        ron::from_str(content).map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("{e} (in {})", path.display()))
    }

    /// Credentials with an empty username mean "do not authenticate", as
    /// they do for [`Mailer::new`].
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let credentials = self
            .credentials
            .as_ref()
            .and_then(|c| Credentials::optional(c.username(), c.password()));

        let mut config = SessionConfig::new()
            .with_credentials(credentials)
            .with_tls(self.tls.clone())
            .with_timeouts(self.timeouts.clone())
            .with_recipients(self.recipients);

        if let Some(helo_name) = &self.helo_name {
            config.helo_name.clone_from(helo_name);
        }

        config
    }

    #[must_use]
    pub fn mailer(&self) -> Mailer {
        Mailer::from_config(self.server.clone(), self.transport, self.session_config())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag)
/// 2. `MISSIVE_CONFIG` environment variable
/// 3. [`DEFAULT_CONFIG_PATHS`]
///
/// # Errors
///
/// Returns an error if a named file does not exist, or none of the defaults
/// do.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let from_env = std::env::var(CONFIG_ENV_VAR).ok();
    let defaults = DEFAULT_CONFIG_PATHS.map(PathBuf::from);

    locate(explicit, from_env.as_deref(), &defaults)
}

fn locate(
    explicit: Option<&Path>,
    from_env: Option<&str>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV_VAR} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - {CONFIG_ENV_VAR} environment variable\n{paths_tried}"
    )
}
