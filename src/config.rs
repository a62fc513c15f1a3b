use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Config file picked up from the working directory when no path is given.
const CWD_CONFIG_FILE: &str = "config.yaml";

/// Placeholder secret shipped in sample configs; never accepted.
const PLACEHOLDER_SECRET: &str = "change-me";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub assistant: AssistantConfig,
    pub room: RoomConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Where the identity provider sends the browser back to.
    pub redirect_url: String,
    pub jwt_secret: String,
    pub session_ttl_secs: u64,
    /// Adds the `Secure` attribute to the session cookie.
    pub cookie_secure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    #[serde(default)]
    pub thread_store_path: Option<String>,
}

impl AssistantConfig {
    /// The assistant is only reachable with both a key and an assistant id.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.api_key) && present(&self.assistant_id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoomConfig {
    pub name: String,
    pub capacity: usize,
    pub history_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("auth.google_client_id", "")?
            .set_default("auth.google_client_secret", "")?
            .set_default("auth.redirect_url", "http://localhost:3000/auth/callback")?
            .set_default("auth.jwt_secret", "")?
            .set_default("auth.session_ttl_secs", 7 * 24 * 60 * 60)?
            .set_default("auth.cookie_secure", false)?
            .set_default("assistant.base_url", "https://api.openai.com")?
            .set_default("assistant.poll_interval_ms", 1000)?
            .set_default("assistant.max_poll_attempts", 120)?
            .set_default("room.name", "room_one")?
            .set_default("room.capacity", 256)?
            .set_default("room.history_limit", 100)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.requests_per_second", 20)?
            .set_default("resilience.burst_size", 40)?
            // Long enough to cover a full assistant poll cycle.
            .set_default("resilience.request_timeout_secs", 180)?
            .set_default("logging.json", false)?
            .set_default("logging.filter", "info,giga_chat=debug")?;

        // Explicit path is required to exist, the working-directory file is not.
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if Path::new(CWD_CONFIG_FILE).exists() {
            builder = builder.add_source(File::with_name(CWD_CONFIG_FILE).required(false));
        }

        // E.g. GIGA_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("GIGA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Well-known secret names used by deployments of the hosted services.
        for (var, key) in [
            ("OPENAI_API_KEY", "assistant.api_key"),
            ("OPENAI_ASSISTANT_ID", "assistant.assistant_id"),
            ("GOOGLE_CLIENT_ID", "auth.google_client_id"),
            ("GOOGLE_CLIENT_SECRET", "auth.google_client_secret"),
            ("REDIRECT_URL", "auth.redirect_url"),
            ("JWT_SECRET", "auth.jwt_secret"),
        ] {
            if let Ok(val) = env::var(var)
                && !val.trim().is_empty()
            {
                builder = builder.set_override(key, val)?;
            }
        }

        // Priority: CLI flag > CLI env var > well-known env > GIGA_ env > file > defaults.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Settings the server refuses to start without.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let secret = self.auth.jwt_secret.trim();
        if secret.is_empty() || secret == PLACEHOLDER_SECRET {
            return Err(config::ConfigError::Message(
                "auth.jwt_secret must be set (JWT_SECRET or GIGA_AUTH__JWT_SECRET)".to_string(),
            ));
        }
        Ok(())
    }

    /// Human-readable problems that leave part of the app unusable.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.auth.google_client_id.trim().is_empty() {
            out.push("auth.google_client_id is empty; sign-in will fail".to_string());
        }
        if !self.assistant.is_configured() {
            out.push("assistant api_key/assistant_id missing; AI replies disabled".to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(api_key: Option<&str>, assistant_id: Option<&str>) -> AssistantConfig {
        AssistantConfig {
            base_url: "https://api.openai.com".to_string(),
            api_key: api_key.map(String::from),
            assistant_id: assistant_id.map(String::from),
            poll_interval_ms: 1000,
            max_poll_attempts: 120,
            thread_store_path: None,
        }
    }

    #[test]
    fn jwt_secret_is_required() {
        let mut config = AppConfig::load_from_args(["giga-chat"]).unwrap();
        for bad in ["", "   ", "change-me"] {
            config.auth.jwt_secret = bad.to_string();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("auth.jwt_secret"));
        }
        config.auth.jwt_secret = "a-real-secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn assistant_needs_key_and_id() {
        assert!(assistant(Some("sk"), Some("asst_1")).is_configured());
        assert!(!assistant(Some("sk"), None).is_configured());
        assert!(!assistant(Some("  "), Some("asst_1")).is_configured());
        assert!(!assistant(None, Some("asst_1")).is_configured());
    }
}
