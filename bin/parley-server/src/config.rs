//! Server configuration, loaded from environment variables at startup.
//!
//! Command-line flags (see [`Cli`]) take precedence over the environment.

use clap::Parser;

/// Runtime configuration for parley-server.
///
/// Every field except the Azure OpenAI credentials has a sensible default so
/// the server starts with only those three variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://parley.db"`). The file is created
    /// when it does not exist yet.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily-rolling log files; stdout only when unset.
    pub log_dir: Option<String>,

    /// Comma-separated CORS origin allow-list; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    /// Settings for the chat-completion provider.
    pub completion: CompletionConfig,
}

/// Azure OpenAI connection and sampling settings.
///
/// Sampling parameters are fixed for the lifetime of the client; requests
/// cannot override them.
#[derive(Clone)]
pub struct CompletionConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("presence_penalty", &self.presence_penalty)
            .field("stop", &self.stop)
            .finish()
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: "2024-06-01".to_owned(),
            max_tokens: 800,
            temperature: 0.7,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_owned(),
            database_url: "sqlite://parley.db".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            cors_allowed_origins: None,
            enable_swagger: true,
            completion: CompletionConfig::default(),
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cd = defaults.completion;
        Self {
            bind_address: env_or("PARLEY_BIND", &defaults.bind_address),
            database_url: env_or("PARLEY_DATABASE_URL", &defaults.database_url),
            log_level: env_or("PARLEY_LOG", &defaults.log_level),
            log_json: env_flag("PARLEY_LOG_JSON", defaults.log_json),
            log_dir: env_opt("PARLEY_LOG_DIR"),
            cors_allowed_origins: env_opt("PARLEY_CORS_ORIGINS"),
            enable_swagger: env_flag("PARLEY_ENABLE_SWAGGER", defaults.enable_swagger),
            completion: CompletionConfig {
                endpoint: env_or("AZURE_OPENAI_ENDPOINT", ""),
                api_key: env_or("AZURE_OPENAI_API_KEY", ""),
                deployment: env_or("AZURE_OPENAI_DEPLOYMENT_NAME", ""),
                api_version: env_or("AZURE_OPENAI_API_VERSION", &cd.api_version),
                max_tokens: parse_env("PARLEY_MAX_TOKENS", cd.max_tokens),
                temperature: parse_env("PARLEY_TEMPERATURE", cd.temperature),
                top_p: parse_env("PARLEY_TOP_P", cd.top_p),
                frequency_penalty: parse_env("PARLEY_FREQUENCY_PENALTY", cd.frequency_penalty),
                presence_penalty: parse_env("PARLEY_PRESENCE_PENALTY", cd.presence_penalty),
                stop: env_opt("PARLEY_STOP")
                    .map(|v| split_list(&v))
                    .unwrap_or(cd.stop),
            },
        }
    }

    /// Apply command-line overrides on top of the environment.
    pub fn apply_cli(mut self, cli: Cli) -> Self {
        if let Some(bind) = cli.bind {
            self.bind_address = bind;
        }
        if let Some(url) = cli.database_url {
            self.database_url = url;
        }
        if cli.log_json {
            self.log_json = true;
        }
        self
    }
}

/// Command-line flags for parley-server.
#[derive(Debug, Parser)]
#[command(name = "parley-server", version, about = "Session-scoped chat service")]
pub struct Cli {
    /// Address to bind, overrides `PARLEY_BIND`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Database URL, overrides `PARLEY_DATABASE_URL`.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Emit JSON logs regardless of `PARLEY_LOG_JSON`.
    #[arg(long)]
    pub log_json: bool,
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_provider_sampling() {
        let cfg = CompletionConfig::default();
        assert_eq!(cfg.max_tokens, 800);
        assert!((cfg.temperature - 0.7).abs() < f32::EPSILON);
        assert!((cfg.top_p - 0.95).abs() < f32::EPSILON);
        assert!(cfg.stop.is_empty());
    }

    #[test]
    fn stop_list_is_trimmed_and_skips_blanks() {
        assert_eq!(split_list(" END, ,###"), vec!["END".to_owned(), "###".to_owned()]);
    }

    #[test]
    fn cli_overrides_environment_values() {
        let cli = Cli::parse_from(["parley-server", "--bind", "127.0.0.1:9000", "--log-json"]);
        let cfg = Config::default().apply_cli(cli);
        assert_eq!(cfg.bind_address, "127.0.0.1:9000");
        assert_eq!(cfg.database_url, "sqlite://parley.db");
        assert!(cfg.log_json);
    }

    #[test]
    fn debug_output_hides_api_key() {
        let cfg = CompletionConfig {
            api_key: "super-secret".into(),
            ..CompletionConfig::default()
        };
        assert!(!format!("{cfg:?}").contains("super-secret"));
    }
}
