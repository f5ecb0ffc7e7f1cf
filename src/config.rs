use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub quota: QuotaConfig,
    pub jobs: JobsConfig,
    pub research: ResearchConfig,
    pub budgets: BudgetsConfig,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expires_in: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Per-tier request quota for the HTTP API (requests per window)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub window_secs: u64,
    pub free: u32,
    pub premium: u32,
    pub enterprise: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Hard per-job deadline (default: 10 minutes)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub deadline_secs: u64,
    /// Interval of the watchdog that fails jobs stuck past the deadline
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub watchdog_interval_secs: u64,
    pub watchdog_enabled: bool,
}

/// Deep research endpoint (OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub api_base: String,
    pub model: String,
    /// Name of the environment variable carrying the API key.
    /// An empty or unset variable disables the research path only.
    pub key_env: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
}

/// Budget envelope for one subscription tier
#[derive(Debug, Clone, Deserialize)]
pub struct TierBudget {
    pub max_cost_per_request: f64,
    pub preferred_free_ratio: f64,
    pub min_quality: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetsConfig {
    pub free: TierBudget,
    pub premium: TierBudget,
    pub enterprise: TierBudget,
}

/// One external content provider. URLs and auth names are configuration,
/// never code; a missing key env var disables the client, not the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub base_url: String,
    pub tier: String,
    pub category: String,
    pub rate_limit: u32,
    pub rate_period: u64,
    pub cost_per_request: f64,
    pub cache_ttl: u64,
    pub timeout: u64,
    pub max_retries: u32,
    pub auth: String,
    pub key_env: String,
    pub enabled: bool,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "atlascast")]
#[command(version, about = "Atlascast - Location Podcast Generation Backend")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// JWT secret key (overrides config file)
    #[arg(long, value_name = "SECRET")]
    pub jwt_secret: Option<String>,

    /// Logging level (overrides config file, e.g., "info,atlascast=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Per-job deadline (overrides config file, e.g., "600s", "10m")
    #[arg(long, value_name = "DURATION")]
    pub job_deadline: Option<String>,

    /// Enable/disable the stuck-job watchdog (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub watchdog_enabled: Option<bool>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        if config.providers.is_empty() {
            config.providers = default_providers();
        }

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST: Server host (default: 0.0.0.0)
    /// - APP_SERVER_PORT: Server port (default: 8080)
    /// - APP_DATABASE_URL: Database URL (default: sqlite://data/atlascast.db)
    /// - APP_JWT_SECRET: JWT secret key
    /// - APP_JWT_EXPIRES_IN: JWT expiration time (e.g., "24h")
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,atlascast=debug")
    /// - APP_JOB_DEADLINE_SECS: Per-job deadline (accepts "600s", "10m")
    /// - APP_RESEARCH_API_BASE: Deep research API base URL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(secret) = std::env::var("APP_JWT_SECRET") {
            self.auth.jwt_secret = secret;
            tracing::info!("Override auth.jwt_secret from env");
        }

        if let Ok(expires) = std::env::var("APP_JWT_EXPIRES_IN") {
            self.auth.jwt_expires_in = expires;
            tracing::info!("Override auth.jwt_expires_in from env: {}", self.auth.jwt_expires_in);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(deadline) = std::env::var("APP_JOB_DEADLINE_SECS") {
            match parse_duration_to_secs(&deadline) {
                Ok(val) => {
                    self.jobs.deadline_secs = val;
                    tracing::info!(
                        "Override jobs.deadline_secs from env: {}",
                        self.jobs.deadline_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_JOB_DEADLINE_SECS '{}': {} (keep {})",
                    deadline,
                    e,
                    self.jobs.deadline_secs
                ),
            }
        }

        if let Ok(base) = std::env::var("APP_RESEARCH_API_BASE") {
            self.research.api_base = base;
            tracing::info!("Override research.api_base from env");
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(secret) = &args.jwt_secret {
            self.auth.jwt_secret = secret.clone();
            tracing::info!("Override auth.jwt_secret from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(deadline) = &args.job_deadline {
            match parse_duration_to_secs(deadline) {
                Ok(val) => {
                    self.jobs.deadline_secs = val;
                    tracing::info!(
                        "Override jobs.deadline_secs from CLI: {}",
                        self.jobs.deadline_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --job-deadline '{}': {} (keep {})",
                    deadline,
                    e,
                    self.jobs.deadline_secs
                ),
            }
        }

        if let Some(enabled) = args.watchdog_enabled {
            self.jobs.watchdog_enabled = enabled;
            tracing::info!("Override jobs.watchdog_enabled from CLI: {}", enabled);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.jwt_secret == "dev-secret-key-change-in-production" {
            tracing::warn!("⚠️  WARNING: Using default JWT secret!");
            tracing::warn!(
                "⚠️  Please set APP_JWT_SECRET environment variable or update config.toml"
            );
            tracing::warn!("⚠️  This is INSECURE for production use!");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.jobs.deadline_secs == 0 {
            anyhow::bail!("jobs.deadline_secs must be > 0");
        }

        for p in &self.providers {
            if p.rate_limit == 0 || p.rate_period == 0 {
                anyhow::bail!(
                    "provider '{}' must have rate_limit > 0 and rate_period > 0",
                    p.name
                );
            }
        }

        for (tier, budget) in [
            ("free", &self.budgets.free),
            ("premium", &self.budgets.premium),
            ("enterprise", &self.budgets.enterprise),
        ] {
            if !(0.0..=1.0).contains(&budget.preferred_free_ratio) {
                anyhow::bail!("budgets.{}.preferred_free_ratio must be within [0, 1]", tier);
            }
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/atlascast.db".to_string() }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-key-change-in-production".to_string(),
            jwt_expires_in: "24h".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,atlascast=debug".to_string(),
            file: Some("logs/atlascast.log".to_string()),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { window_secs: 60, free: 10, premium: 60, enterprise: 240 }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { deadline_secs: 600, watchdog_interval_secs: 60, watchdog_enabled: true }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.perplexity.ai".to_string(),
            model: "sonar-pro".to_string(),
            key_env: "APP_RESEARCH_API_KEY".to_string(),
            timeout_secs: 180,
        }
    }
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            free: TierBudget {
                max_cost_per_request: 0.10,
                preferred_free_ratio: 0.9,
                min_quality: 0.6,
            },
            premium: TierBudget {
                max_cost_per_request: 0.50,
                preferred_free_ratio: 0.7,
                min_quality: 0.75,
            },
            enterprise: TierBudget {
                max_cost_per_request: 1.50,
                preferred_free_ratio: 0.5,
                min_quality: 0.85,
            },
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            tier: "free".to_string(),
            category: "historical".to_string(),
            rate_limit: 60,
            rate_period: 60,
            cost_per_request: 0.0,
            cache_ttl: 1800,
            timeout: 30,
            max_retries: 3,
            auth: "none".to_string(),
            key_env: String::new(),
            enabled: true,
        }
    }
}

/// Built-in provider registry used when the config file carries none.
/// Every value here is overridable from conf/config.toml.
pub fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings {
            name: "wikipedia".to_string(),
            base_url: "https://en.wikipedia.org/w/api.php".to_string(),
            category: "historical".to_string(),
            rate_limit: 100,
            rate_period: 60,
            ..Default::default()
        },
        ProviderSettings {
            name: "wikidata".to_string(),
            base_url: "https://www.wikidata.org/w/api.php".to_string(),
            category: "cultural".to_string(),
            rate_limit: 60,
            rate_period: 60,
            ..Default::default()
        },
        ProviderSettings {
            name: "geonames".to_string(),
            base_url: "http://api.geonames.org".to_string(),
            category: "geographic".to_string(),
            rate_limit: 30,
            rate_period: 60,
            auth: "query_key".to_string(),
            key_env: "APP_GEONAMES_USERNAME".to_string(),
            ..Default::default()
        },
        ProviderSettings {
            name: "opentripmap".to_string(),
            base_url: "https://api.opentripmap.com/0.1/en".to_string(),
            tier: "freemium".to_string(),
            category: "tourism".to_string(),
            rate_limit: 10,
            rate_period: 1,
            cost_per_request: 0.001,
            auth: "query_key".to_string(),
            key_env: "APP_OPENTRIPMAP_API_KEY".to_string(),
            ..Default::default()
        },
        ProviderSettings {
            name: "guardian".to_string(),
            base_url: "https://content.guardianapis.com".to_string(),
            tier: "freemium".to_string(),
            category: "news".to_string(),
            rate_limit: 500,
            rate_period: 86400,
            cost_per_request: 0.002,
            auth: "query_key".to_string(),
            key_env: "APP_GUARDIAN_API_KEY".to_string(),
            ..Default::default()
        },
        ProviderSettings {
            name: "datagov".to_string(),
            base_url: "https://catalog.data.gov/api/3/action".to_string(),
            category: "government".to_string(),
            rate_limit: 30,
            rate_period: 60,
            ..Default::default()
        },
    ]
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Custom serde deserializer to support numeric or human-friendly string values
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = Config::default();
        config.providers = default_providers();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.deadline_secs, 600);
        assert_eq!(config.budgets.free.preferred_free_ratio, 0.9);
    }

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration_to_secs("600").unwrap(), 600);
        assert_eq!(parse_duration_to_secs("10m").unwrap(), 600);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert!(parse_duration_to_secs("soon").is_err());
    }
}
