//! Configuration management for traefik-tower
//!
//! Configuration is layered: a YAML file (optional, defaults are used when
//! it is missing), then environment variables, then CLI overrides. The
//! environment variable names are the ones Traefik deployments of this
//! service already use (`AUTH_SERVER_URL`, `KETO_URL`, `AUTH_TYPE`, ...).

use crate::error::{Result, TowerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Main configuration structure for traefik-tower
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Verification strategy and its upstreams
    #[serde(default)]
    pub auth: AuthConfig,

    /// Managed identity provider (AWS Cognito) settings
    #[serde(default)]
    pub aws: AwsConfig,

    /// Log subscriber settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Span export settings
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Verbose per-call logging and the debug-only routes
    #[serde(default)]
    pub debug: bool,

    /// Problems found while loading, held until logging is up
    #[serde(skip)]
    load_warnings: Vec<String>,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_shutdown_timeout() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Which verification strategy the engine runs
///
/// `Cognito` is a selector rather than a strategy: it becomes `UserInfo`
/// when no Cognito pool or app client is configured and
/// `IdentityProvider` otherwise. See [`Config::effective_mode`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Remote token introspection
    #[default]
    #[serde(alias = "hydra")]
    Introspection,
    /// Introspection, client metadata lookup and policy-engine check
    #[serde(alias = "hydra-keto")]
    IntrospectionPolicy,
    /// Remote user-info endpoint lookup
    #[serde(alias = "user-info")]
    Userinfo,
    /// Direct managed identity provider call
    #[serde(alias = "cognito-aws")]
    IdentityProvider,
    /// Pick `Userinfo` or `IdentityProvider` from the AWS settings
    Cognito,
}

impl AuthMode {
    /// Canonical configuration name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introspection => "introspection",
            Self::IntrospectionPolicy => "introspection-policy",
            Self::Userinfo => "userinfo",
            Self::IdentityProvider => "identity-provider",
            Self::Cognito => "cognito",
        }
    }

    /// Whether the mode calls endpoints under `auth_server_url`
    pub fn needs_auth_server(&self) -> bool {
        !matches!(self, Self::IdentityProvider)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = TowerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "introspection" | "hydra" => Ok(Self::Introspection),
            "introspection-policy" | "hydra-keto" => Ok(Self::IntrospectionPolicy),
            "userinfo" | "user-info" => Ok(Self::Userinfo),
            "identity-provider" | "cognito-aws" => Ok(Self::IdentityProvider),
            "cognito" => Ok(Self::Cognito),
            other => Err(TowerError::Config(format!("Unknown auth mode: {}", other))),
        }
    }
}

/// Verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Strategy selector
    #[serde(default)]
    pub mode: AuthMode,

    /// Base URL of the OAuth2 server (introspection, clients, user info)
    #[serde(default)]
    pub auth_server_url: Option<String>,

    /// Base URL of the policy engine; unset means every policy check denies
    #[serde(default)]
    pub policy_url: Option<String>,

    /// Per outbound call timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Accept any upstream TLS certificate
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            auth_server_url: None,
            policy_url: None,
            request_timeout_secs: default_request_timeout(),
            tls_insecure_skip_verify: false,
        }
    }
}

/// AWS Cognito settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region of the user pool
    #[serde(default = "default_aws_region")]
    pub region: String,

    /// Named profile for credentials, if any
    #[serde(default)]
    pub profile: Option<String>,

    /// Bound each provider call by the request timeout
    #[serde(default = "default_use_context")]
    pub use_context: bool,

    /// Cognito app client id
    #[serde(default)]
    pub app_client_id: Option<String>,

    /// Cognito user pool id
    #[serde(default)]
    pub user_pool_id: Option<String>,
}

fn default_aws_region() -> String {
    "eu-west-1".to_string()
}

fn default_use_context() -> bool {
    true
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_aws_region(),
            profile: None,
            use_context: default_use_context(),
            app_client_id: None,
            user_pool_id: None,
        }
    }
}

impl AwsConfig {
    /// True when neither a Cognito app client nor a user pool is set, which
    /// means Cognito is reached through its user-info endpoint
    pub fn uses_auth_service_url(&self) -> bool {
        is_blank(&self.app_client_id) && is_blank(&self.user_pool_id)
    }
}

/// Log subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Span export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// `service.name` resource attribute
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP/HTTP traces endpoint; spans are not exported when unset
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Log every finished span context at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_service_name() -> String {
    "traefik-tower".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            debug: false,
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            let mut config = Self::default();
            config.warn(format!("Config file not found at {}, using defaults", path));
            config
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TowerError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| TowerError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(value) => self.server.port = value,
                Err(_) => self.warn(format!("Invalid PORT: {}", port)),
            }
        }

        if let Ok(mode) = std::env::var("AUTH_TYPE") {
            match mode.parse() {
                Ok(value) => self.auth.mode = value,
                Err(_) => {
                    let kept = self.auth.mode;
                    self.warn(format!("Invalid AUTH_TYPE: {}, keeping {}", mode, kept))
                }
            }
        }

        if let Ok(url) = std::env::var("AUTH_SERVER_URL") {
            self.auth.auth_server_url = non_empty(url);
        }

        if let Ok(url) = std::env::var("KETO_URL") {
            self.auth.policy_url = non_empty(url);
        }

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(value) => self.auth.request_timeout_secs = value,
                Err(_) => self.warn(format!("Invalid REQUEST_TIMEOUT_SECONDS: {}", timeout)),
            }
        }

        if let Some(value) = self.env_bool("TLS_INSECURE_SKIP_VERIFY") {
            self.auth.tls_insecure_skip_verify = value;
        }

        if let Ok(region) = std::env::var("AWS_REGION") {
            if !region.trim().is_empty() {
                self.aws.region = region;
            }
        }

        if let Ok(profile) = std::env::var("AWS_PROFILE") {
            self.aws.profile = non_empty(profile);
        }

        if let Some(value) = self.env_bool("AWS_USE_CONTEXT") {
            self.aws.use_context = value;
        }

        if let Ok(client_id) = std::env::var("COGNITO_APP_CLIENT_ID") {
            self.aws.app_client_id = non_empty(client_id);
        }

        if let Ok(pool_id) = std::env::var("COGNITO_USER_POOL_ID") {
            self.aws.user_pool_id = non_empty(pool_id);
        }

        if let Some(value) = self.env_bool("DEBUG") {
            self.debug = value;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(value) = self.env_bool("LOG_JSON") {
            self.logging.json_format = value;
        }

        if let Ok(name) = std::env::var("TRACING_SERVICE_NAME") {
            if !name.trim().is_empty() {
                self.tracing.service_name = name;
            }
        }

        if let Ok(endpoint) = std::env::var("OTLP_ENDPOINT") {
            self.tracing.otlp_endpoint = non_empty(endpoint);
        }

        if let Some(value) = self.env_bool("TRACING_DEBUG") {
            self.tracing.debug = value;
        }
    }

    fn env_bool(&mut self, name: &str) -> Option<bool> {
        let raw = std::env::var(name).ok()?;
        let value = parse_bool(&raw);
        if value.is_none() {
            self.warn(format!("Invalid value for {}: {}", name, raw));
        }
        value
    }

    fn warn(&mut self, message: String) {
        self.load_warnings.push(message);
    }

    /// Warnings collected by [`Config::load`]
    ///
    /// Loading runs before the log subscriber exists, so the caller logs
    /// these once logging is initialized.
    pub fn take_load_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.load_warnings)
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }

        if let Some(crate::cli::Commands::Serve { host, port }) = &cli.command {
            if let Some(host) = host {
                self.server.host = host.clone();
            }
            if let Some(port) = port {
                self.server.port = *port;
            }
        }
    }

    /// The strategy that will actually run, with `cognito` resolved
    pub fn effective_mode(&self) -> AuthMode {
        match self.auth.mode {
            AuthMode::Cognito if self.aws.uses_auth_service_url() => AuthMode::Userinfo,
            AuthMode::Cognito => AuthMode::IdentityProvider,
            mode => mode,
        }
    }

    /// Parsed OAuth2 server base URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL is unset, unparsable or has no host
    pub fn auth_server_url(&self) -> Result<Url> {
        let raw = self
            .auth
            .auth_server_url
            .as_deref()
            .ok_or_else(|| TowerError::Config("AUTH_SERVER_URL is not set".to_string()))?;
        parse_base_url("AUTH_SERVER_URL", raw)
    }

    /// Parsed policy-engine base URL, `None` when unconfigured
    ///
    /// # Errors
    ///
    /// Returns error if a URL is set but cannot be parsed
    pub fn policy_url(&self) -> Result<Option<Url>> {
        match self.auth.policy_url.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_base_url("KETO_URL", raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Log filter directive derived from the level and the debug flag
    pub fn log_directive(&self) -> String {
        if self.debug {
            "debug".to_string()
        } else {
            self.logging.level.clone()
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(TowerError::Config("server.port must be greater than 0".to_string()).into());
        }

        if self.auth.request_timeout_secs == 0 {
            return Err(TowerError::Config(
                "auth.request_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        let mode = self.effective_mode();
        if mode.needs_auth_server() {
            self.auth_server_url()?;
        }

        if mode == AuthMode::IntrospectionPolicy {
            if self.policy_url()?.is_none() {
                tracing::warn!("KETO_URL is not set, every policy check will be denied");
            }
        } else {
            self.policy_url()?;
        }

        if let Some(endpoint) = &self.tracing.otlp_endpoint {
            Url::parse(endpoint).map_err(|e| {
                TowerError::Config(format!("Invalid tracing.otlp_endpoint {}: {}", endpoint, e))
            })?;
        }

        Ok(())
    }
}

fn parse_base_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| TowerError::Config(format!("{} must contain valid url: {}", name, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(TowerError::Config(format!("{} must contain valid url", name)).into());
    }
    Ok(url)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cli(command: Option<crate::cli::Commands>) -> crate::cli::Cli {
        crate::cli::Cli {
            config: None,
            verbose: false,
            command,
        }
    }

    fn introspection_config() -> Config {
        let mut config = Config::default();
        config.auth.auth_server_url = Some("http://hydra:4445".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.auth.mode, AuthMode::Introspection);
        assert_eq!(config.auth.request_timeout_secs, 10);
        assert_eq!(config.aws.region, "eu-west-1");
        assert!(config.aws.use_context);
        assert!(!config.debug);
    }

    #[test]
    fn test_validation_success() {
        assert!(introspection_config().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_auth_server_url() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_url_without_host() {
        let mut config = Config::default();
        config.auth.auth_server_url = Some("unix:/run/hydra.sock".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_identity_provider_needs_no_auth_server() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::IdentityProvider;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_policy_mode_without_policy_url_is_allowed() {
        let mut config = introspection_config();
        config.auth.mode = AuthMode::IntrospectionPolicy;
        assert!(config.validate().is_ok());
        assert!(config.policy_url().unwrap().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_policy_url() {
        let mut config = introspection_config();
        config.auth.mode = AuthMode::IntrospectionPolicy;
        config.auth.policy_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = introspection_config();
        config.auth.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cognito_mode_resolution() {
        let mut config = introspection_config();
        config.auth.mode = AuthMode::Cognito;
        assert_eq!(config.effective_mode(), AuthMode::Userinfo);

        config.aws.user_pool_id = Some("eu-west-1_abc".to_string());
        assert_eq!(config.effective_mode(), AuthMode::IdentityProvider);

        config.aws.user_pool_id = Some("  ".to_string());
        config.aws.app_client_id = Some("client".to_string());
        assert_eq!(config.effective_mode(), AuthMode::IdentityProvider);
    }

    #[test]
    fn test_auth_mode_from_str_aliases() {
        assert_eq!("hydra".parse::<AuthMode>().unwrap(), AuthMode::Introspection);
        assert_eq!(
            "hydra-keto".parse::<AuthMode>().unwrap(),
            AuthMode::IntrospectionPolicy
        );
        assert_eq!(
            "Cognito-AWS".parse::<AuthMode>().unwrap(),
            AuthMode::IdentityProvider
        );
        assert_eq!("userinfo".parse::<AuthMode>().unwrap(), AuthMode::Userinfo);
        assert!("ldap".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 9090
auth:
  mode: hydra-keto
  auth_server_url: http://hydra:4445
  policy_url: http://keto:4466
  request_timeout_secs: 3
aws:
  region: us-east-1
  use_context: false
logging:
  level: warn
  json_format: true
debug: true
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.auth.mode, AuthMode::IntrospectionPolicy);
        assert_eq!(config.auth.request_timeout_secs, 3);
        assert_eq!(config.aws.region, "us-east-1");
        assert!(!config.aws.use_context);
        assert!(config.logging.json_format);
        assert!(config.debug);
        assert_eq!(
            config.policy_url().unwrap().unwrap().as_str(),
            "http://keto:4466/"
        );
    }

    #[test]
    fn test_log_directive_follows_debug_flag() {
        let mut config = Config::default();
        assert_eq!(config.log_directive(), "info");
        config.debug = true;
        assert_eq!(config.log_directive(), "debug");
    }

    #[test]
    fn test_cli_overrides_host_port_and_verbosity() {
        let mut config = Config::default();
        let mut args = cli(Some(crate::cli::Commands::Serve {
            host: Some("127.0.0.1".to_string()),
            port: Some(9999),
        }));
        args.verbose = true;

        config.apply_cli_overrides(&args);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let mut config = Config::load("nonexistent.yaml", &cli(None)).unwrap();
        assert_eq!(config.server.port, 8000);

        let warnings = config.take_load_warnings();
        assert!(warnings
            .iter()
            .any(|w| w.contains("Config file not found at nonexistent.yaml")));
        assert!(config.take_load_warnings().is_empty());
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides() {
        std::env::set_var("AUTH_TYPE", "hydra-keto");
        std::env::set_var("AUTH_SERVER_URL", "http://hydra:4445");
        std::env::set_var("KETO_URL", "http://keto:4466");
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("AWS_USE_CONTEXT", "false");
        std::env::set_var("DEBUG", "true");

        let mut config = Config::default();
        config.apply_env_vars();

        assert_eq!(config.auth.mode, AuthMode::IntrospectionPolicy);
        assert_eq!(
            config.auth.auth_server_url.as_deref(),
            Some("http://hydra:4445")
        );
        assert_eq!(config.auth.policy_url.as_deref(), Some("http://keto:4466"));
        assert_eq!(config.server.port, 8000);
        assert!(!config.aws.use_context);
        assert!(config.debug);
        assert!(config
            .take_load_warnings()
            .contains(&"Invalid PORT: not-a-port".to_string()));

        for name in [
            "AUTH_TYPE",
            "AUTH_SERVER_URL",
            "KETO_URL",
            "PORT",
            "AWS_USE_CONTEXT",
            "DEBUG",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_empty_env_url_clears_value() {
        std::env::set_var("KETO_URL", "");

        let mut config = introspection_config();
        config.auth.policy_url = Some("http://keto:4466".to_string());
        config.apply_env_vars();
        assert!(config.auth.policy_url.is_none());

        std::env::remove_var("KETO_URL");
    }
}
