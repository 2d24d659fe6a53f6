//! Configuration management

use std::{env, path::Path, str::FromStr, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub provider: ProviderConfig,
    /// Management API (machine-to-machine) credentials
    pub management: ManagementConfig,
    /// Simulation backend configuration
    pub backend: BackendConfig,
    /// Session cookie and store configuration
    pub session: SessionConfig,
    /// Admin area configuration
    pub admin: AdminConfig,
}

/// Deployment environment, decides the scheme of computed redirect URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: redirect URIs use plain `http`
    Local,
    /// Anything else: redirect URIs use `https`
    #[default]
    Production,
}

impl Environment {
    /// URI scheme used for redirect URIs in this environment
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Local => "http",
            Self::Production => "https",
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Externally visible base URL. When set it overrides the
    /// request-derived base for all redirect URIs.
    pub public_url: Option<String>,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Production,
            public_url: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider configuration
///
/// String values support `env:VAR_NAME` and `${VAR}` / `${VAR:-default}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider tenant domain (e.g. `tenant.eu.auth0.com`)
    pub domain: String,
    /// Override for the provider's base URL (defaults to `https://{domain}`)
    pub base_url: Option<String>,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Expected `aud` of access tokens, also sent on the authorize request
    pub audience: String,
    /// Trusted issuer (defaults to `https://{domain}/`)
    pub issuer: Option<String>,
    /// JWKS endpoint (defaults to `{base_url}/.well-known/jwks.json`)
    pub jwks_uri: String,
    /// Scopes requested on login
    pub scopes: Vec<String>,
    /// Expected signing algorithm
    pub algorithm: String,
    /// Clock skew tolerance applied to `exp`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Claim that carries the user's email
    pub email_claim: String,
    /// Timeout for every call to the provider
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            domain: "env:AUTH0_DOMAIN".to_string(),
            base_url: None,
            client_id: "env:AUTH0_CLIENT_ID".to_string(),
            client_secret: "env:AUTH0_CLIENT_SECRET".to_string(),
            audience: "env:AUTH0_AUDIENCE".to_string(),
            issuer: None,
            jwks_uri: "env:JWKS_ENDPOINT".to_string(),
            scopes: ["offline_access", "openid", "profile", "email"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            algorithm: "RS256".to_string(),
            leeway: Duration::ZERO,
            email_claim: "email".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    /// Base URL of the provider without trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.base_url.as_deref() {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("https://{}", self.domain),
        }
    }

    /// Trusted issuer string
    #[must_use]
    pub fn issuer(&self) -> String {
        match self.issuer.as_deref() {
            Some(iss) if !iss.is_empty() => iss.to_string(),
            _ => format!("https://{}/", self.domain),
        }
    }

    /// JWKS endpoint
    #[must_use]
    pub fn jwks_uri(&self) -> String {
        if self.jwks_uri.is_empty() {
            format!("{}/.well-known/jwks.json", self.base_url())
        } else {
            self.jwks_uri.clone()
        }
    }

    /// Authorization endpoint
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.base_url())
    }

    /// Token endpoint
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.base_url())
    }

    /// Logout endpoint
    #[must_use]
    pub fn logout_endpoint(&self) -> String {
        format!("{}/v2/logout", self.base_url())
    }

    /// Management API base URL
    #[must_use]
    pub fn management_api(&self) -> String {
        format!("{}/api/v2", self.base_url())
    }

    /// Audience identifier of the Management API
    #[must_use]
    pub fn management_audience(&self) -> String {
        format!("https://{}/api/v2/", self.domain)
    }

    /// Parsed signing algorithm
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(&self.algorithm)
            .map_err(|e| Error::Config(format!("Invalid provider.algorithm '{}': {e}", self.algorithm)))
    }
}

/// Management API (machine-to-machine) credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// M2M client id
    pub client_id: String,
    /// M2M client secret
    pub client_secret: String,
    /// Database connection new users are created in
    pub connection: String,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            client_id: "env:M2M_CLIENT_ID".to_string(),
            client_secret: "env:M2M_CLIENT_SECRET".to_string(),
            connection: "Username-Password-Authentication".to_string(),
        }
    }
}

/// Simulation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Full base URL; overrides scheme/host/port when set
    pub url: Option<String>,
    /// URI scheme
    pub scheme: String,
    /// Backend host
    pub host: String,
    /// Backend port (empty = scheme default)
    pub port: String,
    /// Timeout for every backend call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            scheme: "http".to_string(),
            host: "env:BACKEND_HOST".to_string(),
            port: "env:BACKEND_PORT".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl BackendConfig {
    /// Base URL of the backend without trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.trim_end_matches('/').to_string();
        }
        if self.port.is_empty() {
            format!("{}://{}", self.scheme, self.host)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// `SameSite` attribute of the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    #[default]
    Lax,
    /// `SameSite=None` (requires `Secure`)
    None,
}

/// Session cookie and store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie
    pub cookie_name: String,
    /// Secret used to sign the session cookie. Empty = random per process.
    pub secret_key: String,
    /// Set the `Secure` cookie attribute
    pub secure: bool,
    /// `SameSite` cookie attribute
    pub same_site: SameSitePolicy,
    /// Cookie max-age, also the lifetime of server-side session records
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// How often expired session records are reaped
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "gateway_session".to_string(),
            secret_key: "env:APP_SECRET_KEY".to_string(),
            secure: true,
            same_site: SameSitePolicy::Lax,
            max_age: Duration::from_secs(24 * 3600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Admin area configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Permission required for every `/admin` route
    pub permission: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            permission: "admin".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (SESSION_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("SESSION_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so `env:` references can see their values
        config.load_env_files();
        config.resolve_references();

        Ok(config)
    }

    /// Check that everything required to verify tokens is present.
    pub fn validate(&self) -> Result<()> {
        if self.provider.domain.is_empty() && self.provider.base_url.is_none() {
            return Err(Error::Config(
                "provider.domain is required (AUTH0_DOMAIN)".to_string(),
            ));
        }
        if self.provider.client_id.is_empty() {
            return Err(Error::Config(
                "provider.client_id is required (AUTH0_CLIENT_ID)".to_string(),
            ));
        }
        if self.provider.audience.is_empty() {
            return Err(Error::Config(
                "provider.audience is required (AUTH0_AUDIENCE)".to_string(),
            ));
        }
        self.provider.algorithm()?;

        if self.session.same_site == SameSitePolicy::None && !self.session.secure {
            return Err(Error::Config(
                "session.same_site = none requires session.secure = true".to_string(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Resolve `env:VAR` references and `${VAR}` patterns in string settings
    fn resolve_references(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("static regex is valid");

        let provider = &mut self.provider;
        for value in [
            &mut provider.domain,
            &mut provider.client_id,
            &mut provider.client_secret,
            &mut provider.audience,
            &mut provider.jwks_uri,
            &mut provider.email_claim,
            &mut self.management.client_id,
            &mut self.management.client_secret,
            &mut self.backend.host,
            &mut self.backend.port,
            &mut self.session.secret_key,
        ] {
            *value = resolve_value(&re, value);
        }

        for value in [
            &mut provider.base_url,
            &mut provider.issuer,
            &mut self.backend.url,
            &mut self.server.public_url,
        ]
        .into_iter()
        .flatten()
        {
            *value = resolve_value(&re, value);
        }
    }
}

/// Resolve a single setting: `env:VAR` reads the variable (empty when unset),
/// everything else gets `${VAR}` / `${VAR:-default}` expansion.
fn resolve_value(re: &Regex, value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        return env::var(var_name).unwrap_or_default();
    }
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "24h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "SGW_TEST_KEY_A=hello_from_env_file").unwrap();
        writeln!(f, "SGW_TEST_KEY_B=42").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("SGW_TEST_KEY_A").unwrap(), "hello_from_env_file");
        assert_eq!(env::var("SGW_TEST_KEY_B").unwrap(), "42");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn env_reference_resolves_to_empty_when_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        assert_eq!(resolve_value(&re, "env:SGW_TEST_DEFINITELY_UNSET"), "");
        assert_eq!(resolve_value(&re, "literal-value"), "literal-value");
        assert_eq!(
            resolve_value(&re, "${SGW_TEST_DEFINITELY_UNSET:-fallback}.example"),
            "fallback.example"
        );
    }

    #[test]
    fn provider_endpoints_derive_from_domain() {
        let provider = ProviderConfig {
            domain: "tenant.example.com".to_string(),
            jwks_uri: String::new(),
            ..Default::default()
        };

        assert_eq!(provider.issuer(), "https://tenant.example.com/");
        assert_eq!(
            provider.jwks_uri(),
            "https://tenant.example.com/.well-known/jwks.json"
        );
        assert_eq!(
            provider.token_endpoint(),
            "https://tenant.example.com/oauth/token"
        );
        assert_eq!(
            provider.management_audience(),
            "https://tenant.example.com/api/v2/"
        );
    }

    #[test]
    fn provider_base_url_override_keeps_domain_identifiers() {
        let provider = ProviderConfig {
            domain: "tenant.example.com".to_string(),
            base_url: Some("http://127.0.0.1:9999/".to_string()),
            ..Default::default()
        };

        assert_eq!(provider.authorize_endpoint(), "http://127.0.0.1:9999/authorize");
        assert_eq!(provider.issuer(), "https://tenant.example.com/");
        assert_eq!(
            provider.management_audience(),
            "https://tenant.example.com/api/v2/"
        );
    }

    #[test]
    fn backend_base_url_from_host_and_port() {
        let backend = BackendConfig {
            host: "sim.internal".to_string(),
            port: "8080".to_string(),
            ..Default::default()
        };
        assert_eq!(backend.base_url(), "http://sim.internal:8080");

        let no_port = BackendConfig {
            host: "sim.internal".to_string(),
            port: String::new(),
            ..Default::default()
        };
        assert_eq!(no_port.base_url(), "http://sim.internal");
    }

    #[test]
    fn validate_rejects_missing_audience() {
        let mut config = Config::default();
        config.provider.domain = "tenant.example.com".to_string();
        config.provider.client_id = "client".to_string();
        config.provider.audience = String::new();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audience"));
    }

    #[test]
    fn validate_rejects_unknown_algorithm() {
        let mut config = Config::default();
        config.provider.domain = "tenant.example.com".to_string();
        config.provider.client_id = "client".to_string();
        config.provider.audience = "https://api.example.com".to_string();
        config.provider.algorithm = "XS999".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_parse_all_suffixes() {
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn test_config_deserialized_from_yaml() {
        let yaml = r#"
env_files:
  - ~/.config/gateway.env
server:
  port: 8080
  environment: local
provider:
  domain: tenant.example.com
  timeout: 5s
session:
  same_site: none
  max_age: 12h
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.env_files.len(), 1);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Local);
        assert_eq!(config.provider.timeout, Duration::from_secs(5));
        assert_eq!(config.session.same_site, SameSitePolicy::None);
        assert_eq!(config.session.max_age, Duration::from_secs(12 * 3600));
        // Unset fields keep their defaults
        assert_eq!(config.admin.permission, "admin");
    }
}
