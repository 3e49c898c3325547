//! Configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Read once by the composition root. The auth endpoint and public key are
//! required; everything else has a default. A missing required value is a
//! [`ConfigError`] that `main` treats as fatal.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_DESTINATION_PATH: &str = "/dashboard";
pub const DEFAULT_MAX_REDIRECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_PUBLIC_PREFIXES: &[&str] = &["/_next", "/static", "/pkg", "/favicon.ico", "/api", "/auth", "/healthz"];

/// Configuration errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

// =============================================================================
// AUTH CONFIG
// =============================================================================

/// Endpoint and public key of the hosted auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub url: String,
    pub anon_key: String,
}

impl AuthConfig {
    /// Load from `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when either variable is unset or blank,
    /// and [`ConfigError::Invalid`] when the URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = required("SUPABASE_URL")?;
        let anon_key = required("SUPABASE_ANON_KEY")?;
        Self::new(url, anon_key)
    }

    /// Build from explicit values with the same validation as [`Self::from_env`].
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let anon_key = anon_key.into();
        if url.trim().is_empty() {
            return Err(ConfigError::Missing { var: "SUPABASE_URL" });
        }
        if anon_key.trim().is_empty() {
            return Err(ConfigError::Missing { var: "SUPABASE_ANON_KEY" });
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Invalid { var: "SUPABASE_URL", reason: format!("expected http(s) URL, got {url}") });
        }
        Ok(Self { url: url.trim_end_matches('/').to_owned(), anon_key })
    }
}

// =============================================================================
// ROUTE POLICY
// =============================================================================

/// Paths the route middleware and session guard work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub login_path: String,
    /// Where authenticated users land when they hit the login view.
    pub destination: String,
    /// Prefixes that always pass through (assets, API, health).
    pub public_prefixes: Vec<String>,
    /// Session guard redirects to the destination before giving up.
    pub max_redirect_attempts: u32,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            destination: DEFAULT_DESTINATION_PATH.to_owned(),
            public_prefixes: DEFAULT_PUBLIC_PREFIXES.iter().map(|p| (*p).to_owned()).collect(),
            max_redirect_attempts: DEFAULT_MAX_REDIRECT_ATTEMPTS,
        }
    }
}

impl RoutePolicy {
    /// Load from `LOGIN_PATH`, `DESTINATION_PATH`, `PUBLIC_PATH_PREFIXES`
    /// (comma separated) and `MAX_REDIRECT_ATTEMPTS` (at least 1). Unset
    /// values fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configured path is not absolute.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let login_path = std::env::var("LOGIN_PATH").unwrap_or(defaults.login_path);
        let destination = std::env::var("DESTINATION_PATH").unwrap_or(defaults.destination);
        let public_prefixes = std::env::var("PUBLIC_PATH_PREFIXES")
            .map(|raw| parse_prefixes(&raw))
            .unwrap_or(defaults.public_prefixes);
        let max_redirect_attempts = env_parse("MAX_REDIRECT_ATTEMPTS", defaults.max_redirect_attempts).max(1);

        if !login_path.starts_with('/') {
            return Err(ConfigError::Invalid { var: "LOGIN_PATH", reason: format!("not an absolute path: {login_path}") });
        }
        if !destination.starts_with('/') {
            return Err(ConfigError::Invalid {
                var: "DESTINATION_PATH",
                reason: format!("not an absolute path: {destination}"),
            });
        }
        Ok(Self { login_path, destination, public_prefixes, max_redirect_attempts })
    }
}

pub(crate) fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| p.starts_with('/'))
        .map(str::to_owned)
        .collect()
}

// =============================================================================
// SERVER CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding the pre-built page bundle served as the fallback.
    pub site_dir: PathBuf,
    /// Public origin used to build callback URLs.
    pub base_url: String,
    pub cookie_secure: bool,
}

impl ServerConfig {
    /// Load from `PORT`, `SITE_DIR`, `SITE_URL`/`VERCEL_URL` and
    /// `COOKIE_SECURE`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `PORT` is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::Invalid { var: "PORT", reason: e.to_string() })?,
            Err(_) => DEFAULT_PORT,
        };
        let site_dir = std::env::var("SITE_DIR").map_or_else(|_| PathBuf::from("site"), PathBuf::from);
        let base_url = resolve_base_url(
            std::env::var("SITE_URL").ok().as_deref(),
            std::env::var("VERCEL_URL").ok().as_deref(),
            port,
        );
        let cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| base_url.starts_with("https://"));

        Ok(Self { port, site_dir, base_url, cookie_secure })
    }

    /// URL the auth service sends users back to after an external sign-in.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.base_url)
    }
}

/// Resolve the public origin: explicit site URL, then the hosting
/// provider's deployment host, then localhost.
#[must_use]
pub fn resolve_base_url(site_url: Option<&str>, vercel_host: Option<&str>, port: u16) -> String {
    if let Some(url) = site_url.map(str::trim).filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_owned();
    }
    if let Some(host) = vercel_host.map(str::trim).filter(|h| !h.is_empty()) {
        return format!("https://{}", host.trim_end_matches('/'));
    }
    format!("http://localhost:{port}")
}

// =============================================================================
// HELPERS
// =============================================================================

/// Non-blank env var, trimmed.
fn required(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_owned()),
        _ => Err(ConfigError::Missing { var }),
    }
}

/// Boolean env var. Accepts `1/true/yes/on` and `0/false/no/off` in any
/// case; anything else, or unset, is `None`.
pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Parsed env var, or `default` when unset or unparsable.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
