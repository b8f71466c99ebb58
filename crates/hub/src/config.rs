//! Hub configuration: TOML file with environment overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_url: String,
    pub web: WebSettings,
    pub limits: Limits,
    /// Serve HTTPS instead of HTTP. Needs the `tls` feature.
    pub tls: Option<TlsSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: "sqlite:canopy.db?mode=rwc".to_string(),
            web: WebSettings::default(),
            limits: Limits::default(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Row limits for `/get_data`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
}

// ---------------------------------------------------------------------------
// Overrides + validation
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `DB_URL` and `WEB_PORT`. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("DB_URL") {
            self.db_url = url;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT is not a port number: {port}"))?;
        }
        Ok(())
    }

    /// Returns `Ok(())` or an error describing every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.db_url.trim().is_empty() {
            errors.push("db_url is empty".to_string());
        }
        if self.web.bind.trim().is_empty() {
            errors.push("web.bind is empty".to_string());
        }
        if self.limits.default_limit <= 0 {
            errors.push(format!(
                "limits.default_limit must be positive, got {}",
                self.limits.default_limit
            ));
        }
        if self.limits.max_limit <= 0 {
            errors.push(format!(
                "limits.max_limit must be positive, got {}",
                self.limits.max_limit
            ));
        }
        if self.limits.default_limit > self.limits.max_limit {
            errors.push(format!(
                "limits.default_limit ({}) exceeds limits.max_limit ({})",
                self.limits.default_limit, self.limits.max_limit
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_path.trim().is_empty() {
                errors.push("tls.cert_path is empty".to_string());
            }
            if tls.key_path.trim().is_empty() {
                errors.push("tls.key_path is empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, override and validate. A missing file means stock defaults.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::info!(path, "no config file, using defaults");
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
