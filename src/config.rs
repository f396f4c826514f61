use crate::codec::{ProtectionMode, TicketEncoding};
use crate::credentials::PasswordFormat;
use crate::crypto::MachineKey;
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory holding project-level config, audit logs and local overrides
pub const CONFIG_DIR: &str = ".formsauth";

pub const DEFAULT_COOKIE_NAME: &str = ".ASPXAUTH";

/// Marker value asking for per-process random keys
pub const AUTO_GENERATE: &str = "AutoGenerate";

const MAX_TIMEOUT_MINUTES: u32 = 525_600; // one year

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where the ticket travels between requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CookielessMode {
    #[default]
    UseCookies,
    UseUri,
    AutoDetect,
    UseDeviceProfile,
}

impl CookielessMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "usecookies" => Some(Self::UseCookies),
            "useuri" => Some(Self::UseUri),
            "autodetect" => Some(Self::AutoDetect),
            "usedeviceprofile" => Some(Self::UseDeviceProfile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseCookies => "use_cookies",
            Self::UseUri => "use_uri",
            Self::AutoDetect => "auto_detect",
            Self::UseDeviceProfile => "use_device_profile",
        }
    }
}

/// The effective `[forms]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormsConfig {
    pub cookie_name: String,
    pub protection: ProtectionMode,
    pub timeout_minutes: u32,
    pub cookie_path: String,
    pub require_ssl: bool,
    pub sliding_expiration: bool,
    pub cookieless: CookielessMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub enable_cross_app_redirects: bool,
    pub login_url: String,
    pub default_url: String,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            protection: ProtectionMode::EncryptAndValidate,
            timeout_minutes: 30,
            cookie_path: "/".to_string(),
            require_ssl: false,
            sliding_expiration: true,
            cookieless: CookielessMode::UseCookies,
            domain: None,
            enable_cross_app_redirects: false,
            login_url: "/login.aspx".to_string(),
            default_url: "/default.aspx".to_string(),
        }
    }
}

impl FormsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.timeout_minutes))
    }

    /// Tickets carried in the URL use the URL token form, cookies use hex.
    /// Device detection is out of scope, so the detecting modes use cookies.
    pub fn ticket_encoding(&self) -> TicketEncoding {
        match self.cookieless {
            CookielessMode::UseUri => TicketEncoding::UrlToken,
            _ => TicketEncoding::Hex,
        }
    }

    /// Take every field the layer sets
    fn merge(&mut self, other: FormsLayer) {
        if let Some(cookie_name) = other.cookie_name {
            self.cookie_name = cookie_name;
        }
        if let Some(protection) = other.protection {
            self.protection = protection;
        }
        if let Some(timeout_minutes) = other.timeout_minutes {
            self.timeout_minutes = timeout_minutes;
        }
        if let Some(cookie_path) = other.cookie_path {
            self.cookie_path = cookie_path;
        }
        if let Some(require_ssl) = other.require_ssl {
            self.require_ssl = require_ssl;
        }
        if let Some(sliding_expiration) = other.sliding_expiration {
            self.sliding_expiration = sliding_expiration;
        }
        if let Some(cookieless) = other.cookieless {
            self.cookieless = cookieless;
        }
        if other.domain.is_some() {
            self.domain = other.domain;
        }
        if let Some(enable) = other.enable_cross_app_redirects {
            self.enable_cross_app_redirects = enable;
        }
        if let Some(login_url) = other.login_url {
            self.login_url = login_url;
        }
        if let Some(default_url) = other.default_url {
            self.default_url = default_url;
        }
    }
}

/// `[forms]` as written in one config file; unset keys are `None`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormsLayer {
    pub cookie_name: Option<String>,
    pub protection: Option<ProtectionMode>,
    pub timeout_minutes: Option<u32>,
    pub cookie_path: Option<String>,
    pub require_ssl: Option<bool>,
    pub sliding_expiration: Option<bool>,
    pub cookieless: Option<CookielessMode>,
    pub domain: Option<String>,
    pub enable_cross_app_redirects: Option<bool>,
    pub login_url: Option<String>,
    pub default_url: Option<String>,
}

/// The `[machine_key]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MachineKeyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption_key_env: Option<String>,
}

impl MachineKeyConfig {
    /// Direct value first, then the named environment variable
    pub fn resolve_validation_key(&self) -> Option<String> {
        resolve_key(&self.validation_key, &self.validation_key_env)
    }

    pub fn resolve_decryption_key(&self) -> Option<String> {
        resolve_key(&self.decryption_key, &self.decryption_key_env)
    }

    /// True when either key falls back to a random per-process value
    pub fn is_auto_generated(&self) -> bool {
        let auto = |key: Option<String>| key.map_or(true, |k| k.eq_ignore_ascii_case(AUTO_GENERATE));
        auto(self.resolve_validation_key()) || auto(self.resolve_decryption_key())
    }

    /// Build the machine key. Missing or `AutoGenerate` keys produce random
    /// keys, so tickets will not outlive the process.
    pub fn build(&self) -> Result<MachineKey> {
        if self.is_auto_generated() {
            return Ok(MachineKey::generate()?);
        }

        let validation = self
            .resolve_validation_key()
            .ok_or_else(|| anyhow!("machine_key.validation_key is not set"))?;
        let decryption = self
            .resolve_decryption_key()
            .ok_or_else(|| anyhow!("machine_key.decryption_key is not set"))?;

        MachineKey::from_hex(&validation, &decryption).context("Invalid [machine_key] section")
    }

    fn merge(&mut self, other: MachineKeyConfig) {
        if other.validation_key.is_some() {
            self.validation_key = other.validation_key;
        }
        if other.decryption_key.is_some() {
            self.decryption_key = other.decryption_key;
        }
        if other.validation_key_env.is_some() {
            self.validation_key_env = other.validation_key_env;
        }
        if other.decryption_key_env.is_some() {
            self.decryption_key_env = other.decryption_key_env;
        }
    }
}

/// RFC 6265 cookie-name token
fn is_cookie_token(name: &str) -> bool {
    regex::Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn resolve_key(direct: &Option<String>, env: &Option<String>) -> Option<String> {
    if let Some(key) = direct {
        return Some(key.clone());
    }
    env.as_ref().and_then(|var| std::env::var(var).ok())
}

/// The effective `[credentials]` settings
#[derive(Debug, Clone, Default)]
pub struct CredentialsConfig {
    pub password_format: PasswordFormat,
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsLayer {
    pub password_format: Option<PasswordFormat>,
    pub users: HashMap<String, String>,
}

/// The effective `[audit]` settings
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditLayer {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub forms: FormsConfig,
    pub machine_key: MachineKeyConfig,
    pub credentials: CredentialsConfig,
    pub audit: AuditConfig,
}

/// One config file before it is merged over the layers below it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub forms: FormsLayer,
    pub machine_key: MachineKeyConfig,
    pub credentials: CredentialsLayer,
    pub audit: AuditLayer,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.formsauth/config.local.toml) > project (.formsauth/config.toml)
    /// > user (~/.formsauth/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let root = std::env::current_dir()?;
        Self::load_layered(dirs::home_dir().as_deref(), &root)
    }

    /// Layered load rooted at explicit directories
    pub fn load_layered(home: Option<&Path>, project_root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let mut layers = Vec::new();
        if let Some(home) = home {
            layers.push(home.join(CONFIG_DIR).join("config.toml"));
        }
        layers.push(project_root.join(CONFIG_DIR).join("config.toml"));
        layers.push(project_root.join(CONFIG_DIR).join("config.local.toml"));

        for path in layers {
            if path.exists() {
                config.merge(Self::read_layer(&path)?);
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific path over built-in defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge(Self::read_layer(path)?);
        Ok(config)
    }

    /// Parse a config document over built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(toml::from_str(content)?);
        Ok(config)
    }

    fn read_layer(path: &Path) -> Result<ConfigLayer> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Merge a layer into this config (the layer takes priority).
    /// Every key the layer sets overrides, credential users are merged by name.
    pub fn merge(&mut self, other: ConfigLayer) {
        self.forms.merge(other.forms);
        self.machine_key.merge(other.machine_key);

        if let Some(format) = other.credentials.password_format {
            self.credentials.password_format = format;
        }
        for (name, stored) in other.credentials.users {
            self.credentials.users.insert(name, stored);
        }

        if let Some(enabled) = other.audit.enabled {
            self.audit.enabled = enabled;
        }
        if other.audit.dir.is_some() {
            self.audit.dir = other.audit.dir;
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let forms = &self.forms;

        if !is_cookie_token(&forms.cookie_name) {
            errors.push(ValidationError {
                field: "forms.cookie_name".to_string(),
                message: format!("Invalid cookie name '{}'", forms.cookie_name),
            });
        }

        if forms.timeout_minutes == 0 || forms.timeout_minutes > MAX_TIMEOUT_MINUTES {
            errors.push(ValidationError {
                field: "forms.timeout_minutes".to_string(),
                message: format!(
                    "Must be between 1 and {}, got {}",
                    MAX_TIMEOUT_MINUTES, forms.timeout_minutes
                ),
            });
        }

        if !forms.cookie_path.starts_with('/') {
            errors.push(ValidationError {
                field: "forms.cookie_path".to_string(),
                message: format!("Must start with '/', got '{}'", forms.cookie_path),
            });
        }

        if let Some(domain) = &forms.domain {
            if domain.is_empty() || domain.contains(|c: char| c.is_whitespace() || c == ';' || c == ',') {
                errors.push(ValidationError {
                    field: "forms.domain".to_string(),
                    message: format!("Invalid cookie domain '{}'", domain),
                });
            }
        }

        for (field, url) in [
            ("forms.login_url", &forms.login_url),
            ("forms.default_url", &forms.default_url),
        ] {
            if url.trim().is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must not be empty".to_string(),
                });
            }
        }

        self.validate_machine_key(&mut errors);

        // Stored hashes must have the digest's length
        if let Some(len) = self.credentials.password_format.hex_len() {
            for (name, stored) in &self.credentials.users {
                if stored.len() != len || !stored.bytes().all(|b| b.is_ascii_hexdigit()) {
                    errors.push(ValidationError {
                        field: format!("credentials.users.{}", name),
                        message: format!(
                            "Expected a {}-char {} hex digest",
                            len,
                            self.credentials.password_format.as_str()
                        ),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_machine_key(&self, errors: &mut Vec<ValidationError>) {
        let keys = &self.machine_key;
        for (field, key, env, min, max) in [
            (
                "machine_key.validation_key",
                keys.resolve_validation_key(),
                &keys.validation_key_env,
                20,
                64,
            ),
            (
                "machine_key.decryption_key",
                keys.resolve_decryption_key(),
                &keys.decryption_key_env,
                16,
                usize::MAX,
            ),
        ] {
            let Some(key) = key else {
                if let Some(var) = env {
                    errors.push(ValidationError {
                        field: field.to_string(),
                        message: format!("Environment variable {} is not set", var),
                    });
                }
                continue;
            };
            if key.eq_ignore_ascii_case(AUTO_GENERATE) {
                continue;
            }
            match hex::decode(key.trim()) {
                Ok(bytes) if (min..=max).contains(&bytes.len()) => {}
                Ok(bytes) => {
                    let expected = if max == usize::MAX {
                        format!("at least {}", min)
                    } else {
                        format!("{}-{}", min, max)
                    };
                    errors.push(ValidationError {
                        field: field.to_string(),
                        message: format!("Key is {} bytes, expected {}", bytes.len(), expected),
                    });
                }
                Err(_) => errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Key must be hex or AutoGenerate".to_string(),
                }),
            }
        }

        let explicit =
            |key: Option<String>| key.is_some_and(|k| !k.eq_ignore_ascii_case(AUTO_GENERATE));
        if explicit(keys.resolve_validation_key()) != explicit(keys.resolve_decryption_key()) {
            errors.push(ValidationError {
                field: "machine_key".to_string(),
                message: "validation_key and decryption_key must both be set or both AutoGenerate"
                    .to_string(),
            });
        }
    }

    /// Save a machine key to the local config file (.formsauth/config.local.toml)
    /// Creates the directory if it doesn't exist
    pub fn save_local_machine_key(project_root: &Path, machine_key: &MachineKeyConfig) -> Result<PathBuf> {
        let dir = project_root.join(CONFIG_DIR);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        let path = dir.join("config.local.toml");
        let mut local: toml::Table = if path.exists() {
            toml::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            toml::Table::new()
        };
        local.insert(
            "machine_key".to_string(),
            toml::Value::try_from(machine_key)?,
        );

        std::fs::write(&path, toml::to_string_pretty(&local)?)?;
        Ok(path)
    }
}
