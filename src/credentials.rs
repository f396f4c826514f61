//! Configured credentials and password hashing for storage.

use crate::config::CredentialsConfig;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// How passwords are stored in the `[credentials]` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordFormat {
    Clear,
    #[default]
    Sha1,
    Md5,
}

impl PasswordFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "clear" => Some(Self::Clear),
            "sha1" => Some(Self::Sha1),
            "md5" => Some(Self::Md5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Length of a stored hash in hex chars, if hashed
    pub fn hex_len(&self) -> Option<usize> {
        match self {
            Self::Clear => None,
            Self::Sha1 => Some(40),
            Self::Md5 => Some(32),
        }
    }
}

/// Hash a password for the credentials table: uppercase hex of the digest
/// of its UTF-8 bytes. `Clear` returns the password as is.
pub fn hash_password_for_storing(password: &str, format: PasswordFormat) -> String {
    match format {
        PasswordFormat::Clear => password.to_string(),
        PasswordFormat::Sha1 => hex::encode_upper(Sha1::digest(password.as_bytes())),
        PasswordFormat::Md5 => hex::encode_upper(Md5::digest(password.as_bytes())),
    }
}

/// User name to stored password lookup. Names are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    format: PasswordFormat,
    users: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(format: PasswordFormat) -> Self {
        Self {
            format,
            users: HashMap::new(),
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        let mut store = Self::new(config.password_format);
        for (name, stored) in &config.users {
            store.insert(name, stored);
        }
        store
    }

    /// Add a user with an already-stored password
    pub fn insert(&mut self, name: &str, stored: &str) {
        self.users.insert(name.to_lowercase(), stored.to_string());
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn authenticate(&self, name: &str, password: &str) -> bool {
        let Some(stored) = self.users.get(&name.to_lowercase()) else {
            return false;
        };
        let candidate = hash_password_for_storing(password, self.format);
        match self.format {
            PasswordFormat::Clear => *stored == candidate,
            PasswordFormat::Sha1 | PasswordFormat::Md5 => stored.eq_ignore_ascii_case(&candidate),
        }
    }
}
