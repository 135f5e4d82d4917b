//! File configuration

use crate::auth::StaticCredentials;
use crate::cipher::{Cipher, CipherKey};
use crate::error::{Error, Result};
use crate::rules::PermitCommand;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Listen address used when neither the file nor the command line sets one
pub const DEFAULT_LISTEN: &str = "127.0.0.1:1080";

/// Default AES key size in bytes
pub const DEFAULT_KEY_SIZE: usize = 16;

/// Settings shared by server and tunnel mode. Command line flags take
/// precedence over anything set here
///
/// ```toml
/// listen = "0.0.0.0:1080"
/// key = "a passphrase of at least key_size bytes"
/// key_size = 32
///
/// [users]
/// alice = "secret"
///
/// [rules]
/// bind = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Listen address
    pub listen: String,
    /// Upstream cipher-mode server (tunnel mode only)
    pub remote: Option<String>,
    /// Cipher passphrase
    pub key: Option<String>,
    /// Cipher key size: 16, 24 or 32
    pub key_size: usize,
    /// Username/password pairs
    pub users: HashMap<String, String>,
    pub rules: RulesConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            remote: None,
            key: None,
            key_size: DEFAULT_KEY_SIZE,
            users: HashMap::new(),
            rules: RulesConfig::default(),
        }
    }
}

/// Per-command allow switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesConfig {
    pub connect: bool,
    pub bind: bool,
    pub associate: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            connect: true,
            bind: true,
            associate: true,
        }
    }
}

impl From<&RulesConfig> for PermitCommand {
    fn from(rules: &RulesConfig) -> Self {
        PermitCommand {
            enable_connect: rules.connect,
            enable_bind: rules.bind,
            enable_associate: rules.associate,
        }
    }
}

impl FileConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config: {e}")))?;

        content.parse()
    }

    /// cipher builds the tunnel cipher when a key is configured
    pub fn cipher(&self) -> Result<Option<Cipher>> {
        self.key
            .as_deref()
            .map(|passphrase| {
                CipherKey::from_passphrase(passphrase, self.key_size).map(Cipher::new)
            })
            .transpose()
    }

    /// credentials returns the user table, or None when it is empty
    pub fn credentials(&self) -> Option<StaticCredentials> {
        if self.users.is_empty() {
            return None;
        }
        Some(StaticCredentials::from(self.users.clone()))
    }

    pub fn rules(&self) -> PermitCommand {
        PermitCommand::from(&self.rules)
    }
}

impl FromStr for FileConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(format!("failed to parse config: {e}")))
    }
}
