//! Configuration and local identity files.
//!
//! - `ServerConfig`: optional TOML file, every key defaulted
//! - `TransferInfo`: `transfer.info`, three lines (`host:port`, client name, file path)
//! - `UserInfo`: `me.info`, three lines (name, client id hex, base64 private key)

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::crypto::KeyPair;
use crate::error::ConfigError;
use crate::protocol::{ClientId, BACKUP_PROTOCOL_VERSION, HANDSHAKE_PROTOCOL_VERSION, NAME_CAPACITY};

pub const TRANSFER_INFO_FILE: &str = "transfer.info";
pub const USER_INFO_FILE: &str = "me.info";

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// First `N` lines, each trimmed and required to be non-empty.
fn take_lines<'a, const N: usize>(
    text: &'a str,
    source: &Path,
    labels: [&str; N],
) -> Result<[&'a str; N], ConfigError> {
    let mut lines = text.lines().map(str::trim);
    let mut out = [""; N];
    for (slot, label) in out.iter_mut().zip(labels) {
        match lines.next() {
            Some(line) if !line.is_empty() => *slot = line,
            _ => return Err(invalid(source, format!("missing {}", label))),
        }
    }
    if lines.any(|l| !l.is_empty()) {
        return Err(invalid(source, format!("expected exactly {} lines", N)));
    }
    Ok(out)
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the backup protocol
    pub backup_addr: String,
    /// Listen address for registration and secure uploads
    pub secure_addr: String,
    /// Backup root; `~` is expanded
    pub root: PathBuf,
    pub backup_version: u8,
    pub handshake_version: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backup_addr: "0.0.0.0:1337".to_string(),
            secure_addr: "0.0.0.0:1234".to_string(),
            root: PathBuf::from("~/backupsvr"),
            backup_version: BACKUP_PROTOCOL_VERSION,
            handshake_version: HANDSHAKE_PROTOCOL_VERSION,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_file(path)?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn root_dir(&self) -> PathBuf {
        expand_tilde(&self.root)
    }
}

// =============================================================================
// transfer.info
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    /// `host:port`
    pub server: String,
    pub name: String,
    pub file_path: PathBuf,
}

impl TransferInfo {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read_file(path)?, path)
    }

    pub fn parse(text: &str, source: &Path) -> Result<Self, ConfigError> {
        let [server, name, file_path] =
            take_lines(text, source, ["server address", "client name", "file path"])?;

        match server.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(invalid(
                    source,
                    format!("server address {:?} is not host:port", server),
                ))
            }
        }
        if name.len() > NAME_CAPACITY {
            return Err(invalid(
                source,
                format!("client name is {} bytes, maximum is {}", name.len(), NAME_CAPACITY),
            ));
        }

        Ok(Self {
            server: server.to_string(),
            name: name.to_string(),
            file_path: PathBuf::from(file_path),
        })
    }
}

// =============================================================================
// me.info
// =============================================================================

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub name: String,
    pub client_id: ClientId,
    pub keypair: KeyPair,
}

impl UserInfo {
    /// `Ok(None)` when the file does not exist yet.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(text: &str, source: &Path) -> Result<Self, ConfigError> {
        let [name, id, key] = take_lines(text, source, ["client name", "client id", "private key"])?;

        let client_id = ClientId::parse_hex(id)
            .filter(ClientId::is_registered)
            .ok_or_else(|| invalid(source, format!("client id {:?} is not a valid id", id)))?;
        let keypair = KeyPair::from_base64(key).map_err(|e| invalid(source, e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            client_id,
            keypair,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let key = self
            .keypair
            .to_base64()
            .map_err(|e| invalid(path, e.to_string()))?;
        let text = format!("{}\n{}\n{}\n", self.name, self.client_id, key);
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
