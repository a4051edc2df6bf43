//! Configuration for the basalt S3 server

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::api::auth::AuthConfig;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Root directory for object data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Reject requests whose declared Content-Length exceeds this
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u64,

    /// Access key id → secret access key
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    /// Access keys accepted without a signature in legacy mode
    #[serde(default)]
    pub allowed_access_keys: Vec<String>,

    /// Skip full SigV4 verification for allow-listed access keys
    #[serde(default)]
    pub allow_legacy_access_key_only: bool,

    /// Max tolerated clock skew for signed requests, in seconds
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: i64,

    /// Upper bound on X-Amz-Expires for presigned URLs, in seconds
    #[serde(default = "default_max_presign_expires")]
    pub max_presign_expires: i64,

    /// Accept X-Forwarded-Host and the server's own name as host
    /// candidates during signature verification
    #[serde(default)]
    pub allow_host_candidate_fallbacks: bool,

    /// Path to the signature-mismatch trace log; unset disables it
    #[serde(default)]
    pub auth_debug_log: Option<PathBuf>,

    /// Host name for host-candidate fallbacks; defaults to the listen
    /// address host
    #[serde(default)]
    pub server_name: Option<String>,

    /// TLS listener configuration
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// PEM certificate chain path; unset generates a self-signed cert
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// PEM private key path
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_request_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_clock_skew_seconds() -> i64 {
    900
}

fn default_max_presign_expires() -> i64 {
    604800 // 7 days
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            max_request_size: default_max_request_size(),
            credentials: HashMap::new(),
            allowed_access_keys: Vec::new(),
            allow_legacy_access_key_only: false,
            clock_skew_seconds: default_clock_skew_seconds(),
            max_presign_expires: default_max_presign_expires(),
            allow_host_candidate_fallbacks: false,
            auth_debug_log: None,
            server_name: None,
            tls: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BASALT_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }
        if let Ok(dir) = std::env::var("BASALT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("BASALT_MAX_REQUEST_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.max_request_size = parsed;
            }
        }
        if let Ok(raw) = std::env::var("BASALT_CREDENTIALS") {
            config.credentials = parse_credentials(&raw);
        }
        if let Ok(raw) = std::env::var("BASALT_ALLOWED_ACCESS_KEYS") {
            config.allowed_access_keys = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(raw) = std::env::var("BASALT_ALLOW_LEGACY_ACCESS_KEY_ONLY") {
            config.allow_legacy_access_key_only = raw == "true" || raw == "1";
        }
        if let Ok(raw) = std::env::var("BASALT_CLOCK_SKEW_SECONDS") {
            if let Ok(parsed) = raw.parse() {
                config.clock_skew_seconds = parsed;
            }
        }
        if let Ok(raw) = std::env::var("BASALT_MAX_PRESIGN_EXPIRES") {
            if let Ok(parsed) = raw.parse() {
                config.max_presign_expires = parsed;
            }
        }
        if let Ok(raw) = std::env::var("BASALT_ALLOW_HOST_CANDIDATE_FALLBACKS") {
            config.allow_host_candidate_fallbacks = raw == "true" || raw == "1";
        }
        if let Ok(path) = std::env::var("BASALT_AUTH_DEBUG_LOG") {
            if !path.is_empty() {
                config.auth_debug_log = Some(PathBuf::from(path));
            }
        }
        if let Ok(name) = std::env::var("BASALT_SERVER_NAME") {
            if !name.is_empty() {
                config.server_name = Some(name);
            }
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("BASALT_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["basalt.toml", "/etc/basalt/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Startup validation: the server refuses to run without any way to
    /// authenticate a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let legacy_usable =
            self.allow_legacy_access_key_only && !self.allowed_access_keys.is_empty();
        if self.credentials.is_empty() && !legacy_usable {
            return Err(ConfigError::NoCredentials);
        }
        Ok(())
    }

    /// Auth configuration slice handed to the verification middleware.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            credentials: self.credentials.clone(),
            allowed_access_keys: self.allowed_access_keys.clone(),
            allow_legacy_access_key_only: self.allow_legacy_access_key_only,
            clock_skew_seconds: self.clock_skew_seconds,
            max_presign_expires: self.max_presign_expires,
            allow_host_candidate_fallbacks: self.allow_host_candidate_fallbacks,
            auth_debug_log: self.auth_debug_log.clone(),
        }
    }

    /// Effective server name for host-candidate fallbacks.
    pub fn effective_server_name(&self) -> String {
        self.server_name
            .clone()
            .unwrap_or_else(|| self.listen_addr.ip().to_string())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

/// Parse `akid:secret[,akid:secret...]` credential pairs.
fn parse_credentials(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, secret) = pair.trim().split_once(':')?;
            if key.is_empty() || secret.is_empty() {
                return None;
            }
            Some((key.to_string(), secret.to_string()))
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("no credentials configured and legacy access-key mode is not usable")]
    NoCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.max_request_size, 1024 * 1024 * 1024);
        assert_eq!(config.clock_skew_seconds, 900);
        assert_eq!(config.max_presign_expires, 604800);
        assert!(!config.allow_host_candidate_fallbacks);
        assert!(config.auth_debug_log.is_none());
    }

    #[test]
    fn test_config_parse_toml() {
        let toml = r#"
            listen_addr = "0.0.0.0:8333"
            data_dir = "/var/lib/basalt"
            max_request_size = 1048576
            clock_skew_seconds = 300

            [credentials]
            basalt-admin = "super-secret"

            [tls]
            cert_path = "/etc/basalt/cert.pem"
            key_path = "/etc/basalt/key.pem"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr.port(), 8333);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/basalt"));
        assert_eq!(config.max_request_size, 1048576);
        assert_eq!(config.clock_skew_seconds, 300);
        assert_eq!(
            config.credentials.get("basalt-admin").map(String::as_str),
            Some("super-secret")
        );
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_parse_credentials() {
        let creds = parse_credentials("ak1:sk1,ak2:sk2");
        assert_eq!(creds.len(), 2);
        assert_eq!(creds.get("ak1").map(String::as_str), Some("sk1"));
        assert_eq!(creds.get("ak2").map(String::as_str), Some("sk2"));

        // Secrets may contain further colons
        let creds = parse_credentials("ak:se:cr:et");
        assert_eq!(creds.get("ak").map(String::as_str), Some("se:cr:et"));

        assert!(parse_credentials("").is_empty());
        assert!(parse_credentials("no-colon").is_empty());
        assert!(parse_credentials(":empty-key").is_empty());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::NoCredentials)));

        let mut with_creds = Config::default();
        with_creds
            .credentials
            .insert("ak".to_string(), "sk".to_string());
        assert!(with_creds.validate().is_ok());

        // Legacy mode needs a non-empty allow-list
        let mut legacy_empty = Config::default();
        legacy_empty.allow_legacy_access_key_only = true;
        assert!(legacy_empty.validate().is_err());

        let mut legacy_ok = Config::default();
        legacy_ok.allow_legacy_access_key_only = true;
        legacy_ok.allowed_access_keys = vec!["ak".to_string()];
        assert!(legacy_ok.validate().is_ok());
    }

    #[test]
    fn test_effective_server_name() {
        let mut config = Config::default();
        assert_eq!(config.effective_server_name(), "127.0.0.1");
        config.server_name = Some("storage.example.com".to_string());
        assert_eq!(config.effective_server_name(), "storage.example.com");
    }
}
