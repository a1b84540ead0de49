//! Configuration values passed explicitly into the uploader and its collaborators

use crate::error::handlers::ValidationErrorHandler;
use crate::error::{PusherError, Result};
use crate::retry::RetrySpec;
use crate::upload::{DEFAULT_CHUNK_SIZE, MAX_WORKERS, UploadOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_NETWORK: &str = "VM Network";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host name or address, optionally with a port; `https` is implied.
    pub host: String,
    pub datastore: String,
    pub skip_tls: bool,
}

impl EndpointConfig {
    pub fn base_url(&self) -> Result<url::Url> {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(PusherError::Config("host cannot be empty".to_string()));
        }
        let with_scheme = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        Ok(url::Url::parse(&with_scheme)?)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: u64,
    pub workers: usize,
    /// Stream disks straight out of the archive instead of extracting them first
    pub stream: bool,
    pub verify_checksums: bool,
    pub chunk_timeout: Duration,
    pub save_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            stream: true,
            verify_checksums: false,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            save_interval: DEFAULT_SAVE_INTERVAL,
        }
    }
}

impl UploadConfig {
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size,
            workers: self.workers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub archive_path: PathBuf,
    pub vm_name: String,
    pub network: String,
    pub endpoint: EndpointConfig,
    pub auth: AuthConfig,
    pub upload: UploadConfig,
    pub retry: RetrySpec,
    /// Where session files are kept
    pub session_dir: PathBuf,
}

impl AppConfig {
    /// VM name defaults to the archive file stem.
    pub fn default_vm_name(archive_path: &std::path::Path) -> String {
        archive_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("imported-vm")
            .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        ValidationErrorHandler::validate_archive_path(&self.archive_path)?;
        ValidationErrorHandler::validate_chunk_size(self.upload.chunk_size)?;
        ValidationErrorHandler::validate_workers(self.upload.workers, MAX_WORKERS)?;
        ValidationErrorHandler::validate_credentials(&self.auth.username, &self.auth.password)?;

        if self.endpoint.datastore.trim().is_empty() {
            return Err(PusherError::Validation("datastore is required".to_string()));
        }
        if self.vm_name.trim().is_empty() {
            return Err(PusherError::Validation("VM name cannot be empty".to_string()));
        }
        if self.upload.chunk_timeout.is_zero() {
            return Err(PusherError::Validation("chunk timeout must be positive".to_string()));
        }
        self.endpoint.base_url()?;
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(path: PathBuf) -> AppConfig {
        AppConfig {
            vm_name: AppConfig::default_vm_name(&path),
            archive_path: path,
            network: DEFAULT_NETWORK.to_string(),
            endpoint: EndpointConfig {
                host: "esx01.lab.local".to_string(),
                datastore: "datastore1".to_string(),
                skip_tls: true,
            },
            auth: AuthConfig {
                username: "root".to_string(),
                password: Some("secret".to_string()),
            },
            upload: UploadConfig::default(),
            retry: RetrySpec::default(),
            session_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn test_defaults() {
        let upload = UploadConfig::default();
        assert_eq!(upload.chunk_size, 32 * 1024 * 1024);
        assert_eq!(upload.workers, 3);
        assert!(upload.stream);
        assert_eq!(upload.chunk_timeout, Duration::from_secs(1800));
        assert_eq!(upload.save_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_base_url() {
        let endpoint = EndpointConfig {
            host: "esx01.lab.local".to_string(),
            datastore: "ds".to_string(),
            skip_tls: false,
        };
        assert_eq!(endpoint.base_url().unwrap().as_str(), "https://esx01.lab.local/");

        let endpoint = EndpointConfig {
            host: "http://127.0.0.1:8080/".to_string(),
            ..endpoint
        };
        assert_eq!(endpoint.base_url().unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appliance.ova");
        std::fs::write(&path, b"x").unwrap();

        let config = config_for(path.clone());
        assert_eq!(config.vm_name, "appliance");
        assert!(config.validate().is_ok());

        let mut bad = config_for(path.clone());
        bad.upload.workers = 11;
        assert!(bad.validate().is_err());

        let mut bad = config_for(path);
        bad.endpoint.datastore = " ".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_auth_debug_redacts_password() {
        let auth = AuthConfig {
            username: "root".to_string(),
            password: Some("hunter2".to_string()),
        };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
