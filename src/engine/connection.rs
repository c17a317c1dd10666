//! Docker daemon connection settings.
//!
//! Mirrors the conventions of the docker CLI:
//!
//! - `DOCKER_HOST` unset or `unix://...` → local socket
//! - `DOCKER_HOST=tcp://host:port` + `DOCKER_CERT_PATH` → TLS with
//!   `ca.pem`, `cert.pem` and `key.pem` from the cert directory
//! - `DOCKER_HOST=tcp://host:port` without a cert path → plain HTTP

use std::path::PathBuf;

use bollard::{Docker, API_DEFAULT_VERSION};

use crate::error::EngineError;

/// Seconds bollard waits on a single request before giving up.
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// How to reach the Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonSettings {
    /// Local socket (or named pipe), resolved by bollard.
    Local,
    /// Unencrypted TCP connection.
    Http { address: String },
    /// TLS-secured TCP connection.
    Tls { address: String, cert_dir: PathBuf },
}

impl DaemonSettings {
    /// Reads `DOCKER_HOST` and `DOCKER_CERT_PATH` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("DOCKER_HOST").filter(|h| !h.trim().is_empty());
        let cert_dir = lookup("DOCKER_CERT_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        match host {
            Some(address) if address.starts_with("tcp://") || address.starts_with("https://") => {
                match cert_dir {
                    Some(cert_dir) => DaemonSettings::Tls { address, cert_dir },
                    None => DaemonSettings::Http { address },
                }
            }
            Some(address) if address.starts_with("http://") => DaemonSettings::Http { address },
            _ => DaemonSettings::Local,
        }
    }

    /// Opens a bollard client for these settings.
    pub fn connect(&self) -> Result<Docker, EngineError> {
        match self {
            DaemonSettings::Local => Docker::connect_with_local_defaults()
                .map_err(|e| EngineError::Unavailable(format!("Failed to connect: {e}"))),
            DaemonSettings::Http { address } => {
                Docker::connect_with_http(address, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .map_err(|e| {
                        EngineError::Unavailable(format!("Failed to connect to {address}: {e}"))
                    })
            }
            DaemonSettings::Tls { address, cert_dir } => {
                let key = cert_dir.join("key.pem");
                let cert = cert_dir.join("cert.pem");
                let ca = cert_dir.join("ca.pem");
                for file in [&key, &cert, &ca] {
                    if !file.is_file() {
                        return Err(EngineError::Tls(format!(
                            "missing certificate file {}",
                            file.display()
                        )));
                    }
                }
                Docker::connect_with_ssl(
                    address,
                    &key,
                    &cert,
                    &ca,
                    REQUEST_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                )
                .map_err(|e| EngineError::Unavailable(format!("Failed to connect to {address}: {e}")))
            }
        }
    }
}

impl std::fmt::Display for DaemonSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonSettings::Local => write!(f, "local socket"),
            DaemonSettings::Http { address } => write!(f, "{address}"),
            DaemonSettings::Tls { address, .. } => write!(f, "{address} (tls)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_host_means_local() {
        assert_eq!(DaemonSettings::from_lookup(lookup(&[])), DaemonSettings::Local);
        assert_eq!(
            DaemonSettings::from_lookup(lookup(&[("DOCKER_HOST", "unix:///var/run/docker.sock")])),
            DaemonSettings::Local
        );
    }

    #[test]
    fn test_tcp_host_with_certs_is_tls() {
        let settings = DaemonSettings::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://192.168.99.100:2376"),
            ("DOCKER_CERT_PATH", "/home/me/.docker/machine"),
        ]));
        assert_eq!(
            settings,
            DaemonSettings::Tls {
                address: "tcp://192.168.99.100:2376".to_string(),
                cert_dir: PathBuf::from("/home/me/.docker/machine"),
            }
        );
        assert_eq!(settings.to_string(), "tcp://192.168.99.100:2376 (tls)");
    }

    #[test]
    fn test_tcp_host_without_certs_is_http() {
        let settings =
            DaemonSettings::from_lookup(lookup(&[("DOCKER_HOST", "tcp://10.0.0.5:2375")]));
        assert_eq!(
            settings,
            DaemonSettings::Http {
                address: "tcp://10.0.0.5:2375".to_string()
            }
        );
    }

    #[test]
    fn test_tls_with_missing_cert_files_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = DaemonSettings::Tls {
            address: "tcp://127.0.0.1:2376".to_string(),
            cert_dir: dir.path().to_path_buf(),
        };
        let err = settings.connect().expect_err("should fail without certs");
        assert!(matches!(err, EngineError::Tls(_)));
    }
}
