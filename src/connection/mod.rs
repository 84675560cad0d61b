//! Connection supervision.
//!
//! - [`ConnectionSupervisor`] owns the held transport connections, records
//!   the last connection error and reports health.
//! - [`HealthProbe`] is the fixed-interval loop that reconnects when
//!   disconnected and keeps re-triggering reconciliation so failed
//!   bindings are retried.

mod probe;
mod supervisor;

pub use probe::HealthProbe;
pub use supervisor::ConnectionSupervisor;

use std::fmt;
use std::path::PathBuf;

/// Transport-level options, supplied once at construction.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Server endpoints, tried by the transport in order.
    pub servers: Vec<String>,

    pub tls: TlsOptions,

    /// Bearer token presented on connect.
    pub auth_token: Option<String>,

    /// Client name reported to the server.
    pub name: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:4222".to_string()],
            tls: TlsOptions::default(),
            auth_token: None,
            name: "subsync".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("servers", &self.servers)
            .field("tls", &self.tls)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .finish()
    }
}

/// TLS settings.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    pub enabled: bool,

    /// Extra root certificate (PEM).
    pub ca_file: Option<PathBuf>,

    /// Accept any server certificate. Test setups only.
    pub insecure_skip_verify: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let options = ConnectionOptions {
            auth_token: Some("s3cret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", options);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }
}
