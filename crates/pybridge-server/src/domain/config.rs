//! Listener configuration and bind validation.

use std::net::{IpAddr, Ipv4Addr};

use pybridge_core::protocol::{default_host, is_loopback_host, DEFAULT_PORT};
use thiserror::Error;

/// Errors produced by [`ServerConfig::validate_for_listen`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The trimmed host string is empty.
    #[error("listen host must not be empty")]
    EmptyHost,

    /// A routable bind address was requested without an auth token.
    #[error("a non-loopback bind address requires an authentication token")]
    TokenRequired,

    /// The host is neither `localhost` nor a literal IP address.
    #[error("listen host must be 'localhost' or a literal IP address")]
    InvalidHost,
}

/// Listener settings for a single start attempt.
///
/// The bridge stores a config only after a successful bind, so a running
/// listener always reflects the settings it was started with; a new start
/// attempt replaces the configuration wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// `localhost` or a literal IP address.
    pub host: String,
    /// TCP port, 1–65535 (0 is accepted and means "pick a free port", used by
    /// tests).
    pub port: u16,
    /// Shared-secret token checked during the handshake. May be empty only
    /// when binding a loopback host.
    pub auth_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            auth_token: String::new(),
        }
    }
}

impl ServerConfig {
    /// Resolves the address this configuration may bind to.
    ///
    /// Only `localhost` (resolved to the IPv4 loopback address) and literal
    /// IP addresses are accepted. DNS names are rejected so that binding
    /// never depends on resolver behavior. A non-loopback host additionally
    /// requires a non-blank auth token, preventing an accidental
    /// unauthenticated bind on a routable interface.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyHost`], [`ConfigError::TokenRequired`], or
    /// [`ConfigError::InvalidHost`] as described above.
    pub fn validate_for_listen(&self) -> Result<IpAddr, ConfigError> {
        let trimmed = self.host.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if !is_loopback_host(trimmed) && self.auth_token.trim().is_empty() {
            return Err(ConfigError::TokenRequired);
        }

        if trimmed == "localhost" {
            return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }

        trimmed.parse::<IpAddr>().map_err(|_| ConfigError::InvalidHost)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
