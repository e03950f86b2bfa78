//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 2121;

/// Default HTTP port for the GET-only adapter.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default bind address (localhost only; avoids firewall prompts and is
/// good for security in general).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// How many connections a server handles concurrently. Bounds connection
/// count, not per-connection duration.
pub const CONNECTION_LIMIT: usize = 10;
