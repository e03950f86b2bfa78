//! Canopy server library
//!
//! Protocol servers over the canopy virtual filesystem: the full FTP
//! engine and a GET-only HTTP adapter.

pub mod constants;
pub mod ftp;
pub mod http;

pub use ftp::FtpServer;
pub use http::HttpServer;
