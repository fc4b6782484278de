pub mod compression;
pub mod config;
pub mod diagnostics;
pub mod format;
pub mod humanize;
pub mod naming;
pub mod observability;
pub mod retention;
pub mod rotation;
pub mod transport;

pub use config::{TransportConfig, TransportSettings};
pub use transport::{Transport, TransportError};
