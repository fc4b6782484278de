//! Compression of rotated log files
//!
//! Each rotation event becomes one task that gzips the closed file next to
//! itself and removes the original. The [`CompressionLedger`] collapses
//! repeated notifications for the same path so a file is never compressed
//! or deleted twice.
//!
//! ## Retention of ledger entries
//!
//! Entries for compressed files live for [`LEDGER_TTL`] (24h) and are removed
//! by one periodic sweep, see [`spawn_eviction`].

pub mod ledger;
pub mod worker;

pub use ledger::{spawn_eviction, CompressionLedger, EVICTION_PERIOD, LEDGER_TTL};
pub use worker::{
    compress_file, compress_rotated, gz_path, CompressOutcome, CompressionContext,
    CompressionError, CompressionWorker,
};
