//! oracle-image: hermetic reference-engine images.
//!
//! Builds a rootfs containing pinned lynx, w3m and links2 packages from a
//! signed, time-pinned Debian snapshot, records exactly what went into it in a
//! lock document, and runs the engines from that rootfs with a sealed
//! environment.
//!
//! See [`image::ImageBuilder`] for the build entry point and [`engine`] for
//! running the engines.

pub mod cache;
pub mod config;
pub mod deb822;
pub mod download;
pub mod engine;
pub mod error;
pub mod image;
pub mod lease;
pub mod lock;
pub mod preflight;
pub mod process;
pub mod resolve;
pub mod rootfs;
pub mod snapshot;
pub mod timing;

pub use error::OracleError;
