//! Domain logic for the workflow gallery indexer.
//!
//! Everything here is free of database access and global state so it can
//! run on any worker thread:
//!
//! - [`workflow`]: graph index, role table, tracer and metadata extractor.
//! - [`embedded`]: PNG text chunk, EXIF marker and container tag readers.
//! - [`media`]: media kinds and the extension allow-list.
//! - [`ffmpeg`], [`thumbnail`]: probing and thumbnail generation.
//! - [`config`]: [`GalleryConfig`] loaded from the environment.

pub mod config;
pub mod embedded;
pub mod error;
pub mod ffmpeg;
pub mod hashing;
pub mod media;
pub mod thumbnail;
pub mod types;
pub mod workflow;

pub use config::GalleryConfig;
pub use error::CoreError;
pub use media::{ExtensionWhitelist, MediaKind};
