//! newsreel - ingest and analyse news-agency media bundles
//!
//! This crate provides:
//! - Classification of agency file names into per-story bundles
//! - A resumable per-resource lifecycle kept in SQLite
//! - Text, video and combined analysis pipelines against a generative model API
//! - Recovery of stuck and failed work

pub mod analysis;
pub mod classify;
pub mod commands;
pub mod config;
pub mod error;
pub mod meta;
pub mod pipeline;
pub mod progress;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
