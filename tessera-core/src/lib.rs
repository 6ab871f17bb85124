#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

/// Tiles, layers and the pyramid tying them together
pub mod bitmap;

/// Configuration of the scheduler, tile storage and pyramid geometry
pub mod config;

mod error;
pub use error::{TesseraCoreError, TesseraCoreResult};

/// Rendering and reduction of tile pixels
pub mod ops;

pub mod registry;

pub mod scheduler;

pub mod storage;
