#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod app;
pub mod args;
pub mod config;
pub mod logging;
pub mod render;
pub mod source;

mod error;
pub use error::{TesseraError, TesseraResult};
