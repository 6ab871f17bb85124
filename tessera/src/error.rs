use std::io;
use std::path::PathBuf;

use tessera_core::TesseraCoreError;

/// A convenience [`Result`] for the tessera crate.
pub type TesseraResult<T> = Result<T, TesseraError>;

#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    #[error("Unable to load config file {1}: {0}")]
    ConfigLoadError(#[source] io::Error, PathBuf),

    #[error("Unable to parse config file {1}: {0}")]
    ConfigParseError(#[source] subst::yaml::Error, PathBuf),

    #[error("Unable to write config file {1}: {0}")]
    ConfigWriteError(#[source] io::Error, PathBuf),

    #[error("Unable to serialize the configuration: {0}")]
    ConfigSerializeError(#[from] serde_yaml::Error),

    #[error("Unable to open {1}: {0}")]
    SourceOpenError(#[source] io::Error, PathBuf),

    #[error("Unable to read {1}: {0}")]
    SourceReadError(#[source] io::Error, PathBuf),

    #[error("{0} is not a binary PGM file: {1}")]
    InvalidPgmHeader(PathBuf, String),

    #[error("{path} holds {actual} bytes, but a {width}x{height} bitmap at {bpp} bpp needs {expected}")]
    SizeMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        bpp: u32,
        expected: u64,
        actual: u64,
    },

    #[error("Raw input {0} needs --width, --height and --bpp")]
    MissingGeometry(PathBuf),

    #[error("Without an input file, --width and --height are required to generate a pattern")]
    MissingPatternSize,

    #[error("Unable to write PNG file {1}: {0}")]
    PngWriteError(#[source] png::EncodingError, PathBuf),

    #[error("Unable to create {1}: {0}")]
    OutputError(#[source] io::Error, PathBuf),

    #[error("The load was cancelled before the pyramid was complete")]
    LoadCancelled,

    #[error(transparent)]
    CoreError(#[from] TesseraCoreError),
}
