/// Errors that can occur while setting up a pyramid or its scheduler.
///
/// Runtime races (a cancelled queue, a closed view) are not errors: the affected work is
/// silently skipped. Broken invariants panic.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TesseraCoreError {
    #[error("Unable to spawn worker thread for pool {1}: {0}")]
    ThreadSpawnError(#[source] std::io::Error, String),

    #[error("A tiled bitmap needs at least one layer operation")]
    EmptyLayerSpec,

    #[error("Bitmap dimensions must be non-zero, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Tile size {0} must be a positive multiple of {granularity}", granularity = tessera_tile_utils::TILESIZE_GRANULARITY)]
    InvalidTileSize(u32),

    #[error("Unsupported bits per pixel: {0}")]
    UnsupportedBpp(u32),

    #[error("A source was already set for this bitmap")]
    SourceAlreadySet,
}

/// A convenience [`Result`] for `tessera-core`.
pub type TesseraCoreResult<T> = Result<T, TesseraCoreError>;
