//! Bitmap sources: files on disk and generated patterns.

use std::fs::File;
use std::io::{self, Read as _, Seek as _, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tessera_core::bitmap::{SourcePresentation, Tile};
use tessera_tile_utils::{set_sample, stride};
use tracing::{debug, error};

use crate::args::{InputArgs, Pattern};
use crate::{TesseraError, TesseraResult};

/// Geometry of a bitmap source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
}

impl SourceInfo {
    /// Bytes per packed row.
    #[must_use]
    pub fn row_len(&self) -> usize {
        stride(self.width, self.bpp)
    }
}

/// The source selected on the command line.
#[derive(Clone)]
pub enum Source {
    File(Arc<FileSource>),
    Synthetic(Arc<SyntheticSource>),
}

impl Source {
    /// Opens the input file, or sets up the pattern generator if there is none.
    ///
    /// PGM files are recognized by their signature; anything else is read as raw data and
    /// needs its geometry on the command line.
    pub fn open(input: &InputArgs) -> TesseraResult<Self> {
        match &input.input {
            Some(path) if FileSource::is_pgm(path) => {
                Ok(Self::File(Arc::new(FileSource::open_pgm(path)?)))
            }
            Some(path) => {
                let (Some(width), Some(height), Some(bpp)) = (input.width, input.height, input.bpp)
                else {
                    return Err(TesseraError::MissingGeometry(path.clone()));
                };
                let info = SourceInfo { width, height, bpp };
                Ok(Self::File(Arc::new(FileSource::open_raw(path, info)?)))
            }
            None => {
                let (Some(width), Some(height)) = (input.width, input.height) else {
                    return Err(TesseraError::MissingPatternSize);
                };
                let info = SourceInfo {
                    width,
                    height,
                    bpp: input.bpp.unwrap_or(8),
                };
                Ok(Self::Synthetic(Arc::new(SyntheticSource::new(info, input.pattern))))
            }
        }
    }

    #[must_use]
    pub fn info(&self) -> SourceInfo {
        match self {
            Self::File(source) => source.info(),
            Self::Synthetic(source) => source.info(),
        }
    }

    #[must_use]
    pub fn presentation(&self) -> Arc<dyn SourcePresentation> {
        match self {
            Self::File(source) => Arc::clone(source) as Arc<dyn SourcePresentation>,
            Self::Synthetic(source) => Arc::clone(source) as Arc<dyn SourcePresentation>,
        }
    }

    /// The first error hit while reading, if any.
    pub fn take_error(&self) -> Option<TesseraError> {
        match self {
            Self::File(source) => source.take_error(),
            Self::Synthetic(_) => None,
        }
    }
}

/// Copies one packed source row into the tiles of a tile row.
///
/// Tile edges are multiples of 64 pixels, so every tile starts on a byte boundary.
fn copy_row(row: &[u8], line: usize, bpp: u32, tile_width: u32, first_tile: u32, tiles: &[Arc<Tile>]) {
    for (k, tile) in tiles.iter().enumerate() {
        let start = ((first_tile as usize + k) * tile_width as usize * bpp as usize) / 8;
        if start >= row.len() {
            break;
        }
        let tile_stride = tile.stride();
        let len = tile_stride.min(row.len() - start);
        let mut data = tile.data_mut();
        data[line * tile_stride..][..len].copy_from_slice(&row[start..start + len]);
    }
}

/// A file of packed rows, optionally preceded by a header.
pub struct FileSource {
    path: PathBuf,
    info: SourceInfo,
    data_offset: u64,
    file: Mutex<File>,
    error: Mutex<Option<io::Error>>,
}

impl FileSource {
    /// Opens a headerless bitmap of the given geometry.
    pub fn open_raw(path: &Path, info: SourceInfo) -> TesseraResult<Self> {
        Self::open(path, info, 0)
    }

    /// Opens a binary PGM (`P5`) file with at most 8 bits per sample.
    pub fn open_pgm(path: &Path) -> TesseraResult<Self> {
        let mut head = Vec::with_capacity(1024);
        File::open(path)
            .map_err(|e| TesseraError::SourceOpenError(e, path.to_path_buf()))?
            .take(1024)
            .read_to_end(&mut head)
            .map_err(|e| TesseraError::SourceReadError(e, path.to_path_buf()))?;
        let (info, offset) = parse_pgm_header(&head)
            .map_err(|msg| TesseraError::InvalidPgmHeader(path.to_path_buf(), msg))?;
        Self::open(path, info, offset as u64)
    }

    /// Checks the first bytes of `path` for the PGM signature.
    #[must_use]
    pub fn is_pgm(path: &Path) -> bool {
        let mut magic = [0_u8; 2];
        File::open(path)
            .and_then(|mut f| f.read_exact(&mut magic))
            .is_ok_and(|()| &magic == b"P5")
    }

    fn open(path: &Path, info: SourceInfo, data_offset: u64) -> TesseraResult<Self> {
        let file = File::open(path).map_err(|e| TesseraError::SourceOpenError(e, path.to_path_buf()))?;
        let actual = file
            .metadata()
            .map_err(|e| TesseraError::SourceReadError(e, path.to_path_buf()))?
            .len();
        let expected = data_offset + info.row_len() as u64 * u64::from(info.height);
        if actual < expected {
            return Err(TesseraError::SizeMismatch {
                path: path.to_path_buf(),
                width: info.width,
                height: info.height,
                bpp: info.bpp,
                expected,
                actual,
            });
        }
        debug!(
            "Opened {}: {}x{} at {} bpp",
            path.display(),
            info.width,
            info.height,
            info.bpp
        );
        Ok(Self {
            path: path.to_path_buf(),
            info,
            data_offset,
            file: Mutex::new(file),
            error: Mutex::default(),
        })
    }

    #[must_use]
    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// The first read error hit while filling tiles, if any.
    pub fn take_error(&self) -> Option<TesseraError> {
        self.error
            .lock()
            .expect("error lock poisoned")
            .take()
            .map(|e| TesseraError::SourceReadError(e, self.path.clone()))
    }

    fn read_lines(&self, start_line: u32, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock().expect("file lock poisoned");
        let position = self.data_offset + self.info.row_len() as u64 * u64::from(start_line);
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(buf)
    }
}

impl SourcePresentation for FileSource {
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    ) {
        let row_len = self.info.row_len();
        let mut buf = vec![0; row_len * line_count as usize];
        if let Err(e) = self.read_lines(start_line, &mut buf) {
            error!(
                "Unable to read lines {start_line}..{} of {}: {e}",
                start_line + line_count,
                self.path.display()
            );
            self.error.lock().expect("error lock poisoned").get_or_insert(e);
            return;
        }
        for (line, row) in buf.chunks_exact(row_len).enumerate() {
            copy_row(row, line, self.info.bpp, tile_width, first_tile, tiles);
        }
    }

    fn done(&self) {
        debug!("Finished reading {}", self.path.display());
    }
}

/// Splits a PGM header into its geometry and the offset of the pixel data.
fn parse_pgm_header(head: &[u8]) -> Result<(SourceInfo, usize), String> {
    if !head.starts_with(b"P5") {
        return Err("missing P5 signature".to_string());
    }
    let mut pos = 2;
    let mut fields = [0_u32; 3];
    for field in &mut fields {
        // Whitespace and comments up to the next number.
        loop {
            match head.get(pos) {
                Some(b'#') => {
                    while head.get(pos).is_some_and(|&b| b != b'\n') {
                        pos += 1;
                    }
                }
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(_) => break,
                None => return Err("truncated header".to_string()),
            }
        }
        let digits = head[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("unexpected byte 0x{:02x} in header", head[pos]));
        }
        let text = std::str::from_utf8(&head[pos..pos + digits]).map_err(|e| e.to_string())?;
        *field = text.parse().map_err(|e| format!("'{text}': {e}"))?;
        pos += digits;
    }
    // Exactly one whitespace byte separates the header from the pixels.
    if !head.get(pos).is_some_and(u8::is_ascii_whitespace) {
        return Err("truncated header".to_string());
    }
    let [width, height, maxval] = fields;
    if width == 0 || height == 0 {
        return Err(format!("empty image {width}x{height}"));
    }
    if maxval == 0 || maxval > 255 {
        return Err(format!("maximum value {maxval} is not supported, only 8 bit samples are"));
    }
    Ok((
        SourceInfo {
            width,
            height,
            bpp: 8,
        },
        pos + 1,
    ))
}

/// A generated test image.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    info: SourceInfo,
    pattern: Pattern,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(info: SourceInfo, pattern: Pattern) -> Self {
        Self { info, pattern }
    }

    #[must_use]
    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Intensity of pixel `(x, y)` in `0..=255`.
    #[must_use]
    pub fn intensity(&self, x: u32, y: u32) -> u8 {
        match self.pattern {
            Pattern::Gradient => ((x + y) % 256) as u8,
            Pattern::Checkerboard => {
                if (x / 64 + y / 64) % 2 == 0 {
                    255
                } else {
                    0
                }
            }
            Pattern::Rings => {
                let dx = f64::from(x) - f64::from(self.info.width) / 2.0;
                let dy = f64::from(y) - f64::from(self.info.height) / 2.0;
                (dx.hypot(dy) as u64 % 256) as u8
            }
        }
    }
}

impl SourcePresentation for SyntheticSource {
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    ) {
        let bpp = self.info.bpp;
        let mut row = vec![0; self.info.row_len()];
        for line in 0..line_count {
            let y = start_line + line;
            for x in 0..self.info.width {
                let value = u32::from(self.intensity(x, y)) >> (8 - bpp);
                set_sample(&mut row, x as usize, bpp, value);
            }
            copy_row(&row, line as usize, bpp, tile_width, first_tile, tiles);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use rstest::rstest;
    use tessera_core::bitmap::CompressedTile;
    use tessera_core::scheduler::{SchedulerContext, ThreadPool};
    use tessera_core::storage::BlobStore;
    use tessera_tile_utils::{TileCoord, get_sample};

    use super::*;

    fn tiles(count: i32, bpp: u32, size: u32) -> Vec<Arc<Tile>> {
        let ctx = SchedulerContext::with_pools(
            ThreadPool::new("cpu", 0).unwrap(),
            ThreadPool::new("seq", 0).unwrap(),
            ThreadPool::new("reaper", 0).unwrap(),
        );
        let store = BlobStore::default();
        (0..count)
            .map(|x| {
                CompressedTile::new(TileCoord::new(0, x, 0), bpp, size, &store, &ctx)
                    .initialize()
                    .unwrap()
            })
            .collect()
    }

    #[rstest]
    #[case(b"P5 3 2 255\n", (3, 2), 11)]
    #[case(b"P5\n# made by hand\n640 480\n# depth\n200\txyz", (640, 480), 38)]
    fn pgm_headers(#[case] head: &[u8], #[case] size: (u32, u32), #[case] offset: usize) {
        let (info, data) = parse_pgm_header(head).unwrap();
        assert_eq!((info.width, info.height, info.bpp), (size.0, size.1, 8));
        assert_eq!(data, offset);
    }

    #[rstest]
    #[case(b"P6 3 2 255\n")]
    #[case(b"P5 3 2")]
    #[case(b"P5 3 x 255\n")]
    #[case(b"P5 3 2 65535\n")]
    #[case(b"P5 0 2 255\n")]
    fn bad_pgm_headers(#[case] head: &[u8]) {
        assert!(parse_pgm_header(head).is_err());
    }

    #[test]
    fn rows_are_split_between_tiles() {
        let tiles = tiles(2, 1, 64);
        // 100 pixels: 8 bytes to the first tile, the rest to the second.
        let row: Vec<u8> = (0..13).collect();
        copy_row(&row, 3, 1, 64, 0, &tiles);
        let first = tiles[0].data();
        assert_eq!(&first[3 * 8..4 * 8], &row[..8]);
        let second = tiles[1].data();
        assert_eq!(&second[3 * 8..3 * 8 + 5], &row[8..]);
        assert_eq!(second[3 * 8 + 5], 0);
    }

    #[test]
    fn reads_raw_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let info = SourceInfo {
            width: 70,
            height: 3,
            bpp: 8,
        };
        let pixels: Vec<u8> = (0..70 * 3).map(|i| (i % 251) as u8).collect();
        file.write_all(&pixels).unwrap();

        let source = FileSource::open_raw(file.path(), info).unwrap();
        let tiles = tiles(2, 8, 64);
        source.fill_tiles(1, 2, 64, 0, &tiles);
        assert!(source.take_error().is_none());
        assert_eq!(tiles[0].data()[0], 70);
        assert_eq!(tiles[0].data()[64 + 63], pixels[140 + 63]);
        assert_eq!(tiles[1].data()[64 + 5], pixels[140 + 69]);
    }

    #[test]
    fn short_raw_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0; 99]).unwrap();
        let info = SourceInfo {
            width: 10,
            height: 10,
            bpp: 8,
        };
        let err = FileSource::open_raw(file.path(), info).err().unwrap();
        assert!(matches!(err, TesseraError::SizeMismatch { expected: 100, actual: 99, .. }));
    }

    #[test]
    fn reads_pgm_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"P5\n4 2\n255\n").unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(FileSource::is_pgm(file.path()));

        let source = FileSource::open_pgm(file.path()).unwrap();
        assert_eq!(source.info(), SourceInfo { width: 4, height: 2, bpp: 8 });
        let tiles = tiles(1, 8, 64);
        source.fill_tiles(0, 2, 64, 0, &tiles);
        assert_eq!(&tiles[0].data()[..4], &[1, 2, 3, 4]);
        assert_eq!(&tiles[0].data()[64..68], &[5, 6, 7, 8]);
    }

    #[test]
    fn selects_source() {
        let input = InputArgs {
            width: Some(10),
            height: Some(20),
            ..InputArgs::default()
        };
        let source = Source::open(&input).unwrap();
        assert!(matches!(source, Source::Synthetic(_)));
        assert_eq!(source.info(), SourceInfo { width: 10, height: 20, bpp: 8 });

        let input = InputArgs {
            input: Some(PathBuf::from("scan.raw")),
            width: Some(10),
            height: Some(20),
            ..InputArgs::default()
        };
        assert!(matches!(Source::open(&input), Err(TesseraError::MissingGeometry(_))));
        assert!(matches!(
            Source::open(&InputArgs::default()),
            Err(TesseraError::MissingPatternSize)
        ));
    }

    #[rstest]
    #[case(Pattern::Gradient, 1, 2, 3)]
    #[case(Pattern::Checkerboard, 0, 0, 255)]
    #[case(Pattern::Checkerboard, 64, 0, 0)]
    #[case(Pattern::Rings, 50, 50, 0)]
    #[case(Pattern::Rings, 50, 60, 10)]
    fn patterns(#[case] pattern: Pattern, #[case] x: u32, #[case] y: u32, #[case] expected: u8) {
        let source = SyntheticSource::new(
            SourceInfo {
                width: 100,
                height: 100,
                bpp: 8,
            },
            pattern,
        );
        assert_eq!(source.intensity(x, y), expected);
    }

    #[test]
    fn synthetic_scales_to_bpp() {
        let source = SyntheticSource::new(
            SourceInfo {
                width: 128,
                height: 64,
                bpp: 1,
            },
            Pattern::Checkerboard,
        );
        let tiles = tiles(2, 1, 64);
        source.fill_tiles(0, 64, 64, 0, &tiles);
        let row = &tiles[0].data()[..8];
        assert_eq!(get_sample(row, 0, 1), 1);
        let row = &tiles[1].data()[..8];
        assert_eq!(get_sample(row, 0, 1), 0);
    }
}
