//! Access to packed samples.
//!
//! Samples narrower than a byte are packed most significant bit first, so for 1 bpp
//! the leftmost pixel of a byte is bit 7. Samples of 8 bits and wider occupy whole
//! bytes in big-endian order.

/// Number of bytes in one row of `width` samples of `bpp` bits.
#[must_use]
pub fn stride(width: u32, bpp: u32) -> usize {
    (width as usize * bpp as usize).div_ceil(8)
}

/// The largest value a sample of `bpp` bits can hold.
#[must_use]
pub fn max_sample(bpp: u32) -> u32 {
    if bpp >= 32 {
        u32::MAX
    } else {
        (1_u32 << bpp) - 1
    }
}

/// Reads sample `index` of a packed row.
///
/// ```
/// # use tessera_tile_utils::get_sample;
/// let row = [0b1000_0001];
/// assert_eq!(get_sample(&row, 0, 1), 1);
/// assert_eq!(get_sample(&row, 1, 1), 0);
/// assert_eq!(get_sample(&row, 7, 1), 1);
/// ```
#[must_use]
pub fn get_sample(row: &[u8], index: usize, bpp: u32) -> u32 {
    let bpp_bits = bpp as usize;
    if bpp_bits < 8 {
        let bit = index * bpp_bits;
        let shift = 8 - bpp_bits - bit % 8;
        (u32::from(row[bit / 8]) >> shift) & max_sample(bpp)
    } else {
        let bytes = bpp_bits / 8;
        row[index * bytes..(index + 1) * bytes]
            .iter()
            .take(4)
            .fold(0_u32, |acc, b| (acc << 8) | u32::from(*b))
    }
}

/// Writes sample `index` of a packed row, leaving neighbouring samples untouched.
pub fn set_sample(row: &mut [u8], index: usize, bpp: u32, value: u32) {
    let bpp_bits = bpp as usize;
    if bpp_bits < 8 {
        let bit = index * bpp_bits;
        let shift = 8 - bpp_bits - bit % 8;
        let mask = (max_sample(bpp) << shift) as u8;
        let byte = &mut row[bit / 8];
        *byte = (*byte & !mask) | (((value & max_sample(bpp)) << shift) as u8 & mask);
    } else {
        let bytes = bpp_bits / 8;
        for (i, b) in row[index * bytes..(index + 1) * bytes]
            .iter_mut()
            .rev()
            .enumerate()
        {
            *b = if i < 4 { (value >> (8 * i)) as u8 } else { 0 };
        }
    }
}

/// Scales a sample of `bpp` bits to the `0..=255` range.
#[must_use]
pub fn to_u8(value: u32, bpp: u32) -> u8 {
    match bpp {
        8 => value as u8,
        b if b > 8 => (value >> (b.min(32) - 8)) as u8,
        _ => (value * 255 / max_sample(bpp)) as u8,
    }
}

/// Iterates the samples of a packed row, left to right.
#[derive(Debug, Clone)]
pub struct SampleIterator<'a> {
    row: &'a [u8],
    bpp: u32,
    index: usize,
    end: usize,
}

impl<'a> SampleIterator<'a> {
    /// Iterates `count` samples starting at sample `first`.
    #[must_use]
    pub fn new(row: &'a [u8], bpp: u32, first: usize, count: usize) -> Self {
        Self {
            row,
            bpp,
            index: first,
            end: first + count,
        }
    }
}

impl Iterator for SampleIterator<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.index >= self.end {
            return None;
        }
        let value = get_sample(self.row, self.index, self.bpp);
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.index;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SampleIterator<'_> {}
