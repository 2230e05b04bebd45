//! PNG scanline filters.
//!
//! Each scanline is preceded by one filter-type byte. Filters operate on
//! bytes, with the "pixel to the left" being `bytes_per_pixel` bytes back
//! (or zero at the row start) and the previous row being all zeroes for
//! the first row of an image or interlace pass.

use crate::error::{ApngError, Result};

/// PNG filter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// No filter.
    None = 0,
    /// Sub filter (difference from left pixel).
    Sub = 1,
    /// Up filter (difference from pixel above).
    Up = 2,
    /// Average filter (average of left and above).
    Average = 3,
    /// Paeth filter (predictor based on left, above, upper-left).
    Paeth = 4,
}

impl FilterType {
    /// Create from byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FilterType::None),
            1 => Some(FilterType::Sub),
            2 => Some(FilterType::Up),
            3 => Some(FilterType::Average),
            4 => Some(FilterType::Paeth),
            _ => None,
        }
    }
}

/// Reverse a row filter in place. `previous` is the reconstructed row
/// above and must be the same length as `current`; pass a zeroed slice
/// for the first row.
pub fn unfilter_row(
    filter_type: FilterType,
    current: &mut [u8],
    previous: &[u8],
    bytes_per_pixel: usize,
) {
    match filter_type {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bytes_per_pixel..current.len() {
                current[i] = current[i].wrapping_add(current[i - bytes_per_pixel]);
            }
        }
        FilterType::Up => {
            for i in 0..current.len() {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        FilterType::Average => {
            for i in 0..current.len() {
                let left = if i >= bytes_per_pixel {
                    current[i - bytes_per_pixel] as u16
                } else {
                    0
                };
                let above = previous[i] as u16;
                current[i] = current[i].wrapping_add(((left + above) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..current.len() {
                let (left, upper_left) = if i >= bytes_per_pixel {
                    (current[i - bytes_per_pixel], previous[i - bytes_per_pixel])
                } else {
                    (0, 0)
                };
                let above = previous[i];
                current[i] = current[i].wrapping_add(paeth_predictor(left, above, upper_left));
            }
        }
    }
}

/// Apply a row filter for encoding, writing the result into `output`.
pub fn filter_row(
    filter_type: FilterType,
    current: &[u8],
    previous: &[u8],
    bytes_per_pixel: usize,
    output: &mut [u8],
) {
    match filter_type {
        FilterType::None => {
            output.copy_from_slice(current);
        }
        FilterType::Sub => {
            for i in 0..current.len() {
                let left = if i >= bytes_per_pixel {
                    current[i - bytes_per_pixel]
                } else {
                    0
                };
                output[i] = current[i].wrapping_sub(left);
            }
        }
        FilterType::Up => {
            for i in 0..current.len() {
                output[i] = current[i].wrapping_sub(previous[i]);
            }
        }
        FilterType::Average => {
            for i in 0..current.len() {
                let left = if i >= bytes_per_pixel {
                    current[i - bytes_per_pixel] as u16
                } else {
                    0
                };
                let above = previous[i] as u16;
                output[i] = current[i].wrapping_sub(((left + above) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..current.len() {
                let (left, upper_left) = if i >= bytes_per_pixel {
                    (current[i - bytes_per_pixel], previous[i - bytes_per_pixel])
                } else {
                    (0, 0)
                };
                let above = previous[i];
                output[i] = current[i].wrapping_sub(paeth_predictor(left, above, upper_left));
            }
        }
    }
}

/// Paeth predictor function.
#[inline]
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let pa = (b as i16 - c as i16).abs();
    let pb = (a as i16 - c as i16).abs();
    let pc = (a as i16 + b as i16 - 2 * c as i16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Select a filter for a row: minimum sum of absolute filtered values.
pub fn select_filter(current: &[u8], previous: &[u8], bytes_per_pixel: usize) -> FilterType {
    let mut scratch = vec![0u8; current.len()];
    let mut best_filter = FilterType::None;
    let mut best_sum = u64::MAX;

    for filter in [
        FilterType::None,
        FilterType::Sub,
        FilterType::Up,
        FilterType::Average,
        FilterType::Paeth,
    ] {
        filter_row(filter, current, previous, bytes_per_pixel, &mut scratch);
        let sum: u64 = scratch
            .iter()
            .map(|&b| (b as i8).unsigned_abs() as u64)
            .sum();
        if sum < best_sum {
            best_sum = sum;
            best_filter = filter;
        }
    }

    best_filter
}

/// Parse a filter-type byte, rejecting values above 4.
pub fn parse_filter_byte(value: u8) -> Result<FilterType> {
    FilterType::from_u8(value)
        .ok_or_else(|| ApngError::Format(format!("invalid filter type {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_type() {
        assert_eq!(FilterType::from_u8(0), Some(FilterType::None));
        assert_eq!(FilterType::from_u8(4), Some(FilterType::Paeth));
        assert_eq!(FilterType::from_u8(5), None);
        assert!(parse_filter_byte(5).is_err());
    }

    #[test]
    fn test_unfilter_sub_wraps() {
        // Two-byte pixels: the first pixel passes through, later bytes
        // add the byte one pixel back, wrapping on overflow.
        let mut row = vec![7, 3, 250, 10];
        let zero = vec![0u8; 4];
        unfilter_row(FilterType::Sub, &mut row, &zero, 2);
        assert_eq!(row, vec![7, 3, 1, 13]);
    }

    #[test]
    fn test_unfilter_up_first_row_is_identity() {
        // The zeroed sentinel row leaves the first row untouched.
        let mut first = vec![0x11, 0x22, 0x33];
        let zero = vec![0u8; 3];
        unfilter_row(FilterType::Up, &mut first, &zero, 1);
        assert_eq!(first, vec![0x11, 0x22, 0x33]);

        let mut second = vec![60, 200, 1];
        unfilter_row(FilterType::Up, &mut second, &[200, 100, 255], 1);
        assert_eq!(second, vec![4, 44, 0]);
    }

    #[test]
    fn test_paeth_predictor() {
        // p = a + b - c lands nearest a.
        assert_eq!(paeth_predictor(9, 100, 95), 9);
        // Nearest b.
        assert_eq!(paeth_predictor(20, 25, 21), 25);
        // Exactly c.
        assert_eq!(paeth_predictor(100, 110, 105), 105);
    }

    #[test]
    fn test_filter_roundtrip() {
        // Four-byte pixels with values that force wrapping, checked
        // against both the zeroed first-row sentinel and a real
        // previous row.
        let row = vec![3, 9, 0xfe, 0x80, 200, 7, 0xff, 0x41];
        let prev_rows: [&[u8]; 2] = [&[0u8; 8], &[13, 0xee, 54, 2, 0x90, 77, 0, 0xab]];

        for previous in prev_rows {
            for filter in [
                FilterType::None,
                FilterType::Sub,
                FilterType::Up,
                FilterType::Average,
                FilterType::Paeth,
            ] {
                let mut filtered = vec![0u8; row.len()];
                filter_row(filter, &row, previous, 4, &mut filtered);

                unfilter_row(filter, &mut filtered, previous, 4);
                assert_eq!(filtered, row, "roundtrip failed for {filter:?}");
            }
        }
    }

    #[test]
    fn test_select_filter_flat_row() {
        // A row identical to the previous row filters to all zeroes with Up.
        let row = vec![42u8; 8];
        let prev = vec![42u8; 8];
        assert_eq!(select_filter(&row, &prev, 4), FilterType::Up);
    }
}
