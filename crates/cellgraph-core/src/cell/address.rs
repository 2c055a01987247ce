//! Cell address and range types

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::version::SpreadsheetVersion;

/// A cell address (e.g., "A1", "$B$2")
///
/// Rows and columns are zero-based. `$` markers are kept so that formulas
/// render back the way they were written and so row shifting knows which
/// parts are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellAddress {
    /// Row index (0-based internally, 1-based in display)
    pub row: u32,
    /// Column index (0-based, A=0)
    pub col: u16,
    /// Whether the row reference is absolute ($)
    pub row_absolute: bool,
    /// Whether the column reference is absolute ($)
    pub col_absolute: bool,
}

impl CellAddress {
    /// Create a new cell address with relative references
    pub fn new(row: u32, col: u16) -> Self {
        Self::with_absolute(row, col, false, false)
    }

    /// Create a new cell address with specified absolute/relative flags
    pub fn with_absolute(row: u32, col: u16, row_absolute: bool, col_absolute: bool) -> Self {
        Self {
            row,
            col,
            row_absolute,
            col_absolute,
        }
    }

    /// Create an absolute cell address ($A$1 style)
    pub fn absolute(row: u32, col: u16) -> Self {
        Self::with_absolute(row, col, true, true)
    }

    /// Parse an A1-style address against the largest grid.
    ///
    /// ```
    /// use cellgraph_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("$B$2").unwrap();
    /// assert_eq!((addr.row, addr.col), (1, 1));
    /// assert!(addr.row_absolute && addr.col_absolute);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_for(s, SpreadsheetVersion::Excel2007)
    }

    /// Parse an A1-style address, rejecting rows or columns beyond `version`
    pub fn parse_for(s: &str, version: SpreadsheetVersion) -> Result<Self> {
        let s = s.trim();
        let bytes = s.as_bytes();
        let mut pos = 0;

        let col_absolute = bytes.first() == Some(&b'$');
        if col_absolute {
            pos += 1;
        }
        let col_start = pos;
        while bytes.get(pos).map_or(false, u8::is_ascii_alphabetic) {
            pos += 1;
        }
        if pos == col_start {
            return Err(Error::InvalidAddress(format!("no column letters in '{}'", s)));
        }
        let col = Self::letters_to_index(&s[col_start..pos])?;

        let row_absolute = bytes.get(pos) == Some(&b'$');
        if row_absolute {
            pos += 1;
        }
        let digits = &s[pos..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAddress(format!("invalid row number in '{}'", s)));
        }
        let row: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid row number in '{}'", s)))?;
        if row == 0 {
            return Err(Error::InvalidAddress(format!("row number must be >= 1 in '{}'", s)));
        }

        let row = Self::check_row((row - 1).min(u32::MAX as u64) as u32, version)?;
        let col = Self::check_column(col, version)?;
        Ok(Self::with_absolute(row, col, row_absolute, col_absolute))
    }

    /// Validate a zero-based row index against a version
    pub fn check_row(row: u32, version: SpreadsheetVersion) -> Result<u32> {
        if version.contains_row(row) {
            Ok(row)
        } else {
            Err(Error::RowOutOfBounds(row, version.last_row_index()))
        }
    }

    /// Validate a zero-based column index against a version
    pub fn check_column(col: u32, version: SpreadsheetVersion) -> Result<u16> {
        if version.contains_column(col) {
            Ok(col as u16)
        } else {
            Err(Error::ColumnOutOfBounds(
                col,
                version.last_column_index() as u32,
            ))
        }
    }

    /// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
    pub fn column_to_letters(col: u16) -> String {
        let mut letters = Vec::with_capacity(3);
        let mut n = col as u32 + 1;
        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }
        letters.iter().rev().map(|&b| b as char).collect()
    }

    /// Convert column letters to a zero-based index, without bounds checking
    /// beyond the 16-bit range.
    pub fn letters_to_index(letters: &str) -> Result<u32> {
        if letters.is_empty() || letters.len() > 4 {
            return Err(Error::InvalidAddress(format!("bad column letters '{}'", letters)));
        }
        let mut col: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidAddress(format!("invalid column letter '{}'", c)));
            }
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        }
        Ok(col - 1)
    }

    /// Convert column letters to an index inside the largest grid
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        Self::check_column(
            Self::letters_to_index(letters)?,
            SpreadsheetVersion::Excel2007,
        )
    }

    /// Format as A1-style string, keeping `$` markers
    pub fn to_a1_string(&self) -> String {
        format!(
            "{}{}{}{}",
            if self.col_absolute { "$" } else { "" },
            Self::column_to_letters(self.col),
            if self.row_absolute { "$" } else { "" },
            self.row + 1
        )
    }

    /// Format as A1-style string without `$` markers
    pub fn to_relative_string(&self) -> String {
        format!("{}{}", Self::column_to_letters(self.col), self.row + 1)
    }

    /// Create a range from this address to another
    pub fn to(&self, other: CellAddress) -> CellRange {
        CellRange::new(*self, other)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A rectangular range of cells (e.g., "A1:B10")
///
/// Construction always normalises the corners: if the end precedes the start
/// on either axis the two are swapped, so `B2:A1` names the same cells as
/// `A1:B2`. This is deliberate and is relied on by the formula parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRange {
    /// Top-left corner
    pub start: CellAddress,
    /// Bottom-right corner
    pub end: CellAddress,
}

impl CellRange {
    /// Create a normalised range from two corners
    pub fn new(start: CellAddress, end: CellAddress) -> Self {
        let (top, top_abs, bottom, bottom_abs) = if start.row <= end.row {
            (start.row, start.row_absolute, end.row, end.row_absolute)
        } else {
            (end.row, end.row_absolute, start.row, start.row_absolute)
        };
        let (left, left_abs, right, right_abs) = if start.col <= end.col {
            (start.col, start.col_absolute, end.col, end.col_absolute)
        } else {
            (end.col, end.col_absolute, start.col, start.col_absolute)
        };
        Self {
            start: CellAddress::with_absolute(top, left, top_abs, left_abs),
            end: CellAddress::with_absolute(bottom, right, bottom_abs, right_abs),
        }
    }

    /// Create a range from row/column indices
    pub fn from_indices(start_row: u32, start_col: u16, end_row: u32, end_col: u16) -> Self {
        Self::new(
            CellAddress::new(start_row, start_col),
            CellAddress::new(end_row, end_col),
        )
    }

    /// Create a single-cell range
    pub fn single(addr: CellAddress) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Parse a range from A1:B10 notation
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().split_once(':') {
            Some((a, b)) => Ok(Self::new(CellAddress::parse(a)?, CellAddress::parse(b)?)),
            None => Ok(Self::single(CellAddress::parse(s)?)),
        }
    }

    /// Check if a cell is within this range
    pub fn contains(&self, row: u32, col: u16) -> bool {
        (self.start.row..=self.end.row).contains(&row)
            && (self.start.col..=self.end.col).contains(&col)
    }

    /// Whether the range is a single cell
    pub fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    /// Number of rows in the range
    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Number of columns in the range
    pub fn col_count(&self) -> u16 {
        self.end.col - self.start.col + 1
    }

    /// Total number of cells in the range
    pub fn cell_count(&self) -> u64 {
        self.row_count() as u64 * self.col_count() as u64
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && self.end.row >= other.start.row
            && self.start.col <= other.end.col
            && self.end.col >= other.start.col
    }

    /// The overlapping part of two ranges, if any
    pub fn intersect(&self, other: &CellRange) -> Option<CellRange> {
        self.overlaps(other).then(|| {
            CellRange::from_indices(
                self.start.row.max(other.start.row),
                self.start.col.max(other.start.col),
                self.end.row.min(other.end.row),
                self.end.col.min(other.end.col),
            )
        })
    }

    /// Iterate over all cell addresses in the range, row by row
    pub fn cells(&self) -> CellRangeIterator {
        CellRangeIterator {
            range: *self,
            row: self.start.row,
            col: self.start.col,
            remaining: self.cell_count() as usize,
        }
    }

    /// Format as A1:B10 string
    pub fn to_a1_string(&self) -> String {
        if self.start == self.end {
            self.start.to_a1_string()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Iterator over the cells of a range, row-major
pub struct CellRangeIterator {
    range: CellRange,
    row: u32,
    col: u16,
    remaining: usize,
}

impl Iterator for CellRangeIterator {
    type Item = CellAddress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let addr = CellAddress::new(self.row, self.col);
        self.remaining -= 1;
        if self.col == self.range.end.col {
            self.col = self.range.start.col;
            self.row += 1;
        } else {
            self.col += 1;
        }
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for CellRangeIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(CellAddress::column_to_letters(0), "A");
        assert_eq!(CellAddress::column_to_letters(25), "Z");
        assert_eq!(CellAddress::column_to_letters(26), "AA");
        assert_eq!(CellAddress::column_to_letters(701), "ZZ");
        assert_eq!(CellAddress::column_to_letters(702), "AAA");
        assert_eq!(CellAddress::column_to_letters(16383), "XFD");

        assert_eq!(CellAddress::letters_to_column("a").unwrap(), 0);
        assert_eq!(CellAddress::letters_to_column("AB").unwrap(), 27);
        assert_eq!(CellAddress::letters_to_column("XFD").unwrap(), 16383);
        assert!(CellAddress::letters_to_column("XFE").is_err());
    }

    #[test]
    fn test_parse_absolute_markers() {
        let addr = CellAddress::parse("$A1").unwrap();
        assert!(addr.col_absolute && !addr.row_absolute);
        let addr = CellAddress::parse("A$1").unwrap();
        assert!(!addr.col_absolute && addr.row_absolute);
        assert_eq!(addr.to_string(), "A$1");
        assert_eq!(addr.to_relative_string(), "A1");
    }

    #[test]
    fn test_parse_errors() {
        assert!(CellAddress::parse("").is_err());
        assert!(CellAddress::parse("A").is_err());
        assert!(CellAddress::parse("1").is_err());
        assert!(CellAddress::parse("A0").is_err());
        assert!(CellAddress::parse("A1048577").is_err());
        assert!(CellAddress::parse("A1B").is_err());
    }

    #[test]
    fn test_parse_respects_version() {
        let v97 = SpreadsheetVersion::Excel97;
        assert!(CellAddress::parse_for("IV65536", v97).is_ok());
        assert_eq!(
            CellAddress::parse_for("A65537", v97),
            Err(Error::RowOutOfBounds(65536, 65535))
        );
        assert_eq!(
            CellAddress::parse_for("IW1", v97),
            Err(Error::ColumnOutOfBounds(256, 255))
        );
    }

    #[test]
    fn test_range_swaps_corners() {
        let range = CellRange::parse("B3:A1").unwrap();
        assert_eq!(range, CellRange::parse("A1:B3").unwrap());
        assert_eq!(range.row_count(), 3);
        assert_eq!(range.col_count(), 2);
    }

    #[test]
    fn test_range_contains_and_intersect() {
        let range = CellRange::parse("B2:D4").unwrap();
        assert!(range.contains(1, 1));
        assert!(range.contains(3, 3));
        assert!(!range.contains(0, 0));
        let other = CellRange::parse("C3:F9").unwrap();
        assert_eq!(range.intersect(&other), Some(CellRange::parse("C3:D4").unwrap()));
        assert_eq!(range.intersect(&CellRange::parse("Z1").unwrap()), None);
    }

    #[test]
    fn test_range_iterator() {
        let cells: Vec<_> = CellRange::parse("A1:B2").unwrap().cells().collect();
        assert_eq!(
            cells,
            vec![
                CellAddress::new(0, 0),
                CellAddress::new(0, 1),
                CellAddress::new(1, 0),
                CellAddress::new(1, 1),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_a1_round_trip(row in 0u32..1_048_576, col in 0u16..16_384) {
            let addr = CellAddress::new(row, col);
            prop_assert_eq!(CellAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }
}
