//! Cell references, ranges and defined-name formulas
//!
//! All positions are 0-based internally. A1 notation is only used at the
//! boundary when reading from or writing to the workbook XML.

use regex::Regex;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

/// Highest column index allowed by the XLSX format (XFD, 0-based)
pub const MAX_COL: u32 = 16_383;
/// Highest row index allowed by the XLSX format (0-based)
pub const MAX_ROW: u32 = 1_048_575;

static CELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]{1,7})$").expect("cell reference pattern is valid")
});
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([0-9]{1,7})$").expect("row reference pattern is valid"));
static COL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})$").expect("column reference pattern is valid"));

/// A single cell position (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style reference such as `B7` or `$B$7`
    pub fn parse(text: &str) -> Option<Self> {
        let caps = CELL_RE.captures(text.trim())?;
        Some(Self::new(row_index(&caps[2])?, column_index(&caps[1])?))
    }
}

/// 0-based index of a 1-based row number such as `7`
fn row_index(digits: &str) -> Option<u32> {
    let row: u32 = digits.parse().ok()?;
    (row >= 1 && row - 1 <= MAX_ROW).then(|| row - 1)
}

/// 0-based index of column letters such as `AB`
fn column_index(letters: &str) -> Option<u32> {
    let mut col = 0u32;
    for ch in letters.chars() {
        col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    (col >= 1 && col - 1 <= MAX_COL).then(|| col - 1)
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letter(self.col), self.row + 1)
    }
}

/// Convert column index (0-based) to letters (A, B, ..., Z, AA, AB, ...)
pub fn column_letter(mut index: u32) -> String {
    let mut result = String::new();
    index += 1;

    while index > 0 {
        index -= 1;
        let remainder = (index % 26) as u8;
        result.insert(0, (b'A' + remainder) as char);
        index /= 26;
    }

    result
}

/// A rectangular block of cells; `start` is always the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn single(cell: CellRef) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    /// Parse `A1`, `A1:C4`, whole rows `5:9` or whole columns `C:E`
    /// (with or without `$` anchors)
    pub fn parse(text: &str) -> Option<Self> {
        let Some((a, b)) = text.split_once(':') else {
            return CellRef::parse(text).map(Self::single);
        };

        if let (Some(a), Some(b)) = (CellRef::parse(a), CellRef::parse(b)) {
            return Some(Self::new(a, b));
        }
        if let (Some(a), Some(b)) = (ROW_RE.captures(a.trim()), ROW_RE.captures(b.trim())) {
            let (top, bottom) = (row_index(&a[1])?, row_index(&b[1])?);
            return Some(Self::new(CellRef::new(top, 0), CellRef::new(bottom, MAX_COL)));
        }
        let (a, b) = (COL_RE.captures(a.trim())?, COL_RE.captures(b.trim())?);
        let (left, right) = (column_index(&a[1])?, column_index(&b[1])?);
        Some(Self::new(CellRef::new(0, left), CellRef::new(MAX_ROW, right)))
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    /// Covers complete rows (`5:9`)
    pub fn spans_all_columns(&self) -> bool {
        self.start.col == 0 && self.end.col == MAX_COL
    }

    /// Covers complete columns (`C:E`)
    pub fn spans_all_rows(&self) -> bool {
        self.start.row == 0 && self.end.row == MAX_ROW
    }

    /// Whole rows or whole columns; too large to fill cell by cell
    pub fn is_unbounded(&self) -> bool {
        self.spans_all_columns() || self.spans_all_rows()
    }

    /// Inclusive row span covered by the range
    pub fn rows(&self) -> RangeInclusive<u32> {
        self.start.row..=self.end.row
    }

    /// Every cell in the range, row by row
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        self.rows()
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellRef::new(row, col)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else if self.spans_all_columns() {
            write!(f, "{}:{}", self.start.row + 1, self.end.row + 1)
        } else if self.spans_all_rows() {
            write!(f, "{}:{}", column_letter(self.start.col), column_letter(self.end.col))
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// A range qualified by the sheet that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetArea {
    pub sheet: String,
    pub range: CellRange,
}

impl fmt::Display for SheetArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.range)
    }
}

/// Quote a sheet name for use in a formula when it needs it
pub fn quote_sheet_name(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Parse a defined-name formula into sheet-qualified areas.
///
/// Returns `None` unless every comma-separated area is a plain
/// `Sheet!A1` / `Sheet!A1:B2` / `Sheet!5:9` / `Sheet!C:E` reference. Anything else (numbers, string
/// literals, `#REF!`, expressions) is not a positional destination.
pub fn parse_areas(formula: &str) -> Option<Vec<SheetArea>> {
    let formula = formula.trim();
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    if formula.is_empty() {
        return None;
    }

    split_top_level(formula)
        .into_iter()
        .map(parse_area)
        .collect()
}

fn split_top_level(formula: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;

    for (idx, ch) in formula.char_indices() {
        match ch {
            // A doubled quote inside a quoted name toggles twice and stays quoted
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                parts.push(formula[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(formula[start..].trim());
    parts
}

fn parse_area(text: &str) -> Option<SheetArea> {
    let (sheet, reference) = if let Some(rest) = text.strip_prefix('\'') {
        let mut sheet = String::new();
        let mut chars = rest.char_indices().peekable();
        let mut end = None;
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    sheet.push('\'');
                    chars.next();
                } else {
                    end = Some(idx);
                    break;
                }
            } else {
                sheet.push(ch);
            }
        }
        let reference = rest[end? + 1..].strip_prefix('!')?;
        (sheet, reference)
    } else {
        let (sheet, reference) = text.rsplit_once('!')?;
        (sheet.to_string(), reference)
    };

    if sheet.is_empty() {
        return None;
    }

    Some(SheetArea {
        sheet,
        range: CellRange::parse(reference)?,
    })
}
