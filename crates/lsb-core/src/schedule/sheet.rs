//! In-memory worksheet model with merged-cell resolution.
//!
//! Coordinates are 1-based like the spreadsheet UI (`D3` is row 3, column 4)
//! so layout windows read the same as the template they describe.

use std::{collections::HashMap, fmt, path::Path};

use calamine::{open_workbook, Data, Reader, Xlsx};

use super::ParseError;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse A1 notation (`"D3"`, `"AA12"`). Case-insensitive.
    pub fn parse_a1(s: &str) -> Option<Self> {
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            let v = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
            col = col.checked_mul(26)?.checked_add(v)?;
        }
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row, col })
    }
}

pub fn column_name(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    out.iter().rev().collect()
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row)
    }
}

/// Inclusive rectangle of merged cells; `first` is the anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergedRegion {
    pub first: CellRef,
    pub last: CellRef,
}

impl MergedRegion {
    pub fn contains(&self, cell: CellRef) -> bool {
        (self.first.row..=self.last.row).contains(&cell.row)
            && (self.first.col..=self.last.col).contains(&cell.col)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    Value(String),
    /// Covered by a merged region; holds no value of its own.
    Merged,
}

#[derive(Clone, Debug)]
pub struct Sheet {
    name: String,
    cells: HashMap<CellRef, Cell>,
    regions: Vec<MergedRegion>,
    /// Every covered coordinate → its region's anchor.
    anchors: HashMap<CellRef, CellRef>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: HashMap::new(),
            regions: Vec::new(),
            anchors: HashMap::new(),
        }
    }

    /// Assemble a sheet from raw cells and merged regions. Cells covered by a
    /// region (anchor excluded) become [`Cell::Merged`].
    pub fn from_parts(
        name: impl Into<String>,
        cells: HashMap<CellRef, Cell>,
        regions: Vec<MergedRegion>,
    ) -> Self {
        let mut sheet = Self {
            name: name.into(),
            cells,
            regions: Vec::new(),
            anchors: HashMap::new(),
        };
        for region in regions {
            sheet.add_region(region);
        }
        sheet
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, cell: CellRef, value: impl Into<String>) -> &mut Self {
        self.cells.insert(cell, Cell::Value(value.into()));
        self
    }

    pub fn merge(&mut self, first: CellRef, last: CellRef) -> &mut Self {
        self.add_region(MergedRegion { first, last });
        self
    }

    fn add_region(&mut self, region: MergedRegion) {
        for row in region.first.row..=region.last.row {
            for col in region.first.col..=region.last.col {
                let cell = CellRef::new(row, col);
                self.anchors.insert(cell, region.first);
                if cell != region.first {
                    self.cells.insert(cell, Cell::Merged);
                }
            }
        }
        self.regions.push(region);
    }

    /// Effective value of a cell: its own value, or the anchor's value when the
    /// cell is covered by a merged region. Blank strings count as empty.
    pub fn value(&self, cell: CellRef) -> std::result::Result<Option<&str>, ParseError> {
        let stored = match self.cells.get(&cell) {
            None => return Ok(None),
            Some(Cell::Value(v)) => v,
            Some(Cell::Merged) => {
                let anchor = self
                    .anchors
                    .get(&cell)
                    .ok_or(ParseError::OrphanMergedCell(cell))?;
                match self.cells.get(anchor) {
                    Some(Cell::Value(v)) => v,
                    _ => return Ok(None),
                }
            }
        };

        if stored.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(stored.as_str()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    /// Read every sheet of an `.xlsx` file together with its merged regions.
    pub fn open(path: &Path) -> Result<Self> {
        let mut xlsx: Xlsx<_> = open_workbook(path)?;
        xlsx.load_merged_regions()?;

        let mut sheets = Vec::new();
        for name in xlsx.sheet_names().to_vec() {
            let range = xlsx.worksheet_range(&name)?;
            let (row0, col0) = range.start().unwrap_or((0, 0));

            let mut cells = HashMap::new();
            for (r, c, data) in range.used_cells() {
                if let Some(text) = data_to_string(data) {
                    // calamine is 0-based and relative to the used range
                    let cell = CellRef::new(row0 + r as u32 + 1, col0 + c as u32 + 1);
                    cells.insert(cell, Cell::Value(text));
                }
            }

            let regions = xlsx
                .merged_regions_by_sheet(&name)
                .into_iter()
                .map(|(_, _, dims)| MergedRegion {
                    first: CellRef::new(dims.start.0 + 1, dims.start.1 + 1),
                    last: CellRef::new(dims.end.0 + 1, dims.end.1 + 1),
                })
                .collect();

            sheets.push(Sheet::from_parts(name, cells, regions));
        }

        Ok(Self { sheets })
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    /// Sheet whose trimmed name equals `tag`.
    pub fn find_tagged(&self, tag: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.trim() == tag)
    }
}

fn data_to_string(data: &Data) -> Option<String> {
    match data {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        other => Some(other.to_string()),
    }
}
