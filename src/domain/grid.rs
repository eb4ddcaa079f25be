//! In-memory view of one worksheet and the row-major walk that collapses merged
//! ranges into logical cells.

use crate::domain::classifier::FillColor;
use std::collections::HashMap;

/// One-based grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPosition {
    pub row: u32,
    pub column: u32,
}

impl CellPosition {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Parses an A1-style reference such as `C3` or `$AU$56`.
    pub fn from_a1(reference: &str) -> Option<Self> {
        let reference = reference.trim().replace('$', "");
        let split = reference.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = reference.split_at(split);
        let column = column_index(letters)?;
        let row = digits.parse::<u32>().ok().filter(|row| *row > 0)?;
        Some(Self { row, column })
    }
}

/// Converts column letters (`A`, `C`, `AU`) to a one-based index.
pub fn column_index(letters: &str) -> Option<u32> {
    let letters = letters.trim();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        c.is_ascii_alphabetic()
            .then(|| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    pub first: CellPosition,
    pub last: CellPosition,
}

impl MergeRange {
    pub fn from_a1(reference: &str) -> Option<Self> {
        let (start, end) = reference.split_once(':')?;
        let a = CellPosition::from_a1(start)?;
        let b = CellPosition::from_a1(end)?;
        Some(Self {
            first: CellPosition::new(a.row.min(b.row), a.column.min(b.column)),
            last: CellPosition::new(a.row.max(b.row), a.column.max(b.column)),
        })
    }

    pub fn contains(&self, position: CellPosition) -> bool {
        (self.first.row..=self.last.row).contains(&position.row)
            && (self.first.column..=self.last.column).contains(&position.column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridCell {
    pub value: Option<String>,
    pub fill: FillColor,
}

#[derive(Debug, Clone, Default)]
pub struct Grid {
    name: String,
    cells: HashMap<CellPosition, GridCell>,
    merges: Vec<MergeRange>,
    merge_index: HashMap<CellPosition, usize>,
    max_row: u32,
}

impl Grid {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_cell(&mut self, position: CellPosition, cell: GridCell) {
        self.max_row = self.max_row.max(position.row);
        self.cells.insert(position, cell);
    }

    pub fn add_merge(&mut self, range: MergeRange) {
        let index = self.merges.len();
        for row in range.first.row..=range.last.row {
            for column in range.first.column..=range.last.column {
                self.merge_index.entry(CellPosition::new(row, column)).or_insert(index);
            }
        }
        self.max_row = self.max_row.max(range.last.row);
        self.merges.push(range);
    }

    pub fn cell(&self, position: CellPosition) -> Option<&GridCell> {
        self.cells.get(&position)
    }

    pub fn merge_range_at(&self, position: CellPosition) -> Option<&MergeRange> {
        self.merge_index
            .get(&position)
            .and_then(|index| self.merges.get(*index))
    }

    pub fn merges(&self) -> &[MergeRange] {
        &self.merges
    }

    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    pub fn logical_cells(&self, region: &ScanRegion) -> LogicalCells<'_> {
        LogicalCells::new(self, region)
    }
}

/// Rectangular part of a sheet that holds the schedule. Rows are weeks; columns are
/// (day, slot) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    pub first_row: u32,
    pub last_row: Option<u32>,
    pub first_column: u32,
    pub last_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalCell {
    pub value: Option<String>,
    pub fill: FillColor,
    pub first_row: u32,
    pub first_column: u32,
    pub last_row: u32,
    pub last_column: u32,
}

impl LogicalCell {
    pub fn first(&self) -> CellPosition {
        CellPosition::new(self.first_row, self.first_column)
    }

    pub fn last(&self) -> CellPosition {
        CellPosition::new(self.last_row, self.last_column)
    }
}

/// Row-major walk over a [`ScanRegion`]. Positions covered by a merge range but not at
/// its top-left corner are skipped; the top-left logical cell spans the whole range.
pub struct LogicalCells<'a> {
    grid: &'a Grid,
    first_column: u32,
    last_column: u32,
    last_row: u32,
    cursor: Option<CellPosition>,
}

impl<'a> LogicalCells<'a> {
    fn new(grid: &'a Grid, region: &ScanRegion) -> Self {
        let last_row = region.last_row.unwrap_or_else(|| grid.max_row());
        let cursor = (region.first_row <= last_row && region.first_column <= region.last_column)
            .then(|| CellPosition::new(region.first_row, region.first_column));
        Self {
            grid,
            first_column: region.first_column,
            last_column: region.last_column,
            last_row,
            cursor,
        }
    }

    fn advance(&mut self, position: CellPosition) {
        self.cursor = if position.column < self.last_column {
            Some(CellPosition::new(position.row, position.column + 1))
        } else if position.row < self.last_row {
            Some(CellPosition::new(position.row + 1, self.first_column))
        } else {
            None
        };
    }
}

impl Iterator for LogicalCells<'_> {
    type Item = LogicalCell;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let position = self.cursor?;
            self.advance(position);

            let merge = self.grid.merge_range_at(position);
            if merge.is_some_and(|range| range.first != position) {
                continue;
            }

            let last = merge.map_or(position, |range| range.last);
            let (value, fill) = match self.grid.cell(position) {
                Some(cell) => (cell.value.clone(), cell.fill.clone()),
                None => (None, FillColor::default()),
            };
            return Some(LogicalCell {
                value,
                fill,
                first_row: position.row,
                first_column: position.column,
                last_row: last.row,
                last_column: last.column,
            });
        }
    }
}
