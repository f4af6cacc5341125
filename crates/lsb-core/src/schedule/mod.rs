//! Spreadsheet → lesson records.
//!
//! The institution publishes one `.xlsx` per school day. Each grade lives on
//! its own sheet and is laid out either as the regular homeroom grid or as the
//! university-day grid, depending on the weekday (see [`layout`]).

pub mod ingest;
pub mod layout;
pub mod lesson;
pub mod lookup;
pub mod parser;
pub mod sheet;

pub use layout::{Grade, LayoutKind, LayoutTable};
pub use lesson::{Lesson, ScheduleSnapshot};
pub use sheet::{CellRef, Sheet, Workbook};

/// Structural mismatch between a spreadsheet and the layout expected for it.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("file name {0:?} does not match dd.mm.xlsx")]
    BadFileName(String),

    #[error("merged cell {0} is not covered by any merged region")]
    OrphanMergedCell(CellRef),

    #[error("no sheet for grade {grade}: no sheet tagged {grade} and none at index {index}")]
    MissingSheet { grade: Grade, index: usize },

    #[error("no {kind:?} layout configured for grade {grade}")]
    MissingLayout { grade: Grade, kind: LayoutKind },

    #[error("cell {cell}: unknown sub-group label {value:?}")]
    BadGroupLabel { cell: CellRef, value: String },

    #[error("cell {cell}: expected a group number, got {value:?}")]
    BadGroupNumber { cell: CellRef, value: String },

    #[error("cell {cell}: column has lessons but no header")]
    EmptyHeader { cell: CellRef },

    #[error("cell {cell}: no time label for period {period}")]
    MissingTimeLabel { cell: CellRef, period: usize },

    #[error("column {column}: no period numbers found")]
    NoPeriods { column: String },

    #[error("invalid layout table: {0}")]
    InvalidLayout(String),
}
