use std::fmt;
use std::io::Error;
use std::path::PathBuf;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;

use crate::engine::{NumericRule, Table};

pub const PAGE_SIZES: [usize; 3] = [5, 10, 25];

pub const HELP_TEXT: &str = "\
dv - CSV data visualizer

  o          Open a CSV file
  :          Go to column by name
  ← / h      Previous column
  → / l      Next column
  c          Cycle chart type
  b / H / p  Bar / Histogram / Pie chart
  ↓ / j      Next page
  ↑ / k      Previous page
  g / G      First / last page
  + / -      Larger / smaller pages
  y          Copy current page as CSV
  ?          This help
  Esc        Close popup / cancel input
  q          Quit";

#[derive(Debug)]
pub enum DVError {
    IoError(Error),
    PolarsError(PolarsError),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
    UnknownColumn(String),
    EmptyUpload,
}

impl fmt::Display for DVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DVError::IoError(e) => write!(f, "I/O error: {e}"),
            DVError::PolarsError(e) => write!(f, "Parsing failed: {e}"),
            DVError::LoadingFailed(reason) => write!(f, "Loading failed: {reason}"),
            DVError::FileNotFound => write!(f, "File not found"),
            DVError::PermissionDenied => write!(f, "Permission denied"),
            DVError::UnknownFileType => write!(f, "Unknown file type, expected a .csv file"),
            DVError::UnknownColumn(name) => write!(f, "Unknown column \"{name}\""),
            DVError::EmptyUpload => write!(f, "No file selected"),
        }
    }
}

impl std::error::Error for DVError {}

impl From<Error> for DVError {
    fn from(err: Error) -> Self {
        DVError::IoError(err)
    }
}

impl From<PolarsError> for DVError {
    fn from(err: PolarsError) -> Self {
        DVError::PolarsError(err)
    }
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct DVConfig {
    pub event_poll_time: u64,
    pub page_size: usize,
    pub max_column_width: usize,
    pub numeric_rule: NumericRule,
}

impl Default for DVConfig {
    fn default() -> Self {
        DVConfig {
            event_poll_time: 100,
            page_size: PAGE_SIZES[0],
            max_column_width: 24,
            numeric_rule: NumericRule::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartType {
    #[default]
    Bar,
    Histogram,
    Pie,
}

impl ChartType {
    pub fn next(self) -> Self {
        match self {
            ChartType::Bar => ChartType::Histogram,
            ChartType::Histogram => ChartType::Pie,
            ChartType::Pie => ChartType::Bar,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ChartType::Bar => "Bar",
            ChartType::Histogram => "Histogram",
            ChartType::Pie => "Pie",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    OpenFile,
    GotoColumn,
}

/// Result of a finished background load, tagged with the request ticket.
#[derive(Debug)]
pub struct LoadResult {
    pub ticket: u64,
    pub path: PathBuf,
    pub table: Result<Table, DVError>,
}

#[derive(Debug)]
pub enum Message {
    Quit,
    Help,
    Exit,
    Enter,
    NextColumn,
    PrevColumn,
    NextChartType,
    SetChartType(ChartType),
    NextPage,
    PrevPage,
    FirstPage,
    LastPage,
    IncreasePageSize,
    DecreasePageSize,
    OpenFile,
    GotoColumn,
    CopyPage,
    Loaded(LoadResult),
    Resize(usize, usize),
    RawKey(KeyEvent),
}
