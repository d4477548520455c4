use once_cell::sync::Lazy;
use polars::prelude::*;
use rayon::prelude::*;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::domain::{DVError, LoadResult};
use crate::engine::{self, Cell, Record, Table};

// Anything outside of (-2^53, 2^53) can not be represented exactly and stays text.
const MAX_EXACT_NUMBER: f64 = 9_007_199_254_740_992.0;

static NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-?([0-9]+\.?|\.[0-9]+|[0-9]+\.[0-9]+)([eE][-+]?[0-9]+)?\s*$")
        .expect("number pattern is valid")
});

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
}

/// Turns the raw text of a field into a cell. Blank fields are missing, numeric looking
/// text becomes a number, everything else stays text.
pub fn coerce_field(raw: Option<&str>) -> Cell {
    match raw {
        None | Some("") => Cell::Missing,
        Some(s) if NUMBER_PATTERN.is_match(s) => match s.trim().parse::<f64>() {
            Ok(v) if v > -MAX_EXACT_NUMBER && v < MAX_EXACT_NUMBER => Cell::Number(v),
            _ => Cell::Text(s.to_string()),
        },
        Some(s) => Cell::Text(s.to_string()),
    }
}

pub fn get_file_info(path: PathBuf) -> Result<FileInfo, DVError> {
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DVError::FileNotFound,
        ErrorKind::PermissionDenied => DVError::PermissionDenied,
        _ => DVError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(DVError::LoadingFailed("Not a file!".into()));
    }

    let is_csv = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        return Err(DVError::UnknownFileType);
    }

    Ok(FileInfo {
        path,
        file_size: metadata.len(),
    })
}

fn read_frame(path: &Path) -> Result<DataFrame, PolarsError> {
    // No schema inference: every column comes back as String and is coerced per cell.
    // Empty fields stay "" so that only fields absent from a line are null.
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_missing_is_null(false)
        .with_truncate_ragged_lines(true)
        .finish()?
        .collect()
}

// polars wraps the error of an empty input in one context per stage.
fn is_no_data(err: &PolarsError) -> bool {
    match err {
        PolarsError::NoData(_) => true,
        PolarsError::Context { error, .. } => is_no_data(error),
        _ => false,
    }
}

/// A converted column plus which of its fields were absent from their line.
struct LoadedColumn {
    cells: Vec<Cell>,
    absent: Vec<bool>,
}

fn load_column(df: &DataFrame, col_name: &str) -> Result<LoadedColumn, PolarsError> {
    let col = df.column(col_name)?.cast(&DataType::String)?;
    let series = col.str()?;
    let absent = series.into_iter().map(|raw| raw.is_none()).collect();
    let cells = series.into_iter().map(coerce_field).collect();
    Ok(LoadedColumn { cells, absent })
}

// A blank line has at most one empty field. A line of delimiters has several and is kept.
fn is_blank_line(columns: &[LoadedColumn], ridx: usize) -> bool {
    match columns.split_first() {
        Some((first, rest)) => {
            first.cells[ridx].is_missing() && rest.iter().all(|c| c.absent[ridx])
        }
        None => true,
    }
}

/// Reads a CSV file into parsed records and the ordered list of field names.
pub fn load_records(path: &Path) -> Result<(Vec<Record>, Vec<String>), DVError> {
    let file_info = get_file_info(path.to_path_buf())?;
    if file_info.file_size == 0 {
        debug!("{:?} is empty", file_info.path);
        return Ok((Vec::new(), Vec::new()));
    }

    let df = match read_frame(&file_info.path) {
        Ok(df) => df,
        Err(e) if is_no_data(&e) => {
            debug!("No data in {:?}: {e}", file_info.path);
            return Ok((Vec::new(), Vec::new()));
        }
        Err(e) => return Err(e.into()),
    };

    let fields: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    // Each column is converted in its own task.
    let columns: Result<Vec<LoadedColumn>, PolarsError> = fields
        .par_iter()
        .map(|name| load_column(&df, name))
        .collect();
    let mut columns = columns?;

    let nrows = df.height();
    let mut records = Vec::with_capacity(nrows);
    let mut skipped = 0;
    for ridx in 0..nrows {
        if is_blank_line(&columns, ridx) {
            skipped += 1;
            continue;
        }
        let record: Record = fields
            .iter()
            .zip(columns.iter_mut())
            .map(|(name, column)| {
                let cell = std::mem::replace(&mut column.cells[ridx], Cell::Missing);
                (name.clone(), cell)
            })
            .collect();
        records.push(record);
    }
    trace!("Skipped {skipped} blank lines");

    Ok((records, fields))
}

/// Loads a CSV file into a table.
pub fn load_table(path: &Path) -> Result<Table, DVError> {
    let start_time = Instant::now();
    let (records, fields) = load_records(path)?;
    let table = engine::ingest(records, fields);
    info!(
        "Loaded {:?} ({} rows, {} columns) in {}ms",
        path,
        table.nrows(),
        table.ncols(),
        start_time.elapsed().as_millis()
    );
    Ok(table)
}

/// Runs loads in the background. Only a load newer than the last applied one is handed out,
/// so a slow old load never replaces a fresher table.
pub struct Loader {
    next_ticket: u64,
    applied_ticket: u64,
    sender: Sender<LoadResult>,
    receiver: Receiver<LoadResult>,
}

impl Loader {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Loader {
            next_ticket: 0,
            applied_ticket: 0,
            sender,
            receiver,
        }
    }

    pub fn request(&mut self, path: PathBuf) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let sender = self.sender.clone();
        debug!("Load #{ticket} requested for {:?}", path);

        rayon::spawn(move || {
            let table = load_table(&path);
            if sender.send(LoadResult { ticket, path, table }).is_err() {
                trace!("Load #{ticket} finished after the receiver was dropped");
            }
        });
        ticket
    }

    pub fn is_loading(&self) -> bool {
        self.next_ticket > self.applied_ticket
    }

    /// Returns the newest finished load, if any.
    pub fn poll(&mut self) -> Option<LoadResult> {
        let mut newest = None;
        while let Ok(result) = self.receiver.try_recv() {
            if self.accept(&result) {
                newest = Some(result);
            }
        }
        newest
    }

    fn accept(&mut self, result: &LoadResult) -> bool {
        if result.ticket > self.applied_ticket {
            self.applied_ticket = result.ticket;
            true
        } else {
            info!(
                "Discarding load #{} of {:?}, #{} is newer",
                result.ticket, result.path, self.applied_ticket
            );
            false
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
