//! CSV input of return tables and CSV output of level frames.
//!
//! Input layout: a header row `date,<asset>,<asset>,...`, then one row per date with
//! percentage returns. Dates are `YYYY-MM-DD`; an empty cell or `NaN` is a missing
//! observation.

use crate::aggregator::{LevelFrame, PortfolioLevels};
use crate::error::{BacktestError, Result};
use crate::types::{Matrix, ReturnMatrix};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Load a return table from a CSV file.
pub fn load_returns_csv(path: impl AsRef<Path>) -> Result<ReturnMatrix> {
    let path = path.as_ref();
    info!("Loading returns from: {}", path.display());
    read_returns(fs::File::open(path)?)
}

/// Parse a return table from any CSV source.
pub fn read_returns<R: Read>(source: R) -> Result<ReturnMatrix> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(source);

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(BacktestError::DataError(
            "expected a date column followed by at least one asset column".to_string(),
        ));
    }
    let assets: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut rows: Vec<(NaiveDate, Vec<f32>)> = Vec::new();
    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(BacktestError::ShapeMismatch(format!(
                "row {} has {} fields, header has {}",
                row_num + 1,
                record.len(),
                headers.len()
            )));
        }
        let date = NaiveDate::parse_from_str(record[0].trim(), DATE_FORMAT)?;
        let values = record
            .iter()
            .skip(1)
            .enumerate()
            .map(|(col, cell)| parse_cell(cell).ok_or_else(|| {
                BacktestError::DataError(format!(
                    "row {}, column '{}': cannot parse '{}'",
                    row_num + 1,
                    assets[col],
                    cell
                ))
            }))
            .collect::<Result<Vec<f32>>>()?;
        rows.push((date, values));
    }

    if rows.is_empty() {
        return Err(BacktestError::DataError("no rows in return table".to_string()));
    }

    rows.sort_by_key(|(date, _)| *date);
    let original_len = rows.len();
    rows.dedup_by_key(|(date, _)| *date);
    if rows.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - rows.len());
    }

    let dates: Vec<NaiveDate> = rows.iter().map(|(d, _)| *d).collect();
    let values: Vec<Vec<f32>> = rows.into_iter().map(|(_, v)| v).collect();
    let matrix = Matrix::from_rows(&values)?;
    info!(
        "Loaded {} rows x {} assets from {} to {}",
        matrix.rows(),
        matrix.cols(),
        dates[0],
        dates[dates.len() - 1]
    );
    ReturnMatrix::new(dates, assets, matrix)
}

fn parse_cell(cell: &str) -> Option<f32> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        Some(f32::NAN)
    } else {
        cell.parse::<f32>().ok()
    }
}

fn format_cell(value: f32) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write a level frame as CSV with joined column labels.
pub fn write_level<W: Write>(frame: &LevelFrame, sink: W) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(sink);
    let mut header = vec!["date".to_string()];
    header.extend(frame.column_names());
    writer.write_record(&header)?;

    for (row, date) in frame.dates().iter().enumerate() {
        let mut record = vec![date.format(DATE_FORMAT).to_string()];
        record.extend((0..frame.cols()).map(|c| format_cell(frame.values().get(row, c))));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a level frame to a CSV file.
pub fn write_level_csv(frame: &LevelFrame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    debug!("Writing level {} to {}", frame.name(), path.display());
    write_level(frame, fs::File::create(path)?)
}

/// Write every level to `<dir>/<level>.csv`, creating `dir` if needed.
pub fn write_levels(levels: &PortfolioLevels, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(levels.len());
    for level in levels.iter() {
        let path = dir.join(format!("{}.csv", level.name()));
        write_level_csv(level, &path)?;
        written.push(path);
    }
    info!("Wrote {} level files to {}", written.len(), dir.display());
    Ok(written)
}
