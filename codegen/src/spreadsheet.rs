//! Spreadsheet → CSV conversion.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unreadable workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("workbook has no worksheets")]
    NoWorksheet,

    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv buffer flush failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Path of the CSV sibling for a spreadsheet: `reports/q1.xlsx` → `reports/q1.csv`.
pub fn csv_path_for(name: &str) -> String {
    Path::new(name)
        .with_extension("csv")
        .to_string_lossy()
        .into_owned()
}

/// Render the first worksheet of an `.xlsx`/`.xls` workbook as CSV.
///
/// Every row is written, including the header row. Integral floats are
/// written without a fractional part (`3`, not `3.0`).
pub fn workbook_to_csv(bytes: &[u8]) -> Result<String, ConvertError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ConvertError::NoWorksheet)??;

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in range.rows() {
        writer.write_record(row.iter().map(format_cell))?;
    }
    let buffer = writer.into_inner().map_err(|e| e.into_error())?;

    Ok(String::from_utf8(buffer)?)
}

fn format_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(true) => "True".to_string(),
        Data::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}
