// ============================================================
// Layer 4: Numeric CSV tables
// ============================================================
// Reads and writes the plain numeric CSV files used for tabular
// data: one header row, comma separated, every cell an f32.
// Header names may be quoted and contain commas.
//
//   f0,f1,f2,target
//   0.1,0.2,0.3,1.5
//   ...
//
// Non-numeric columns are out of scope; a bad cell is reported
// with its file, line and column name.

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, IoContext, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub values:  Array2<f32>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Split into (features, label) around the named column.
    /// `None` picks the last column as the label.
    pub fn split_label(&self, label_name: Option<&str>) -> Result<(Vec<String>, Array2<f32>, String, Array2<f32>)> {
        let label_at = match label_name {
            Some(name) => self
                .column_index(name)
                .ok_or_else(|| Error::config("label_name", format!("column '{name}' not found in {:?}", self.columns)))?,
            None => self
                .columns
                .len()
                .checked_sub(1)
                .ok_or_else(|| Error::config("label_name", "table has no columns"))?,
        };
        let feature_at: Vec<usize> = (0..self.columns.len()).filter(|&i| i != label_at).collect();
        let features = self.values.select(ndarray::Axis(1), &feature_at);
        let label    = self.values.select(ndarray::Axis(1), &[label_at]);
        let names    = feature_at.iter().map(|&i| self.columns[i].clone()).collect();
        Ok((names, features, self.columns[label_at].clone(), label))
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| Error::csv(path, e))?
        .iter()
        .map(String::from)
        .collect();
    if columns.is_empty() {
        return Err(Error::config(path.display().to_string(), "empty csv file"));
    }

    let mut flat = Vec::new();
    let mut rows = 0usize;
    for record in reader.records() {
        let record  = record.map_err(|e| Error::csv(path, e))?;
        let line_no = record.position().map_or(rows + 2, |p| p.line() as usize);
        for (cell, column) in record.iter().zip(&columns) {
            let value = cell.parse::<f32>().map_err(|e| {
                Error::config(format!("{}:{line_no}:{column}", path.display()), e.to_string())
            })?;
            flat.push(value);
        }
        rows += 1;
    }

    let values = Array2::from_shape_vec((rows, columns.len()), flat).map_err(|e| Error::Tensor(e.to_string()))?;
    tracing::debug!("Read {} rows × {} columns from '{}'", rows, columns.len(), path.display());
    Ok(Table { columns, values })
}

pub fn write_table(path: &Path, columns: &[String], values: ArrayView2<f32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let mut writer = ::csv::Writer::from_path(path).map_err(|e| Error::csv(path, e))?;
    writer.write_record(columns).map_err(|e| Error::csv(path, e))?;
    for row in values.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| Error::csv(path, e))?;
    }
    writer.flush().at(path)
}
