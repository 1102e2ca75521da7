//! Column-oriented tabular frame
//!
//! Named columns of loosely typed cells. Frames carry raw and synthetic
//! training data through de-identification, the quality gate and
//! normalisation before being turned into a numeric design matrix.

use std::io::Read;

use crate::error::{PipelineError, PipelineResult};

/// One cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Num(f64),
    Text(String),
    Null,
}

impl Cell {
    /// Parse a raw text field: empty → null, numeric → number, else text
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Num(v),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            Cell::Null
        } else {
            Cell::Num(v)
        }
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Num(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::Null => Ok(()),
        }
    }
}

/// Named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, cells)` pairs; all columns must be the same length
    pub fn from_columns(columns: Vec<(String, Vec<Cell>)>) -> PipelineResult<Self> {
        let mut frame = Frame::new();
        for (name, cells) in columns {
            frame.insert_column(&name, cells)?;
        }
        Ok(frame)
    }

    /// Parse CSV with a header row
    pub fn from_csv<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if names.is_empty() {
            return Err(PipelineError::InsufficientData("CSV has no header".to_string()));
        }
        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];

        for record in rdr.records() {
            let record = record?;
            for (i, column) in columns.iter_mut().enumerate() {
                column.push(record.get(i).map(Cell::parse).unwrap_or(Cell::Null));
            }
        }

        Ok(Self { names, columns })
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.index_of(name).map(|i| self.columns[i].as_slice())
    }

    /// Add a column, replacing any column of the same name
    pub fn insert_column(&mut self, name: &str, cells: Vec<Cell>) -> PipelineResult<()> {
        if !self.names.is_empty() && cells.len() != self.n_rows() {
            return Err(PipelineError::InvalidData(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                cells.len(),
                self.n_rows()
            )));
        }
        match self.index_of(name) {
            Some(i) => self.columns[i] = cells,
            None => {
                self.names.push(name.to_string());
                self.columns.push(cells);
            }
        }
        Ok(())
    }

    /// Remove the named columns that exist; unknown names are ignored
    pub fn drop_columns(&mut self, names: &[&str]) {
        let mut i = 0;
        while i < self.names.len() {
            if names.contains(&self.names[i].as_str()) {
                self.names.remove(i);
                self.columns.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Replace every cell of a column with `f(cell)`
    pub fn map_column<F>(&mut self, name: &str, f: F) -> PipelineResult<()>
    where
        F: Fn(&Cell) -> Cell,
    {
        let i = self
            .index_of(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
        for cell in self.columns[i].iter_mut() {
            *cell = f(cell);
        }
        Ok(())
    }

    /// Keep rows for which `keep(row_index)` is true
    pub fn retain_rows<F>(&mut self, keep: F)
    where
        F: Fn(usize) -> bool,
    {
        let mask: Vec<bool> = (0..self.n_rows()).map(&keep).collect();
        for column in self.columns.iter_mut() {
            let mut idx = 0;
            column.retain(|_| {
                let k = mask[idx];
                idx += 1;
                k
            });
        }
    }

    /// Drop every row containing a null cell
    pub fn drop_null_rows(&mut self) {
        let mask: Vec<bool> = (0..self.n_rows())
            .map(|r| self.columns.iter().all(|c| !c[r].is_null()))
            .collect();
        self.retain_rows(|r| mask[r]);
    }

    /// Numeric view of a column; any non-numeric cell is an error
    pub fn numeric_column(&self, name: &str) -> PipelineResult<Vec<f64>> {
        let column = self
            .column(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
        column
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                cell.as_f64().ok_or_else(|| {
                    PipelineError::InvalidData(format!(
                        "column '{}' row {} is not numeric: '{}'",
                        name, row, cell
                    ))
                })
            })
            .collect()
    }

    /// Row-major matrix of the named numeric columns
    pub fn design_matrix(&self, features: &[String]) -> PipelineResult<Vec<Vec<f64>>> {
        let columns = features
            .iter()
            .map(|name| self.numeric_column(name))
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok((0..self.n_rows())
            .map(|r| columns.iter().map(|c| c[r]).collect())
            .collect())
    }

    /// Columns whose every cell is numeric, excluding `exclude`
    pub fn numeric_column_names(&self, exclude: &[&str]) -> Vec<String> {
        self.names
            .iter()
            .zip(self.columns.iter())
            .filter(|(name, _)| !exclude.contains(&name.as_str()))
            .filter(|(_, cells)| cells.iter().all(|c| c.as_f64().is_some()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}
