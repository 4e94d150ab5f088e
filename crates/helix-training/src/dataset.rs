//! Tabular dataset parsing and partitioning.
//!
//! Input is delimited text with a header row. The last column is the target,
//! every other column is a feature. The train/validation split is positional:
//! the first `floor(n * (1 - v))` rows train, the rest validate. Rows are not
//! reshuffled before the cut, so callers wanting a random partition must
//! shuffle the file themselves.

use crate::error::DatasetError;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Column names and row count of a structurally valid dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub columns: Vec<String>,
    pub records: usize,
}

/// A parsed dataset, before splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub features: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

impl Table {
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.columns.len().saturating_sub(1)
    }
}

/// SHA-256 of the raw dataset bytes, hex encoded.
#[must_use]
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parse raw bytes into a numeric table.
pub fn parse_table(bytes: &[u8]) -> Result<Table, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| DatasetError::MalformedDataset(format!("unreadable header: {e}")))?
        .iter()
        .map(ToString::to_string)
        .collect();

    let mut raw_rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| DatasetError::MalformedDataset(format!("row {}: {e}", idx + 1)))?;
        raw_rows.push(record);
    }

    if raw_rows.is_empty() {
        return Err(DatasetError::EmptyDataset);
    }
    if columns.len() < 2 {
        return Err(DatasetError::InsufficientColumns);
    }

    let mut features = Vec::with_capacity(raw_rows.len());
    let mut targets = Vec::with_capacity(raw_rows.len());
    for (row_idx, record) in raw_rows.iter().enumerate() {
        let mut values = Vec::with_capacity(columns.len());
        for (col_idx, cell) in record.iter().enumerate() {
            values.push(parse_cell(cell, row_idx + 1, &columns[col_idx])?);
        }
        let target = values.pop().ok_or(DatasetError::InsufficientColumns)?;
        features.push(values);
        targets.push(target);
    }

    Ok(Table { columns, features, targets })
}

fn parse_cell(cell: &str, row: usize, column: &str) -> Result<f32, DatasetError> {
    match cell.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(DatasetError::MalformedDataset(format!(
            "row {row}, column '{column}': non-finite value '{cell}'"
        ))),
        Err(_) => Err(DatasetError::MalformedDataset(format!(
            "row {row}, column '{column}': non-numeric value '{cell}'"
        ))),
    }
}

/// Validate structure without keeping the data around.
pub fn inspect(bytes: &[u8]) -> Result<DatasetSummary, DatasetError> {
    let table = parse_table(bytes)?;
    Ok(DatasetSummary { records: table.len(), columns: table.columns })
}

/// Cut index for a positional split of `rows` rows.
pub fn split_index(rows: usize, validation_split: f64) -> Result<usize, DatasetError> {
    if !validation_split.is_finite() || !(0.0..1.0).contains(&validation_split) {
        return Err(DatasetError::InvalidSplit(validation_split.to_string()));
    }
    let cut = (rows as f64 * (1.0 - validation_split)).floor() as usize;
    if cut == 0 {
        return Err(DatasetError::NoTrainingSamples);
    }
    Ok(cut.min(rows))
}

/// One batch of rows borrowed from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<'a> {
    pub rows: Vec<&'a [f32]>,
    pub targets: Vec<f32>,
}

impl Batch<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A contiguous slice of the dataset used for training or validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub features: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
}

impl Partition {
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Batches in row order. Repeated calls yield identical batches.
    #[must_use]
    pub fn batches(&self, batch_size: usize) -> Vec<Batch<'_>> {
        let order: Vec<usize> = (0..self.len()).collect();
        self.batches_in(&order, batch_size)
    }

    /// Batches over a freshly shuffled row order.
    pub fn shuffled_batches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Batch<'_>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.batches_in(&order, batch_size)
    }

    fn batches_in(&self, order: &[usize], batch_size: usize) -> Vec<Batch<'_>> {
        order
            .chunks(batch_size.max(1))
            .map(|chunk| Batch {
                rows: chunk.iter().map(|&i| self.features[i].as_slice()).collect(),
                targets: chunk.iter().map(|&i| self.targets[i]).collect(),
            })
            .collect()
    }
}

/// A dataset split and ready for the training loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDataset {
    pub columns: Vec<String>,
    pub feature_dim: usize,
    pub train: Partition,
    pub validation: Partition,
}

/// Parse, validate and split a dataset.
pub fn prepare(bytes: &[u8], validation_split: f64) -> Result<PreparedDataset, DatasetError> {
    let table = parse_table(bytes)?;
    let cut = split_index(table.len(), validation_split)?;
    let feature_dim = table.feature_dim();

    let Table { columns, mut features, mut targets } = table;
    let val_features = features.split_off(cut);
    let val_targets = targets.split_off(cut);

    Ok(PreparedDataset {
        columns,
        feature_dim,
        train: Partition { features, targets },
        validation: Partition { features: val_features, targets: val_targets },
    })
}
