//! In-memory table: an Arrow schema plus record batches sharing it

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, new_empty_array};
use arrow::compute::{concat, concat_batches};
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;

/// The unit of data moved between stages and the store.
///
/// Cloning is cheap: batches are reference counted. Equality compares
/// field definitions and cell contents, not how rows are split into batches,
/// so a table read back from the store equals the one that was written.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Build a table, checking that every batch matches `schema`'s fields.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, ArrowError> {
        for (i, batch) in batches.iter().enumerate() {
            if batch.schema().fields() != schema.fields() {
                return Err(ArrowError::SchemaError(format!(
                    "batch {i} does not match table schema"
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    /// A table with columns but no rows.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    /// Concatenate column `i` across all batches.
    pub fn column(&self, i: usize) -> Result<ArrayRef, ArrowError> {
        if i >= self.num_columns() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "column index {i} out of range ({} columns)",
                self.num_columns()
            )));
        }
        let arrays: Vec<&dyn Array> = self.batches.iter().map(|b| b.column(i).as_ref()).collect();
        if arrays.is_empty() {
            return Ok(new_empty_array(self.schema.field(i).data_type()));
        }
        concat(&arrays)
    }

    /// Look up a column by name and concatenate it.
    pub fn column_by_name(&self, name: &str) -> Result<ArrayRef, ArrowError> {
        let (i, _) = self.schema.column_with_name(name).ok_or_else(|| {
            ArrowError::InvalidArgumentError(format!("no column named {name}"))
        })?;
        self.column(i)
    }

    /// Merge all batches into a single one.
    pub fn to_batch(&self) -> Result<RecordBatch, ArrowError> {
        concat_batches(&self.schema, &self.batches)
    }

    /// Render the first `limit` rows as a text table.
    pub fn pretty(&self, limit: usize) -> Result<String, ArrowError> {
        let batch = self.to_batch()?;
        let shown = batch.slice(0, limit.min(batch.num_rows()));
        Ok(arrow::util::pretty::pretty_format_batches(&[shown])?.to_string())
    }
}

impl From<RecordBatch> for Table {
    fn from(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if self.schema.fields() != other.schema.fields() || self.num_rows() != other.num_rows() {
            return false;
        }
        (0..self.num_columns()).all(|i| match (self.column(i), other.column(i)) {
            (Ok(a), Ok(b)) => a.to_data() == b.to_data(),
            _ => false,
        })
    }
}

/// Build a single-batch table from `(name, array)` pairs. Every column is nullable.
pub fn table_from_columns(columns: Vec<(&str, ArrayRef)>) -> Result<Table, ArrowError> {
    let fields: Vec<arrow::datatypes::Field> = columns
        .iter()
        .map(|(name, array)| arrow::datatypes::Field::new(*name, array.data_type().clone(), true))
        .collect();
    let schema = Arc::new(arrow::datatypes::Schema::new(fields));
    let arrays = columns.into_iter().map(|(_, a)| a).collect();
    Ok(RecordBatch::try_new(schema, arrays)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    fn sample() -> Table {
        table_from_columns(vec![
            ("id", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
            (
                "name",
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn counts_rows_and_columns() {
        let t = sample();
        assert_eq!(t.num_rows(), 3);
        assert_eq!(t.num_columns(), 2);
        assert_eq!(t.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn equality_ignores_batch_split() {
        let whole = sample();
        let batch = whole.to_batch().unwrap();
        let split =
            Table::try_new(batch.schema(), vec![batch.slice(0, 1), batch.slice(1, 2)]).unwrap();
        assert_eq!(whole, split);
    }

    #[test]
    fn equality_detects_different_cells() {
        let a = sample();
        let b = table_from_columns(vec![
            ("id", Arc::new(Int64Array::from(vec![1, 2, 4])) as ArrayRef),
            (
                "name",
                Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            ),
        ])
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn try_new_rejects_mismatched_batch() {
        let t = sample();
        let other = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]));
        assert!(Table::try_new(other, t.batches().to_vec()).is_err());
    }

    #[test]
    fn empty_table_column_is_empty_array() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Utf8, true)]));
        let t = Table::empty(schema);
        assert_eq!(t.num_rows(), 0);
        assert_eq!(t.column(0).unwrap().len(), 0);
    }

    #[test]
    fn column_by_name_missing() {
        assert!(sample().column_by_name("nope").is_err());
    }

    #[test]
    fn pretty_limits_rows() {
        let s = sample().pretty(2).unwrap();
        assert!(s.contains("| 1"));
        assert!(!s.contains("| 3"));
    }
}
