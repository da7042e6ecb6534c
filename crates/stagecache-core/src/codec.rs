//! Table encodings used at rest: Parquet (zstd) and CSV with header
//!
//! The encoding of an entry is chosen from its key's file extension, so a
//! stage keyed `.../orders.csv` is stored as CSV and anything else as Parquet.
//!
//! Parquet keeps the Arrow schema. CSV keeps only column names; types are
//! inferred again on read, so `"01234"` reads back as the integer `1234`.
//! [`Codec::normalize`] gives the table exactly as a later read returns it.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::table::Table;

/// Default zstd level, matching the pipeline output default.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// On-store encoding of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Parquet,
    Csv,
}

impl Format {
    /// Pick the encoding from a path's extension (case-insensitive).
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((_, ext)) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Parquet,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Failure to encode or decode a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub format: Format,
    pub message: String,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.format, self.message)
    }
}

impl std::error::Error for CodecError {}

impl CodecError {
    fn arrow(format: Format, e: ArrowError) -> Self {
        Self {
            format,
            message: e.to_string(),
        }
    }

    fn parquet(e: ParquetError) -> Self {
        Self {
            format: Format::Parquet,
            message: e.to_string(),
        }
    }
}

/// Encoder/decoder with write settings.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    zstd_level: i32,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Codec {
    pub fn new(zstd_level: i32) -> Self {
        Self { zstd_level }
    }

    pub fn zstd_level(&self) -> i32 {
        self.zstd_level
    }

    pub fn encode(&self, table: &Table, format: Format) -> Result<Vec<u8>, CodecError> {
        match format {
            Format::Parquet => self.encode_parquet(table),
            Format::Csv => encode_csv(table),
        }
    }

    pub fn decode(&self, data: Bytes, format: Format) -> Result<Table, CodecError> {
        match format {
            Format::Parquet => decode_parquet(data),
            Format::Csv => decode_csv(data),
        }
    }

    /// The table a read returns after `table` was written in `format`.
    pub fn normalize(&self, table: Table, format: Format) -> Result<Table, CodecError> {
        match format {
            Format::Parquet => Ok(table),
            Format::Csv => decode_csv(Bytes::from(encode_csv(&table)?)),
        }
    }

    fn encode_parquet(&self, table: &Table) -> Result<Vec<u8>, CodecError> {
        let level = ZstdLevel::try_new(self.zstd_level).map_err(CodecError::parquet)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .build();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, Arc::clone(table.schema()), Some(props))
            .map_err(CodecError::parquet)?;
        for batch in table.batches() {
            writer.write(batch).map_err(CodecError::parquet)?;
        }
        writer.close().map_err(CodecError::parquet)?;
        Ok(buf)
    }
}

fn decode_parquet(data: Bytes) -> Result<Table, CodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data).map_err(CodecError::parquet)?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build().map_err(CodecError::parquet)?;
    let batches = reader
        .collect::<Result<Vec<RecordBatch>, ArrowError>>()
        .map_err(|e| CodecError::arrow(Format::Parquet, e))?;
    Table::try_new(schema, batches).map_err(|e| CodecError::arrow(Format::Parquet, e))
}

fn encode_csv(table: &Table) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .build(&mut buf);
        // The header is only written alongside a batch.
        let empty;
        let batches = match table.batches() {
            [] => {
                empty = [RecordBatch::new_empty(Arc::clone(table.schema()))];
                &empty[..]
            }
            batches => batches,
        };
        for batch in batches {
            writer
                .write(batch)
                .map_err(|e| CodecError::arrow(Format::Csv, e))?;
        }
    }
    Ok(buf)
}

fn decode_csv(data: Bytes) -> Result<Table, CodecError> {
    let csv_err = |e: ArrowError| CodecError::arrow(Format::Csv, e);
    let (schema, _) = arrow::csv::reader::Format::default()
        .with_header(true)
        .infer_schema(Cursor::new(data.clone()), None)
        .map_err(csv_err)?;
    // Columns with no values infer as Null; read them as text.
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Null => f.as_ref().clone().with_data_type(DataType::Utf8),
            _ => f.as_ref().clone(),
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .build(Cursor::new(data))
        .map_err(csv_err)?;
    let batches = reader
        .collect::<Result<Vec<RecordBatch>, ArrowError>>()
        .map_err(csv_err)?;
    Table::try_new(schema, batches).map_err(csv_err)
}
