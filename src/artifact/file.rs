// src/artifact/file.rs

use anyhow::{Context, Result};
use bytes::Bytes;
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;
use std::{fs::File, path::Path};
use tracing::debug;

use super::rows::RowSet;

/// Write `rows` to `path` as a single-row-group Parquet file, truncating any
/// existing file. Returns the number of bytes on disk.
pub fn write_parquet(path: &Path, rows: &RowSet) -> Result<u64> {
    let batch = rows.to_record_batch()?;
    let file = File::create(path)
        .with_context(|| format!("creating parquet file {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating parquet writer")?;
    writer.write(&batch).context("writing people batch")?;
    writer.close().context("closing parquet writer")?;

    let size = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    debug!(path = %path.display(), rows = rows.len(), bytes = size, "parquet written");
    Ok(size)
}

/// Read every batch of the Parquet file at `path` back into a `RowSet`.
pub fn read_parquet(path: &Path) -> Result<RowSet> {
    let file =
        File::open(path).with_context(|| format!("opening parquet file {}", path.display()))?;
    decode(file).with_context(|| format!("decoding {}", path.display()))
}

/// Decode an in-memory Parquet payload, e.g. the body of a load job.
pub fn decode_parquet_bytes(data: Bytes) -> Result<RowSet> {
    decode(data)
}

/// What the footer of a Parquet file says, without decoding any rows.
#[derive(Debug, Clone)]
pub struct ParquetSummary {
    pub schema: SchemaRef,
    pub num_rows: i64,
    pub num_row_groups: usize,
    pub created_by: Option<String>,
}

/// Read the schema and row counts stored in the footer of the file at `path`.
pub fn describe_parquet(path: &Path) -> Result<ParquetSummary> {
    let file =
        File::open(path).with_context(|| format!("opening parquet file {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {}", path.display()))?;

    let meta = builder.metadata();
    Ok(ParquetSummary {
        schema: builder.schema().clone(),
        num_rows: meta.file_metadata().num_rows(),
        num_row_groups: meta.num_row_groups(),
        created_by: meta.file_metadata().created_by().map(str::to_string),
    })
}

fn decode<R: ChunkReader + 'static>(source: R) -> Result<RowSet> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(source)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut out = RowSet::default();
    for batch in reader {
        let batch = batch.context("reading parquet batch")?;
        let part = RowSet::from_record_batch(&batch)?;
        out.extend(part.rows());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Row;
    use tempfile::tempdir;

    #[test]
    fn written_file_decodes_to_the_same_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("output.parquet");

        let size = write_parquet(&path, &RowSet::sample())?;
        assert!(size > 0);
        assert_eq!(read_parquet(&path)?, RowSet::sample());
        Ok(())
    }

    #[test]
    fn second_write_replaces_the_first() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("output.parquet");

        let first = RowSet::from_rows((0..50).map(|i| Row::new(format!("p{}", i), i, "X")));
        write_parquet(&path, &first)?;
        write_parquet(&path, &RowSet::sample())?;

        assert_eq!(read_parquet(&path)?, RowSet::sample());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn bytes_and_file_decode_identically() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("output.parquet");
        write_parquet(&path, &RowSet::sample())?;

        let data = Bytes::from(std::fs::read(&path)?);
        assert_eq!(decode_parquet_bytes(data)?, read_parquet(&path)?);
        Ok(())
    }

    #[test]
    fn summary_reflects_what_was_written() -> Result<()> {
        use arrow::datatypes::DataType;

        let dir = tempdir()?;
        let path = dir.path().join("output.parquet");
        let rows = RowSet::from_rows((0..7).map(|i| Row::new(format!("p{}", i), i, "X")));
        write_parquet(&path, &rows)?;

        let summary = describe_parquet(&path)?;
        let fields: Vec<(&str, &DataType)> = summary
            .schema
            .fields()
            .iter()
            .map(|f| (f.name().as_str(), f.data_type()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("name", &DataType::Utf8),
                ("age", &DataType::Int64),
                ("city", &DataType::Utf8),
            ]
        );
        assert_eq!(summary.num_rows, 7);
        assert_eq!(summary.num_row_groups, 1);
        assert!(summary.created_by.is_some());
        Ok(())
    }

    #[test]
    fn summary_of_a_foreign_file_uses_its_own_schema() -> Result<()> {
        use arrow::array::Float64Array;
        use arrow::record_batch::RecordBatch;
        use arrow::datatypes::{DataType, Field, Schema};
        use std::sync::Arc;

        let dir = tempdir()?;
        let path = dir.path().join("prices.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("price", DataType::Float64, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Float64Array::from(vec![Some(1.5), None]))],
        )?;
        let mut writer = ArrowWriter::try_new(File::create(&path)?, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        let summary = describe_parquet(&path)?;
        assert_eq!(summary.schema.fields().len(), 1);
        assert_eq!(summary.schema.field(0).name(), "price");
        assert_eq!(summary.schema.field(0).data_type(), &DataType::Float64);
        assert_eq!(summary.num_rows, 2);
        Ok(())
    }

    #[test]
    fn garbage_is_not_parquet() {
        let err = decode_parquet_bytes(Bytes::from_static(b"definitely not parquet")).unwrap_err();
        assert!(format!("{:#}", err).contains("reading parquet metadata"));
    }
}
