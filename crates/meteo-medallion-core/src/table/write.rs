//! Encoding batches into partitioned Parquet data files.
//!
//! A batch is split by the distinct values of the table's partition columns,
//! each slice is encoded as one Parquet file and stored under its Hive-style
//! partition directory with create-only semantics. The returned [`DataFile`]
//! entries are committed by the caller; until then the files are invisible.
use std::{collections::BTreeMap, sync::Arc};

use arrow::{
    array::{Array, RecordBatch, UInt32Array},
    compute::{cast, take_record_batch},
    datatypes::SchemaRef,
    util::display::array_value_to_string,
};
use bytes::Bytes;
use log::debug;
use parquet::{
    arrow::ArrowWriter,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use snafu::prelude::*;

use crate::{
    storage::{TableLocation, layout},
    table::error::{ArrowSnafu, ParquetWriteSnafu, StorageSnafu, TableError},
    transaction_log::DataFile,
};

/// Re-label `batch` with the table schema, casting columns whose Arrow type
/// differs only in nested nullability.
pub(crate) fn conform_to_schema(
    batch: &RecordBatch,
    schema: &SchemaRef,
) -> Result<RecordBatch, TableError> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if column.data_type() == field.data_type() {
            columns.push(Arc::clone(column));
        } else {
            columns.push(cast(column, field.data_type()).context(ArrowSnafu)?);
        }
    }
    RecordBatch::try_new(Arc::clone(schema), columns).context(ArrowSnafu)
}

/// Rendered partition value of `column` at `row`, or `None` for null.
pub(crate) fn partition_value_at(
    column: &dyn Array,
    row: usize,
) -> Result<Option<String>, TableError> {
    if column.is_null(row) {
        return Ok(None);
    }
    array_value_to_string(column, row)
        .map(Some)
        .context(ArrowSnafu)
}

/// Split `batch` into one slice per distinct partition value combination.
///
/// Slices are ordered by partition values. A null value is left out of the
/// returned map and lands in the Hive default partition directory.
pub(crate) fn split_by_partition(
    batch: &RecordBatch,
    partition_columns: &[String],
) -> Result<Vec<(BTreeMap<String, String>, RecordBatch)>, TableError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    if partition_columns.is_empty() {
        return Ok(vec![(BTreeMap::new(), batch.clone())]);
    }

    let schema = batch.schema();
    let mut columns = Vec::with_capacity(partition_columns.len());
    for name in partition_columns {
        let idx = schema.index_of(name).context(ArrowSnafu)?;
        columns.push(batch.column(idx));
    }

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let mut key = Vec::with_capacity(columns.len());
        for column in &columns {
            key.push(partition_value_at(column.as_ref(), row)?);
        }
        groups.entry(key).or_default().push(row as u32);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, rows) in groups {
        let values = partition_columns
            .iter()
            .zip(key)
            .filter_map(|(name, value)| value.map(|v| (name.clone(), v)))
            .collect();
        let slice = take_record_batch(batch, &UInt32Array::from(rows)).context(ArrowSnafu)?;
        out.push((values, slice));
    }
    Ok(out)
}

/// Encode a batch as a zstd-compressed Parquet file.
pub(crate) fn encode_parquet(batch: &RecordBatch) -> Result<Bytes, TableError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let mut writer =
        ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props)).context(ParquetWriteSnafu)?;
    writer.write(batch).context(ParquetWriteSnafu)?;
    let buf = writer.into_inner().context(ParquetWriteSnafu)?;
    Ok(Bytes::from(buf))
}

/// Write `batch` as new partitioned data files under `location`.
///
/// Returns one [`DataFile`] per non-empty partition slice.
pub(crate) async fn write_data_files(
    location: &TableLocation,
    partition_columns: &[String],
    batch: &RecordBatch,
) -> Result<Vec<DataFile>, TableError> {
    let mut files = Vec::new();
    for (values, slice) in split_by_partition(batch, partition_columns)? {
        let rel = layout::data_file_rel_path(partition_columns, &values);
        let bytes = encode_parquet(&slice)?;
        location
            .write_new(&rel, &bytes)
            .await
            .context(StorageSnafu)?;

        debug!(
            "wrote {} rows to {}",
            slice.num_rows(),
            location.display_path(&rel)
        );
        files.push(DataFile {
            path: layout::rel_path_string(&rel),
            partition_values: values,
            row_count: slice.num_rows() as u64,
            size_bytes: bytes.len() as u64,
        });
    }
    Ok(files)
}
