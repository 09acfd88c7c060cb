//! Reading committed data files back into Arrow batches.
use std::path::Path;

use arrow::{array::RecordBatch, compute::concat_batches, datatypes::SchemaRef};
use futures::{StreamExt, TryStreamExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;

use crate::{
    storage::TableLocation,
    table::{
        error::{ArrowSnafu, ParquetReadSnafu, StorageSnafu, TableError},
        write::conform_to_schema,
    },
    transaction_log::{DataFile, TableState},
};

/// Number of data files fetched concurrently by a full read.
const READ_CONCURRENCY: usize = 8;

/// Read one data file, re-labelled with the table schema.
pub(crate) async fn read_data_file(
    location: &TableLocation,
    file: &DataFile,
    schema: &SchemaRef,
) -> Result<Vec<RecordBatch>, TableError> {
    let bytes = location
        .read_bytes(Path::new(&file.path))
        .await
        .context(StorageSnafu)?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(ParquetReadSnafu)?
        .build()
        .context(ParquetReadSnafu)?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.context(ArrowSnafu)?;
        out.push(conform_to_schema(&batch, schema)?);
    }
    Ok(out)
}

/// Read one data file as a single batch.
pub(crate) async fn read_data_file_concat(
    location: &TableLocation,
    file: &DataFile,
    schema: &SchemaRef,
) -> Result<RecordBatch, TableError> {
    let batches = read_data_file(location, file, schema).await?;
    concat_batches(schema, &batches).context(ArrowSnafu)
}

/// Materialize every live row of the table, files in path order.
pub(crate) async fn read_all(
    location: &TableLocation,
    state: &TableState,
) -> Result<RecordBatch, TableError> {
    let schema = state.arrow_schema();

    let batches: Vec<Vec<RecordBatch>> = futures::stream::iter(state.files.values())
        .map(|file| read_data_file(location, file, &schema))
        .buffered(READ_CONCURRENCY)
        .try_collect()
        .await?;

    let flat: Vec<RecordBatch> = batches.into_iter().flatten().collect();
    concat_batches(&schema, &flat).context(ArrowSnafu)
}
