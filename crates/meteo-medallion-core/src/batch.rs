//! Small helpers over Arrow record batches shared by the load strategies,
//! the aggregation engine and the pipeline.
use std::sync::Arc;

use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, RecordBatch,
        StringArray,
    },
    compute::filter_record_batch,
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
};

use crate::predicate::{Literal, Predicate};

/// Value of `column` in the first row, or `None` when it is null.
///
/// Strategies that scope a write to a single logical key read it from the
/// first row and apply it to the whole batch.
pub fn first_value(batch: &RecordBatch, column: &str) -> Result<Option<Literal>, ArrowError> {
    let idx = batch.schema().index_of(column)?;
    if batch.num_rows() == 0 {
        return Err(ArrowError::InvalidArgumentError(format!(
            "cannot read {column} from an empty batch"
        )));
    }
    literal_at(batch.column(idx).as_ref(), 0)
}

/// Literal for `row` of `array`, or `None` when it is null.
pub fn literal_at(array: &dyn Array, row: usize) -> Result<Option<Literal>, ArrowError> {
    if array.is_null(row) {
        return Ok(None);
    }
    let any = array.as_any();
    let literal = match array.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| Literal::Utf8(a.value(row).to_string())),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| Literal::Int64(a.value(row))),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| Literal::Int64(i64::from(a.value(row)))),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| Literal::Float64(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| Literal::Boolean(a.value(row))),
        _ => None,
    };
    literal.map(Some).ok_or_else(|| {
        ArrowError::InvalidArgumentError(format!(
            "cannot use a {} value as a literal",
            array.data_type()
        ))
    })
}

/// Add (or replace) a Utf8 column holding `value` on every row.
pub fn with_constant_utf8(
    batch: &RecordBatch,
    name: &str,
    value: &str,
) -> Result<RecordBatch, ArrowError> {
    let column: ArrayRef = Arc::new(StringArray::from(vec![value; batch.num_rows()]));
    let schema = batch.schema();

    let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
    let mut columns = Vec::with_capacity(schema.fields().len() + 1);
    for (field, existing) in schema.fields().iter().zip(batch.columns()) {
        if field.name() != name {
            fields.push(field.as_ref().clone());
            columns.push(Arc::clone(existing));
        }
    }
    fields.push(Field::new(name, DataType::Utf8, true));
    columns.push(column);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

/// Rows whose `column` equals `value`.
pub fn filter_eq(
    batch: &RecordBatch,
    column: &str,
    value: impl Into<Literal>,
) -> Result<RecordBatch, ArrowError> {
    let mask = Predicate::eq(column, value).row_mask(batch)?;
    filter_record_batch(batch, &mask)
}

/// Downcast the named column.
pub fn column_as<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, ArrowError> {
    let idx = batch.schema().index_of(name)?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            ArrowError::CastError(format!(
                "column {name} has unexpected type {}",
                batch.column(idx).data_type()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("city", DataType::Utf8, true),
            Field::new("temp", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("cordoba"), Some("rosario"), None])),
                Arc::new(Float64Array::from(vec![Some(20.5), None, Some(3.0)])),
            ],
        )
        .expect("valid batch")
    }

    #[test]
    fn first_value_reads_row_zero() -> Result<(), ArrowError> {
        assert_eq!(
            first_value(&batch(), "city")?,
            Some(Literal::Utf8("cordoba".to_string()))
        );
        assert_eq!(first_value(&batch(), "temp")?, Some(Literal::Float64(20.5)));
        assert!(first_value(&batch().slice(0, 0), "city").is_err());
        assert!(first_value(&batch(), "missing").is_err());
        Ok(())
    }

    #[test]
    fn constant_column_replaces_existing_one() -> Result<(), ArrowError> {
        let tagged = with_constant_utf8(&batch(), "city", "rosario")?;

        assert_eq!(tagged.num_columns(), 2);
        let city = column_as::<StringArray>(&tagged, "city")?;
        assert!(city.iter().all(|c| c == Some("rosario")));
        Ok(())
    }

    #[test]
    fn filter_eq_drops_nulls_and_other_values() -> Result<(), ArrowError> {
        let only = filter_eq(&batch(), "city", "cordoba")?;

        assert_eq!(only.num_rows(), 1);
        Ok(())
    }

    #[test]
    fn filter_eq_on_a_tagged_column() -> Result<(), ArrowError> {
        let tagged = with_constant_utf8(&batch(), "city", "rosario")?;

        assert_eq!(filter_eq(&tagged, "city", "rosario")?.num_rows(), 3);
        assert_eq!(filter_eq(&tagged, "city", "cordoba")?.num_rows(), 0);
        Ok(())
    }
}
