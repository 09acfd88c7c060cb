//! Typed predicates over a target table (`tgt`) and an incoming batch (`src`).
//!
//! A [`Predicate`] scopes an overwrite, delete or merge to the rows the
//! incoming batch supersedes. It is evaluated three ways:
//!
//! - against a data file's partition values, to keep or drop whole files
//!   without reading them ([`Predicate::partition_verdict`]);
//! - row-wise against a batch, via Arrow comparison kernels
//!   ([`Predicate::row_mask`]);
//! - as join keys for a merge ([`Predicate::join_keys`]).
//!
//! Predicates render as SQL-like text (`tgt.city = 'cordoba' AND tgt.date =
//! src.date`) for logs and commit records.
use std::{collections::BTreeMap, fmt, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, Scalar, StringArray,
    },
    compute::{
        cast,
        kernels::{boolean as boolean_kernels, cmp as cmp_kernels},
        prep_null_mask_filter,
    },
    error::ArrowError,
};

/// A constant on the right-hand side of `tgt.col = literal`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// UTF-8 string.
    Utf8(String),
    /// 64-bit integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Boolean(bool),
}

impl Literal {
    /// The value as it appears in a partition directory name.
    pub fn partition_text(&self) -> String {
        match self {
            Literal::Utf8(s) => s.clone(),
            Literal::Int64(v) => v.to_string(),
            Literal::Float64(v) => v.to_string(),
            Literal::Boolean(v) => v.to_string(),
        }
    }

    fn to_array(&self) -> ArrayRef {
        match self {
            Literal::Utf8(s) => Arc::new(StringArray::from(vec![s.as_str()])),
            Literal::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            Literal::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            Literal::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Utf8(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Int64(v) => write!(f, "{v}"),
            Literal::Float64(v) => write!(f, "{v}"),
            Literal::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Utf8(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Utf8(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int64(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float64(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

/// Boolean expression over `tgt` and `src`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `tgt.column = value`
    Eq {
        /// Target column.
        column: String,
        /// Constant compared against.
        value: Literal,
    },
    /// `tgt.column = src.column`
    KeyEq {
        /// Column present in both target and source.
        column: String,
    },
    /// Conjunction of all children; an empty conjunction is true.
    And(Vec<Predicate>),
}

impl Predicate {
    /// `tgt.column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `tgt.column = src.column`
    pub fn key_eq(column: impl Into<String>) -> Self {
        Predicate::KeyEq {
            column: column.into(),
        }
    }

    /// `tgt.k1 = src.k1 AND tgt.k2 = src.k2 ...`
    pub fn on_keys<S: AsRef<str>>(columns: &[S]) -> Self {
        Predicate::And(
            columns
                .iter()
                .map(|c| Predicate::key_eq(c.as_ref()))
                .collect(),
        )
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = match self {
            Predicate::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Predicate::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Predicate::And(parts)
    }

    /// Columns compared between target and source, in predicate order.
    pub fn join_keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys(&self, out: &mut Vec<String>) {
        match self {
            Predicate::KeyEq { column } => {
                if !out.contains(column) {
                    out.push(column.clone());
                }
            }
            Predicate::Eq { .. } => {}
            Predicate::And(parts) => parts.iter().for_each(|p| p.collect_keys(out)),
        }
    }

    /// The target-only part of the predicate (`tgt.col = literal` terms),
    /// or `None` when there is none.
    pub fn target_filter(&self) -> Option<Predicate> {
        match self {
            Predicate::Eq { .. } => Some(self.clone()),
            Predicate::KeyEq { .. } => None,
            Predicate::And(parts) => {
                let kept: Vec<Predicate> =
                    parts.iter().filter_map(Predicate::target_filter).collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Predicate::And(kept))
                }
            }
        }
    }

    /// Every column referenced by the predicate.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Eq { column, .. } | Predicate::KeyEq { column } => {
                if !out.contains(column) {
                    out.push(column.clone());
                }
            }
            Predicate::And(parts) => parts.iter().for_each(|p| p.collect_columns(out)),
        }
    }

    /// Decide the predicate for a whole data file from its partition values.
    ///
    /// Returns `Some(true)` when every row of the file satisfies the
    /// predicate, `Some(false)` when none does, and `None` when the rows must
    /// be inspected. Only `tgt.col = literal` terms on partition columns can
    /// be decided; a null partition value never equals a literal.
    pub fn partition_verdict(
        &self,
        partition_columns: &[String],
        values: &BTreeMap<String, String>,
    ) -> Option<bool> {
        match self {
            Predicate::Eq { column, value } => {
                if !partition_columns.contains(column) {
                    return None;
                }
                Some(
                    values
                        .get(column)
                        .is_some_and(|v| *v == value.partition_text()),
                )
            }
            Predicate::KeyEq { .. } => None,
            Predicate::And(parts) => {
                let mut all_true = true;
                for part in parts {
                    match part.partition_verdict(partition_columns, values) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => all_true = false,
                    }
                }
                all_true.then_some(true)
            }
        }
    }

    /// Evaluate the target-only predicate row-wise.
    ///
    /// The mask is null-free: a comparison against a null value is false.
    /// `tgt.col = src.col` terms cannot be evaluated without a source row and
    /// are rejected.
    pub fn row_mask(&self, batch: &RecordBatch) -> Result<BooleanArray, ArrowError> {
        match self {
            Predicate::Eq { column, value } => {
                let idx = batch.schema().index_of(column)?;
                let col = batch.column(idx);
                let literal = value.to_array();
                let literal = if literal.data_type() == col.data_type() {
                    literal
                } else {
                    cast(&literal, col.data_type())?
                };
                let mask = cmp_kernels::eq(col, &Scalar::new(literal))?;
                if mask.null_count() > 0 {
                    Ok(prep_null_mask_filter(&mask))
                } else {
                    Ok(mask)
                }
            }
            Predicate::KeyEq { column } => Err(ArrowError::InvalidArgumentError(format!(
                "tgt.{column} = src.{column} cannot be evaluated against the target alone"
            ))),
            Predicate::And(parts) => {
                let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
                for part in parts {
                    let next = part.row_mask(batch)?;
                    mask = boolean_kernels::and(&mask, &next)?;
                }
                Ok(mask)
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq { column, value } => write!(f, "tgt.{column} = {value}"),
            Predicate::KeyEq { column } => write!(f, "tgt.{column} = src.{column}"),
            Predicate::And(parts) if parts.is_empty() => write!(f, "TRUE"),
            Predicate::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("city", DataType::Utf8, true),
            Field::new("k", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![
                    Some("cordoba"),
                    Some("rosario"),
                    None,
                    Some("cordoba"),
                ])),
                Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(3), None])),
            ],
        )
        .expect("valid batch")
    }

    #[test]
    fn renders_sql_like_text() {
        let p = Predicate::eq("city", "cordoba").and(Predicate::on_keys(&["date", "city"]));

        assert_eq!(
            p.to_string(),
            "tgt.city = 'cordoba' AND tgt.date = src.date AND tgt.city = src.city"
        );
        assert_eq!(Predicate::eq("k", 5_i64).to_string(), "tgt.k = 5");
    }

    #[test]
    fn row_mask_treats_nulls_as_false() -> Result<(), ArrowError> {
        let mask = Predicate::eq("city", "cordoba").row_mask(&batch())?;

        assert_eq!(mask, BooleanArray::from(vec![true, false, false, true]));
        assert_eq!(mask.null_count(), 0);
        Ok(())
    }

    #[test]
    fn row_mask_on_a_column_without_nulls() -> Result<(), ArrowError> {
        let schema = Arc::new(Schema::new(vec![Field::new("city", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec!["cordoba", "rosario"]))],
        )?;

        let mask = Predicate::eq("city", "cordoba").row_mask(&batch)?;

        assert_eq!(mask, BooleanArray::from(vec![true, false]));
        assert_eq!(mask.null_count(), 0);
        Ok(())
    }

    #[test]
    fn row_mask_combines_conjunctions_and_casts_literals() -> Result<(), ArrowError> {
        let p = Predicate::eq("city", "cordoba").and(Predicate::eq("k", 1_i64));

        let mask = p.row_mask(&batch())?;

        assert_eq!(mask, BooleanArray::from(vec![true, false, false, false]));
        Ok(())
    }

    #[test]
    fn row_mask_rejects_source_references() {
        let err = Predicate::key_eq("k").row_mask(&batch());

        assert!(err.is_err());
    }

    #[test]
    fn partition_verdict_decides_only_partition_terms() {
        let partitions = vec!["date_retrieved".to_string(), "city".to_string()];
        let values = BTreeMap::from([
            ("date_retrieved".to_string(), "2024-01-01".to_string()),
            ("city".to_string(), "cordoba".to_string()),
        ]);

        let both =
            Predicate::eq("date_retrieved", "2024-01-01").and(Predicate::eq("city", "cordoba"));
        let other_city = Predicate::eq("city", "rosario");
        let row_level = Predicate::eq("time", "2024-01-01T00:00");

        assert_eq!(both.partition_verdict(&partitions, &values), Some(true));
        assert_eq!(other_city.partition_verdict(&partitions, &values), Some(false));
        assert_eq!(row_level.partition_verdict(&partitions, &values), None);
        assert_eq!(
            row_level
                .and(other_city)
                .partition_verdict(&partitions, &values),
            Some(false)
        );
    }

    #[test]
    fn join_keys_and_target_filter_split_the_predicate() {
        let p = Predicate::eq("city", "cordoba").and(Predicate::on_keys(&["date", "city"]));

        assert_eq!(p.join_keys(), vec!["date".to_string(), "city".to_string()]);
        assert_eq!(
            p.target_filter(),
            Some(Predicate::And(vec![Predicate::eq("city", "cordoba")]))
        );
        assert_eq!(Predicate::on_keys(&["k"]).target_filter(), None);
    }
}
