//! Logical schema definitions and validation for table metadata.
//!
//! This module models the columns recorded in the transaction log, along with
//! conversion to and from Arrow schemas and the exact-match check that guards
//! every write against schema drift.
use std::{collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Logical column definition in a schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalField {
    /// Column name as stored in the schema.
    pub name: String,
    /// Logical data type for the column.
    pub data_type: LogicalDataType,
    /// Whether the column allows null values.
    #[serde(default)]
    pub nullable: bool,
}

impl LogicalField {
    fn to_arrow_field(&self) -> Field {
        Field::new(
            self.name.clone(),
            self.data_type.to_arrow_datatype(),
            self.nullable,
        )
    }

    fn from_arrow_field(field: &Field, path: &str) -> Result<Self, SchemaConvertError> {
        Ok(Self {
            name: field.name().clone(),
            data_type: LogicalDataType::from_arrow_datatype(field.data_type(), path)?,
            nullable: field.is_nullable(),
        })
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?: {}", self.name, self.data_type)
        } else {
            write!(f, "{}: {}", self.name, self.data_type)
        }
    }
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

fn relax_field(field: LogicalField) -> LogicalField {
    let data_type = match field.data_type {
        LogicalDataType::Struct { fields } => LogicalDataType::Struct {
            fields: fields.into_iter().map(relax_field).collect(),
        },
        other => other,
    };
    LogicalField {
        name: field.name,
        data_type,
        nullable: true,
    }
}

/// Logical data types that can be stored in the table schema metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicalDataType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 encoded string.
    Utf8,
    /// Struct with named child fields.
    Struct {
        /// Ordered set of child fields for the struct.
        fields: Vec<LogicalField>,
    },
}

impl LogicalDataType {
    fn to_arrow_datatype(&self) -> DataType {
        match self {
            LogicalDataType::Bool => DataType::Boolean,
            LogicalDataType::Int32 => DataType::Int32,
            LogicalDataType::Int64 => DataType::Int64,
            LogicalDataType::Float64 => DataType::Float64,
            LogicalDataType::Utf8 => DataType::Utf8,
            LogicalDataType::Struct { fields } => DataType::Struct(Fields::from(
                fields
                    .iter()
                    .map(LogicalField::to_arrow_field)
                    .collect::<Vec<_>>(),
            )),
        }
    }

    fn from_arrow_datatype(dt: &DataType, path: &str) -> Result<Self, SchemaConvertError> {
        Ok(match dt {
            DataType::Boolean => LogicalDataType::Bool,
            DataType::Int32 => LogicalDataType::Int32,
            DataType::Int64 => LogicalDataType::Int64,
            DataType::Float64 => LogicalDataType::Float64,
            DataType::Utf8 => LogicalDataType::Utf8,
            DataType::Struct(children) => {
                let mut fields = Vec::with_capacity(children.len());
                for child in children.iter() {
                    let child_path = join_path(path, child.name());
                    fields.push(LogicalField::from_arrow_field(child, &child_path)?);
                }
                LogicalDataType::Struct { fields }
            }
            other => {
                return UnsupportedTypeSnafu {
                    column: path.to_string(),
                    datatype: other.to_string(),
                }
                .fail();
            }
        })
    }

    /// Type equality that ignores nullability of struct children.
    fn same_shape(&self, other: &LogicalDataType) -> bool {
        match (self, other) {
            (LogicalDataType::Struct { fields: a }, LogicalDataType::Struct { fields: b }) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.name == y.name && x.data_type.same_shape(&y.data_type))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalDataType::Bool => write!(f, "bool"),
            LogicalDataType::Int32 => write!(f, "int32"),
            LogicalDataType::Int64 => write!(f, "int64"),
            LogicalDataType::Float64 => write!(f, "float64"),
            LogicalDataType::Utf8 => write!(f, "utf8"),
            LogicalDataType::Struct { fields } => {
                write!(f, "Struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Errors raised while converting an Arrow schema into a logical schema.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum SchemaConvertError {
    /// The column uses an Arrow type the table format does not record.
    #[snafu(display("Unsupported Arrow type for column {column}: {datatype}"))]
    UnsupportedType {
        /// Dotted column path.
        column: String,
        /// Rendered Arrow data type.
        datatype: String,
    },

    /// Duplicate column names are not allowed.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicate column name.
        column: String,
    },
}

/// Logical schema metadata describing the ordered collection of columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalSchema {
    columns: Vec<LogicalField>,
}

impl LogicalSchema {
    /// Construct a validated logical schema (rejects duplicate column names).
    pub fn new(columns: Vec<LogicalField>) -> Result<Self, SchemaConvertError> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.clone()) {
                return DuplicateColumnSnafu {
                    column: col.name.clone(),
                }
                .fail();
            }
        }
        Ok(Self { columns })
    }

    /// Derive a logical schema from an Arrow schema.
    pub fn from_arrow(schema: &Schema) -> Result<Self, SchemaConvertError> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| LogicalField::from_arrow_field(f, f.name()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns)
    }

    /// Borrow the logical columns.
    pub fn columns(&self) -> &[LogicalField] {
        &self.columns
    }

    /// Whether a column with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// The same columns with every field (including struct children) nullable.
    ///
    /// Tables are created from the first batch written; relaxing nullability
    /// keeps later batches with missing readings writable.
    pub fn with_all_nullable(self) -> Self {
        Self {
            columns: self.columns.into_iter().map(relax_field).collect(),
        }
    }

    /// Convert this logical schema to a shared Arrow [`SchemaRef`].
    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(LogicalField::to_arrow_field)
                .collect::<Vec<_>>(),
        ))
    }

    /// Describe the first difference between `self` (the table) and
    /// `incoming` (a batch), or `None` when names, order and types agree.
    ///
    /// Nullability is not compared; every data file is re-labelled with the
    /// table schema on read.
    pub fn mismatch(&self, incoming: &LogicalSchema) -> Option<String> {
        let table_names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let batch_names: Vec<&str> = incoming.columns.iter().map(|c| c.name.as_str()).collect();
        if table_names != batch_names {
            return Some(format!(
                "columns differ: table has {table_names:?}, batch has {batch_names:?}"
            ));
        }

        self.columns
            .iter()
            .zip(&incoming.columns)
            .find(|(t, b)| !t.data_type.same_shape(&b.data_type))
            .map(|(t, b)| {
                format!(
                    "column {} has type {} in the table but {} in the batch",
                    t.name, t.data_type, b.data_type
                )
            })
    }
}
