//! Table schemas and the sync set snapshot.

use crate::error::{ModelError, ModelResult};
use crate::row::SyncRow;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    /// Schema (namespace) name, if the backend has one.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableName {
    /// Creates an unqualified table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Creates a schema-qualified table name.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Logical column type, used by stores to validate incoming values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Integer,
    /// Floating point.
    Real,
    /// Text.
    Text,
    /// Binary.
    Bytes,
}

impl DataType {
    /// Returns true if `value` can be stored in a column of this type.
    ///
    /// NULL is accepted by every type; nullability is checked separately.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (DataType::Bool, Value::Bool(_))
                | (DataType::Integer, Value::Integer(_))
                | (DataType::Real, Value::Real(_) | Value::Integer(_))
                | (DataType::Text, Value::Text(_))
                | (DataType::Bytes, Value::Bytes(_))
        )
    }
}

/// A column of a [`SyncTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncColumn {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub data_type: DataType,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Read-only columns (computed, identity) are never written by the engine.
    pub read_only: bool,
}

impl SyncColumn {
    /// Creates a writable, nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            allow_null: true,
            read_only: false,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    /// Marks the column read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A table's schema as seen by one sync pass.
///
/// Rows carry one value per entry of `columns`, in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTable {
    /// Qualified table name.
    pub name: TableName,
    /// Ordered columns.
    pub columns: Vec<SyncColumn>,
    /// Ordered primary key column names.
    pub primary_keys: Vec<String>,
}

impl SyncTable {
    /// Creates a table with no columns.
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn with_column(mut self, column: SyncColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Declares the primary key columns.
    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the positions of the primary key columns.
    ///
    /// # Errors
    ///
    /// Fails if the table has no primary key or a key names an unknown column.
    pub fn primary_key_indices(&self) -> ModelResult<Vec<usize>> {
        if self.primary_keys.is_empty() {
            return Err(ModelError::MissingPrimaryKey {
                table: self.name.clone(),
            });
        }
        self.primary_keys
            .iter()
            .map(|key| {
                self.column_index(key)
                    .ok_or_else(|| ModelError::unknown_column(&self.name, key.as_str()))
            })
            .collect()
    }

    /// Returns true if `column` is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|k| k == column)
    }

    /// Returns the columns an update statement may set.
    pub fn mutable_columns(&self) -> impl Iterator<Item = &SyncColumn> {
        self.columns
            .iter()
            .filter(|c| !c.read_only && !self.is_primary_key(&c.name))
    }

    /// Checks that the table can be applied against.
    ///
    /// # Errors
    ///
    /// Fails on a missing primary key or a primary key naming an unknown column.
    pub fn validate(&self) -> ModelResult<()> {
        self.primary_key_indices().map(|_| ())
    }

    /// Returns a copy restricted to the columns the engine writes.
    ///
    /// Read-only columns are dropped unless they are part of the key.
    pub fn writable(&self) -> SyncTable {
        SyncTable {
            name: self.name.clone(),
            columns: self
                .columns
                .iter()
                .filter(|c| !c.read_only || self.is_primary_key(&c.name))
                .cloned()
                .collect(),
            primary_keys: self.primary_keys.clone(),
        }
    }

    /// Re-shapes a row described by `source` onto this table's columns.
    ///
    /// Columns are matched by name. The row's state is preserved.
    ///
    /// # Errors
    ///
    /// Fails if the row does not match `source`, or if a column of this
    /// table is missing from `source`.
    pub fn project_row(&self, source: &SyncTable, row: &SyncRow) -> ModelResult<SyncRow> {
        if row.values.len() != source.columns.len() {
            return Err(ModelError::RowShapeMismatch {
                table: source.name.clone(),
                expected: source.columns.len(),
                actual: row.values.len(),
            });
        }
        if self.columns.len() == source.columns.len()
            && self
                .columns
                .iter()
                .zip(&source.columns)
                .all(|(a, b)| a.name == b.name)
        {
            return Ok(row.clone());
        }
        let values = self
            .columns
            .iter()
            .map(|column| {
                source
                    .column_index(&column.name)
                    .map(|i| row.values[i].clone())
                    .ok_or_else(|| ModelError::unknown_column(&source.name, column.name.as_str()))
            })
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(SyncRow::new(values, row.state))
    }
}

/// A foreign key from a child table to a parent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRelation {
    /// Constraint name.
    pub name: String,
    /// Referencing table.
    pub child_table: TableName,
    /// Referencing columns, in key order.
    pub child_columns: Vec<String>,
    /// Referenced table.
    pub parent_table: TableName,
    /// Referenced columns, in key order.
    pub parent_columns: Vec<String>,
}

impl SyncRelation {
    /// Creates a relation.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        child_table: TableName,
        child_columns: impl IntoIterator<Item = S>,
        parent_table: TableName,
        parent_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            child_table,
            child_columns: child_columns.into_iter().map(Into::into).collect(),
            parent_table,
            parent_columns: parent_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the relation points a table at itself.
    pub fn is_self_reference(&self) -> bool {
        self.child_table == self.parent_table
    }
}

/// The schema snapshot of one scope: its tables and their relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSet {
    /// Tables, in declaration order.
    pub tables: Vec<SyncTable>,
    /// Foreign keys between tables of the set.
    pub relations: Vec<SyncRelation>,
}

impl SyncSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    pub fn with_table(mut self, table: SyncTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a relation.
    pub fn with_relation(mut self, relation: SyncRelation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Looks a table up by name.
    pub fn table(&self, name: &TableName) -> Option<&SyncTable> {
        self.tables.iter().find(|t| &t.name == name)
    }

    /// Returns the relations where `table` is the child.
    pub fn parent_relations<'a>(
        &'a self,
        table: &'a TableName,
    ) -> impl Iterator<Item = &'a SyncRelation> + 'a {
        self.relations.iter().filter(move |r| &r.child_table == table)
    }

    /// Tables in forward dependency order (parents first), for upserts.
    pub fn upsert_order(&self) -> Vec<&SyncTable> {
        crate::order::dependency_order(self)
            .into_iter()
            .map(|i| &self.tables[i])
            .collect()
    }

    /// Tables in reverse dependency order (children first), for deletes.
    pub fn delete_order(&self) -> Vec<&SyncTable> {
        let mut order = self.upsert_order();
        order.reverse();
        order
    }

    /// Validates every table and relation of the set.
    ///
    /// # Errors
    ///
    /// Fails on duplicate tables, tables without a usable primary key, and
    /// relations naming unknown tables or columns.
    pub fn validate(&self) -> ModelResult<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(&table.name) {
                return Err(ModelError::DuplicateTable {
                    table: table.name.clone(),
                });
            }
            table.validate()?;
        }
        for relation in &self.relations {
            let child = self
                .table(&relation.child_table)
                .ok_or_else(|| ModelError::UnknownTable {
                    table: relation.child_table.clone(),
                })?;
            let parent = self
                .table(&relation.parent_table)
                .ok_or_else(|| ModelError::UnknownTable {
                    table: relation.parent_table.clone(),
                })?;
            for column in &relation.child_columns {
                if child.column_index(column).is_none() {
                    return Err(ModelError::unknown_column(&child.name, column.as_str()));
                }
            }
            for column in &relation.parent_columns {
                if parent.column_index(column).is_none() {
                    return Err(ModelError::unknown_column(&parent.name, column.as_str()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowState;

    fn customer() -> SyncTable {
        SyncTable::new(TableName::with_schema("dbo", "Customer"))
            .with_column(SyncColumn::new("id", DataType::Integer).not_null())
            .with_column(SyncColumn::new("name", DataType::Text))
            .with_column(SyncColumn::new("row_version", DataType::Bytes).read_only())
            .with_primary_keys(["id"])
    }

    #[test]
    fn table_name_display() {
        assert_eq!(TableName::new("Order").to_string(), "Order");
        assert_eq!(
            TableName::with_schema("sales", "Order").to_string(),
            "sales.Order"
        );
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let table = SyncTable::new(TableName::new("NoKey"))
            .with_column(SyncColumn::new("a", DataType::Integer));
        assert!(matches!(
            table.validate(),
            Err(ModelError::MissingPrimaryKey { .. })
        ));
    }

    #[test]
    fn primary_key_on_unknown_column() {
        let table = SyncTable::new(TableName::new("T"))
            .with_column(SyncColumn::new("a", DataType::Integer))
            .with_primary_keys(["b"]);
        assert!(matches!(
            table.validate(),
            Err(ModelError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn writable_drops_read_only_columns() {
        let table = customer();
        let writable = table.writable();
        assert_eq!(writable.columns.len(), 2);
        assert!(writable.column_index("row_version").is_none());

        let mutable: Vec<_> = table.mutable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(mutable, vec!["name"]);
    }

    #[test]
    fn project_row_by_name() {
        let table = customer();
        let writable = table.writable();
        let row = SyncRow::new(
            vec![Value::from(1i64), Value::from("Ada"), Value::Bytes(vec![1])],
            RowState::Modified,
        );

        let projected = writable.project_row(&table, &row).unwrap();
        assert_eq!(projected.values, vec![Value::from(1i64), Value::from("Ada")]);
        assert_eq!(projected.state, RowState::Modified);
    }

    #[test]
    fn project_row_shape_mismatch() {
        let table = customer();
        let row = SyncRow::new(vec![Value::from(1i64)], RowState::Modified);
        assert!(matches!(
            table.writable().project_row(&table, &row),
            Err(ModelError::RowShapeMismatch { .. })
        ));
    }

    #[test]
    fn data_type_accepts() {
        assert!(DataType::Integer.accepts(&Value::Integer(1)));
        assert!(DataType::Integer.accepts(&Value::Null));
        assert!(!DataType::Integer.accepts(&Value::from("x")));
        assert!(DataType::Real.accepts(&Value::Integer(1)));
    }

    #[test]
    fn set_validation_catches_bad_relation() {
        let set = SyncSet::new().with_table(customer()).with_relation(SyncRelation::new(
            "FK_Order_Customer",
            TableName::new("Order"),
            ["customer_id"],
            TableName::with_schema("dbo", "Customer"),
            ["id"],
        ));
        assert!(matches!(
            set.validate(),
            Err(ModelError::UnknownTable { .. })
        ));
    }

    #[test]
    fn set_validation_catches_duplicates() {
        let set = SyncSet::new().with_table(customer()).with_table(customer());
        assert!(matches!(
            set.validate(),
            Err(ModelError::DuplicateTable { .. })
        ));
    }
}
