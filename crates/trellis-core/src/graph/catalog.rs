//! Node and rel table definitions.
//!
//! The catalog is immutable once built. DDL produces a new [`Catalog`]
//! value which the store swaps in atomically, so a query keeps working
//! against the schema it was bound to.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use trellis_common::types::{LogicalType, PropertyKey, TableId, Value};
use trellis_common::utils::error::{Error, QueryError, QueryErrorKind, Result};
use trellis_common::utils::strings::suggestion_hint;

/// A typed property column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: PropertyKey,
    pub ty: LogicalType,
}

impl PropertyDef {
    #[must_use]
    pub fn new(name: impl Into<PropertyKey>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableKind {
    /// Node table; `primary_key` indexes into the property list.
    Node { primary_key: usize },
    /// Relationship table connecting two node tables.
    Rel { from: TableId, to: TableId },
}

/// Definition of one node or rel table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: TableId,
    pub name: ArcStr,
    pub kind: TableKind,
    pub properties: Vec<PropertyDef>,
}

impl TableSchema {
    /// A node table. Fails if the key column is missing or not keyable.
    pub fn node(name: impl Into<ArcStr>, properties: Vec<PropertyDef>, primary_key: &str) -> Result<Self> {
        let name = name.into();
        let Some(pk) = properties.iter().position(|p| p.name.as_str() == primary_key) else {
            return Err(Error::binding(format!(
                "Primary key {primary_key} is not a property of table {name}"
            )));
        };
        if !properties[pk].ty.is_key_type() {
            return Err(Error::binding(format!(
                "Primary key {primary_key} must be INT64 or STRING, not {}",
                properties[pk].ty
            )));
        }
        let schema = Self {
            id: TableId::INVALID,
            name,
            kind: TableKind::Node { primary_key: pk },
            properties,
        };
        schema.check_unique_properties()?;
        Ok(schema)
    }

    /// A rel table between two existing node tables.
    pub fn rel(name: impl Into<ArcStr>, from: TableId, to: TableId, properties: Vec<PropertyDef>) -> Result<Self> {
        let schema = Self {
            id: TableId::INVALID,
            name: name.into(),
            kind: TableKind::Rel { from, to },
            properties,
        };
        schema.check_unique_properties()?;
        Ok(schema)
    }

    fn check_unique_properties(&self) -> Result<()> {
        for (i, prop) in self.properties.iter().enumerate() {
            if self.properties[..i].iter().any(|p| p.name == prop.name) {
                return Err(Error::binding(format!(
                    "Duplicate property {} in table {}",
                    prop.name, self.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self.kind, TableKind::Node { .. })
    }

    #[must_use]
    pub fn is_rel(&self) -> bool {
        matches!(self.kind, TableKind::Rel { .. })
    }

    /// Position of the primary key column, for node tables.
    #[must_use]
    pub fn primary_key_index(&self) -> Option<usize> {
        match self.kind {
            TableKind::Node { primary_key } => Some(primary_key),
            TableKind::Rel { .. } => None,
        }
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&PropertyDef> {
        self.primary_key_index().map(|i| &self.properties[i])
    }

    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name.as_str() == name)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name.as_str() == name)
    }

    /// Builds a full, schema-ordered property row from named assignments.
    ///
    /// Unassigned columns are `NULL`. Values are coerced to the column type.
    ///
    /// # Errors
    ///
    /// Fails on unknown properties, type mismatches and a missing or `NULL`
    /// primary key.
    pub fn build_row(&self, assignments: Vec<(PropertyKey, Value)>) -> Result<Vec<Value>> {
        let mut row = vec![Value::Null; self.properties.len()];
        for (key, value) in assignments {
            let idx = self.property_index(key.as_str()).ok_or_else(|| {
                Error::execution(format!("Table {} has no property {key}", self.name))
            })?;
            row[idx] = self.coerce(idx, value)?;
        }
        if let Some(pk) = self.primary_key_index()
            && row[pk].is_null()
        {
            return Err(Error::execution(format!(
                "Primary key {} of table {} must not be NULL",
                self.properties[pk].name, self.name
            )));
        }
        Ok(row)
    }

    /// Coerces `value` into the type of column `idx`.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the value does not fit the column.
    pub fn coerce(&self, idx: usize, value: Value) -> Result<Value> {
        let prop = &self.properties[idx];
        let found = value.type_name();
        prop.ty.coerce(value).ok_or_else(|| {
            Error::execution(format!(
                "Type mismatch for {}.{}: expected {}, found {found}",
                self.name, prop.name, prop.ty
            ))
        })
    }
}

/// All table definitions of one store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: BTreeMap<TableId, Arc<TableSchema>>,
    names: BTreeMap<ArcStr, TableId>,
    next_table_id: u32,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Arc<TableSchema>> {
        self.tables.get(&id)
    }

    #[must_use]
    pub fn table_by_name(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.names.get(name).and_then(|id| self.tables.get(id))
    }

    /// Looks up a node table, with a suggestion in the error if the name is
    /// a near miss.
    ///
    /// # Errors
    ///
    /// Returns a binding error if no node table has this name.
    pub fn node_table(&self, name: &str) -> Result<&Arc<TableSchema>> {
        self.lookup(name, true)
    }

    /// Looks up a rel table. See [`Catalog::node_table`].
    ///
    /// # Errors
    ///
    /// Returns a binding error if no rel table has this name.
    pub fn rel_table(&self, name: &str) -> Result<&Arc<TableSchema>> {
        self.lookup(name, false)
    }

    fn lookup(&self, name: &str, node: bool) -> Result<&Arc<TableSchema>> {
        match self.table_by_name(name) {
            Some(table) if table.is_node() == node => Ok(table),
            _ => {
                let what = if node { "Node table" } else { "Rel table" };
                let candidates: Vec<&str> = self
                    .tables
                    .values()
                    .filter(|t| t.is_node() == node)
                    .map(|t| t.name.as_str())
                    .collect();
                let mut err =
                    QueryError::new(QueryErrorKind::Binding, format!("{what} {name} does not exist"));
                if let Some(hint) = suggestion_hint(name, &candidates) {
                    err = err.with_hint(hint);
                }
                Err(err.into())
            }
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    pub fn node_tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values().filter(|t| t.is_node())
    }

    pub fn rel_tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values().filter(|t| t.is_rel())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The id the next created table will receive.
    #[must_use]
    pub fn next_table_id(&self) -> TableId {
        TableId::new(self.next_table_id)
    }

    /// Returns a catalog with `schema` added under a fresh id.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or a rel table references a missing
    /// node table.
    pub fn with_table(&self, mut schema: TableSchema) -> Result<(Self, TableId)> {
        if self.names.contains_key(schema.name.as_str()) {
            return Err(Error::execution(format!("Table {} already exists", schema.name)));
        }
        if let TableKind::Rel { from, to } = schema.kind {
            for end in [from, to] {
                if !self.table(end).is_some_and(|t| t.is_node()) {
                    return Err(Error::binding(format!(
                        "Rel table {} references unknown node table {end}",
                        schema.name
                    )));
                }
            }
        }
        let id = if schema.id.is_valid() { schema.id } else { self.next_table_id() };
        schema.id = id;

        let mut next = self.clone();
        next.names.insert(schema.name.clone(), id);
        next.tables.insert(id, Arc::new(schema));
        next.next_table_id = next.next_table_id.max(id.0 + 1);
        Ok((next, id))
    }

    /// Returns a catalog without table `id`.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown or a rel table still references it.
    pub fn without_table(&self, id: TableId) -> Result<Self> {
        let table = self
            .table(id)
            .ok_or_else(|| Error::execution(format!("Table {id} does not exist")))?;
        if table.is_node()
            && let Some(rel) = self.rel_tables().find(|r| {
                matches!(r.kind, TableKind::Rel { from, to } if from == id || to == id)
            })
        {
            return Err(Error::execution(format!(
                "Cannot drop node table {} because rel table {} references it",
                table.name, rel.name
            )));
        }
        let mut next = self.clone();
        next.names.remove(table.name.as_str());
        next.tables.remove(&id);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TableSchema {
        TableSchema::node(
            "Person",
            vec![
                PropertyDef::new("name", LogicalType::String),
                PropertyDef::new("age", LogicalType::Int64),
                PropertyDef::new("score", LogicalType::Float64),
            ],
            "name",
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let (catalog, person_id) = Catalog::new().with_table(person()).unwrap();
        let knows = TableSchema::rel("Knows", person_id, person_id, vec![]).unwrap();
        let (catalog, knows_id) = catalog.with_table(knows).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.node_table("Person").unwrap().id, person_id);
        assert_eq!(catalog.rel_table("Knows").unwrap().id, knows_id);
        assert!(catalog.node_table("Knows").is_err());
    }

    #[test]
    fn test_unknown_table_suggests() {
        let (catalog, _) = Catalog::new().with_table(person()).unwrap();
        let err = catalog.node_table("Peson").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Binding error: Node table Peson does not exist (did you mean 'Person'?)"
        );
    }

    #[test]
    fn test_duplicate_table() {
        let (catalog, _) = Catalog::new().with_table(person()).unwrap();
        assert!(catalog.with_table(person()).is_err());
    }

    #[test]
    fn test_primary_key_validation() {
        let bad = TableSchema::node("T", vec![PropertyDef::new("x", LogicalType::Float64)], "x");
        assert!(bad.is_err());
        let missing = TableSchema::node("T", vec![PropertyDef::new("x", LogicalType::Int64)], "y");
        assert!(missing.is_err());
    }

    #[test]
    fn test_drop_referenced_table() {
        let (catalog, person_id) = Catalog::new().with_table(person()).unwrap();
        let knows = TableSchema::rel("Knows", person_id, person_id, vec![]).unwrap();
        let (catalog, knows_id) = catalog.with_table(knows).unwrap();

        assert!(catalog.without_table(person_id).is_err());
        let catalog = catalog.without_table(knows_id).unwrap();
        let catalog = catalog.without_table(person_id).unwrap();
        assert!(catalog.is_empty());
        // Ids are never reused.
        assert_eq!(catalog.next_table_id(), TableId::new(2));
    }

    #[test]
    fn test_build_row() {
        let schema = person();
        let row = schema
            .build_row(vec![
                (PropertyKey::new("age"), Value::Int64(30)),
                (PropertyKey::new("name"), Value::from("Alice")),
                (PropertyKey::new("score"), Value::Int64(7)),
            ])
            .unwrap();
        assert_eq!(row, vec![Value::from("Alice"), Value::Int64(30), Value::Float64(7.0)]);

        assert!(schema.build_row(vec![(PropertyKey::new("age"), Value::Int64(1))]).is_err());
        assert!(
            schema
                .build_row(vec![
                    (PropertyKey::new("name"), Value::from("Bob")),
                    (PropertyKey::new("age"), Value::from("old")),
                ])
                .is_err()
        );
    }
}
