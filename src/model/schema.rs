use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::model::error::SchemaError;
use crate::parser::document::SchemaDocument;
use crate::parser::names::{fold_identifier, normalize_relation_name};

const TEXT_TYPES: &[&str] = &[
    "text",
    "varchar",
    "character varying",
    "char",
    "character",
    "bpchar",
    "name",
];

const NUMERIC_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "int",
    "int2",
    "int4",
    "int8",
    "bigint",
    "numeric",
    "decimal",
    "real",
    "double precision",
    "float4",
    "float8",
    "serial",
    "bigserial",
];

/// A typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type, lowercased, without length modifiers.
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl Column {
    /// Case-sensitive string types (`text`, `varchar`, `char`, ...).
    pub fn is_text(&self) -> bool {
        TEXT_TYPES.contains(&self.data_type.as_str())
    }

    /// `citext` compares case-insensitively on its own.
    pub fn is_case_insensitive(&self) -> bool {
        self.data_type == "citext"
    }

    /// `boolean` / `bool`.
    pub fn is_boolean(&self) -> bool {
        matches!(self.data_type.as_str(), "boolean" | "bool")
    }

    /// Integer and floating point types.
    pub fn is_numeric(&self) -> bool {
        NUMERIC_TYPES.contains(&self.data_type.as_str())
    }
}

/// A table and its ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Normalized table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Look up a column by exact (already folded) name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the table declares `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// One index from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name, or its position in the catalog.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Key columns in order.
    pub columns: Vec<String>,
}

/// Optional index catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCatalog {
    indexes: Vec<Index>,
}

impl IndexCatalog {
    /// All indexes, in catalog order.
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Whether some index on `table` has `column` as its leading key.
    pub fn has_leading(&self, table: &str, column: &str) -> bool {
        self.indexes
            .iter()
            .any(|idx| idx.table == table && idx.columns.first().is_some_and(|c| c == column))
    }
}

/// The loaded schema. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
    indexes: Option<IndexCatalog>,
}

impl Schema {
    /// Look up a table; the name is normalized first.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&normalize_relation_name(name))
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Table names in order.
    pub fn table_names(&self) -> BTreeSet<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// The index catalog, if one was supplied.
    pub fn index_catalog(&self) -> Option<&IndexCatalog> {
        self.indexes.as_ref()
    }
}

fn normalize_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let base = lowered.split('(').next().unwrap_or_default().trim();
    base.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validate and build a [`Schema`] from its document.
pub fn load_schema(doc: SchemaDocument) -> Result<Schema, SchemaError> {
    let mut tables = BTreeMap::new();

    for def in doc.tables {
        let name = normalize_relation_name(&def.name);
        if name.is_empty() {
            return Err(SchemaError::EmptyTableName);
        }
        if tables.contains_key(&name) {
            return Err(SchemaError::DuplicateTable { table: name });
        }

        let mut columns: Vec<Column> = Vec::with_capacity(def.columns.len());
        for col in def.columns {
            let col_name = fold_identifier(&col.name);
            if col_name.is_empty() {
                return Err(SchemaError::EmptyColumnName { table: name });
            }
            if columns.iter().any(|c| c.name == col_name) {
                return Err(SchemaError::DuplicateColumn {
                    table: name,
                    column: col_name,
                });
            }
            columns.push(Column {
                name: col_name,
                data_type: normalize_type(&col.data_type),
                nullable: col.nullable,
            });
        }
        tables.insert(name.clone(), Table { name, columns });
    }

    let indexes = match doc.indexes {
        None => None,
        Some(defs) => {
            let mut indexes = Vec::with_capacity(defs.len());
            for (pos, def) in defs.into_iter().enumerate() {
                let label = def.name.clone().unwrap_or_else(|| format!("#{pos}"));
                let table_name = normalize_relation_name(&def.table);
                let Some(table) = tables.get(&table_name) else {
                    return Err(SchemaError::IndexUnknownTable {
                        index: label,
                        table: table_name,
                    });
                };
                if def.columns.is_empty() {
                    return Err(SchemaError::EmptyIndex {
                        index: label,
                        table: table_name,
                    });
                }
                let mut columns = Vec::with_capacity(def.columns.len());
                for raw in &def.columns {
                    let column = fold_identifier(raw);
                    if !table.has_column(&column) {
                        return Err(SchemaError::IndexUnknownColumn {
                            index: label,
                            table: table_name,
                            column,
                        });
                    }
                    columns.push(column);
                }
                indexes.push(Index {
                    name: label,
                    table: table_name,
                    columns,
                });
            }
            Some(IndexCatalog { indexes })
        }
    };

    debug!(
        tables = tables.len(),
        indexes = indexes.as_ref().map(|c| c.indexes.len()),
        "schema loaded"
    );
    Ok(Schema { tables, indexes })
}
