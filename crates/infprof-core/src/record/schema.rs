//! Ordered column sets with inferred value kinds.

use std::collections::{BTreeMap, BTreeSet};

use super::{FlatRecord, ValueKind};

/// One column of a [`Schema`].
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    /// Kind of the first non-null value seen, `None` if the column never
    /// held a value (pre-declared columns). Every column is nullable.
    pub kind: Option<ValueKind>,
}

/// Ordered set of distinct keys. Columns are kept sorted by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Schema of a single record (streaming mode freezes this).
    pub fn from_record(record: &FlatRecord) -> Self {
        Self::union(std::slice::from_ref(record))
    }

    /// Union of the keys of every record (batch mode).
    ///
    /// A column's kind is taken from the first record, in the given
    /// order, that holds a value for it.
    pub fn union<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FlatRecord>,
    {
        let mut kinds: BTreeMap<&str, ValueKind> = BTreeMap::new();
        for record in records {
            for (key, value) in record {
                kinds.entry(key.as_str()).or_insert_with(|| value.kind());
            }
        }

        let columns = kinds
            .into_iter()
            .map(|(name, kind)| Column {
                name: name.to_string(),
                kind: Some(kind),
            })
            .collect();
        Self { columns }
    }

    /// Adds columns that are not already present, keeping sorted order.
    pub fn with_declared(mut self, names: &[String]) -> Self {
        let existing: BTreeSet<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        for name in names {
            if !existing.contains(name) {
                self.columns.push(Column {
                    name: name.clone(),
                    kind: None,
                });
            }
        }
        self.columns.sort_by(|a, b| a.name.cmp(&b.name));
        self.columns.dedup_by(|a, b| a.name == b.name);
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
