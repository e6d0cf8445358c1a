//! Attribute schema: the bijection between attribute names and the physical
//! columns (`attribute_0`, `attribute_1`, …) that hold their values.
//!
//! Columns are allocated from a counter that only grows. Nothing is ever
//! removed or renamed, so a column id stays bound to one attribute name for
//! the lifetime of the document, across reopens.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{LogFile, LogWriter, Record};

/// Prefix of every generated column name.
pub const COLUMN_PREFIX: &str = "attribute_";

/// Identifies one attribute column. The value is the counter it was
/// allocated from, which is also the slot index in event rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(pub u32);

impl ColumnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Column name as it appears in the attribute header, e.g. `attribute_3`.
    pub fn column_name(self) -> String {
        format!("{COLUMN_PREFIX}{}", self.0)
    }

    /// Parse a name produced by [`column_name`](Self::column_name).
    pub fn parse(name: &str) -> Option<Self> {
        let digits = name.strip_prefix(COLUMN_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(ColumnId)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COLUMN_PREFIX}{}", self.0)
    }
}

/// In-memory attribute header. After load this is the source of truth;
/// the persisted columns are only read again on the next open.
#[derive(Debug, Default, Clone)]
pub struct AttributeSchema {
    /// Indexed by column id.
    names: Vec<String>,
    columns: HashMap<String, ColumnId>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of columns allocated so far.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The id the next allocation will receive.
    pub fn next_column(&self) -> ColumnId {
        ColumnId(self.names.len() as u32)
    }

    pub fn resolve_column(&self, attribute_name: &str) -> Option<ColumnId> {
        self.columns.get(attribute_name).copied()
    }

    pub fn resolve_attribute(&self, column: ColumnId) -> Option<&str> {
        self.names.get(column.index()).map(String::as_str)
    }

    /// Attribute name stored in row slot `slot`.
    pub fn slot_attribute(&self, slot: usize) -> Result<&str> {
        self.names
            .get(slot)
            .map(String::as_str)
            .ok_or(Error::SchemaInconsistency { column: slot })
    }

    /// All attribute names in column order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// `(column, attribute name)` pairs in column order.
    pub fn columns(&self) -> impl Iterator<Item = (ColumnId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (ColumnId(i as u32), name.as_str()))
    }

    /// Names from `names` with no column yet, sorted and deduplicated.
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        names
            .into_iter()
            .filter(|name| !self.columns.contains_key(*name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Bind `column` to `attribute_name`. The only way a mapping enters the
    /// schema: the column must be the next counter value and the name must
    /// be unmapped.
    pub fn insert(&mut self, column: ColumnId, attribute_name: String) -> Result<()> {
        if column != self.next_column() {
            return Err(Error::InternalInconsistency(format!(
                "column {column} allocated out of order, expected {}",
                self.next_column()
            )));
        }
        if let Some(existing) = self.columns.get(&attribute_name) {
            return Err(Error::InternalInconsistency(format!(
                "attribute {attribute_name:?} already mapped to {existing}, refusing {column}"
            )));
        }
        self.columns.insert(attribute_name.clone(), column);
        self.names.push(attribute_name);
        Ok(())
    }

    /// Make sure every name in `attribute_names` has a column, persisting the
    /// new ones through `log` before they become visible in the schema.
    ///
    /// The new column frames go out as a single write. If that write fails
    /// the schema is left untouched.
    pub fn ensure_columns<F: LogFile>(
        &mut self,
        attribute_names: &[&str],
        log: &mut LogWriter<F>,
    ) -> Result<BTreeMap<String, ColumnId>> {
        let missing = self.missing(attribute_names.iter().copied());

        if !missing.is_empty() {
            let first = self.next_column().0;
            let mut frames = Vec::new();
            for (offset, name) in missing.iter().enumerate() {
                frames.extend(
                    Record::AttributeColumn {
                        column: first + offset as u32,
                        attribute_name: name.to_string(),
                    }
                    .encode(),
                );
            }

            log.append(&frames)?;

            for name in &missing {
                let column = self.next_column();
                self.insert(column, name.to_string())?;
                debug!(column = %column, attribute = %name, "allocated attribute column");
            }
        }

        attribute_names
            .iter()
            .map(|name| {
                self.resolve_column(name)
                    .map(|column| (name.to_string(), column))
                    .ok_or_else(|| {
                        Error::InternalInconsistency(format!("no column for attribute {name:?}"))
                    })
            })
            .collect()
    }
}
