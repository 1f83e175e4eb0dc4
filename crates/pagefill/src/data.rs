//! Data source collaborator.
//!
//! Iterating data and detecting group breaks happen outside the engine. A
//! [`Record`] carries the field values and the names of the groups that
//! changed with it.

use std::collections::HashMap;

use pagefill_core::{FillResult, Value};

/// One data record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: HashMap<String, Value>,
    pub changed_groups: Vec<String>,
}

impl Record {
    /// Create a record from field pairs.
    pub fn new<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            changed_groups: Vec::new(),
        }
    }

    /// Mark a group as changed with this record.
    pub fn with_changed_group(mut self, group: impl Into<String>) -> Self {
        self.changed_groups.push(group.into());
        self
    }
}

/// A source of records for one filler.
pub trait DataSource: Send {
    /// The next record, or `None` once the source is exhausted.
    fn next(&mut self) -> FillResult<Option<Record>>;

    /// Restart from the first record.
    fn rewind(&mut self) -> FillResult<()>;
}

/// In-memory data source.
#[derive(Debug, Clone, Default)]
pub struct VecDataSource {
    records: Vec<Record>,
    position: usize,
}

impl VecDataSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    /// A source yielding `count` records with a single integer field.
    pub fn numbered(field: &str, count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| Record::new([(field, Value::Int(i as i64))]))
                .collect(),
        )
    }

    /// A source with no records.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl DataSource for VecDataSource {
    fn next(&mut self) -> FillResult<Option<Record>> {
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    fn rewind(&mut self) -> FillResult<()> {
        self.position = 0;
        Ok(())
    }
}
