use std::collections::HashSet;

use color_eyre::Result;
use futures::{pin_mut, Stream, TryStreamExt as _};

/// How a [`Lookup`] treats a record it already holds.
#[derive(Debug)]
pub enum Dedup<T> {
    /// keep everything
    None,
    /// drop records equal to one already present
    Exact,
    /// drop records whose key is already present
    ByKey(fn(&T) -> String),
}

impl<T> Clone for Dedup<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Dedup<T> {}

/// An ordered list of lookup records, rebuilt on every run. Records keep the position they were first added at.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    records: Vec<T>,
    keys: HashSet<String>,
    dedup: Dedup<T>,
}

impl<T: PartialEq> Lookup<T> {
    pub fn new(dedup: Dedup<T>) -> Self {
        Self {
            records: Vec::new(),
            keys: HashSet::new(),
            dedup,
        }
    }

    /// Starts from the records of a previous export. They are all kept, even if they collide with each other.
    pub fn seeded(existing: impl IntoIterator<Item = T>, dedup: Dedup<T>) -> Self {
        let mut lookup = Self::new(dedup);
        for record in existing {
            if let Dedup::ByKey(key) = &lookup.dedup {
                lookup.keys.insert(key(&record));
            }
            lookup.records.push(record);
        }
        lookup
    }

    /// Returns whether the record was added.
    pub fn push(&mut self, record: T) -> bool {
        let duplicate = match &self.dedup {
            Dedup::None => false,
            Dedup::Exact => self.records.contains(&record),
            Dedup::ByKey(key) => !self.keys.insert(key(&record)),
        };
        if !duplicate {
            self.records.push(record);
        }
        !duplicate
    }

    /// Projects every row of `rows` into a record and adds it. Returns how many records were added.
    pub async fn extend_from<R, E, S, F>(&mut self, rows: S, mut project: F) -> Result<usize>
    where
        S: Stream<Item = Result<R, E>>,
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut(R) -> Result<T>,
    {
        pin_mut!(rows);
        let mut added = 0;
        while let Some(row) = rows.try_next().await? {
            if self.push(project(row)?) {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.records
    }
}
