use std::{collections::HashMap, fmt};

use derive_more::derive::{Deref, Display, From, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Normalized cross-site grant identifier, e.g. `nairr240123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deref, Into, From, Display, Serialize)]
pub struct GrantId(pub String);

/// Name of the destination resource (cluster, partition group, ...) a job is filed under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Into, From, Display, Serialize)]
pub struct ResourceName(pub String);

/// Where a bucket ends up inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Destination {
    /// directly inside the output directory
    Root,
    /// inside `<output_dir>/<resource>/`
    Resource(ResourceName),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Root => f.write_str("<root>"),
            Destination::Resource(name) => write!(f, "{name}"),
        }
    }
}

/// Addresses a field inside a record: a key for JSON and header-keyed rows, a 0-based index for positional rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Column(usize),
    Name(String),
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Column(index) => write!(f, "column {index}"),
            FieldRef::Name(name) => write!(f, "field `{name}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("row has {len} columns, column {index} requested")]
    MissingColumn { index: usize, len: usize },
    #[error("field `{0}` is missing or null")]
    MissingField(String),
    #[error("field `{0}` is not a string or number")]
    NotScalar(String),
    #[error("{field} cannot address a {shape} record")]
    WrongAddressing { field: FieldRef, shape: &'static str },
}

/// One job as read from an accounting file.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRecord {
    /// an entry of the `jobs` array of `sacct --json` style output
    Json(Map<String, Value>),
    /// a headerless `sacct -P` line split on the delimiter
    Positional(Vec<String>),
    /// a `sacct -P` line with a header row, keyed by column name
    Keyed(HashMap<String, String>),
}

/// Positional access that refuses to read past the end of a short row.
pub fn column(fields: &[String], index: usize) -> Result<&str, RecordError> {
    fields.get(index).map(String::as_str).ok_or(RecordError::MissingColumn {
        index,
        len: fields.len(),
    })
}

impl JobRecord {
    fn shape(&self) -> &'static str {
        match self {
            JobRecord::Json(_) => "json",
            JobRecord::Positional(_) => "positional",
            JobRecord::Keyed(_) => "keyed",
        }
    }

    pub fn get(&self, field: &FieldRef) -> Result<String, RecordError> {
        match (self, field) {
            (JobRecord::Positional(fields), FieldRef::Column(index)) => column(fields, *index).map(str::to_owned),
            (JobRecord::Keyed(row), FieldRef::Name(name)) => {
                row.get(name).cloned().ok_or_else(|| RecordError::MissingField(name.clone()))
            }
            (JobRecord::Json(job), FieldRef::Name(name)) => match job.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                Some(Value::Null) | None => Err(RecordError::MissingField(name.clone())),
                Some(_) => Err(RecordError::NotScalar(name.clone())),
            },
            (record, field) => Err(RecordError::WrongAddressing {
                field: field.clone(),
                shape: record.shape(),
            }),
        }
    }

    pub fn set(&mut self, field: &FieldRef, value: String) -> Result<(), RecordError> {
        let shape = self.shape();
        match (self, field) {
            (JobRecord::Positional(fields), FieldRef::Column(index)) => {
                let len = fields.len();
                let slot = fields.get_mut(*index).ok_or(RecordError::MissingColumn { index: *index, len })?;
                *slot = value;
            }
            (JobRecord::Keyed(row), FieldRef::Name(name)) => {
                row.insert(name.clone(), value);
            }
            (JobRecord::Json(job), FieldRef::Name(name)) => {
                job.insert(name.clone(), Value::String(value));
            }
            (_, field) => {
                return Err(RecordError::WrongAddressing {
                    field: field.clone(),
                    shape,
                })
            }
        }
        Ok(())
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(fields: &[&str]) -> JobRecord {
        JobRecord::Positional(fields.iter().map(|f| f.to_string()).collect())
    }

    #[test]
    fn column__short_row__rejected() {
        let fields = vec!["1".to_string(), "2".to_string()];
        assert_eq!(column(&fields, 1), Ok("2"));
        assert_eq!(column(&fields, 5), Err(RecordError::MissingColumn { index: 5, len: 2 }));
    }

    #[test]
    fn JobRecord__get__json_scalars() {
        let Value::Object(job) = json!({"account": "abcd", "nodes": 4, "user": null, "tres": {"cpu": 1}}) else {
            unreachable!()
        };
        let job = JobRecord::Json(job);
        assert_eq!(job.get(&FieldRef::Name("account".into())), Ok("abcd".to_string()));
        assert_eq!(job.get(&FieldRef::Name("nodes".into())), Ok("4".to_string()));
        assert_eq!(
            job.get(&FieldRef::Name("user".into())),
            Err(RecordError::MissingField("user".into()))
        );
        assert_eq!(job.get(&FieldRef::Name("tres".into())), Err(RecordError::NotScalar("tres".into())));
        assert!(matches!(
            job.get(&FieldRef::Column(0)),
            Err(RecordError::WrongAddressing { shape: "json", .. })
        ));
    }

    #[test]
    fn JobRecord__set__positional_out_of_range() {
        let mut job = row(&["1", "2", "3"]);
        job.set(&FieldRef::Column(2), "x".into()).unwrap();
        assert_eq!(job, row(&["1", "2", "x"]));
        assert_eq!(
            job.set(&FieldRef::Column(3), "y".into()),
            Err(RecordError::MissingColumn { index: 3, len: 3 })
        );
    }

    #[test]
    fn Destination__ordering__root_first() {
        let mut destinations = vec![
            Destination::Resource(ResourceName("b".into())),
            Destination::Root,
            Destination::Resource(ResourceName("a".into())),
        ];
        destinations.sort();
        assert_eq!(destinations[0], Destination::Root);
        assert_eq!(destinations[1], Destination::Resource(ResourceName("a".into())));
    }
}
