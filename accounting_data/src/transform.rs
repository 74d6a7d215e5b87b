use serde::Deserialize;
use thiserror::Error;

use crate::{
    classify::{QueueRule, ResourceRule, Unclassified},
    formats::{delimited, InputFormat, OutputColumn},
    job::{Destination, FieldRef, JobRecord, RecordError},
    mapping::AccountMapping,
    selector::SourceFile,
};

/// Which part of the account string is the site-local charge id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChargeId {
    #[default]
    Whole,
    /// first `len` characters, e.g. `bbka` of `bbka-delta-gpu`
    Prefix { len: usize },
}

impl ChargeId {
    pub fn extract<'a>(&self, account: &'a str) -> &'a str {
        match self {
            ChargeId::Whole => account,
            ChargeId::Prefix { len } => match account.char_indices().nth(*len) {
                Some((end, _)) => &account[..end],
                None => account,
            },
        }
    }
}

/// What the account field is rewritten to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantRule {
    /// looked up in the account mapping, records without a match are dropped
    Mapped,
    Unchanged,
    /// `prefix` followed by `take` characters of the account starting at `skip`, e.g. `ai2401` -> `NAIRR2401`
    Rewrite { prefix: String, skip: usize, take: usize },
    /// part `index` of the source file name split on `separator`
    FilenamePart { separator: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountRule {
    pub field: FieldRef,
    /// records whose account doesn't start with this are dropped
    #[serde(default)]
    pub require_prefix: Option<String>,
    #[serde(default)]
    pub charge_id: ChargeId,
    pub grant: GrantRule,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("{0}")]
    Unclassified(Unclassified),
    #[error("grants are looked up in an account mapping, but none is configured")]
    NoMapping,
    #[error("`{filename}` has no part {index} when split on `{separator}`")]
    FilenamePart {
        filename: String,
        separator: String,
        index: usize,
    },
    #[error("output column {0:?} needs a matching queue rule with `cores_per_node`")]
    NoCoresPerNode(OutputColumn),
    #[error("field `{field}`: `{value}` is not a number")]
    NotANumber { field: String, value: String },
    #[error("header rows must be remapped with `columns` before they can be written")]
    NoColumns,
}

impl TransformError {
    /// Bad input data, as opposed to a bad site config.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, TransformError::Record(_) | TransformError::NotANumber { .. })
    }
}

/// Why a record was dropped without complaint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    PrefixMismatch,
    Unmapped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Keep { destination: Destination, job: JobRecord },
    Discard(Discard),
}

/// Applies one site's record rules.
#[derive(Debug, Clone, Copy)]
pub struct Transformer<'a> {
    pub account: &'a AccountRule,
    pub resource: &'a ResourceRule,
    pub input: &'a InputFormat,
    pub mapping: Option<&'a AccountMapping>,
}

impl<'a> Transformer<'a> {
    pub fn apply(&self, mut job: JobRecord, source: &SourceFile) -> Result<Outcome, TransformError> {
        let account = job.get(&self.account.field)?;

        if let Some(prefix) = &self.account.require_prefix {
            if !account.starts_with(prefix.as_str()) {
                return Ok(Outcome::Discard(Discard::PrefixMismatch));
            }
        }

        let grant = match &self.account.grant {
            GrantRule::Mapped => {
                let mapping = self.mapping.ok_or(TransformError::NoMapping)?;
                let charge_id = self.account.charge_id.extract(&account);
                match mapping.lookup(charge_id) {
                    Some(grant) => grant.to_string(),
                    None => return Ok(Outcome::Discard(Discard::Unmapped(charge_id.to_owned()))),
                }
            }
            GrantRule::Unchanged => account.clone(),
            GrantRule::Rewrite { prefix, skip, take } => {
                format!("{prefix}{}", account.chars().skip(*skip).take(*take).collect::<String>())
            }
            GrantRule::FilenamePart { separator, index } => source
                .filename
                .split(separator.as_str())
                .nth(*index)
                .ok_or_else(|| TransformError::FilenamePart {
                    filename: source.filename.clone(),
                    separator: separator.clone(),
                    index: *index,
                })?
                .to_owned(),
        };

        // classified on the original account, before it is overwritten
        let classification = self
            .resource
            .classify(&job, &account)?
            .map_err(TransformError::Unclassified)?;

        job.set(&self.account.field, grant)?;

        if let (InputFormat::Json(options), JobRecord::Json(fields)) = (self.input, &mut job) {
            for fallback in &options.fallbacks {
                fallback.apply(fields);
            }
        }

        if let JobRecord::Keyed(_) = job {
            let InputFormat::Delimited(options) = self.input else {
                return Err(TransformError::NoColumns);
            };
            if options.columns.is_empty() {
                return Err(TransformError::NoColumns);
            }
            job = JobRecord::Positional(remap(&job, &options.columns, classification.rule)?);
        }

        Ok(Outcome::Keep {
            destination: classification.destination,
            job,
        })
    }
}

fn remap(job: &JobRecord, columns: &[OutputColumn], rule: Option<&QueueRule>) -> Result<Vec<String>, TransformError> {
    let field = |name: &str| job.get(&FieldRef::Name(name.to_owned()));
    columns
        .iter()
        .map(|column| -> Result<String, TransformError> {
            Ok(match column {
                OutputColumn::Field { name } => field(name)?,
                OutputColumn::Const { value } => value.clone(),
                OutputColumn::Elapsed { start, end } => delimited::elapsed(&field(start)?, &field(end)?),
                OutputColumn::Cores { nodes } => {
                    let per_node = rule
                        .and_then(|rule| rule.cores_per_node)
                        .ok_or_else(|| TransformError::NoCoresPerNode(column.clone()))?;
                    let count = field(nodes)?;
                    let count = count.trim().parse::<u64>().map_err(|_| TransformError::NotANumber {
                        field: nodes.clone(),
                        value: count.clone(),
                    })?;
                    (u64::from(per_node) * count).to_string()
                }
                OutputColumn::Gres => rule.and_then(|rule| rule.gres.clone()).unwrap_or_default(),
            })
        })
        .collect()
}
