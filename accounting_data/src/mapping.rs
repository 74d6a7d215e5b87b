use std::{collections::HashMap, path::PathBuf};

use calamine::{Data, Reader as _};
use color_eyre::{
    eyre::{eyre, Context as _},
    Result, Section as _,
};
use itertools::Itertools as _;
use serde::Deserialize;
use tracing::{info, warn};

use crate::job::GrantId;

/// Where the charge id -> grant table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingSource {
    Spreadsheet {
        path: PathBuf,
        /// first sheet if unset
        #[serde(default)]
        sheet: Option<String>,
        key_column: String,
        grant_column: String,
        #[serde(default)]
        lowercase_keys: bool,
    },
    Table {
        entries: Vec<MappingEntry>,
        #[serde(default)]
        lowercase_keys: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappingEntry {
    pub charge_id: String,
    pub grant: String,
}

/// Site-local charge id -> normalized (lower case) grant id. Built once per run, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMapping(HashMap<String, GrantId>);

impl AccountMapping {
    pub fn load(source: &MappingSource) -> Result<Self> {
        match source {
            MappingSource::Spreadsheet {
                path,
                sheet,
                key_column,
                grant_column,
                lowercase_keys,
            } => {
                let mapping = Self::from_spreadsheet(path, sheet.as_deref(), key_column, grant_column, *lowercase_keys)
                    .wrap_err_with(|| format!("loading account mapping from {path:?}"))?;
                info!(entries = mapping.len(), ?path, "Loaded account mapping");
                Ok(mapping)
            }
            MappingSource::Table {
                entries,
                lowercase_keys,
            } => Ok(Self::from_pairs(
                entries.iter().map(|e| (e.charge_id.as_str(), e.grant.as_str())),
                *lowercase_keys,
            )),
        }
    }

    /// Later pairs win over earlier ones with the same key. Empty keys or grants are ignored.
    pub fn from_pairs<K, G>(pairs: impl IntoIterator<Item = (K, G)>, lowercase_keys: bool) -> Self
    where
        K: AsRef<str>,
        G: AsRef<str>,
    {
        Self(
            pairs
                .into_iter()
                .filter_map(|(key, grant)| {
                    let key = key.as_ref().trim();
                    let grant = grant.as_ref().trim();
                    if key.is_empty() || grant.is_empty() {
                        return None;
                    }
                    let key = if lowercase_keys { key.to_lowercase() } else { key.to_owned() };
                    Some((key, GrantId(grant.to_lowercase())))
                })
                .collect(),
        )
    }

    /// Reads `key_column` and `grant_column` (named in the first row) of a sheet.
    pub fn from_spreadsheet(
        path: &std::path::Path,
        sheet: Option<&str>,
        key_column: &str,
        grant_column: &str,
        lowercase_keys: bool,
    ) -> Result<Self> {
        let mut workbook = calamine::open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names();
        let sheet = match sheet {
            Some(sheet) => sheet.to_owned(),
            None => sheet_names.first().cloned().ok_or_else(|| eyre!("workbook has no sheets"))?,
        };
        let range = workbook
            .worksheet_range(&sheet)
            .wrap_err_with(|| format!("reading sheet `{sheet}`"))
            .with_note(|| format!("available sheets: {}", sheet_names.join(", ")))?;

        let mut rows = range.rows();
        let header = rows.next().ok_or_else(|| eyre!("sheet `{sheet}` is empty"))?;
        let header = header.iter().map(cell_str).collect_vec();
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| eyre!("sheet `{sheet}` has no column `{name}`"))
                .with_note(|| format!("columns: {}", header.join(", ")))
        };
        let key_idx = find(key_column)?;
        let grant_idx = find(grant_column)?;

        let pairs = rows
            .enumerate()
            .filter_map(|(i, row)| {
                let key = row.get(key_idx).map(cell_str).unwrap_or_default();
                let grant = row.get(grant_idx).map(cell_str).unwrap_or_default();
                if key.trim().is_empty() {
                    return None;
                }
                if grant.trim().is_empty() {
                    warn!("{sheet} row {}: no grant for charge id `{key}`, ignoring", i + 2);
                    return None;
                }
                Some((key, grant))
            })
            .collect_vec();

        Ok(Self::from_pairs(pairs, lowercase_keys))
    }

    pub fn lookup(&self, charge_id: &str) -> Option<&GrantId> {
        self.0.get(charge_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Spreadsheet cell as text. Whole floats lose their `.0` (account numbers are often stored as numbers).
fn cell_str(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => format!("{f}"),
        Data::Int(i) => format!("{i}"),
        Data::Bool(b) => format!("{b}"),
        other => format!("{other:?}"),
    }
}
