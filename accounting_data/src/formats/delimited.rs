use std::{collections::HashMap, io};

use chrono::NaiveDateTime;
use itertools::Itertools as _;
use serde::Deserialize;

use super::MalformedInput;
use crate::job::JobRecord;

fn default_delimiter() -> String {
    "|".to_owned()
}

/// `sacct -P` style text, one job per line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DelimitedOptions {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// first line names the columns; records are keyed by column name and must be remapped with `columns`
    #[serde(default)]
    pub header: bool,
    /// fields from this index to the end are joined with `!` into one (job names containing the delimiter)
    #[serde(default)]
    pub collapse_from: Option<usize>,
    /// constant columns inserted in order, after collapsing
    #[serde(default)]
    pub inserts: Vec<ColumnInsert>,
    /// keep only the first `width` columns
    #[serde(default)]
    pub width: Option<usize>,
    /// output layout for header mode
    #[serde(default)]
    pub columns: Vec<OutputColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnInsert {
    pub at: usize,
    pub value: String,
}

/// One column of a remapped output row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputColumn {
    /// copied from the input column with this header name
    Field { name: String },
    Const { value: String },
    /// `M:S` between two `%Y-%m-%dT%H:%M:%S` timestamps
    Elapsed { start: String, end: String },
    /// matched queue rule's `cores_per_node` times the node count column
    Cores { nodes: String },
    /// matched queue rule's `gres`
    Gres,
}

const SACCT_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S";

/// `M:S` where M is the total number of minutes. Empty when either end isn't a timestamp (`None`, `Unknown`).
pub fn elapsed(start: &str, end: &str) -> String {
    let (Ok(start), Ok(end)) = (
        NaiveDateTime::parse_from_str(start, SACCT_TIMESTAMP),
        NaiveDateTime::parse_from_str(end, SACCT_TIMESTAMP),
    ) else {
        return String::new();
    };
    let seconds = (end - start).num_seconds().max(0);
    format!("{}:{}", seconds / 60, seconds % 60)
}

/// Lines of `input` split on `delimiter`, quoted fields kept whole, blank lines skipped. Each row comes with its
/// 1-based line number.
fn rows(input: &str, delimiter: u8) -> impl Iterator<Item = Result<(u64, Vec<String>), MalformedInput>> + '_ {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(input.as_bytes())
        .into_records()
        .map(|record| -> Result<_, MalformedInput> {
            let record = record?;
            let line = record.position().map_or(0, |position| position.line());
            Ok((line, record.iter().map(String::from).collect_vec()))
        })
        .filter(|row| !matches!(row, Ok((_, fields)) if fields.iter().all(|field| field.trim().is_empty())))
}

fn delimiter_byte(delimiter: &str) -> u8 {
    delimiter.as_bytes().first().copied().unwrap_or(b'|')
}

/// Given output from `sacct -P` (header in the first line), builds one map per line.
///
/// Returns a (header, rows) tuple.
pub fn sacct_csvlike(
    input: &str,
    delimiter: &str,
) -> Result<(Vec<String>, Vec<HashMap<String, String>>), MalformedInput> {
    let mut lines = rows(input, delimiter_byte(delimiter));
    let header = match lines.next() {
        Some(header) => header?.1,
        None => return Err(MalformedInput::MissingHeader),
    };

    let rows = lines
        .map(|row| -> Result<HashMap<String, String>, MalformedInput> {
            let (line, fields) = row?;
            if fields.len() > header.len() {
                return Err(MalformedInput::TooManyFields {
                    line,
                    fields: fields.len(),
                    header: header.len(),
                });
            }
            Ok(header.iter().cloned().zip(fields).collect())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((header, rows))
}

impl DelimitedOptions {
    pub fn parse(&self, input: &str) -> Result<Vec<JobRecord>, MalformedInput> {
        if self.header {
            let (_header, rows) = sacct_csvlike(input, &self.delimiter)?;
            return Ok(rows.into_iter().map(JobRecord::Keyed).collect());
        }

        rows(input, delimiter_byte(&self.delimiter))
            .map_ok(|(_, fields)| JobRecord::Positional(self.fixup(fields)))
            .collect()
    }

    /// Collapses, inserts and truncates a positional row.
    pub fn fixup(&self, mut fields: Vec<String>) -> Vec<String> {
        if let Some(from) = self.collapse_from {
            if fields.len() > from + 1 {
                let tail = fields.split_off(from).join("!");
                fields.push(tail);
            }
        }
        for insert in &self.inserts {
            let at = insert.at.min(fields.len());
            fields.insert(at, insert.value.clone());
        }
        if let Some(width) = self.width {
            fields.truncate(width);
        }
        fields
    }

    pub fn serialize(&self, jobs: &[JobRecord]) -> io::Result<Vec<u8>> {
        let rows = jobs
            .iter()
            .map(|job| match job {
                JobRecord::Positional(fields) => Ok(fields),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("only positional records can be written as delimited text, got {other:?}"),
                )),
            })
            .collect::<io::Result<Vec<_>>>()?;

        if self.columns.is_empty() {
            let mut out = Vec::new();
            for fields in rows {
                out.extend_from_slice(fields.join(&self.delimiter).as_bytes());
                out.push(b'\n');
            }
            return Ok(out);
        }

        // remapped rows are quoted where needed, like sacct's own parsable output readers expect
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_byte(&self.delimiter))
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        for fields in rows {
            writer.write_record(fields)?;
        }
        writer.into_inner().map_err(|e| e.into_error())
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DelimitedOptions {
        DelimitedOptions {
            delimiter: "|".into(),
            header: false,
            collapse_from: None,
            inserts: vec![],
            width: None,
            columns: vec![],
        }
    }

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn sacct_csvlike__header_keys() {
        let input = "JobID|Account|Partition\n12|nairr1|normal\n13|other|gpu-a100\n";
        let (header, rows) = sacct_csvlike(input, "|").unwrap();
        assert_eq!(header, ["JobID", "Account", "Partition"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Partition"], "gpu-a100");
    }

    #[test]
    fn sacct_csvlike__too_many_fields() {
        let input = "JobID|Account\n12|nairr1|extra\n";
        assert!(matches!(
            sacct_csvlike(input, "|"),
            Err(MalformedInput::TooManyFields { line: 2, fields: 3, header: 2 })
        ));
        assert!(matches!(sacct_csvlike("\n\n", "|"), Err(MalformedInput::MissingHeader)));
    }

    #[test]
    fn DelimitedOptions__fixup__collapse_insert_truncate() {
        let options = DelimitedOptions {
            collapse_from: Some(3),
            inserts: vec![
                ColumnInsert {
                    at: 1,
                    value: "N/A".into(),
                },
                ColumnInsert {
                    at: 10,
                    value: "".into(),
                },
            ],
            width: Some(5),
            ..options()
        };
        // job name `a|b|c` got split
        let fixed = options.fixup(strings(&["1", "2", "3", "a", "b", "c"]));
        assert_eq!(fixed, strings(&["1", "N/A", "2", "3", "a!b!c"]));
    }

    #[test]
    fn DelimitedOptions__fixup__short_row_untouched() {
        let options = DelimitedOptions {
            collapse_from: Some(23),
            ..options()
        };
        assert_eq!(options.fixup(strings(&["1", "2"])), strings(&["1", "2"]));
    }

    #[test]
    fn DelimitedOptions__parse__skips_blank_lines() {
        let jobs = options().parse("1|a\n\n2|b\r\n").unwrap();
        assert_eq!(
            jobs,
            vec![
                JobRecord::Positional(strings(&["1", "a"])),
                JobRecord::Positional(strings(&["2", "b"]))
            ]
        );
    }

    #[test]
    fn DelimitedOptions__parse__quoted_delimiter_stays_in_field() {
        let jobs = options().parse("1|\"train|eval\"|nairr1\n").unwrap();
        assert_eq!(jobs, vec![JobRecord::Positional(strings(&["1", "train|eval", "nairr1"]))]);

        let (_, rows) = sacct_csvlike("JobID|JobName|Account\n2|\"a|b\"|nairr2\n", "|").unwrap();
        assert_eq!(rows[0]["JobName"], "a|b");
        assert_eq!(rows[0]["Account"], "nairr2");
    }

    #[test]
    fn sacct_csvlike__line_numbers_count_blank_lines() {
        let input = "JobID|Account\n\n12|nairr1\n13|nairr1|extra\n";
        assert!(matches!(
            sacct_csvlike(input, "|"),
            Err(MalformedInput::TooManyFields { line: 4, fields: 3, header: 2 })
        ));
    }

    #[test]
    fn DelimitedOptions__serialize__plain_and_quoted() {
        let jobs = vec![JobRecord::Positional(strings(&["1", "x y", "a|b"]))];
        let plain = options().serialize(&jobs).unwrap();
        assert_eq!(plain, b"1|x y|a|b\n");

        let remapped = DelimitedOptions {
            columns: vec![OutputColumn::Gres],
            ..options()
        };
        assert_eq!(remapped.serialize(&jobs).unwrap(), b"1|x y|\"a|b\"\n");
    }

    #[test]
    fn elapsed__minutes_seconds() {
        assert_eq!(elapsed("2025-01-01T10:00:00", "2025-01-01T10:02:05"), "2:5");
        assert_eq!(elapsed("2025-01-01T10:00:00", "2025-01-02T10:00:00"), "1440:0");
        assert_eq!(elapsed("None", "2025-01-01T10:00:00"), "");
        assert_eq!(elapsed("2025-01-01T10:00:00", "Unknown"), "");
    }
}
