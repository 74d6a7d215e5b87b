//! Reading accounting files into [`JobRecord`]s and writing buckets of them back out.

pub mod delimited;
pub mod json;

use std::{
    fs::File,
    io::{self, Read as _, Write as _},
    path::Path,
};

use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression, GzBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::job::JobRecord;

pub use delimited::{ColumnInsert, DelimitedOptions, OutputColumn};
pub use json::{Fallback, JsonOptions};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputFormat {
    Json(JsonOptions),
    Delimited(DelimitedOptions),
}

/// The input file was readable but its content isn't what the site config promises.
#[derive(Debug, Error)]
pub enum MalformedInput {
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),
    #[error("unreadable delimited text")]
    Delimited(#[from] csv::Error),
    #[error("top level is not an object with a `jobs` array")]
    MissingJobs,
    #[error("jobs[{0}] is not an object")]
    JobNotAnObject(usize),
    #[error("input has no header row")]
    MissingHeader,
    #[error("line {line}: {fields} fields, header has {header}")]
    TooManyFields { line: u64, fields: usize, header: usize },
}

/// Records of one input file, plus whatever surrounded them.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// top level JSON object, `jobs` emptied but kept in place; empty for delimited input
    pub envelope: Map<String, Value>,
    pub jobs: Vec<JobRecord>,
}

impl InputFormat {
    pub fn parse(&self, content: &[u8]) -> Result<ParsedFile, MalformedInput> {
        // accounting dumps occasionally carry stray bytes in job names
        let text = String::from_utf8_lossy(content);
        match self {
            InputFormat::Json(_) => json::parse(&text),
            InputFormat::Delimited(options) => Ok(ParsedFile {
                envelope: Map::new(),
                jobs: options.parse(&text)?,
            }),
        }
    }

    /// Serializes one bucket. `envelope` is only used for JSON sites that keep it.
    pub fn serialize(&self, envelope: &Map<String, Value>, jobs: &[JobRecord]) -> io::Result<Vec<u8>> {
        match self {
            InputFormat::Json(options) => json::serialize(options, envelope, jobs),
            InputFormat::Delimited(options) => options.serialize(jobs),
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Reads a whole source file, decompressing `*.gz`.
pub fn read_source(path: &Path) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let file = File::open(path)?;
    if is_gzip(path) {
        MultiGzDecoder::new(file).read_to_end(&mut buf)?;
    } else {
        io::BufReader::new(file).read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// Compresses `payload` if the output file name asks for it. The gzip header carries no timestamp or name, so equal
/// payloads compress to equal bytes.
pub fn encode_for(filename: &str, payload: Vec<u8>) -> io::Result<Vec<u8>> {
    if !is_gzip(Path::new(filename)) {
        return Ok(payload);
    }
    let mut encoder: GzEncoder<Vec<u8>> = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
    encoder.write_all(&payload)?;
    encoder.finish()
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use std::fs;

    use color_eyre::Result;

    use super::*;

    #[test]
    fn encode_for__gzip_round_trip_and_deterministic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let payload = br#"{"jobs":[]}"#.to_vec();

        let first = encode_for("x.json.gz", payload.clone())?;
        let second = encode_for("x.json.gz", payload.clone())?;
        assert_eq!(first, second);
        assert_ne!(first, payload);

        let path = dir.path().join("x.json.gz");
        fs::write(&path, &first)?;
        assert_eq!(read_source(&path)?, payload);
        Ok(())
    }

    #[test]
    fn encode_for__plain_untouched() -> Result<()> {
        let payload = b"a|b\n".to_vec();
        assert_eq!(encode_for("2025-01-01.log", payload.clone())?, payload);
        Ok(())
    }
}
