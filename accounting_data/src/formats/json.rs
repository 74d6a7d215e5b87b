use std::{io, mem};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{MalformedInput, ParsedFile};
use crate::job::JobRecord;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct JsonOptions {
    /// keep the top level fields around `jobs` (e.g. `meta`) in the output
    #[serde(default)]
    pub envelope: bool,
    #[serde(default)]
    pub fallbacks: Vec<Fallback>,
}

/// If `field` is null or missing, copy `from` into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Fallback {
    pub field: String,
    pub from: String,
}

impl Fallback {
    pub fn apply(&self, job: &mut Map<String, Value>) {
        if job.get(&self.field).map_or(true, Value::is_null) {
            let value = job.get(&self.from).cloned().unwrap_or(Value::Null);
            job.insert(self.field.clone(), value);
        }
    }
}

/// `jobs` stays in the envelope as an empty array so that rewritten output keeps the input's key order.
pub fn parse(content: &str) -> Result<ParsedFile, MalformedInput> {
    let Value::Object(mut envelope) = serde_json::from_str::<Value>(content)? else {
        return Err(MalformedInput::MissingJobs);
    };
    let Some(Value::Array(jobs)) = envelope.get_mut("jobs") else {
        return Err(MalformedInput::MissingJobs);
    };
    let jobs = mem::take(jobs);
    let jobs = jobs
        .into_iter()
        .enumerate()
        .map(|(i, job)| match job {
            Value::Object(job) => Ok(JobRecord::Json(job)),
            _ => Err(MalformedInput::JobNotAnObject(i)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedFile { envelope, jobs })
}

pub fn serialize(options: &JsonOptions, envelope: &Map<String, Value>, jobs: &[JobRecord]) -> io::Result<Vec<u8>> {
    let jobs = jobs
        .iter()
        .map(|job| match job {
            JobRecord::Json(job) => Ok(Value::Object(job.clone())),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot write a non-JSON record into a JSON file: {other:?}"),
            )),
        })
        .collect::<io::Result<Vec<_>>>()?;

    let mut output = if options.envelope { envelope.clone() } else { Map::new() };
    // replacing an existing key keeps its position
    output.insert("jobs".to_owned(), Value::Array(jobs));
    Ok(serde_json::to_vec(&Value::Object(output))?)
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn parse__envelope_split_from_jobs() {
        let parsed = parse(r#"{"meta": {"plugin": "slurm"}, "jobs": [{"account": "abc"}], "errors": []}"#).unwrap();
        assert_eq!(parsed.jobs, vec![JobRecord::Json(object(json!({"account": "abc"})))]);
        assert_eq!(
            parsed.envelope,
            object(json!({"meta": {"plugin": "slurm"}, "jobs": [], "errors": []}))
        );
    }

    #[test]
    fn parse__malformed() {
        assert!(matches!(parse("{\"jobs\": [").unwrap_err(), MalformedInput::Json(_)));
        assert!(matches!(parse("[]").unwrap_err(), MalformedInput::MissingJobs));
        assert!(matches!(parse("{\"jobs\": 3}").unwrap_err(), MalformedInput::MissingJobs));
        assert!(matches!(
            parse("{\"jobs\": [{}, 1]}").unwrap_err(),
            MalformedInput::JobNotAnObject(1)
        ));
    }

    #[test]
    fn serialize__envelope_keeps_input_key_order() {
        let input = r#"{"meta":{"v":1},"jobs":[{"account":"abc","user":"u"}],"errors":[]}"#;
        let parsed = parse(input).unwrap();
        let jobs = vec![JobRecord::Json(object(json!({"account": "nairr1", "user": "u"})))];

        let kept = serialize(&JsonOptions { envelope: true, fallbacks: vec![] }, &parsed.envelope, &jobs).unwrap();
        assert_eq!(
            String::from_utf8(kept).unwrap(),
            r#"{"meta":{"v":1},"jobs":[{"account":"nairr1","user":"u"}],"errors":[]}"#
        );

        let bare = serialize(&JsonOptions::default(), &parsed.envelope, &jobs).unwrap();
        assert_eq!(String::from_utf8(bare).unwrap(), r#"{"jobs":[{"account":"nairr1","user":"u"}]}"#);
    }

    #[test]
    fn Fallback__apply__only_when_null_or_missing() {
        let fallback = Fallback {
            field: "user".into(),
            from: "group".into(),
        };
        let mut null_user = object(json!({"user": null, "group": "hprc"}));
        fallback.apply(&mut null_user);
        assert_eq!(null_user["user"], json!("hprc"));

        let mut missing_user = object(json!({"group": "hprc"}));
        fallback.apply(&mut missing_user);
        assert_eq!(missing_user["user"], json!("hprc"));

        let mut set_user = object(json!({"user": "alice", "group": "hprc"}));
        fallback.apply(&mut set_user);
        assert_eq!(set_user["user"], json!("alice"));
    }
}
