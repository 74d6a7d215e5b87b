//! The lookup files of the reporting portal, each rebuilt from the database in full.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use accounting_data::{misc::parsing::FileMode, writer::publish_atomic};
use color_eyre::{
    eyre::{bail, Context as _},
    Result, Section as _,
};
use csv::QuoteStyle;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    builder::{Dedup, Lookup},
    queries::{
        CloudProjectRow, FieldOfScienceRow, OrganizationRow, PersonRow, ProjectFieldRow, ProjectPiRow, Queries,
        ResourceRow,
    },
};

pub const ORGANIZATIONS_FILE: &str = "organization.json";
pub const NAMES_FILE: &str = "names.csv";
pub const HIERARCHY_FILE: &str = "hierarchy.csv";
pub const GROUPS_FILE: &str = "group-to-hierarchy.csv";
pub const CLOUD_FILE: &str = "cloud-project-to-pi.csv";
pub const RESOURCES_FILE: &str = "resources.json";
pub const RESOURCE_SPECS_FILE: &str = "resource_specs.json";

static BEFORE_PARENTHESIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^(]+)").expect("literal regex should compile"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").expect("literal regex should compile"));

/// Resource id used by the portal: the name up to the first `(`, non-word characters replaced with `-`.
///
/// `Indiana Jetstream2 GPU (Cloud)` -> `Indiana-Jetstream2-GPU-`
pub fn demangle_name(name: &str) -> String {
    let head = BEFORE_PARENTHESIS.find(name).map_or(name, |m| m.as_str());
    NON_WORD.replace_all(head, "-").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource type {0:?} (known: Compute, Cloud, Program)")]
pub struct UnknownResourceType(pub Option<String>);

pub fn portal_resource_type(resource_type: Option<&str>) -> Result<&'static str, UnknownResourceType> {
    match resource_type {
        Some("Compute") => Ok("HPC"),
        Some("Cloud") => Ok("Cloud"),
        Some("Program") => Ok("Program"),
        other => Err(UnknownResourceType(other.map(str::to_owned))),
    }
}

/// An entry of `organization.json`. Fields written by other tools are carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub abbrev: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            name: row.name,
            abbrev: row.abbr,
            extra: Map::new(),
        }
    }
}

fn or_empty(field: Option<String>) -> String {
    field.unwrap_or_default()
}

pub fn person_row(row: PersonRow) -> Vec<String> {
    vec![
        or_empty(row.orcid),
        or_empty(row.first_name),
        or_empty(row.last_name),
        or_empty(row.organization_name),
    ]
}

/// Projects share `names.csv` with people, the project number standing in for the ORCID.
pub fn project_pi_row(row: ProjectPiRow) -> Vec<String> {
    vec![
        row.project,
        or_empty(row.first_name),
        or_empty(row.last_name),
        or_empty(row.organization_name),
    ]
}

pub fn hierarchy_row(row: FieldOfScienceRow) -> Vec<String> {
    vec![row.fos_name.clone(), row.fos_name, or_empty(row.parent_name)]
}

pub fn group_row(row: ProjectFieldRow) -> Vec<String> {
    vec![row.project, row.fos_name]
}

pub fn cloud_row(row: CloudProjectRow) -> Vec<String> {
    vec![row.project.clone(), row.project, demangle_name(&row.resource_name)]
}

/// Facts (`resources.json`) and specs (`resource_specs.json`) of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub resource: String,
    pub fact: Map<String, Value>,
    pub specs: Map<String, Value>,
}

fn resource_key(record: &Map<String, Value>) -> Result<String> {
    match record.get("resource") {
        Some(Value::String(resource)) => Ok(resource.clone()),
        _ => bail!("entry without a `resource` string: {}", Value::Object(record.clone())),
    }
}

/// Pairs up the entries of existing fact and spec files. Every fact needs a spec and vice versa.
pub fn pair_existing(facts: Vec<Map<String, Value>>, specs: Vec<Map<String, Value>>) -> Result<Vec<ResourceEntry>> {
    let mut specs = specs
        .into_iter()
        .map(|spec| -> Result<_> { Ok((resource_key(&spec)?, spec)) })
        .collect::<Result<HashMap<_, _>>>()
        .wrap_err_with(|| format!("reading existing {RESOURCE_SPECS_FILE}"))?;

    let entries = facts
        .into_iter()
        .map(|fact| -> Result<ResourceEntry> {
            let resource = resource_key(&fact).wrap_err_with(|| format!("reading existing {RESOURCES_FILE}"))?;
            let Some(specs) = specs.remove(&resource) else {
                bail!("{resource} is in {RESOURCES_FILE} but not in {RESOURCE_SPECS_FILE}");
            };
            Ok(ResourceEntry { resource, fact, specs })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(resource) = specs.keys().next() {
        bail!("{resource} is in {RESOURCE_SPECS_FILE} but not in {RESOURCES_FILE}");
    }
    Ok(entries)
}

/// Default facts and specs for a resource the portal doesn't know yet.
pub fn new_resource(row: ResourceRow) -> Result<ResourceEntry> {
    let resource = demangle_name(&row.resource_name);
    let resource_type = portal_resource_type(row.resource_type.as_deref())
        .wrap_err_with(|| format!("resource {}", row.resource_name))?;

    let mut fact = Map::new();
    fact.insert("resource".into(), resource.clone().into());
    fact.insert("resource_type".into(), resource_type.into());
    fact.insert("name".into(), row.resource_name.into());
    fact.insert("description".into(), or_empty(row.description).into());
    fact.insert("resource_allocation_type".into(), "CPUNode".into());
    fact.insert("timezone".into(), "EST".into());
    fact.insert("pi_column".into(), "account_name".into());
    fact.insert("organization".into(), row.organization.map_or(Value::Null, Value::from));

    let mut specs = Map::new();
    specs.insert("resource".into(), resource.clone().into());
    specs.insert("start_date".into(), row.production_begin_date.format("%Y-%m-%d").to_string().into());
    for (key, count) in [
        ("cpu_node_count", 1),
        ("cpu_processor_count", 1),
        ("cpu_ppn", 1),
        ("gpu_node_count", 0),
        ("gpu_processor_count", 0),
        ("gpu_ppn", 0),
    ] {
        specs.insert(key.into(), count.into());
    }
    if let Some(end) = row.production_end_date {
        specs.insert("end_date".into(), end.format("%Y-%m-%d").to_string().into());
    }

    Ok(ResourceEntry { resource, fact, specs })
}

/// Pretty JSON with four space indentation.
pub fn json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Rows end in `\r\n`, matching the files the portal already has.
pub fn csv_bytes(rows: &[Vec<String>], quoting: QuoteStyle) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(quoting)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    writer.into_inner().map_err(|e| e.into_error()).wrap_err("flushing csv")
}

/// Entries of a previous export. A missing file counts as empty.
pub fn read_existing<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match fs::read(path) {
        Ok(content) => serde_json::from_slice(&content)
            .wrap_err_with(|| format!("parsing {path:?}"))
            .note("fix or remove the file, it is rebuilt from the database"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{path:?} doesn't exist yet, starting from scratch");
            Ok(Vec::new())
        }
        Err(e) => Err(e).wrap_err_with(|| format!("reading {path:?}")),
    }
}

/// Runs the exports and publishes their files into one directory.
#[derive(Debug, Clone)]
pub struct Exporter<'a> {
    pub queries: Queries<'a>,
    pub output_dir: &'a Path,
    pub mode: FileMode,
    pub cloud_resources: &'a [String],
}

impl Exporter<'_> {
    fn publish(&self, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = publish_atomic(self.output_dir, filename, contents, self.mode)?;
        info!(?path, "Exported");
        Ok(path)
    }

    #[tracing::instrument(skip(self))]
    pub async fn organizations(&self) -> Result<PathBuf> {
        let existing: Vec<Organization> = read_existing(&self.output_dir.join(ORGANIZATIONS_FILE))?;
        let mut organizations = Lookup::seeded(existing, Dedup::ByKey(|org: &Organization| org.name.clone()));
        let added = organizations
            .extend_from(self.queries.organizations(), |row| Ok(Organization::from(row)))
            .await
            .wrap_err("querying organizations")?;
        info!(added, total = organizations.len(), "Organizations");
        self.publish(ORGANIZATIONS_FILE, &json_bytes(organizations.records())?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn names(&self) -> Result<PathBuf> {
        let mut names = Lookup::new(Dedup::Exact);
        names
            .extend_from(self.queries.people(), |row| Ok(person_row(row)))
            .await
            .wrap_err("querying people")?;
        names
            .extend_from(self.queries.project_pis(), |row| Ok(project_pi_row(row)))
            .await
            .wrap_err("querying project PIs")?;
        self.publish(NAMES_FILE, &csv_bytes(names.records(), QuoteStyle::Necessary)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn hierarchy(&self) -> Result<PathBuf> {
        let mut hierarchy = Lookup::new(Dedup::ByKey(|row: &Vec<String>| row[0].clone()));
        hierarchy
            .extend_from(self.queries.fields_of_science(), |row| Ok(hierarchy_row(row)))
            .await
            .wrap_err("querying fields of science")?;
        self.publish(HIERARCHY_FILE, &csv_bytes(hierarchy.records(), QuoteStyle::Always)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn groups(&self) -> Result<PathBuf> {
        let mut groups = Lookup::new(Dedup::Exact);
        groups
            .extend_from(self.queries.project_fields(), |row| Ok(group_row(row)))
            .await
            .wrap_err("querying project fields of science")?;
        self.publish(GROUPS_FILE, &csv_bytes(groups.records(), QuoteStyle::Always)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cloud(&self) -> Result<PathBuf> {
        let mut projects = Lookup::new(Dedup::Exact);
        projects
            .extend_from(self.queries.cloud_projects(self.cloud_resources), |row| Ok(cloud_row(row)))
            .await
            .wrap_err("querying cloud projects")?;
        self.publish(CLOUD_FILE, &csv_bytes(projects.records(), QuoteStyle::Necessary)?)
    }

    /// Writes both resource files; existing entries stay untouched, new production resources get defaults.
    #[tracing::instrument(skip(self))]
    pub async fn resources(&self) -> Result<Vec<PathBuf>> {
        let facts = read_existing(&self.output_dir.join(RESOURCES_FILE))?;
        let specs = read_existing(&self.output_dir.join(RESOURCE_SPECS_FILE))?;
        let mut resources = Lookup::seeded(
            pair_existing(facts, specs)?,
            Dedup::ByKey(|entry: &ResourceEntry| entry.resource.clone()),
        );
        let added = resources
            .extend_from(self.queries.resources(), new_resource)
            .await
            .wrap_err("querying resources")?;
        info!(added, total = resources.len(), "Resources");

        let (facts, specs): (Vec<_>, Vec<_>) = resources
            .into_vec()
            .into_iter()
            .map(|entry| (entry.fact, entry.specs))
            .unzip();
        Ok(vec![
            self.publish(RESOURCES_FILE, &json_bytes(&facts)?)?,
            self.publish(RESOURCE_SPECS_FILE, &json_bytes(&specs)?)?,
        ])
    }

    pub async fn all(&self) -> Result<Vec<PathBuf>> {
        let mut written = vec![
            self.organizations().await?,
            self.names().await?,
            self.hierarchy().await?,
            self.groups().await?,
            self.cloud().await?,
        ];
        written.extend(self.resources().await?);
        Ok(written)
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn resource_row(name: &str, resource_type: Option<&str>, end: Option<NaiveDate>) -> ResourceRow {
        ResourceRow {
            resource_name: name.into(),
            description: None,
            resource_type: resource_type.map(Into::into),
            production_begin_date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            production_end_date: end,
            organization: Some("IU".into()),
        }
    }

    #[test]
    fn demangle_name__cuts_parenthesis_and_replaces_non_word() {
        assert_eq!(demangle_name("Indiana Jetstream2 GPU"), "Indiana-Jetstream2-GPU");
        assert_eq!(demangle_name("NCSA Delta GPU (Delta GPU)"), "NCSA-Delta-GPU-");
        assert_eq!(demangle_name("TACC-Lonestar6"), "TACC-Lonestar6");
        assert_eq!(demangle_name("(odd) name"), "-odd--name");
    }

    #[test]
    fn portal_resource_type__known_and_unknown() {
        assert_eq!(portal_resource_type(Some("Compute")), Ok("HPC"));
        assert_eq!(portal_resource_type(Some("Cloud")), Ok("Cloud"));
        assert_eq!(portal_resource_type(Some("Program")), Ok("Program"));
        assert_eq!(
            portal_resource_type(Some("Storage")),
            Err(UnknownResourceType(Some("Storage".into())))
        );
        assert_eq!(portal_resource_type(None), Err(UnknownResourceType(None)));
    }

    #[test]
    fn new_resource__defaults() {
        let entry = new_resource(resource_row("Indiana Jetstream2 GPU", Some("Cloud"), None)).unwrap();
        assert_eq!(entry.resource, "Indiana-Jetstream2-GPU");
        assert_eq!(
            entry.fact,
            object(json!({
                "resource": "Indiana-Jetstream2-GPU",
                "resource_type": "Cloud",
                "name": "Indiana Jetstream2 GPU",
                "description": "",
                "resource_allocation_type": "CPUNode",
                "timezone": "EST",
                "pi_column": "account_name",
                "organization": "IU",
            }))
        );
        assert_eq!(entry.specs["start_date"], json!("2024-05-06"));
        assert_eq!(entry.specs["cpu_ppn"], json!(1));
        assert_eq!(entry.specs["gpu_node_count"], json!(0));
        assert!(!entry.specs.contains_key("end_date"));

        let ended = new_resource(resource_row("Old", Some("Compute"), NaiveDate::from_ymd_opt(2025, 1, 31))).unwrap();
        assert_eq!(ended.specs["end_date"], json!("2025-01-31"));
        assert!(new_resource(resource_row("Tape", Some("Storage"), None)).is_err());
    }

    #[test]
    fn pair_existing__matches_by_resource() {
        let facts = vec![object(json!({"resource": "a", "name": "A"})), object(json!({"resource": "b"}))];
        let specs = vec![object(json!({"resource": "b", "cpu_ppn": 64})), object(json!({"resource": "a"}))];
        let entries = pair_existing(facts, specs).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].resource, "b");
        assert_eq!(entries[1].specs["cpu_ppn"], json!(64));

        assert!(pair_existing(vec![object(json!({"resource": "a"}))], vec![]).is_err());
        assert!(pair_existing(vec![], vec![object(json!({"resource": "a"}))]).is_err());
        assert!(pair_existing(vec![object(json!({"name": "a"}))], vec![]).is_err());
    }

    #[test]
    fn Organization__extra_fields_survive() {
        let existing: Vec<Organization> =
            serde_json::from_str(r#"[{"organization_id": 7, "name": "Indiana University", "abbrev": "IU"}]"#).unwrap();
        let mut organizations = Lookup::seeded(existing, Dedup::ByKey(|org: &Organization| org.name.clone()));
        assert!(!organizations.push(Organization::from(OrganizationRow {
            name: "Indiana University".into(),
            abbr: "Indiana U".into(),
        })));
        assert!(organizations.push(Organization::from(OrganizationRow {
            name: "Purdue University".into(),
            abbr: "Purdue".into(),
        })));

        let out = String::from_utf8(json_bytes(organizations.records()).unwrap()).unwrap();
        let back: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            back,
            json!([
                {"name": "Indiana University", "abbrev": "IU", "organization_id": 7},
                {"name": "Purdue University", "abbrev": "Purdue"},
            ])
        );
    }

    #[test]
    fn rows__nulls_become_empty() {
        let person = person_row(PersonRow {
            orcid: Some("0000-0002-1825-0097".into()),
            first_name: Some("Josiah".into()),
            last_name: None,
            organization_name: None,
        });
        assert_eq!(person, ["0000-0002-1825-0097", "Josiah", "", ""]);
        assert_eq!(
            hierarchy_row(FieldOfScienceRow {
                fos_name: "Physics".into(),
                parent_name: None
            }),
            ["Physics", "Physics", ""]
        );
        assert_eq!(
            cloud_row(CloudProjectRow {
                resource_name: "Indiana Jetstream2 GPU".into(),
                project: "NAIRR240009".into()
            }),
            ["NAIRR240009", "NAIRR240009", "Indiana-Jetstream2-GPU"]
        );
    }

    #[test]
    fn csv_bytes__quoting_and_crlf() {
        let rows = vec![vec!["Physics".to_owned(), "Physics".to_owned(), String::new()]];
        assert_eq!(csv_bytes(&rows, QuoteStyle::Always).unwrap(), b"\"Physics\",\"Physics\",\"\"\r\n");
        let rows = vec![vec!["NAIRR1".to_owned(), "Ada".to_owned(), "Univ, of X".to_owned()]];
        assert_eq!(csv_bytes(&rows, QuoteStyle::Necessary).unwrap(), b"NAIRR1,Ada,\"Univ, of X\"\r\n");
    }

    #[test]
    fn json_bytes__four_space_indent() {
        let out = json_bytes(&json!([{"name": "Indiana University", "abbrev": "IU"}])).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[\n    {\n        \"name\": \"Indiana University\",\n        \"abbrev\": \"IU\"\n    }\n]"
        );
    }

    #[test_log::test]
    fn read_existing__missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let orgs: Vec<Organization> = read_existing(&dir.path().join(ORGANIZATIONS_FILE)).unwrap();
        assert!(orgs.is_empty());

        fs::write(dir.path().join(ORGANIZATIONS_FILE), "{").unwrap();
        assert!(read_existing::<Organization>(&dir.path().join(ORGANIZATIONS_FILE)).is_err());
    }
}
