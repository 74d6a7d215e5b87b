//! Read-only queries against the allocations database. Everything that varies is bound, never formatted in.

use chrono::NaiveDate;
use futures::stream::BoxStream;
use sqlx::{FromRow, PgPool};

use crate::config::Process;

/// Reconciled organizations of the process. `$1`: process abbreviation.
pub const ORGANIZATIONS: &str = r#"
SELECT
  TRIM(o.organization_name) AS "name",
  TRIM(COALESCE(o.organization_abbr, o.organization_name)) AS "abbr"
FROM
  xras.organizations o
  JOIN xras.allocations_processes ap ON ap.allocations_process_id = o.allocations_process_id
WHERE
  ap.allocations_process_name_abbr = $1
  AND o.is_reconciled IS TRUE
ORDER BY
  "name" ASC
"#;

/// `$1`: process abbreviation.
pub const PEOPLE: &str = r#"
SELECT
  p.username AS orcid,
  p.first_name,
  p.last_name,
  TRIM(COALESCE(o.organization_abbr, o.organization_name)) AS "organization_name"
FROM
  xras.people p
  JOIN xras.organizations o ON o.organization_id = p.organization_id
  JOIN xras.allocations_processes ap ON ap.allocations_process_id = o.allocations_process_id
WHERE
  ap.allocations_process_name_abbr = $1
ORDER BY
  p.person_id ASC
"#;

/// The PI with the most recent role of every project. `$1`: process abbreviation.
pub const PROJECT_PIS: &str = r#"
WITH
  ranked AS (
    SELECT
      p.person_id,
      p.first_name,
      p.last_name,
      TRIM(COALESCE(o.organization_abbr, o.organization_name)) AS "organization_name",
      rm.request_number AS "project",
      ROW_NUMBER() OVER (
        PARTITION BY rm.request_number
        ORDER BY rpr.begin_date DESC
      ) AS row_rank
    FROM
      xras.people p
      JOIN xras.organizations o ON o.organization_id = p.organization_id
      JOIN xras.request_people_roles rpr ON p.person_id = rpr.person_id
      JOIN xras.requests r ON r.request_id = rpr.request_id
      JOIN xras.request_masters rm ON r.request_master_id = rm.request_master_id
      JOIN xras.request_role_types rtt ON rpr.request_role_type_id = rtt.request_role_type_id
      JOIN xras.allocations_processes ap ON ap.allocations_process_id = o.allocations_process_id
    WHERE
      ap.allocations_process_name_abbr = $1
      AND rtt.request_role_type = 'PI'
      AND rm.request_number IS NOT NULL
  )
SELECT
  "project",
  first_name,
  last_name,
  "organization_name"
FROM
  ranked
WHERE
  row_rank = 1
ORDER BY
  person_id ASC
"#;

/// Fields of science and their parents. `$1`: process id.
pub const FIELDS_OF_SCIENCE: &str = r#"
SELECT
  ft.fos_name,
  parent.fos_name AS parent_name
FROM
  xras.fos_types ft
  LEFT JOIN xras.fos_types parent ON parent.fos_type_id = ft.fos_type_parent_id
WHERE
  ft.allocations_process_id = $1
ORDER BY
  parent_name DESC
"#;

/// Field of science of every project. `$1`: process id.
pub const PROJECT_FIELDS: &str = r#"
SELECT
  rm.request_number AS "project",
  ft.fos_name
FROM
  xras.requests r
  JOIN xras.request_masters rm ON rm.request_master_id = r.request_master_id
  JOIN xras.request_fos_types rft ON rft.request_id = r.request_id
  JOIN xras.fos_types ft ON ft.fos_type_id = rft.fos_type_id
WHERE
  ft.allocations_process_id = $1
  AND rm.request_number IS NOT NULL
ORDER BY
  rm.request_number ASC
"#;

/// Projects with an allocation on one of the given cloud resources. `$1`: process id, `$2`: resource names.
pub const CLOUD_PROJECTS: &str = r#"
SELECT DISTINCT
  res.resource_name,
  rm.request_number AS "project"
FROM
  xras.resources res
  JOIN xras.action_resources ar ON res.resource_id = ar.resource_id
  JOIN xras.actions a ON ar.action_id = a.action_id
  JOIN xras.requests r ON a.request_id = r.request_id
  JOIN xras.request_masters rm ON r.request_master_id = rm.request_master_id
WHERE
  rm.allocations_process_id = $1
  AND res.production_begin_date IS NOT NULL
  AND rm.request_number IS NOT NULL
  AND res.resource_name = ANY($2)
ORDER BY
  "project" ASC,
  res.resource_name ASC
"#;

/// Resources in production for the process. `$1`: full process name.
pub const RESOURCES: &str = r#"
SELECT
  res.resource_name,
  res.description,
  rtype.resource_type,
  res.production_begin_date::date AS production_begin_date,
  res.production_end_date::date AS production_end_date,
  TRIM(COALESCE(o.organization_abbr, o.organization_name)) AS "organization"
FROM
  xras.resources res
  JOIN xras.allocations_process_resources apres ON res.resource_id = apres.resource_id
  JOIN xras.allocations_processes ap ON ap.allocations_process_id = apres.allocations_process_id
  JOIN xras.organizations o ON o.organization_id = res.organization_id
  LEFT JOIN xras.resource_types rtype ON rtype.resource_type_id = res.resource_type_id
WHERE
  ap.allocations_process_name = $1
  AND res.production_begin_date IS NOT NULL
ORDER BY
  res.production_begin_date ASC,
  res.resource_name ASC
"#;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrganizationRow {
    pub name: String,
    pub abbr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PersonRow {
    pub orcid: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProjectPiRow {
    pub project: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FieldOfScienceRow {
    pub fos_name: String,
    pub parent_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProjectFieldRow {
    pub project: String,
    pub fos_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CloudProjectRow {
    pub resource_name: String,
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResourceRow {
    pub resource_name: String,
    pub description: Option<String>,
    pub resource_type: Option<String>,
    pub production_begin_date: NaiveDate,
    pub production_end_date: Option<NaiveDate>,
    pub organization: Option<String>,
}

/// Row streams of the queries above, for one process.
#[derive(Debug, Clone)]
pub struct Queries<'a> {
    pub pool: &'a PgPool,
    pub process: &'a Process,
}

type Rows<'a, T> = BoxStream<'a, Result<T, sqlx::Error>>;

impl<'a> Queries<'a> {
    pub fn organizations(&self) -> Rows<'a, OrganizationRow> {
        sqlx::query_as(ORGANIZATIONS).bind(&self.process.abbr).fetch(self.pool)
    }

    pub fn people(&self) -> Rows<'a, PersonRow> {
        sqlx::query_as(PEOPLE).bind(&self.process.abbr).fetch(self.pool)
    }

    pub fn project_pis(&self) -> Rows<'a, ProjectPiRow> {
        sqlx::query_as(PROJECT_PIS).bind(&self.process.abbr).fetch(self.pool)
    }

    pub fn fields_of_science(&self) -> Rows<'a, FieldOfScienceRow> {
        sqlx::query_as(FIELDS_OF_SCIENCE).bind(self.process.id).fetch(self.pool)
    }

    pub fn project_fields(&self) -> Rows<'a, ProjectFieldRow> {
        sqlx::query_as(PROJECT_FIELDS).bind(self.process.id).fetch(self.pool)
    }

    pub fn cloud_projects(&self, resources: &'a [String]) -> Rows<'a, CloudProjectRow> {
        sqlx::query_as(CLOUD_PROJECTS)
            .bind(self.process.id)
            .bind(resources)
            .fetch(self.pool)
    }

    pub fn resources(&self) -> Rows<'a, ResourceRow> {
        sqlx::query_as(RESOURCES).bind(&self.process.name).fetch(self.pool)
    }
}
