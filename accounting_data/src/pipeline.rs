//! One post-processing run of a site: select files, transform their records, publish one file per resource.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use color_eyre::{
    eyre::Context as _,
    Report, Result, Section as _,
};
use tracing::{debug, error, info, warn};

use crate::{
    formats::{encode_for, read_source},
    job::{Destination, JobRecord},
    mapping::AccountMapping,
    selector::{FileSelection, SourceFile},
    site::{MalformedPolicy, SiteConfig, UnknownQueuePolicy},
    transform::{Discard, Outcome, TransformError, Transformer},
    writer::BucketWriter,
};

/// Counters of one run, logged at the end and handy in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub malformed_files: usize,
    pub records_read: usize,
    pub records_written: usize,
    pub unmapped: usize,
    pub filtered: usize,
    pub unclassified: usize,
    pub outputs: usize,
}

#[derive(Debug)]
pub struct Pipeline {
    site: SiteConfig,
    mapping: Option<AccountMapping>,
    writer: BucketWriter,
    now: Option<NaiveDateTime>,
}

impl Pipeline {
    /// Loads the account mapping, if the site has one. It stays the same for the whole run.
    pub fn new(site: SiteConfig) -> Result<Self> {
        let mapping = site
            .mapping
            .as_ref()
            .map(AccountMapping::load)
            .transpose()
            .wrap_err_with(|| format!("loading account mapping of {}", site.name))?;
        let writer = BucketWriter::new(site.output_dir.clone(), site.output.mode);
        Ok(Self {
            site,
            mapping,
            writer,
            now: None,
        })
    }

    /// Pin the time the retention window is measured against.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    #[tracing::instrument(skip(self), fields(site = %self.site.name))]
    pub fn run(&self) -> Result<RunSummary> {
        let site = &self.site;
        let mut selection = FileSelection::new(
            &site.source_dir,
            &site.filename,
            &site.retention,
            site.on_unrecognized_filename,
        )?;
        if let Some(now) = self.now {
            selection = selection.with_now(now);
        }
        info!(
            "Found {} files in {:?}, writing to {:?}",
            selection.len(),
            site.source_dir,
            site.output_dir
        );

        let mut summary = RunSummary::default();
        for source in selection.iter() {
            self.process_file(&source, &mut summary)?;
        }

        info!(
            files = summary.files,
            malformed_files = summary.malformed_files,
            records_read = summary.records_read,
            records_written = summary.records_written,
            unmapped = summary.unmapped,
            filtered = summary.filtered,
            unclassified = summary.unclassified,
            outputs = summary.outputs,
            "Finished {}",
            site.name
        );
        Ok(summary)
    }

    #[tracing::instrument(skip_all, fields(file = %source.filename))]
    pub fn process_file(&self, source: &SourceFile, summary: &mut RunSummary) -> Result<()> {
        let site = &self.site;
        debug!("Processing {:?}", source.path);
        summary.files += 1;

        let content = read_source(&source.path).wrap_err_with(|| format!("reading {:?}", source.path))?;
        let parsed = match site.input.parse(&content) {
            Ok(parsed) => parsed,
            Err(e) => return self.malformed(source, Report::new(e), summary),
        };
        summary.records_read += parsed.jobs.len();

        let transformer = Transformer {
            account: &site.account,
            resource: &site.resource,
            input: &site.input,
            mapping: self.mapping.as_ref(),
        };

        let mut buckets: BTreeMap<Destination, Vec<JobRecord>> = BTreeMap::new();
        let mut unmapped = 0;
        let mut filtered = 0;
        let mut unclassified = 0;
        for (index, job) in parsed.jobs.into_iter().enumerate() {
            match transformer.apply(job, source) {
                Ok(Outcome::Keep { destination, job }) => buckets.entry(destination).or_default().push(job),
                Ok(Outcome::Discard(Discard::Unmapped(charge_id))) => {
                    debug!("No grant for {charge_id}");
                    unmapped += 1;
                }
                Ok(Outcome::Discard(Discard::PrefixMismatch)) => filtered += 1,
                Err(TransformError::Unclassified(reason)) => match site.on_unknown_queue {
                    UnknownQueuePolicy::Drop => {
                        error!("{reason} in {}, dropping record {}", source.filename, index + 1);
                        unclassified += 1;
                    }
                    UnknownQueuePolicy::Abort => {
                        return Err(Report::msg(reason.to_string()))
                            .wrap_err_with(|| format!("record {} of {:?}", index + 1, source.path))
                            .with_note(|| format!("site {} aborts on unknown queues", site.name))
                            .suggestion("add a queue rule or set `on_unknown_queue = \"drop\"`");
                    }
                },
                Err(e) if e.is_malformed_input() => {
                    let e = Report::new(e).wrap_err(format!("record {}", index + 1));
                    return self.malformed(source, e, summary);
                }
                Err(e) => {
                    return Err(e).wrap_err_with(|| format!("record {} of {:?}", index + 1, source.path));
                }
            }
        }
        summary.unmapped += unmapped;
        summary.filtered += filtered;
        summary.unclassified += unclassified;

        let filename = site.output.filename_for(&source.filename);
        for (destination, jobs) in &buckets {
            if jobs.is_empty() {
                continue;
            }
            let payload = site
                .input
                .serialize(&parsed.envelope, jobs)
                .and_then(|payload| encode_for(&filename, payload))
                .wrap_err_with(|| format!("serializing {destination} of {:?}", source.path))?;
            let target = self.writer.publish(destination, &filename, &payload)?;
            debug!("Wrote {} records to {target:?}", jobs.len());
            summary.records_written += jobs.len();
            summary.outputs += 1;
        }
        Ok(())
    }

    /// Nothing of a malformed file is written: either the file is skipped or the run ends.
    fn malformed(&self, source: &SourceFile, error: Report, summary: &mut RunSummary) -> Result<()> {
        match self.site.on_malformed {
            MalformedPolicy::Skip => {
                warn!("Error parsing {}: {error:#}. Skipping", source.filename);
                summary.malformed_files += 1;
                Ok(())
            }
            MalformedPolicy::Abort => Err(error.wrap_err(format!("malformed input in {:?}", source.path)))
                .note(format!("site {} aborts on malformed input", self.site.name)),
        }
    }
}
