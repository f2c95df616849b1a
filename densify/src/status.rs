//! Run status record
//!
//! Written as JSON once a batch has completed.  If the batch was stopped by
//! the failure quota the record is logged instead and the caller returns an
//! error, so a status file on disk always describes a finished run.
use std::{io::Write, path::Path};

use anyhow::Context;
use serde::Serialize;

use crate::{batch::BatchReport, matrix::write_atomic};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunStatus {
    comment: String,
    successful_species_count: usize,
    failed_species_count: usize,
    total_species_count: usize,
    failed_species_ids: Vec<String>,
    // group/sample pairs left out of their group after an ordering error
    skipped_samples: Vec<String>,
    elapsed_seconds: f64,
}

impl RunStatus {
    /// Build the record from a batch report.  what names the kind of data
    /// collated (e.g. "SNP" or "gene") and only appears in the comment.
    pub fn from_report(rep: &BatchReport, what: &str) -> Self {
        let (comment, total) = if rep.aborted() {
            (
                format!(
                    "Giving up after {} failures in first {} species",
                    rep.n_failed(),
                    rep.examined()
                ),
                rep.examined(),
            )
        } else if rep.n_failed() > 0 {
            (
                format!(
                    "Collated {} data for {} species with {} failures",
                    what,
                    rep.successes(),
                    rep.n_failed()
                ),
                rep.total(),
            )
        } else {
            (
                format!("Collated {} data for all {} species", what, rep.successes()),
                rep.total(),
            )
        };
        Self {
            comment,
            successful_species_count: rep.successes(),
            failed_species_count: rep.n_failed(),
            total_species_count: total,
            failed_species_ids: rep.failed_ids().to_vec(),
            skipped_samples: Vec::new(),
            elapsed_seconds: rep.elapsed().as_secs_f64(),
        }
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn successful_species_count(&self) -> usize {
        self.successful_species_count
    }

    pub fn failed_species_count(&self) -> usize {
        self.failed_species_count
    }

    pub fn total_species_count(&self) -> usize {
        self.total_species_count
    }

    pub fn failed_species_ids(&self) -> &[String] {
        &self.failed_species_ids
    }

    pub fn skipped_samples(&self) -> &[String] {
        &self.skipped_samples
    }

    pub fn set_skipped_samples(&mut self, v: Vec<String>) {
        self.skipped_samples = v
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Error serializing run status")
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        debug!("Writing run status to {}", path.display());
        write_atomic(path, |w| {
            serde_json::to_writer_pretty(&mut *w, self)?;
            writeln!(w)?;
            Ok(())
        })
        .with_context(|| format!("Error writing status file {}", path.display()))
    }
}
