use std::path::{Path, PathBuf};

use densify::{
    batch::{BatchPolicy, RetryPolicy},
    layout::Group,
};

pub const DEFAULT_MIN_COPY: f64 = 0.35;
pub const DEFAULT_CLUSTER_PID: u32 = 95;

pub struct Config {
    groups: Vec<Group>,
    n_samples: usize,
    output_dir: PathBuf,
    prefix: String,
    threads: usize,
    max_failures: usize,
    retry: RetryPolicy,
    min_copy: f64,
    cluster_pid: u32,
}

impl Config {
    pub fn new(prefix: String, groups: Vec<Group>, n_samples: usize) -> Self {
        Self {
            groups,
            n_samples,
            output_dir: PathBuf::from("."),
            prefix,
            threads: 1,
            max_failures: densify::batch::DEFAULT_MAX_FAILURES,
            retry: RetryPolicy::default(),
            min_copy: DEFAULT_MIN_COPY,
            cluster_pid: DEFAULT_CLUSTER_PID,
        }
    }

    pub fn set_output_dir(&mut self, d: PathBuf) {
        self.output_dir = d
    }

    pub fn set_threads(&mut self, n: usize) {
        self.threads = n
    }

    pub fn set_max_failures(&mut self, n: usize) {
        self.max_failures = n
    }

    pub fn set_retry(&mut self, r: RetryPolicy) {
        self.retry = r
    }

    pub fn set_min_copy(&mut self, x: f64) {
        self.min_copy = x
    }

    pub fn set_cluster_pid(&mut self, x: u32) {
        self.cluster_pid = x
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::new(self.threads, self.max_failures)
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Minimum copy number for a gene to be called present
    pub fn min_copy(&self) -> f64 {
        self.min_copy
    }

    /// Percent identity of the gene clusters used as matrix rows
    pub fn cluster_pid(&self) -> u32 {
        self.cluster_pid
    }
}
