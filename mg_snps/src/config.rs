use std::path::{Path, PathBuf};

use densify::{
    batch::{BatchPolicy, RetryPolicy},
    layout::Group,
};

pub struct Config {
    groups: Vec<Group>,
    n_samples: usize,
    output_dir: PathBuf,
    prefix: String,
    threads: usize,
    max_failures: usize,
    retry: RetryPolicy,
    sample_tables: bool,
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
            sample_tables: false,
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

    pub fn set_sample_tables(&mut self, x: bool) {
        self.sample_tables = x
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

    pub fn sample_tables(&self) -> bool {
        self.sample_tables
    }
}
