use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    Command,
};

use anyhow::Context;

use densify::{
    batch::{RetryPolicy, DEFAULT_MAX_FAILURES, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY},
    layout::{find_inputs, read_group_list, read_sample_list},
};
use utils::{init_log, LogLevel};

use crate::config::{Config, DEFAULT_CLUSTER_PID, DEFAULT_MIN_COPY};

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("info")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help("Set number of groups processed in parallel [default: available cores]"),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .default_value("genes")
                .help("Set prefix for run summary and status file names"),
        )
        .arg(
            Arg::new("output_dir")
                .short('d')
                .long("dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output directory [default: current directory]"),
        )
        .arg(
            Arg::new("input_subdir")
                .short('I')
                .long("input-subdir")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .default_value("genes")
                .help("Subdirectory of each sample directory holding the gene coverage files"),
        )
        .arg(
            Arg::new("min_copy")
                .short('c')
                .long("min-copy")
                .value_parser(value_parser!(f64))
                .value_name("FLOAT")
                .help(format!(
                    "Minimum copy number for a gene to be called present [default: {}]",
                    DEFAULT_MIN_COPY
                )),
        )
        .arg(
            Arg::new("cluster_pid")
                .long("cluster-pid")
                .value_parser(value_parser!(u32).range(1..=100))
                .value_name("INT")
                .help(format!(
                    "Percent identity of gene clusters [default: {}]",
                    DEFAULT_CLUSTER_PID
                )),
        )
        .arg(
            Arg::new("max_failures")
                .long("max-failures")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help(format!(
                    "Give up after this many failed groups [default: {}]",
                    DEFAULT_MAX_FAILURES
                )),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help(format!(
                    "Attempts to open each input file [default: {}]",
                    DEFAULT_RETRY_ATTEMPTS
                )),
        )
        .arg(
            Arg::new("retry_delay")
                .long("retry-delay")
                .value_parser(value_parser!(u64))
                .value_name("SECONDS")
                .help(format!(
                    "Delay between attempts [default: {}]",
                    DEFAULT_RETRY_DELAY.as_secs()
                )),
        )
        .arg(
            Arg::new("sample_list")
                .value_parser(value_parser!(PathBuf))
                .value_name("SAMPLE_FILE")
                .required(true)
                .help("Input file with sample ids and sample directories"),
        )
        .arg(
            Arg::new("group_list")
                .value_parser(value_parser!(PathBuf))
                .value_name("GROUP_FILE")
                .required(true)
                .help("Input file with group ids and gene catalog (gene_info) files"),
        )
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m)?;

    debug!("Processing command line options");

    let nt = m
        .get_one::<NonZeroUsize>("threads")
        .map(|x| usize::from(*x))
        .unwrap_or_else(num_cpus::get);

    let prefix = m
        .get_one::<String>("prefix")
        .cloned()
        .unwrap_or_else(|| "genes".to_string());

    let input_subdir = m
        .get_one::<String>("input_subdir")
        .map(|s| s.as_str())
        .unwrap_or("genes");

    let samples = read_sample_list(
        m.get_one::<PathBuf>("sample_list")
            .ok_or_else(|| anyhow!("Missing sample list file"))?,
    )
    .with_context(|| "Could not read sample list")?;

    let mut groups = read_group_list(
        m.get_one::<PathBuf>("group_list")
            .ok_or_else(|| anyhow!("Missing group list file"))?,
    )
    .with_context(|| "Could not read group list")?;

    find_inputs(&samples, &mut groups, input_subdir, "genes")
        .with_context(|| "Error collecting input files")?;

    debug!(
        "{} samples and {} groups read in",
        samples.len(),
        groups.len()
    );

    let mut cfg = Config::new(prefix, groups, samples.len());

    if let Some(p) = m.get_one::<PathBuf>("output_dir") {
        cfg.set_output_dir(p.to_owned())
    }
    cfg.set_threads(nt);
    if let Some(n) = m.get_one::<NonZeroUsize>("max_failures") {
        cfg.set_max_failures(usize::from(*n))
    }
    let attempts = m
        .get_one::<NonZeroUsize>("retries")
        .map(|x| usize::from(*x))
        .unwrap_or(DEFAULT_RETRY_ATTEMPTS);
    let delay = m
        .get_one::<u64>("retry_delay")
        .map(|x| Duration::from_secs(*x))
        .unwrap_or(DEFAULT_RETRY_DELAY);
    cfg.set_retry(RetryPolicy::new(attempts, delay));
    if let Some(x) = m.get_one::<f64>("min_copy") {
        if !x.is_finite() || *x < 0.0 {
            return Err(anyhow!("Invalid minimum copy number {}", x));
        }
        cfg.set_min_copy(*x)
    }
    if let Some(x) = m.get_one::<u32>("cluster_pid") {
        cfg.set_cluster_pid(*x)
    }

    Ok(cfg)
}
