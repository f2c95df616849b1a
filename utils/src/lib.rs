#[macro_use]
extern crate anyhow;

use std::{collections::HashMap, fmt, io::BufRead, str::FromStr};

use anyhow::Context;
use clap::ArgMatches;

/// LogLevel
///
/// Represents minimum level of messages that will be logged
///
#[derive(Debug, Clone, Copy)]
pub struct LogLevel {
    pub level: usize,
}

impl FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel { level: 0 }),
            "warn" => Ok(LogLevel { level: 1 }),
            "info" => Ok(LogLevel { level: 2 }),
            "debug" => Ok(LogLevel { level: 3 }),
            "trace" => Ok(LogLevel { level: 4 }),
            "none" => Ok(LogLevel { level: 5 }),
            _ => Err("no match"),
        }
    }
}

impl LogLevel {
    pub fn is_none(&self) -> bool {
        self.level > 4
    }
    pub fn get_level(&self) -> usize {
        if self.level > 4 {
            0
        } else {
            self.level
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_str = ["error", "warn", "info", "debug", "trace", "none"];
        if self.level < 6 {
            write!(f, "{}", level_str[self.level])
        } else {
            write!(f, "unknown")
        }
    }
}

/// Initialize logging from command line arguments
pub fn init_log(m: &ArgMatches) -> anyhow::Result<()> {
    let verbose = m
        .get_one::<LogLevel>("loglevel")
        .copied()
        .unwrap_or(LogLevel { level: 2 });
    let quiet = verbose.is_none() || m.get_flag("quiet");
    let ts = m
        .get_one::<stderrlog::Timestamp>("timestamp")
        .copied()
        .unwrap_or(stderrlog::Timestamp::Off);

    stderrlog::new()
        .quiet(quiet)
        .verbosity(verbose.get_level())
        .timestamp(ts)
        .init()
        .with_context(|| "Could not initialize logging")
}

/// Read in next line and split on tabs after trimming white space
pub fn get_next_line<'a, R: BufRead>(
    rdr: &mut R,
    buf: &'a mut String,
) -> anyhow::Result<Option<Vec<&'a str>>> {
    buf.clear();
    if rdr.read_line(buf)? == 0 {
        Ok(None)
    } else {
        Ok(Some(buf.trim().split('\t').collect()))
    }
}

/// Column lookup for a tab separated file with a header line
///
/// Historical column names are folded onto their canonical names when the
/// header is parsed, so callers only ever ask for the canonical name.
/// If both an alias and its canonical name are present the canonical
/// column wins.
#[derive(Debug, Clone)]
pub struct Header {
    cols: HashMap<String, usize>,
    n_fields: usize,
}

impl Header {
    pub fn new(fields: &[&str], aliases: &[(&str, &str)]) -> anyhow::Result<Self> {
        let mut cols = HashMap::with_capacity(fields.len());
        for (ix, f) in fields.iter().enumerate() {
            if cols.insert(f.to_string(), ix).is_some() {
                return Err(anyhow!("Duplicate column {} in header", f));
            }
        }
        for (old, new) in aliases {
            if !cols.contains_key(*new) {
                if let Some(ix) = cols.get(*old).copied() {
                    cols.insert(new.to_string(), ix);
                }
            }
        }
        Ok(Self {
            cols,
            n_fields: fields.len(),
        })
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.cols.get(name).copied()
    }

    /// Like get(), but a missing column is an error
    pub fn require(&self, name: &str) -> anyhow::Result<usize> {
        self.get(name)
            .ok_or_else(|| anyhow!("Missing required column {}", name))
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parse() {
        assert_eq!(LogLevel::from_str("WARN").unwrap().level, 1);
        assert!(LogLevel::from_str("none").unwrap().is_none());
        assert_eq!(LogLevel::from_str("none").unwrap().get_level(), 0);
        assert!(LogLevel::from_str("loud").is_err());
        assert_eq!(format!("{}", LogLevel { level: 3 }), "debug");
    }

    #[test]
    fn next_line_splits_on_tabs() {
        let mut rdr = "a\tb\tc\n\nx\n".as_bytes();
        let mut buf = String::new();
        assert_eq!(
            get_next_line(&mut rdr, &mut buf).unwrap(),
            Some(vec!["a", "b", "c"])
        );
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), Some(vec![""]));
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), Some(vec!["x"]));
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), None);
    }

    #[test]
    fn header_aliases() {
        let aliases = [("ref_id", "gene_id"), ("raw_coverage", "coverage")];
        let h = Header::new(&["ref_id", "raw_coverage", "coverage"], &aliases).unwrap();
        assert_eq!(h.get("gene_id"), Some(0));
        // Canonical name takes precedence over the alias
        assert_eq!(h.get("coverage"), Some(2));
        assert_eq!(h.n_fields(), 3);
        assert!(h.require("copy_number").is_err());
        assert!(Header::new(&["a", "a"], &[]).is_err());
    }
}
