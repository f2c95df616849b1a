use std::{fmt, io::BufRead, path::Path};

use anyhow::Context;
use compress_io::compress::CompressIo;

use densify::{merge::Keyed, DensifyError};
use utils::get_next_line;

use crate::reference::{Contig, GenomeIndex};

/// Placeholders in the ALT column that do not name an allele
const ALT_SENTINELS: [&str; 3] = ["<X>", "<*>", "."];

/// One pileup record from a sample VCF
#[derive(Debug, Clone, PartialEq)]
pub struct SnpCall {
    ctg_ix: usize,
    ctg: Contig,
    pos: usize,
    ref_allele: String,
    alt_alleles: Vec<String>,
    // ref-fwd, ref-rev, alt-fwd, alt-rev
    counts: [u32; 4],
}

impl SnpCall {
    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    /// First listed alternate allele
    pub fn alt_allele(&self) -> Option<&str> {
        self.alt_alleles.first().map(|s| s.as_str())
    }

    pub fn count_alleles(&self) -> usize {
        1 + self.alt_alleles.len()
    }

    pub fn count_ref(&self) -> u32 {
        self.counts[0] + self.counts[1]
    }

    pub fn count_alt(&self) -> u32 {
        self.counts[2] + self.counts[3]
    }

    pub fn depth(&self) -> u32 {
        self.count_ref() + self.count_alt()
    }

    /// Majority allele.  Where the alternate reads are in the majority but no
    /// alternate allele is listed there is no consensus.
    pub fn cons_allele(&self) -> Option<&str> {
        if self.depth() == 0 {
            None
        } else if self.count_ref() >= self.count_alt() {
            Some(&self.ref_allele)
        } else {
            self.alt_allele()
        }
    }

    pub fn ref_freq(&self) -> Option<f64> {
        match self.depth() {
            0 => None,
            d => Some(self.count_ref() as f64 / d as f64),
        }
    }
}

impl Keyed for SnpCall {
    type Key = (usize, usize);

    fn key(&self) -> Self::Key {
        (self.ctg_ix, self.pos)
    }
}

impl fmt::Display for SnpCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}|{}", self.ctg, self.pos)
    }
}

// Allele support counts from the INFO field.  I16 is preferred, DP4 is accepted
// when it is absent.  Flags (keys without a value) are ignored.
fn parse_counts(info: &str) -> anyhow::Result<[u32; 4]> {
    let mut i16 = None;
    let mut dp4 = None;
    for (k, v) in info.split(';').filter_map(|kv| kv.split_once('=')) {
        match k {
            "I16" => i16 = Some(v),
            "DP4" => dp4 = Some(v),
            _ => (),
        }
    }
    let (key, s) = match (i16, dp4) {
        (Some(s), _) => ("I16", s),
        (None, Some(s)) => ("DP4", s),
        (None, None) => return Err(anyhow!("No I16 or DP4 tag in INFO field")),
    };
    let mut counts = [0; 4];
    let mut it = s.split(',');
    for c in counts.iter_mut() {
        let x = it
            .next()
            .ok_or_else(|| anyhow!("Too few values for {} tag", key))?;
        *c = x
            .parse::<u32>()
            .with_context(|| format!("Error parsing {} tag value {}", key, x))?;
    }
    // Depth is the sum of all four counts
    counts
        .iter()
        .try_fold(0u32, |t, c| t.checked_add(*c))
        .ok_or_else(|| anyhow!("Read depth from {} tag ({}) out of range", key, s))?;
    Ok(counts)
}

/// Lazy reader of the records of one sample VCF
///
/// Records are returned in file order; the order is checked when they are
/// merged onto the reference.
pub struct VcfReader<'a, R> {
    rdr: R,
    buf: String,
    line: usize,
    name: String,
    genome: &'a GenomeIndex,
    finished: bool,
}

impl<'a, R: BufRead> VcfReader<'a, R> {
    pub fn new(rdr: R, name: &str, genome: &'a GenomeIndex) -> Self {
        Self {
            rdr,
            buf: String::new(),
            line: 0,
            name: name.to_owned(),
            genome,
            finished: false,
        }
    }

    fn next_call(&mut self) -> anyhow::Result<Option<SnpCall>> {
        loop {
            let fields = match get_next_line(&mut self.rdr, &mut self.buf).with_context(|| {
                format!("Error after reading {} lines from {}", self.line, self.name)
            })? {
                Some(f) => f,
                None => return Ok(None),
            };
            self.line += 1;
            if fields[0].starts_with('#') || fields[0].is_empty() {
                continue;
            }
            if fields.len() < 8 {
                return Err(anyhow!(
                    "{}:{} Too few columns ({})",
                    self.name,
                    self.line,
                    fields.len()
                ));
            }
            let pos = fields[1]
                .parse::<usize>()
                .with_context(|| format!("{}:{} Error reading position", self.name, self.line))?;
            let (ctg_ix, ctg) = self.genome.contig(fields[0]).ok_or_else(|| {
                DensifyError::UnitNotInReference(format!("{}|{}", fields[0], pos))
            })?;
            let alt_alleles = fields[4]
                .split(',')
                .filter(|a| !ALT_SENTINELS.contains(a))
                .map(|a| a.to_owned())
                .collect();
            let counts = parse_counts(fields[7])
                .with_context(|| format!("{}:{} Error reading allele counts", self.name, self.line))?;
            return Ok(Some(SnpCall {
                ctg_ix,
                ctg: ctg.clone(),
                pos,
                ref_allele: fields[3].to_owned(),
                alt_alleles,
                counts,
            }));
        }
    }
}

impl<R: BufRead> Iterator for VcfReader<'_, R> {
    type Item = anyhow::Result<SnpCall>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let r = self.next_call().transpose();
        if !matches!(r, Some(Ok(_))) {
            self.finished = true
        }
        r
    }
}

/// Open a sample VCF.  Failure to open the file is a (retryable) fetch error.
pub fn open_vcf<'a>(
    path: &Path,
    genome: &'a GenomeIndex,
) -> anyhow::Result<VcfReader<'a, impl BufRead>> {
    trace!("Opening {} for reading", path.display());
    let rdr = CompressIo::new()
        .path(path)
        .bufreader()
        .map_err(|e| DensifyError::fetch(path, e))?;
    Ok(VcfReader::new(rdr, &path.display().to_string(), genome))
}
