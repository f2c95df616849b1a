use std::{
    collections::HashMap,
    io::BufRead,
    ops::AddAssign,
    path::Path,
};

use anyhow::Context;
use compress_io::compress::CompressIo;

use densify::{merge::Dense, DensifyError};
use utils::{get_next_line, Header};

use crate::catalog::GeneCatalog;

/// Older gene coverage files use different column names
pub const FIELD_ALIASES: [(&str, &str); 3] = [
    ("ref_id", "gene_id"),
    ("normalized_coverage", "copy_number"),
    ("raw_coverage", "coverage"),
];

/// Per gene values accumulated over all rows mapping to the same representative
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeneAccum {
    copy_number: f64,
    coverage: f64,
    count_reads: u64,
}

impl GeneAccum {
    pub const ZERO: Self = Self {
        copy_number: 0.0,
        coverage: 0.0,
        count_reads: 0,
    };

    pub fn new(copy_number: f64, coverage: f64, count_reads: u64) -> Self {
        Self {
            copy_number,
            coverage,
            count_reads,
        }
    }

    pub fn copy_number(&self) -> f64 {
        self.copy_number
    }

    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    pub fn count_reads(&self) -> u64 {
        self.count_reads
    }
}

impl AddAssign for GeneAccum {
    fn add_assign(&mut self, other: Self) {
        self.copy_number += other.copy_number;
        self.coverage += other.coverage;
        self.count_reads += other.count_reads;
    }
}

/// One row of a gene coverage file, mapped to its cluster representative
#[derive(Debug, Clone, PartialEq)]
pub struct GeneObs {
    pub gene: String,
    pub values: GeneAccum,
}

struct Columns {
    gene_id: usize,
    copy_number: usize,
    coverage: usize,
    count_reads: Option<usize>,
    min_fields: usize,
}

/// Lazy reader of a gene coverage file.  The header line is read when the
/// reader is created.
pub struct GeneReader<'a, R> {
    rdr: R,
    buf: String,
    line: usize,
    name: String,
    cols: Columns,
    catalog: &'a GeneCatalog,
    finished: bool,
}

impl<'a, R: BufRead> GeneReader<'a, R> {
    pub fn new(mut rdr: R, name: &str, catalog: &'a GeneCatalog) -> anyhow::Result<Self> {
        let mut buf = String::new();
        let cols = {
            let fields = get_next_line(&mut rdr, &mut buf)
                .with_context(|| format!("Error reading header line from {}", name))?
                .ok_or_else(|| anyhow!("No header line found in {}", name))?;
            let hdr = Header::new(&fields, &FIELD_ALIASES)
                .with_context(|| format!("Error in header line of {}", name))?;
            let req = |col: &str| {
                hdr.get(col).ok_or_else(|| DensifyError::MissingInputField {
                    source_name: name.to_owned(),
                    column: col.to_owned(),
                })
            };
            let gene_id = req("gene_id")?;
            let copy_number = req("copy_number")?;
            let coverage = req("coverage")?;
            let count_reads = hdr.get("count_reads");
            let min_fields = gene_id
                .max(copy_number)
                .max(coverage)
                .max(count_reads.unwrap_or(0))
                + 1;
            Columns {
                gene_id,
                copy_number,
                coverage,
                count_reads,
                min_fields,
            }
        };
        Ok(Self {
            rdr,
            buf,
            line: 1,
            name: name.to_owned(),
            cols,
            catalog,
            finished: false,
        })
    }

    fn next_obs(&mut self) -> anyhow::Result<Option<GeneObs>> {
        loop {
            let fields = match get_next_line(&mut self.rdr, &mut self.buf).with_context(|| {
                format!("Error after reading {} lines from {}", self.line, self.name)
            })? {
                Some(f) => f,
                None => return Ok(None),
            };
            self.line += 1;
            if fields.len() < self.cols.min_fields {
                if fields.len() > 1 {
                    warn!("{}:{} Skipping short line", self.name, self.line)
                }
                continue;
            }
            let id = fields[self.cols.gene_id];
            let gene = self
                .catalog
                .representative(id)
                .ok_or_else(|| DensifyError::UnitNotInReference(id.to_owned()))?
                .to_owned();
            let parse_f64 = |ix: usize, what: &str| {
                fields[ix].parse::<f64>().with_context(|| {
                    format!("{}:{} Error reading {}", self.name, self.line, what)
                })
            };
            let copy_number = parse_f64(self.cols.copy_number, "copy number")?;
            let coverage = parse_f64(self.cols.coverage, "coverage")?;
            let count_reads = match self.cols.count_reads {
                Some(ix) => fields[ix].parse::<u64>().with_context(|| {
                    format!("{}:{} Error reading read count", self.name, self.line)
                })?,
                None => 0,
            };
            return Ok(Some(GeneObs {
                gene,
                values: GeneAccum::new(copy_number, coverage, count_reads),
            }));
        }
    }
}

impl<R: BufRead> Iterator for GeneReader<'_, R> {
    type Item = anyhow::Result<GeneObs>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let r = self.next_obs().transpose();
        if !matches!(r, Some(Ok(_))) {
            self.finished = true
        }
        r
    }
}

/// Open a gene coverage file.  Failure to open the file is a (retryable) fetch error.
pub fn open_genes<'a>(
    path: &Path,
    catalog: &'a GeneCatalog,
) -> anyhow::Result<GeneReader<'a, impl BufRead>> {
    trace!("Opening {} for reading", path.display());
    let rdr = CompressIo::new()
        .path(path)
        .bufreader()
        .map_err(|e| DensifyError::fetch(path, e))?;
    GeneReader::new(rdr, &path.display().to_string(), catalog)
}

/// Sum the observations for each representative
pub fn accumulate<I>(obs: I) -> anyhow::Result<HashMap<String, GeneAccum>>
where
    I: IntoIterator<Item = anyhow::Result<GeneObs>>,
{
    let mut h: HashMap<String, GeneAccum> = HashMap::new();
    for o in obs {
        let o = o?;
        *h.entry(o.gene).or_insert(GeneAccum::ZERO) += o.values;
    }
    Ok(h)
}

/// Densified gene record: one per catalog gene per sample
#[derive(Debug, Clone, Copy)]
pub struct GeneRecord {
    values: GeneAccum,
    observed: bool,
}

impl From<Dense<&String, GeneAccum>> for GeneRecord {
    fn from(d: Dense<&String, GeneAccum>) -> Self {
        Self {
            observed: d.obs.is_some(),
            values: d.obs.unwrap_or(GeneAccum::ZERO),
        }
    }
}

impl GeneRecord {
    pub fn values(&self) -> &GeneAccum {
        &self.values
    }

    /// A gene is present if it was seen in the sample with a copy number of at
    /// least min_copy
    pub fn is_present(&self, min_copy: f64) -> bool {
        self.observed && self.values.copy_number >= min_copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn catalog() -> GeneCatalog {
        let gi = "centroid_99\tcentroid_95\ng1\tg1\ng2\tg1\ng3\tg3\n";
        GeneCatalog::from_reader(gi.as_bytes(), "gene_info.txt", 95).unwrap()
    }

    #[test]
    fn legacy_header() {
        let cat = catalog();
        let s = "ref_id\tnormalized_coverage\traw_coverage\n\
                 g1\t0.5\t10.0\n\
                 g2\t0.25\t4.5\n\
                 g3\t1\t20\n";
        let h = accumulate(GeneReader::new(s.as_bytes(), "s1.genes", &cat).unwrap()).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h["g1"], GeneAccum::new(0.75, 14.5, 0));
        assert_eq!(h["g3"], GeneAccum::new(1.0, 20.0, 0));
    }

    #[test]
    fn canonical_header() {
        let cat = catalog();
        let s = "gene_id\tcount_reads\tcoverage\tcopy_number\n\
                 g2\t5\t3.0\t0.1\n\
                 g1\t7\t1.0\t0.3\n";
        let v: Vec<_> = GeneReader::new(s.as_bytes(), "s1.genes", &cat)
            .unwrap()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].gene, "g1");
        assert_eq!(v[0].values.count_reads(), 5);
        let h = accumulate(v.into_iter().map(Ok)).unwrap();
        assert_eq!(h["g1"].count_reads(), 12);
        assert!((h["g1"].copy_number() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn unknown_gene() {
        let cat = catalog();
        let s = "gene_id\tcopy_number\tcoverage\ng9\t1\t1\n";
        let e = accumulate(GeneReader::new(s.as_bytes(), "s1.genes", &cat).unwrap()).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<DensifyError>(),
            Some(DensifyError::UnitNotInReference(g)) if g == "g9"
        ));
    }

    #[test_case(Some(0.35), 0.35, true ; "copy number equal to threshold")]
    #[test_case(Some(0.34), 0.35, false ; "below threshold")]
    #[test_case(Some(2.0), 0.35, true ; "above threshold")]
    #[test_case(None, 0.0, false ; "unobserved gene")]
    fn presence_threshold(copy: Option<f64>, min_copy: f64, present: bool) {
        let g = "g1".to_string();
        let obs = copy.map(|c| GeneAccum::new(c, 1.0, 1));
        let r = GeneRecord::from(Dense { unit: &g, obs });
        assert_eq!(r.is_present(min_copy), present);
        if copy.is_none() {
            assert_eq!(r.values(), &GeneAccum::ZERO)
        }
    }

    #[test]
    fn missing_column() {
        let cat = catalog();
        let s = "gene_id\tcoverage\ng1\t1\n";
        match GeneReader::new(s.as_bytes(), "s1.genes", &cat) {
            Err(e) => assert!(matches!(
                e.downcast_ref::<DensifyError>(),
                Some(DensifyError::MissingInputField { column, .. }) if column == "copy_number"
            ) && !densify::error::is_fatal(&e)),
            Ok(_) => panic!("header without copy_number accepted"),
        }
    }
}
