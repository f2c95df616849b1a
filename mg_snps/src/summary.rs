use std::io::Write;

use densify::DensifyError;

use crate::record::SnpRecord;

pub const SNP_SUMMARY_FIELDS: [&str; 6] = [
    "genome_length",
    "covered_bases",
    "fraction_covered",
    "mean_depth",
    "mean_identity",
    "mean_maf",
];

/// Running summary over the densified records of one sample
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnpSummary {
    genome_length: usize,
    covered_bases: usize,
    total_depth: u64,
    identical: usize,
    maf: f64,
}

fn ratio(a: f64, n: usize) -> f64 {
    if n > 0 {
        a / n as f64
    } else {
        0.0
    }
}

impl SnpSummary {
    pub fn add(&mut self, r: &SnpRecord) {
        self.genome_length += 1;
        let depth = r.depth();
        if depth > 0 {
            self.covered_bases += 1;
            self.total_depth += depth as u64;
            if r.is_identical() {
                self.identical += 1
            }
            if let Some(f) = r.ref_freq() {
                self.maf += if f <= 0.5 { f } else { 1.0 - f }
            }
        }
    }

    pub fn genome_length(&self) -> usize {
        self.genome_length
    }

    pub fn covered_bases(&self) -> usize {
        self.covered_bases
    }

    pub fn fraction_covered(&self) -> anyhow::Result<f64> {
        if self.genome_length == 0 {
            Err(DensifyError::FatalConfiguration(
                "Summary requested for a genome with no sites".to_string(),
            )
            .into())
        } else {
            Ok(self.covered_bases as f64 / self.genome_length as f64)
        }
    }

    pub fn mean_depth(&self) -> f64 {
        ratio(self.total_depth as f64, self.covered_bases)
    }

    pub fn mean_identity(&self) -> f64 {
        ratio(self.identical as f64, self.covered_bases)
    }

    pub fn mean_maf(&self) -> f64 {
        ratio(self.maf, self.covered_bases)
    }

    /// Write the summary fields, each preceded by a tab
    pub fn write_fields<W: Write>(&self, w: &mut W) -> anyhow::Result<()> {
        write!(
            w,
            "\t{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            self.genome_length,
            self.covered_bases,
            self.fraction_covered()?,
            self.mean_depth(),
            self.mean_identity(),
            self.mean_maf()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reference::GenomeIndex, vcf::VcfReader};
    use densify::merge::densify;

    #[test]
    fn summary_over_dense_records() {
        let g = GenomeIndex::from_reader(">c\nACGTA\n".as_bytes(), "ref.fa").unwrap();
        // Site 1: 8 ref reads; site 3: 3 ref 1 alt; site 4: alt majority
        let vcf = "c\t1\t.\tA\t<X>\t0\t.\tI16=4,4,0,0\n\
                   c\t3\t.\tG\tA,<X>\t0\t.\tI16=2,1,1,0\n\
                   c\t4\t.\tT\tC\t0\t.\tI16=0,1,2,1\n";
        let mut s = SnpSummary::default();
        for r in densify(g.sites(), VcfReader::new(vcf.as_bytes(), "s.vcf", &g)) {
            s.add(&SnpRecord::from(r.unwrap()))
        }
        assert_eq!(s.genome_length(), 5);
        assert_eq!(s.covered_bases(), 3);
        assert!((s.fraction_covered().unwrap() - 0.6).abs() < 1e-12);
        assert!((s.mean_depth() - 16.0 / 3.0).abs() < 1e-12);
        assert!((s.mean_identity() - 2.0 / 3.0).abs() < 1e-12);
        // maf: 0, 0.25, 0.25
        assert!((s.mean_maf() - 0.5 / 3.0).abs() < 1e-12);

        let mut out = Vec::new();
        s.write_fields(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\t5\t3\t0.6000\t5.3333\t0.6667\t0.1667"
        );
    }

    #[test]
    fn empty_summary() {
        let s = SnpSummary::default();
        assert_eq!(s.mean_depth(), 0.0);
        assert!(densify::error::is_fatal(&s.fraction_covered().unwrap_err()));
    }
}
