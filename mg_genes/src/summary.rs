use std::io::Write;

use densify::DensifyError;

use crate::genes::GeneRecord;

pub const GENE_SUMMARY_FIELDS: [&str; 6] = [
    "pangenome_size",
    "covered_genes",
    "fraction_covered",
    "mean_depth",
    "present_genes",
    "fraction_present",
];

/// Running summary over the densified gene records of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSummary {
    min_copy: f64,
    pangenome_size: usize,
    covered_genes: usize,
    total_depth: f64,
    present_genes: usize,
}

impl GeneSummary {
    pub fn new(min_copy: f64) -> Self {
        Self {
            min_copy,
            pangenome_size: 0,
            covered_genes: 0,
            total_depth: 0.0,
            present_genes: 0,
        }
    }

    pub fn add(&mut self, r: &GeneRecord) {
        self.pangenome_size += 1;
        let cov = r.values().coverage();
        if cov > 0.0 {
            self.covered_genes += 1;
            self.total_depth += cov;
        }
        if r.is_present(self.min_copy) {
            self.present_genes += 1;
        }
    }

    pub fn pangenome_size(&self) -> usize {
        self.pangenome_size
    }

    pub fn covered_genes(&self) -> usize {
        self.covered_genes
    }

    pub fn present_genes(&self) -> usize {
        self.present_genes
    }

    fn check_size(&self) -> anyhow::Result<f64> {
        if self.pangenome_size == 0 {
            Err(DensifyError::FatalConfiguration(
                "Summary requested for an empty gene catalog".to_string(),
            )
            .into())
        } else {
            Ok(self.pangenome_size as f64)
        }
    }

    pub fn fraction_covered(&self) -> anyhow::Result<f64> {
        Ok(self.covered_genes as f64 / self.check_size()?)
    }

    pub fn fraction_present(&self) -> anyhow::Result<f64> {
        Ok(self.present_genes as f64 / self.check_size()?)
    }

    pub fn mean_depth(&self) -> f64 {
        if self.covered_genes > 0 {
            self.total_depth / self.covered_genes as f64
        } else {
            0.0
        }
    }

    /// Write the summary fields, each preceded by a tab
    pub fn write_fields<W: Write>(&self, w: &mut W) -> anyhow::Result<()> {
        write!(
            w,
            "\t{}\t{}\t{:.4}\t{:.4}\t{}\t{:.4}",
            self.pangenome_size,
            self.covered_genes,
            self.fraction_covered()?,
            self.mean_depth(),
            self.present_genes,
            self.fraction_present()?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genes::GeneAccum;
    use densify::merge::Dense;

    #[test]
    fn gene_summary() {
        let genes: Vec<String> = ["g1", "g2", "g3", "g4"].iter().map(|s| s.to_string()).collect();
        let obs = [
            Some(GeneAccum::new(1.2, 12.0, 40)),
            None,
            Some(GeneAccum::new(0.35, 3.0, 9)),
            Some(GeneAccum::new(0.1, 0.0, 0)),
        ];
        let mut s = GeneSummary::new(0.35);
        for (g, o) in genes.iter().zip(obs) {
            s.add(&GeneRecord::from(Dense { unit: g, obs: o }))
        }
        assert_eq!(s.pangenome_size(), 4);
        assert_eq!(s.covered_genes(), 2);
        assert_eq!(s.present_genes(), 2);
        assert!((s.mean_depth() - 7.5).abs() < 1e-12);

        let mut out = Vec::new();
        s.write_fields(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\t4\t2\t0.5000\t7.5000\t2\t0.5000"
        );
    }

    #[test]
    fn empty_catalog_is_fatal() {
        let s = GeneSummary::new(0.35);
        assert!(densify::error::is_fatal(&s.fraction_present().unwrap_err()));
    }
}
