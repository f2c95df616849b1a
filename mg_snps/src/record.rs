use std::{collections::HashMap, fmt, io::Write, num::NonZeroU32};

use densify::{matrix::Na, merge::Dense};

use crate::{reference::Site, vcf::SnpCall};

pub const SNP_TABLE_FIELDS: [&str; 10] = [
    "ref_id",
    "ref_pos",
    "ref_allele",
    "alt_allele",
    "cons_allele",
    "count_alleles",
    "count_ref",
    "count_alt",
    "depth",
    "ref_freq",
];

/// Densified SNP record: one per reference site per sample.  Sites without a
/// call have no reads, one allele (the reference base) and no consensus.
#[derive(Debug, Clone)]
pub struct SnpRecord<'a> {
    site: Site<'a>,
    call: Option<SnpCall>,
}

impl<'a> From<Dense<Site<'a>, SnpCall>> for SnpRecord<'a> {
    fn from(d: Dense<Site<'a>, SnpCall>) -> Self {
        Self {
            site: d.unit,
            call: d.obs,
        }
    }
}

impl<'a> SnpRecord<'a> {
    pub fn depth(&self) -> u32 {
        self.call.as_ref().map(|c| c.depth()).unwrap_or(0)
    }

    pub fn ref_freq(&self) -> Option<f64> {
        self.call.as_ref().and_then(|c| c.ref_freq())
    }

    pub fn cons_allele(&self) -> Option<&str> {
        self.call.as_ref().and_then(|c| c.cons_allele())
    }

    /// Consensus allele matches the reference allele
    pub fn is_identical(&self) -> bool {
        self.call
            .as_ref()
            .map(|c| c.cons_allele() == Some(c.ref_allele()))
            .unwrap_or(false)
    }

    /// Output one line of the per sample SNP table
    pub fn write_row<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        write!(w, "{}\t{}\t", self.site.ctg(), self.site.pos())?;
        match &self.call {
            Some(c) => writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                c.ref_allele(),
                Na(c.alt_allele()),
                Na(c.cons_allele()),
                c.count_alleles(),
                c.count_ref(),
                c.count_alt(),
                c.depth(),
                Na(c.ref_freq())
            ),
            None => writeln!(w, "{}\tNA\tNA\t1\t0\t0\t0\tNA", self.site.base()),
        }
    }
}

/// Reference allele frequency with NaN standing for NA
#[derive(Debug, Clone, Copy)]
pub struct RefFreq(f64);

impl From<Option<f64>> for RefFreq {
    fn from(x: Option<f64>) -> Self {
        Self(x.unwrap_or(f64::NAN))
    }
}

impl fmt::Display for RefFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_nan() {
            f.write_str("NA")
        } else {
            fmt::Display::fmt(&self.0, f)
        }
    }
}

/// Consensus alleles seen in a group, stored once.  Matrix columns hold codes
/// into the table (None for no consensus).
#[derive(Debug, Default)]
pub struct AlleleTable {
    alleles: Vec<String>,
    codes: HashMap<String, NonZeroU32>,
}

pub type AlleleCode = Option<NonZeroU32>;

impl AlleleTable {
    pub fn code(&mut self, allele: Option<&str>) -> anyhow::Result<AlleleCode> {
        let Some(a) = allele else { return Ok(None) };
        if let Some(c) = self.codes.get(a) {
            return Ok(Some(*c));
        }
        let c = u32::try_from(self.alleles.len() + 1)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| anyhow!("Too many distinct consensus alleles"))?;
        self.alleles.push(a.to_owned());
        self.codes.insert(a.to_owned(), c);
        Ok(Some(c))
    }

    pub fn allele(&self, code: AlleleCode) -> Na<&str> {
        Na(code.and_then(|c| self.alleles.get(c.get() as usize - 1).map(|s| s.as_str())))
    }

    pub fn len(&self) -> usize {
        self.alleles.len()
    }
}

pub fn write_table_header<W: Write>(w: &mut W) -> std::io::Result<()> {
    writeln!(w, "{}", SNP_TABLE_FIELDS.join("\t"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alleles_stored_once() {
        let mut t = AlleleTable::default();
        let a = t.code(Some("A")).unwrap();
        let g = t.code(Some("GTT")).unwrap();
        assert_eq!(t.code(Some("A")).unwrap(), a);
        assert_eq!(t.code(None).unwrap(), None);
        assert_eq!(t.len(), 2);
        assert_eq!(t.allele(g).to_string(), "GTT");
        assert_eq!(t.allele(a).to_string(), "A");
        assert_eq!(t.allele(None).to_string(), "NA");
        assert_eq!(std::mem::size_of::<AlleleCode>(), 4);
    }

    #[test]
    fn ref_freq_display() {
        assert_eq!(RefFreq::from(Some(0.75)).to_string(), "0.75");
        assert_eq!(RefFreq::from(Some(1.0)).to_string(), "1");
        assert_eq!(RefFreq::from(None).to_string(), "NA");
    }
}
