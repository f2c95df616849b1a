use std::{
    collections::{hash_map::Entry, BTreeSet, HashMap},
    io::BufRead,
    path::Path,
};

use anyhow::Context;
use compress_io::compress::CompressIo;

use densify::DensifyError;
use utils::{get_next_line, Header};

/// Mapping of gene ids to the representatives of their clusters at a chosen
/// percent identity.  The representatives, in sorted order, are the units of
/// the gene matrices.
#[derive(Debug)]
pub struct GeneCatalog {
    genes: Vec<String>,
    map: HashMap<String, usize>,
}

impl GeneCatalog {
    pub fn from_file<P: AsRef<Path>>(fname: P, pid: u32) -> anyhow::Result<Self> {
        let fname = fname.as_ref();
        debug!("Reading gene catalog from {}", fname.display());
        let rdr = CompressIo::new()
            .path(fname)
            .bufreader()
            .map_err(|e| {
                DensifyError::FatalConfiguration(format!(
                    "Error opening gene catalog {}: {}",
                    fname.display(),
                    e
                ))
            })?;
        let cat = Self::from_reader(rdr, &fname.display().to_string(), pid)?;
        debug!(
            "Read {} genes in {} clusters from {}",
            cat.map.len(),
            cat.genes.len(),
            fname.display()
        );
        Ok(cat)
    }

    pub fn from_reader<R: BufRead>(mut rdr: R, name: &str, pid: u32) -> anyhow::Result<Self> {
        let mut buf = String::new();
        let rep_col = format!("centroid_{}", pid);

        let (ix_gene, ix_rep) = {
            let fields = get_next_line(&mut rdr, &mut buf)
                .with_context(|| format!("Error reading header line from {}", name))?
                .ok_or_else(|| DensifyError::EmptyReference(name.to_owned()))?;
            let hdr = Header::new(&fields, &[])
                .with_context(|| format!("Error in header line of {}", name))?;
            let req = |col: &str| {
                hdr.get(col).ok_or_else(|| DensifyError::MissingField {
                    source_name: name.to_owned(),
                    column: col.to_owned(),
                })
            };
            (req("centroid_99")?, req(rep_col.as_str())?)
        };
        let min_fields = ix_gene.max(ix_rep) + 1;

        let mut line = 1;
        let mut raw: HashMap<String, String> = HashMap::new();
        while let Some(fields) = get_next_line(&mut rdr, &mut buf)
            .with_context(|| format!("Error after reading {} lines from {}", line, name))?
        {
            line += 1;
            if fields.len() < min_fields {
                // Skip short lines
                continue;
            }
            match raw.entry(fields[ix_gene].to_owned()) {
                Entry::Vacant(e) => {
                    e.insert(fields[ix_rep].to_owned());
                }
                Entry::Occupied(e) => {
                    if e.get() != fields[ix_rep] {
                        return Err(DensifyError::DuplicateUnit {
                            reference: name.to_owned(),
                            unit: e.key().to_owned(),
                        }
                        .into());
                    }
                }
            }
        }

        let genes: Vec<String> = raw
            .values()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        if genes.is_empty() {
            return Err(DensifyError::EmptyReference(name.to_owned()).into());
        }
        let gix: HashMap<&str, usize> = genes
            .iter()
            .enumerate()
            .map(|(ix, g)| (g.as_str(), ix))
            .collect();
        let map = raw
            .iter()
            .map(|(g, rep)| (g.clone(), gix[rep.as_str()]))
            .collect();
        Ok(Self { genes, map })
    }

    /// Cluster representatives in sorted order
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn representative(&self, gene_id: &str) -> Option<&str> {
        self.map.get(gene_id).map(|ix| self.genes[*ix].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENE_INFO: &str = "gene_id\tcentroid_99\tcentroid_95\tcentroid_90\n\
        g3\tg3\tg1\tg1\n\
        g1\tg1\tg1\tg1\n\
        g2\tg2\tg2\tg1\n\
        g4\tg4\tg4\tg1\n";

    #[test]
    fn representatives_are_sorted_units() {
        let c = GeneCatalog::from_reader(GENE_INFO.as_bytes(), "gene_info.txt", 95).unwrap();
        assert_eq!(c.genes(), &["g1", "g2", "g4"]);
        assert_eq!(c.representative("g3"), Some("g1"));
        assert_eq!(c.representative("g4"), Some("g4"));
        assert_eq!(c.representative("g5"), None);

        let c = GeneCatalog::from_reader(GENE_INFO.as_bytes(), "gene_info.txt", 90).unwrap();
        assert_eq!(c.n_genes(), 1);
    }

    #[test]
    fn catalog_errors_are_fatal() {
        let e = GeneCatalog::from_reader(GENE_INFO.as_bytes(), "gene_info.txt", 80).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<DensifyError>(),
            Some(DensifyError::MissingField { column, .. }) if column == "centroid_80"
        ));
        let e = GeneCatalog::from_reader("centroid_99\tcentroid_95\n".as_bytes(), "x", 95)
            .unwrap_err();
        assert!(densify::error::is_fatal(&e));
        let e = GeneCatalog::from_reader(
            "centroid_99\tcentroid_95\ng1\ta\ng1\tb\n".as_bytes(),
            "x",
            95,
        )
        .unwrap_err();
        assert!(densify::error::is_fatal(&e));
    }
}
