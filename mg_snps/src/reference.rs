use std::{collections::HashMap, fmt, io::BufRead, path::Path, sync::Arc};

use anyhow::Context;
use compress_io::compress::CompressIo;

use densify::{merge::Keyed, DensifyError};

pub type Contig = Arc<str>;

#[derive(Debug)]
struct ContigSeq {
    name: Contig,
    seq: Vec<u8>,
}

/// One reference position.  Sites are ordered by contig (in name order) and
/// then by 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site<'a> {
    ctg_ix: usize,
    ctg: &'a str,
    pos: usize,
    base: u8,
}

impl<'a> Site<'a> {
    pub fn ctg(&self) -> &'a str {
        self.ctg
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn base(&self) -> char {
        self.base as char
    }
}

impl Keyed for Site<'_> {
    type Key = (usize, usize);

    fn key(&self) -> Self::Key {
        (self.ctg_ix, self.pos)
    }
}

/// Site id as used for matrix rows
impl fmt::Display for Site<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}|{}", self.ctg, self.pos)
    }
}

/// Complete enumeration of the sites of a reference genome
#[derive(Debug)]
pub struct GenomeIndex {
    contigs: Vec<ContigSeq>,
    ctg_hash: HashMap<Contig, usize>,
    n_sites: usize,
}

impl GenomeIndex {
    pub fn from_fasta<P: AsRef<Path>>(fname: P) -> anyhow::Result<Self> {
        let fname = fname.as_ref();
        debug!("Reading reference sequence from {}", fname.display());
        let rdr = CompressIo::new()
            .path(fname)
            .bufreader()
            .map_err(|e| {
                DensifyError::FatalConfiguration(format!(
                    "Error opening reference file {}: {}",
                    fname.display(),
                    e
                ))
            })?;
        let g = Self::from_reader(rdr, &fname.display().to_string())?;
        debug!(
            "Read {} contigs with {} sites from {}",
            g.n_contigs(),
            g.n_sites,
            fname.display()
        );
        Ok(g)
    }

    /// Read FASTA format sequences from rdr.  name is used for error messages
    pub fn from_reader<R: BufRead>(mut rdr: R, name: &str) -> anyhow::Result<Self> {
        let mut buf = String::new();
        let mut line = 0;
        let mut contigs: Vec<ContigSeq> = Vec::new();
        let mut ctg_hash = HashMap::new();

        loop {
            buf.clear();
            if rdr
                .read_line(&mut buf)
                .with_context(|| format!("Error after reading {} lines from {}", line, name))?
                == 0
            {
                break;
            }
            line += 1;
            let s = buf.trim();
            if let Some(h) = s.strip_prefix('>') {
                let ctg: Contig = Arc::from(h.split_whitespace().next().unwrap_or(""));
                if ctg.is_empty() {
                    return Err(DensifyError::FatalConfiguration(format!(
                        "{}:{} Empty contig name",
                        name, line
                    ))
                    .into());
                }
                if ctg_hash.insert(ctg.clone(), contigs.len()).is_some() {
                    return Err(DensifyError::DuplicateUnit {
                        reference: name.to_owned(),
                        unit: ctg.to_string(),
                    }
                    .into());
                }
                trace!("Reading contig {}", ctg);
                contigs.push(ContigSeq {
                    name: ctg,
                    seq: Vec::new(),
                })
            } else if !s.is_empty() {
                match contigs.last_mut() {
                    Some(c) => c.seq.extend(s.bytes().map(|b| b.to_ascii_uppercase())),
                    None => {
                        return Err(DensifyError::FatalConfiguration(format!(
                            "{}:{} Sequence found before first FASTA header",
                            name, line
                        ))
                        .into())
                    }
                }
            }
        }

        contigs.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        for (ix, c) in contigs.iter().enumerate() {
            ctg_hash.insert(c.name.clone(), ix);
        }
        let n_sites = contigs.iter().map(|c| c.seq.len()).sum();
        if n_sites == 0 {
            Err(DensifyError::EmptyReference(name.to_owned()).into())
        } else {
            Ok(Self {
                contigs,
                ctg_hash,
                n_sites,
            })
        }
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn n_contigs(&self) -> usize {
        self.contigs.len()
    }

    /// Position of contig in the site order along with its shared name
    pub fn contig(&self, name: &str) -> Option<(usize, &Contig)> {
        self.ctg_hash
            .get(name)
            .map(|ix| (*ix, &self.contigs[*ix].name))
    }

    /// All sites in order
    pub fn sites(&self) -> impl Iterator<Item = Site<'_>> + '_ {
        self.contigs.iter().enumerate().flat_map(|(ctg_ix, c)| {
            c.seq.iter().enumerate().map(move |(i, b)| Site {
                ctg_ix,
                ctg: &c.name,
                pos: i + 1,
                base: *b,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sites_in_contig_order() {
        let fa = ">ctg2 second\nAC\n>ctg1\nac\ngt\n>ctg10\n\nN\n";
        let g = GenomeIndex::from_reader(fa.as_bytes(), "test.fa").unwrap();
        assert_eq!(g.n_sites(), 7);
        assert_eq!(g.n_contigs(), 3);
        let v: Vec<_> = g.sites().map(|s| s.to_string()).collect();
        assert_eq!(
            v,
            vec!["ctg1|1", "ctg1|2", "ctg1|3", "ctg1|4", "ctg10|1", "ctg2|1", "ctg2|2"]
        );
        let bases: String = g.sites().map(|s| s.base()).collect();
        assert_eq!(bases, "ACGTNAC");
        assert_eq!(g.contig("ctg2").map(|(ix, _)| ix), Some(2));
        assert!(g.contig("ctg3").is_none());

        let keys: Vec<_> = g.sites().map(|s| s.key()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn duplicate_contig() {
        let e = GenomeIndex::from_reader(">a\nA\n>a\nC\n".as_bytes(), "dup.fa").unwrap_err();
        assert!(matches!(
            e.downcast_ref::<DensifyError>(),
            Some(DensifyError::DuplicateUnit { .. })
        ));
    }

    #[test]
    fn empty_reference() {
        for fa in ["", ">a\n\n>b\n"] {
            let e = GenomeIndex::from_reader(fa.as_bytes(), "empty.fa").unwrap_err();
            assert!(densify::error::is_fatal(&e));
        }
        let e = GenomeIndex::from_reader("ACGT\n".as_bytes(), "bad.fa").unwrap_err();
        assert!(densify::error::is_fatal(&e));
    }
}
