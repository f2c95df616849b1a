//! Sample and group lists, and discovery of per-sample input files
//!
//! Input for sample s and group g is expected in `<dir(s)>/<input_subdir>/<g>.<ext>`,
//! optionally with a `.gz` suffix.  Samples lacking a file for a group do not
//! take part in that group.
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use regex::Regex;
use utils::get_next_line;

use crate::{batch::BatchItem, error::DensifyError};

#[derive(Debug, Clone)]
pub struct Sample {
    id: String,
    dir: PathBuf,
}

impl Sample {
    pub fn new<S: AsRef<str>, P: AsRef<Path>>(id: S, dir: P) -> Self {
        Self {
            id: id.as_ref().to_owned(),
            dir: dir.as_ref().to_owned(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Input file for one sample of a group
#[derive(Debug, Clone)]
pub struct SampleInput {
    sample: String,
    path: PathBuf,
}

impl SampleInput {
    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A reference group (species).  One group is one batch item.
#[derive(Debug, Clone)]
pub struct Group {
    id: String,
    reference: PathBuf,
    inputs: Vec<SampleInput>,
}

impl Group {
    pub fn new<S: AsRef<str>, P: AsRef<Path>>(id: S, reference: P) -> Self {
        Self {
            id: id.as_ref().to_owned(),
            reference: reference.as_ref().to_owned(),
            inputs: Vec::new(),
        }
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    /// Inputs in sample list order
    pub fn inputs(&self) -> &[SampleInput] {
        &self.inputs
    }

    pub fn add_input<S: AsRef<str>, P: AsRef<Path>>(&mut self, sample: S, path: P) {
        self.inputs.push(SampleInput {
            sample: sample.as_ref().to_owned(),
            path: path.as_ref().to_owned(),
        })
    }
}

impl BatchItem for Group {
    fn id(&self) -> &str {
        &self.id
    }
}

// Read a two column list (id, path), skipping short lines and comments.
fn read_pair_list<P: AsRef<Path>>(fname: P, what: &str) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let fname = fname.as_ref();
    debug!("Reading in {} list from {}", what, fname.display());

    let mut rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Could not open {} list file {}", what, fname.display()))?;

    let mut buf = String::new();
    let mut line = 0;
    let mut v = Vec::new();
    let mut seen = HashSet::new();

    while let Some(fields) = get_next_line(&mut rdr, &mut buf).with_context(|| {
        format!("Error after reading {} lines from {}", line, fname.display())
    })? {
        line += 1;
        if fields.len() < 2 || fields[0].starts_with('#') || fields[0].is_empty() {
            continue;
        }
        if !seen.insert(fields[0].to_owned()) {
            return Err(DensifyError::FatalConfiguration(format!(
                "{}:{} Duplicate {} id {}",
                fname.display(),
                line,
                what,
                fields[0]
            ))
            .into());
        }
        v.push((fields[0].to_owned(), PathBuf::from(fields[1])))
    }

    debug!(
        "Finished reading in {} lines; found {} {}s",
        line,
        v.len(),
        what
    );
    if v.is_empty() {
        Err(DensifyError::FatalConfiguration(format!("No {}s found in {}", what, fname.display())).into())
    } else {
        Ok(v)
    }
}

/// Read `sample_id<TAB>sample_dir` lines
pub fn read_sample_list<P: AsRef<Path>>(fname: P) -> anyhow::Result<Vec<Sample>> {
    Ok(read_pair_list(fname, "sample")?
        .into_iter()
        .map(|(id, dir)| Sample { id, dir })
        .collect())
}

/// Read `group_id<TAB>reference_path` lines
pub fn read_group_list<P: AsRef<Path>>(fname: P) -> anyhow::Result<Vec<Group>> {
    Ok(read_pair_list(fname, "group")?
        .into_iter()
        .map(|(id, reference)| Group {
            id,
            reference,
            inputs: Vec::new(),
        })
        .collect())
}

/// Assign input files with extension ext found in `<sample dir>/<subdir>` to groups
pub fn find_inputs(
    samples: &[Sample],
    groups: &mut [Group],
    subdir: &str,
    ext: &str,
) -> anyhow::Result<()> {
    let reg = Regex::new(format!(r"^(.+)[.]{}(?:[.]gz)?$", regex::escape(ext)).as_str())?;
    let gix: HashMap<String, usize> = groups
        .iter()
        .enumerate()
        .map(|(ix, g)| (g.id.clone(), ix))
        .collect();

    for s in samples.iter() {
        let in_dir = s.dir.join(subdir);
        if !in_dir.is_dir() {
            warn!(
                "Input directory {} for sample {} not found",
                in_dir.display(),
                s.id
            );
            continue;
        }
        let mut found: HashMap<usize, PathBuf> = HashMap::new();
        for f in in_dir
            .read_dir()
            .with_context(|| format!("Error checking input directory {}", in_dir.display()))?
        {
            let entry = f
                .with_context(|| format!("Could not get directory entry from {}", in_dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(n) => {
                    warn!("Skipping file with illegal name {:?} in {}", n, in_dir.display());
                    continue;
                }
            };
            let Some(ix) = reg
                .captures(name.as_str())
                .and_then(|c| c.get(1))
                .and_then(|m| gix.get(m.as_str()).copied())
            else {
                continue;
            };
            if let Some(p) = found.insert(ix, path.clone()) {
                return Err(DensifyError::FatalConfiguration(format!(
                    "Multiple input files for group {} in {}: {} and {}",
                    groups[ix].id,
                    in_dir.display(),
                    p.display(),
                    path.display()
                ))
                .into());
            }
        }
        debug!(
            "{} input files found for sample {} in {}",
            found.len(),
            s.id,
            in_dir.display()
        );
        for (ix, path) in found.into_iter() {
            trace!("Adding file {} for sample {}", path.display(), s.id);
            groups[ix].add_input(&s.id, path)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_and_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        for (s, files) in [
            ("s1", vec!["g1.vcf", "g2.vcf.gz", "other.txt"]),
            ("s2", vec!["g2.vcf"]),
            ("s3", vec![]),
        ] {
            let sub = d.join(s).join("vcf");
            fs::create_dir_all(&sub).unwrap();
            for f in files {
                fs::write(sub.join(f), "").unwrap();
            }
        }
        let slist = d.join("samples.txt");
        fs::write(
            &slist,
            format!(
                "s2\t{}\n\ns1\t{}\ns3\t{}\nshort\n",
                d.join("s2").display(),
                d.join("s1").display(),
                d.join("s3").display()
            ),
        )
        .unwrap();
        let glist = d.join("groups.txt");
        fs::write(&glist, "#group_id\treference\ng1\tg1.fa\ng2\tg2.fa\ng3\tg3.fa\n").unwrap();

        let samples = read_sample_list(&slist).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].id(), "s2");
        let mut groups = read_group_list(&glist).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].reference(), Path::new("g2.fa"));

        find_inputs(&samples, &mut groups, "vcf", "vcf").unwrap();
        let ids = |g: &Group| g.inputs().iter().map(|i| i.sample().to_owned()).collect::<Vec<_>>();
        assert_eq!(ids(&groups[0]), vec!["s1"]);
        // Sample list order is kept
        assert_eq!(ids(&groups[1]), vec!["s2", "s1"]);
        assert!(groups[2].inputs().is_empty());
        assert!(groups[1].inputs()[1].path().ends_with("g2.vcf.gz"));
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let slist = dir.path().join("samples.txt");
        fs::write(&slist, "s1\ta\ns1\tb\n").unwrap();
        let e = read_sample_list(&slist).unwrap_err();
        assert!(crate::error::is_fatal(&e));
    }

    #[test]
    fn ambiguous_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("s1").join("genes");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("g1.genes"), "").unwrap();
        fs::write(sub.join("g1.genes.gz"), "").unwrap();
        let samples = vec![Sample::new("s1", dir.path().join("s1"))];
        let mut groups = vec![Group::new("g1", "g1.txt")];
        let e = find_inputs(&samples, &mut groups, "genes", "genes").unwrap_err();
        assert!(crate::error::is_fatal(&e));
    }
}
