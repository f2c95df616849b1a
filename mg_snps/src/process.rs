use std::{
    collections::HashMap,
    fs,
    io::{BufRead, Write},
    path::Path,
    sync::Mutex,
};

use anyhow::Context;

use densify::{
    batch::{run_batch, with_retries, BatchItem},
    error::is_ordering,
    layout::Group,
    matrix::{write_atomic, GroupOutput, Matrix},
    merge::densify,
    status::RunStatus,
};

use crate::{
    config::Config,
    record::{write_table_header, AlleleCode, AlleleTable, RefFreq, SnpRecord},
    reference::GenomeIndex,
    summary::{SnpSummary, SNP_SUMMARY_FIELDS},
    vcf::{open_vcf, VcfReader},
};

type GroupSummary = Vec<(String, SnpSummary)>;

/// Summaries of the samples merged for one group, and the samples left out
struct GroupResult {
    summary: GroupSummary,
    skipped: Vec<String>,
}

/// Per sample vectors in reference site order
struct SampleColumns {
    depth: Vec<u32>,
    ref_freq: Vec<RefFreq>,
    cons_allele: Vec<AlleleCode>,
    summary: SnpSummary,
}

impl SampleColumns {
    fn with_capacity(n: usize) -> Self {
        Self {
            depth: Vec::with_capacity(n),
            ref_freq: Vec::with_capacity(n),
            cons_allele: Vec::with_capacity(n),
            summary: SnpSummary::default(),
        }
    }

    fn push(&mut self, r: &SnpRecord, alleles: &mut AlleleTable) -> anyhow::Result<()> {
        self.depth.push(r.depth());
        self.ref_freq.push(RefFreq::from(r.ref_freq()));
        self.cons_allele.push(alleles.code(r.cons_allele())?);
        self.summary.add(r);
        Ok(())
    }
}

/// Merge one sample onto the genome, optionally writing the dense table to table
fn densify_sample<R: BufRead>(
    genome: &GenomeIndex,
    rdr: VcfReader<R>,
    alleles: &mut AlleleTable,
    mut table: Option<&mut dyn Write>,
) -> anyhow::Result<SampleColumns> {
    let mut cols = SampleColumns::with_capacity(genome.n_sites());
    if let Some(w) = table.as_mut() {
        write_table_header(w)?
    }
    for d in densify(genome.sites(), rdr) {
        let r = SnpRecord::from(d?);
        if let Some(w) = table.as_mut() {
            r.write_row(w)?
        }
        cols.push(&r, alleles)?;
    }
    Ok(cols)
}

struct GroupMatrices {
    depth: Matrix<u32>,
    ref_freq: Matrix<RefFreq>,
    cons_allele: Matrix<AlleleCode>,
    alleles: AlleleTable,
}

impl GroupMatrices {
    fn new(n: usize) -> Self {
        Self {
            depth: Matrix::new("snps_depth", n),
            ref_freq: Matrix::new("snps_ref_freq", n),
            cons_allele: Matrix::new("snps_cons_allele", n),
            alleles: AlleleTable::default(),
        }
    }

    fn add_sample(&mut self, sample: &str, cols: SampleColumns) -> anyhow::Result<()> {
        self.depth.add_column(sample, cols.depth)?;
        self.ref_freq.add_column(sample, cols.ref_freq)?;
        self.cons_allele.add_column(sample, cols.cons_allele)
    }

    fn write(&self, out: &mut GroupOutput, genome: &GenomeIndex) -> anyhow::Result<()> {
        for name in [self.depth.name(), self.ref_freq.name(), self.cons_allele.name()] {
            out.file(format!("{}.txt", name));
        }
        let dir = out.dir();
        trace!("{} distinct consensus alleles", self.alleles.len());
        self.depth.write_to_dir(dir, "site_id", genome.sites())?;
        self.ref_freq.write_to_dir(dir, "site_id", genome.sites())?;
        self.cons_allele
            .write_to_dir_with(dir, "site_id", genome.sites(), |c| self.alleles.allele(*c))
    }
}

fn write_group_summary(path: &Path, summ: &[(String, SnpSummary)]) -> anyhow::Result<()> {
    write_atomic(path, |w| {
        writeln!(w, "sample_id\t{}", SNP_SUMMARY_FIELDS.join("\t"))?;
        for (s, x) in summ.iter() {
            write!(w, "{}", s)?;
            x.write_fields(w)?;
            writeln!(w)?;
        }
        Ok(())
    })
    .with_context(|| format!("Error writing summary file {}", path.display()))
}

/// Merge the samples of a group and write its output.  A sample whose
/// observations do not follow the reference is left out of the matrices; any
/// other error fails the group.
fn merge_group(
    cfg: &Config,
    g: &Group,
    genome: &GenomeIndex,
    out: &mut GroupOutput,
) -> anyhow::Result<GroupResult> {
    let tab_dir = out.dir().join("samples");
    if cfg.sample_tables() {
        out.create_dir(&tab_dir)?
    }

    let mut mats = GroupMatrices::new(genome.n_sites());
    let mut summ = Vec::with_capacity(g.inputs().len());
    let mut skipped = Vec::new();

    for inp in g.inputs() {
        debug!("Merging sample {} for group {}", inp.sample(), g.id());
        let res = with_retries(cfg.retry(), &inp.path().display().to_string(), || {
            open_vcf(inp.path(), genome)
        })
        .and_then(|rdr| {
            if cfg.sample_tables() {
                let path = out.file(format!("samples/{}.snps.txt", inp.sample()));
                let mut cols = None;
                write_atomic(&path, |w| {
                    cols = Some(densify_sample(
                        genome,
                        rdr,
                        &mut mats.alleles,
                        Some(w as &mut dyn Write),
                    )?);
                    Ok(())
                })?;
                cols.ok_or_else(|| anyhow!("No data collected for {}", path.display()))
            } else {
                densify_sample(genome, rdr, &mut mats.alleles, None)
            }
        })
        .with_context(|| format!("Error processing sample {} for group {}", inp.sample(), g.id()));

        let cols = match res {
            Ok(c) => c,
            Err(e) if is_ordering(&e) => {
                warn!("Leaving sample {} out of group {}: {:#}", inp.sample(), g.id(), e);
                skipped.push(inp.sample().to_owned());
                continue;
            }
            Err(e) => return Err(e),
        };
        trace!(
            "Sample {}: {} of {} sites covered",
            inp.sample(),
            cols.summary.covered_bases(),
            cols.summary.genome_length()
        );
        summ.push((inp.sample().to_owned(), cols.summary.clone()));
        mats.add_sample(inp.sample(), cols)?;
    }

    let gdir = out.dir().to_owned();
    out.create_dir(&gdir)?;
    mats.write(out, genome)?;
    let path = out.file("snps_summary.txt");
    write_group_summary(&path, &summ)?;
    Ok(GroupResult {
        summary: summ,
        skipped,
    })
}

/// Process all samples for one group.  Returns None if the group has no samples
fn process_group(cfg: &Config, g: &Group) -> anyhow::Result<Option<GroupResult>> {
    if g.inputs().is_empty() {
        warn!("No samples found for group {}", g.id());
        return Ok(None);
    }
    info!("Processing group {} ({} samples)", g.id(), g.inputs().len());
    let genome = GenomeIndex::from_fasta(g.reference())
        .with_context(|| format!("Error reading reference for group {}", g.id()))?;

    let mut out = GroupOutput::new(cfg.output_dir().join(g.id()));
    match merge_group(cfg, g, &genome, &mut out) {
        Ok(r) => {
            debug!("Finished group {}", g.id());
            Ok(Some(r))
        }
        Err(e) => {
            out.discard();
            Err(e)
        }
    }
}

fn write_run_summary(
    path: &Path,
    groups: &[Group],
    res: &HashMap<String, GroupResult>,
) -> anyhow::Result<()> {
    debug!("Writing run summary to {}", path.display());
    write_atomic(path, |w| {
        writeln!(w, "group_id\tsample_id\t{}", SNP_SUMMARY_FIELDS.join("\t"))?;
        for g in groups.iter() {
            if let Some(r) = res.get(g.id()) {
                for (s, x) in r.summary.iter() {
                    write!(w, "{}\t{}", g.id(), s)?;
                    x.write_fields(w)?;
                    writeln!(w)?;
                }
            }
        }
        Ok(())
    })
    .with_context(|| format!("Error writing run summary {}", path.display()))
}

fn skipped_samples(groups: &[Group], res: &HashMap<String, GroupResult>) -> Vec<String> {
    groups
        .iter()
        .filter_map(|g| res.get(g.id()).map(|r| (g.id(), r)))
        .flat_map(|(id, r)| r.skipped.iter().map(move |s| format!("{}/{}", id, s)))
        .collect()
}

pub fn process_groups(cfg: &Config) -> anyhow::Result<RunStatus> {
    info!(
        "Collating SNP data for {} groups from {} samples",
        cfg.groups().len(),
        cfg.n_samples()
    );
    fs::create_dir_all(cfg.output_dir()).with_context(|| {
        format!(
            "Could not create output directory {}",
            cfg.output_dir().display()
        )
    })?;

    let results = Mutex::new(HashMap::new());
    let rep = run_batch(cfg.groups(), &cfg.batch_policy(), |g| {
        if let Some(s) = process_group(cfg, g)? {
            results
                .lock()
                .map_err(|_| anyhow!("Summary store poisoned"))?
                .insert(g.id().to_owned(), s);
        }
        Ok(())
    })?;

    let mut status = RunStatus::from_report(&rep, "SNP");
    if rep.aborted() {
        error!("{}", status.to_json()?);
        return Err(anyhow!("{}", status.comment()));
    }

    let results = results
        .into_inner()
        .map_err(|_| anyhow!("Summary store poisoned"))?;
    status.set_skipped_samples(skipped_samples(cfg.groups(), &results));
    write_run_summary(
        &cfg
            .output_dir()
            .join(format!("{}_summary.txt", cfg.prefix())),
        cfg.groups(),
        &results,
    )?;
    status.write(
        cfg.output_dir()
            .join(format!("{}_status.json", cfg.prefix())),
    )?;
    info!("{}", status.comment());
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use densify::layout::{find_inputs, read_group_list, read_sample_list};

    const VCF_HDR: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

    fn setup(d: &Path, vcfs: &[(&str, &str, &str)], groups: &[(&str, &str)]) -> Config {
        let mut slist = String::new();
        let mut seen = Vec::new();
        for (s, g, body) in vcfs {
            let sub = d.join(s).join("vcf");
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join(format!("{}.vcf", g)), format!("{}{}", VCF_HDR, body)).unwrap();
            if !seen.contains(s) {
                seen.push(*s);
                slist.push_str(&format!("{}\t{}\n", s, d.join(s).display()));
            }
        }
        fs::write(d.join("samples.txt"), slist).unwrap();
        let mut glist = String::new();
        for (g, fa) in groups {
            let p = d.join(format!("{}.fa", g));
            fs::write(&p, fa).unwrap();
            glist.push_str(&format!("{}\t{}\n", g, p.display()));
        }
        fs::write(d.join("groups.txt"), glist).unwrap();

        let samples = read_sample_list(d.join("samples.txt")).unwrap();
        let mut groups = read_group_list(d.join("groups.txt")).unwrap();
        find_inputs(&samples, &mut groups, "vcf", "vcf").unwrap();
        let mut cfg = Config::new("snps".to_string(), groups, samples.len());
        cfg.set_output_dir(d.join("out"));
        cfg.set_threads(2);
        cfg
    }

    #[test]
    fn gap_filling() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let mut cfg = setup(
            d,
            &[("s1", "g1", "chr1\t2\t.\tC\tT,<X>\t0\t.\tI16=3,3,1,1,0\n")],
            &[("g1", ">chr1\nACG\n")],
        );
        cfg.set_sample_tables(true);
        let st = process_groups(&cfg).unwrap();
        assert_eq!(st.successful_species_count(), 1);

        let tab = fs::read_to_string(d.join("out/g1/samples/s1.snps.txt")).unwrap();
        let lines: Vec<_> = tab.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], SNP_TABLE_HEADER);
        assert_eq!(lines[1], "chr1\t1\tA\tNA\tNA\t1\t0\t0\t0\tNA");
        assert_eq!(lines[2], "chr1\t2\tC\tT\tC\t2\t6\t2\t8\t0.75");
        assert_eq!(lines[3], "chr1\t3\tG\tNA\tNA\t1\t0\t0\t0\tNA");
    }

    const SNP_TABLE_HEADER: &str = "ref_id\tref_pos\tref_allele\talt_allele\tcons_allele\tcount_alleles\tcount_ref\tcount_alt\tdepth\tref_freq";

    #[test]
    fn group_matrices() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cfg = setup(
            d,
            &[
                ("s1", "g1", "b\t1\t.\tG\tA\t0\t.\tI16=0,0,2,2\n"),
                ("s2", "g1", "a\t2\t.\tC\t<X>\t0\t.\tI16=1,1,0,0\nb\t1\t.\tG\tA\t0\t.\tI16=1,0,0,0\n"),
                ("s2", "g2", "x\t1\t.\tT\t<X>\t0\t.\tI16=5,0,0,0\n"),
            ],
            &[("g1", ">b\nG\n>a\nAC\n"), ("g2", ">x\nT\n"), ("g3", ">y\nA\n")],
        );
        let st = process_groups(&cfg).unwrap();
        assert_eq!(st.successful_species_count(), 3);
        assert_eq!(st.failed_species_count(), 0);

        let out = d.join("out");
        assert_eq!(
            fs::read_to_string(out.join("g1/snps_depth.txt")).unwrap(),
            "site_id\ts1\ts2\na|1\t0\t0\na|2\t0\t2\nb|1\t4\t1\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("g1/snps_cons_allele.txt")).unwrap(),
            "site_id\ts1\ts2\na|1\tNA\tNA\na|2\tNA\tC\nb|1\tA\tG\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("g1/snps_ref_freq.txt")).unwrap(),
            "site_id\ts1\ts2\na|1\tNA\tNA\na|2\tNA\t1\nb|1\t0\t1\n"
        );
        // Every matrix has one row per site
        for m in ["snps_depth", "snps_ref_freq", "snps_cons_allele"] {
            let s = fs::read_to_string(out.join(format!("g2/{}.txt", m))).unwrap();
            assert_eq!(s.lines().count(), 2);
        }
        // g3 has no samples, so there is no output for it
        assert!(!out.join("g3").exists());

        let summ = fs::read_to_string(out.join("snps_summary.txt")).unwrap();
        let lines: Vec<_> = summ.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("group_id\tsample_id\tgenome_length"));
        assert!(lines[1].starts_with("g1\ts1\t3\t1\t0.3333"));
        assert!(lines[3].starts_with("g2\ts2\t1\t1\t1.0000"));

        let status = fs::read_to_string(out.join("snps_status.json")).unwrap();
        assert!(status.contains("\"total_species_count\": 3"));
    }

    #[test]
    fn unordered_sample_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cfg = setup(
            d,
            &[
                ("s1", "g1", "c\t2\t.\tA\t<X>\t0\t.\tI16=1,0,0,0\nc\t1\t.\tA\t<X>\t0\t.\tI16=1,0,0,0\n"),
                ("s2", "g1", "c\t1\t.\tA\t<X>\t0\t.\tI16=2,0,0,0\n"),
            ],
            &[("g1", ">c\nAA\n")],
        );
        let st = process_groups(&cfg).unwrap();
        assert_eq!(st.successful_species_count(), 1);
        assert_eq!(st.skipped_samples(), &["g1/s1".to_string()]);
        assert_eq!(
            fs::read_to_string(d.join("out/g1/snps_depth.txt")).unwrap(),
            "site_id\ts2\nc|1\t2\nc|2\t0\n"
        );
    }

    #[test]
    fn bad_sample_fails_group() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let mut cfg = setup(
            d,
            &[
                ("s1", "g1", "c\t1\t.\tA\t<X>\t0\t.\tI16=1,0,0,0\n"),
                ("s2", "g1", "c\t1\t.\tA\t<X>\t0\t.\tDP=3\n"),
                ("s1", "g2", "c\t1\t.\tA\t<X>\t0\t.\tI16=1,0,0,0\n"),
            ],
            &[("g1", ">c\nAA\n"), ("g2", ">c\nA\n")],
        );
        cfg.set_sample_tables(true);
        let st = process_groups(&cfg).unwrap();
        assert_eq!(st.failed_species_ids(), &["g1".to_string()]);
        assert_eq!(st.successful_species_count(), 1);
        let out = d.join("out");
        // The table already written for s1 goes with the rest of the group
        assert!(!out.join("g1").exists());
        assert!(out.join("g2/snps_depth.txt").exists());
        assert!(out.join("g2/samples/s1.snps.txt").exists());
    }

    #[test]
    fn cons_alleles_decoded_on_output() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cfg = setup(
            d,
            &[
                ("s1", "g1", "c\t1\t.\tA\tGT\t0\t.\tI16=0,0,3,0\nc\t2\t.\tC\tT\t0\t.\tI16=0,0,1,0\n"),
                ("s2", "g1", "c\t2\t.\tC\tT\t0\t.\tI16=4,0,1,0\n"),
            ],
            &[("g1", ">c\nAC\n")],
        );
        process_groups(&cfg).unwrap();
        assert_eq!(
            fs::read_to_string(d.join("out/g1/snps_cons_allele.txt")).unwrap(),
            "site_id\ts1\ts2\nc|1\tGT\tNA\nc|2\tT\tC\n"
        );
        assert_eq!(
            fs::read_to_string(d.join("out/g1/snps_ref_freq.txt")).unwrap(),
            "site_id\ts1\ts2\nc|1\t0\tNA\nc|2\t0\t0.8\n"
        );
    }

    #[test]
    fn bad_reference_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let cfg = setup(
            d,
            &[("s1", "g1", "c\t1\t.\tA\t<X>\t0\t.\tI16=1,0,0,0\n")],
            &[("g1", ">c\nA\n>c\nA\n")],
        );
        let e = process_groups(&cfg).unwrap_err();
        assert!(densify::error::is_fatal(&e));
        assert!(!d.join("out/snps_status.json").exists());
    }
}
