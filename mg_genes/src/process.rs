use std::{collections::HashMap, fs, io::Write, path::Path, sync::Mutex};

use anyhow::Context;

use densify::{
    batch::{run_batch, with_retries, BatchItem},
    error::is_ordering,
    layout::Group,
    matrix::{write_atomic, GroupOutput, Matrix},
    merge::hash_fill,
    status::RunStatus,
};

use crate::{
    catalog::GeneCatalog,
    config::Config,
    genes::{accumulate, open_genes, GeneAccum, GeneRecord},
    summary::{GeneSummary, GENE_SUMMARY_FIELDS},
};

type GroupSummary = Vec<(String, GeneSummary)>;

/// Summaries of the samples merged for one group, and the samples left out
struct GroupResult {
    summary: GroupSummary,
    skipped: Vec<String>,
}

const README: &str = "\
Gene matrices for one species

Output files
genes_depth.txt
  average read depth of each gene per sample
genes_copynum.txt
  copy number of each gene per sample
genes_presabs.txt
  presence (1) or absence (0) of each gene per sample, from a threshold on
  copy number
genes_reads.txt
  number of reads mapped to each gene per sample
genes_summary.txt
  summary statistics per sample

Output formats
genes_depth.txt, genes_copynum.txt, genes_presabs.txt, genes_reads.txt
  tab-delimited matrix files
  field names are sample ids
  row names are gene ids (cluster representatives)
genes_summary.txt
  sample_id: sample identifier
  pangenome_size: number of genes in the catalog
  covered_genes: number of genes with non-zero coverage
  fraction_covered: covered_genes / pangenome_size
  mean_depth: mean coverage of covered genes
  present_genes: number of genes present
  fraction_present: present_genes / pangenome_size
";

/// One matrix per derived quantity, columns added sample by sample
struct GroupMatrices {
    presabs: Matrix<u8>,
    copynum: Matrix<f64>,
    depth: Matrix<f64>,
    reads: Matrix<u64>,
}

impl GroupMatrices {
    fn new(n: usize) -> Self {
        Self {
            presabs: Matrix::new("genes_presabs", n),
            copynum: Matrix::new("genes_copynum", n),
            depth: Matrix::new("genes_depth", n),
            reads: Matrix::new("genes_reads", n),
        }
    }

    /// Densify the accumulated values of one sample over the catalog, adding a
    /// column to each matrix
    fn add_sample(
        &mut self,
        sample: &str,
        catalog: &GeneCatalog,
        obs: HashMap<String, GeneAccum>,
        min_copy: f64,
    ) -> anyhow::Result<GeneSummary> {
        let n = catalog.n_genes();
        let mut presabs = Vec::with_capacity(n);
        let mut copynum = Vec::with_capacity(n);
        let mut depth = Vec::with_capacity(n);
        let mut reads = Vec::with_capacity(n);
        let mut summ = GeneSummary::new(min_copy);

        for d in hash_fill(catalog.genes(), obs) {
            let r = GeneRecord::from(d?);
            presabs.push(u8::from(r.is_present(min_copy)));
            copynum.push(r.values().copy_number());
            depth.push(r.values().coverage());
            reads.push(r.values().count_reads());
            summ.add(&r);
        }
        self.presabs.add_column(sample, presabs)?;
        self.copynum.add_column(sample, copynum)?;
        self.depth.add_column(sample, depth)?;
        self.reads.add_column(sample, reads)?;
        Ok(summ)
    }

    fn write(&self, out: &mut GroupOutput, catalog: &GeneCatalog) -> anyhow::Result<()> {
        for m in [self.presabs.name(), self.copynum.name(), self.depth.name(), self.reads.name()] {
            out.file(format!("{}.txt", m));
        }
        let dir = out.dir();
        self.presabs.write_to_dir(dir, "gene_id", catalog.genes())?;
        self.copynum.write_to_dir(dir, "gene_id", catalog.genes())?;
        self.depth.write_to_dir(dir, "gene_id", catalog.genes())?;
        self.reads.write_to_dir(dir, "gene_id", catalog.genes())
    }
}

fn write_summary_rows<W: Write>(
    w: &mut W,
    group: Option<&str>,
    summ: &[(String, GeneSummary)],
) -> anyhow::Result<()> {
    for (s, x) in summ.iter() {
        if let Some(g) = group {
            write!(w, "{}\t", g)?;
        }
        write!(w, "{}", s)?;
        x.write_fields(w)?;
        writeln!(w)?;
    }
    Ok(())
}

fn write_readme(path: &Path, min_copy: f64, cluster_pid: u32) -> anyhow::Result<()> {
    write_atomic(path, |w| {
        write!(w, "{}", README)?;
        writeln!(
            w,
            "\nGenes are clustered at {}% identity; a gene is present with a copy number of at least {}",
            cluster_pid, min_copy
        )?;
        Ok(())
    })
    .with_context(|| format!("Error writing {}", path.display()))
}

/// Merge the samples of a group and write its output.  Samples with genes
/// missing from the catalog are left out; any other error fails the group.
fn merge_group(
    cfg: &Config,
    g: &Group,
    catalog: &GeneCatalog,
    out: &mut GroupOutput,
) -> anyhow::Result<GroupResult> {
    let mut mats = GroupMatrices::new(catalog.n_genes());
    let mut summ = Vec::with_capacity(g.inputs().len());
    let mut skipped = Vec::new();

    for inp in g.inputs() {
        debug!("Merging sample {} for group {}", inp.sample(), g.id());
        let res = with_retries(cfg.retry(), &inp.path().display().to_string(), || {
            open_genes(inp.path(), catalog)
        })
        .and_then(accumulate)
        .and_then(|obs| mats.add_sample(inp.sample(), catalog, obs, cfg.min_copy()))
        .with_context(|| format!("Error processing sample {} for group {}", inp.sample(), g.id()));
        let s = match res {
            Ok(s) => s,
            Err(e) if is_ordering(&e) => {
                warn!("Leaving sample {} out of group {}: {:#}", inp.sample(), g.id(), e);
                skipped.push(inp.sample().to_owned());
                continue;
            }
            Err(e) => return Err(e),
        };
        trace!(
            "Sample {}: {} of {} genes present",
            inp.sample(),
            s.present_genes(),
            s.pangenome_size()
        );
        summ.push((inp.sample().to_owned(), s));
    }

    let gdir = out.dir().to_owned();
    out.create_dir(&gdir)?;
    mats.write(out, catalog)?;
    let path = out.file("genes_summary.txt");
    write_atomic(&path, |w| {
        writeln!(w, "sample_id\t{}", GENE_SUMMARY_FIELDS.join("\t"))?;
        write_summary_rows(w, None, &summ)
    })
    .with_context(|| format!("Error writing summary file {}", path.display()))?;
    let path = out.file("readme.txt");
    write_readme(&path, cfg.min_copy(), cfg.cluster_pid())?;
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
    let catalog = GeneCatalog::from_file(g.reference(), cfg.cluster_pid())
        .with_context(|| format!("Error reading gene catalog for group {}", g.id()))?;

    let mut out = GroupOutput::new(cfg.output_dir().join(g.id()));
    match merge_group(cfg, g, &catalog, &mut out) {
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

pub fn process_groups(cfg: &Config) -> anyhow::Result<RunStatus> {
    info!(
        "Collating gene data for {} groups from {} samples (min copy {}, cluster pid {})",
        cfg.groups().len(),
        cfg.n_samples(),
        cfg.min_copy(),
        cfg.cluster_pid()
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

    let mut status = RunStatus::from_report(&rep, "gene");
    if rep.aborted() {
        error!("{}", status.to_json()?);
        return Err(anyhow!("{}", status.comment()));
    }

    let results: HashMap<String, GroupResult> = results
        .into_inner()
        .map_err(|_| anyhow!("Summary store poisoned"))?;
    status.set_skipped_samples(
        cfg.groups()
            .iter()
            .filter_map(|g| results.get(g.id()).map(|r| (g.id(), r)))
            .flat_map(|(id, r)| r.skipped.iter().map(move |s| format!("{}/{}", id, s)))
            .collect(),
    );
    let path = cfg
        .output_dir()
        .join(format!("{}_summary.txt", cfg.prefix()));
    debug!("Writing run summary to {}", path.display());
    write_atomic(&path, |w| {
        writeln!(w, "group_id\tsample_id\t{}", GENE_SUMMARY_FIELDS.join("\t"))?;
        for g in cfg.groups() {
            if let Some(r) = results.get(g.id()) {
                write_summary_rows(w, Some(g.id()), &r.summary)?
            }
        }
        Ok(())
    })
    .with_context(|| format!("Error writing run summary {}", path.display()))?;

    status.write(
        cfg.output_dir()
            .join(format!("{}_status.json", cfg.prefix())),
    )?;
    info!("{}", status.comment());
    Ok(status)
}
