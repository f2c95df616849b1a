use std::{
    fmt, fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;

/// Display wrapper writing NA for missing values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Na<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for Na<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(x) => fmt::Display::fmt(x, f),
            None => f.write_str("NA"),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Write to a temporary file next to path, renaming it into place only if f
/// succeeds.  On failure the temporary file is removed, so nothing is left at
/// path.
pub fn write_atomic<P, F>(path: P, f: F) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<fs::File>) -> anyhow::Result<()>,
{
    let path = path.as_ref();
    let tmp = tmp_path(path);
    trace!("Writing {} via {}", path.display(), tmp.display());
    let res = fs::File::create(&tmp)
        .with_context(|| format!("problem creating output file {}", tmp.display()))
        .and_then(|file| {
            let mut wrt = BufWriter::new(file);
            f(&mut wrt)?;
            wrt.flush()
                .with_context(|| format!("Error writing to {}", tmp.display()))
        });
    match res {
        Ok(()) => fs::rename(&tmp, path).with_context(|| {
            format!("Error renaming {} to {}", tmp.display(), path.display())
        }),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Output of one reference group
///
/// Directories created and files registered through it are removed again by
/// discard, so a group that fails part way leaves nothing behind.
#[derive(Debug)]
pub struct GroupOutput {
    dir: PathBuf,
    created: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl GroupOutput {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
            created: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create d and any missing parents, remembering those that did not exist
    pub fn create_dir<P: AsRef<Path>>(&mut self, d: P) -> anyhow::Result<()> {
        let d = d.as_ref();
        let mut new_dirs = Vec::new();
        let mut p = Some(d);
        while let Some(x) = p {
            if x.as_os_str().is_empty() || x.exists() {
                break;
            }
            new_dirs.push(x.to_owned());
            p = x.parent();
        }
        fs::create_dir_all(d)
            .with_context(|| format!("Could not create output directory {}", d.display()))?;
        // Outermost first
        self.created.extend(new_dirs.into_iter().rev());
        Ok(())
    }

    /// Path of name relative to the group directory, registered for removal
    pub fn file<S: AsRef<Path>>(&mut self, name: S) -> PathBuf {
        let p = self.dir.join(name);
        self.files.push(p.clone());
        p
    }

    /// Remove everything written for the group
    pub fn discard(self) {
        debug!("Removing output in {}", self.dir.display());
        for f in self.files.iter() {
            let _ = fs::remove_file(f);
        }
        // Only removes directories that are now empty
        for d in self.created.iter().rev() {
            let _ = fs::remove_dir(d);
        }
    }
}

/// A matrix for one derived quantity
///
/// Each column holds the values for one sample in reference unit order.  Columns
/// are kept in the order they were added, which is the order of the input sample
/// list.
#[derive(Debug)]
pub struct Matrix<T> {
    name: String,
    n_rows: usize,
    columns: Vec<(String, Vec<T>)>,
}

impl<T> Matrix<T> {
    pub fn new<S: AsRef<str>>(name: S, n_rows: usize) -> Self {
        Self {
            name: name.as_ref().to_owned(),
            n_rows,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn add_column<S: AsRef<str>>(&mut self, sample: S, col: Vec<T>) -> anyhow::Result<()> {
        if col.len() != self.n_rows {
            Err(anyhow!(
                "Column for sample {} in matrix {} has {} rows (expected {})",
                sample.as_ref(),
                self.name,
                col.len(),
                self.n_rows
            ))
        } else {
            self.columns.push((sample.as_ref().to_owned(), col));
            Ok(())
        }
    }

    fn write_cells<W, I, D, C>(
        &self,
        wrt: &mut W,
        unit_label: &str,
        row_ids: I,
        mut cell: C,
    ) -> anyhow::Result<()>
    where
        W: Write,
        I: IntoIterator<Item = D>,
        D: fmt::Display,
        C: FnMut(&mut W, &T) -> io::Result<()>,
    {
        write!(wrt, "{}", unit_label)?;
        for (s, _) in self.columns.iter() {
            write!(wrt, "\t{}", s)?;
        }
        writeln!(wrt)?;
        let mut n = 0;
        for id in row_ids {
            if n >= self.n_rows {
                return Err(anyhow!("Too many row labels for matrix {}", self.name));
            }
            write!(wrt, "{}", id)?;
            for (_, c) in self.columns.iter() {
                cell(wrt, &c[n])?;
            }
            writeln!(wrt)?;
            n += 1;
        }
        if n != self.n_rows {
            Err(anyhow!(
                "Only {} row labels for matrix {} with {} rows",
                n,
                self.name,
                self.n_rows
            ))
        } else {
            Ok(())
        }
    }

    /// Write matrix with header line, converting each stored value with f before
    /// output.  row_ids must produce exactly one label per row
    pub fn write_with<W, I, D, F, V>(
        &self,
        wrt: &mut W,
        unit_label: &str,
        row_ids: I,
        f: F,
    ) -> anyhow::Result<()>
    where
        W: Write,
        I: IntoIterator<Item = D>,
        D: fmt::Display,
        F: Fn(&T) -> V,
        V: fmt::Display,
    {
        self.write_cells(wrt, unit_label, row_ids, |w, x| write!(w, "\t{}", f(x)))
    }

    fn dir_path(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.txt", self.name));
        debug!(
            "Writing {} x {} matrix to {}",
            self.n_rows,
            self.columns.len(),
            path.display()
        );
        path
    }

    /// Write matrix to dir/<name>.txt, converting values with f
    pub fn write_to_dir_with<I, D, F, V>(
        &self,
        dir: &Path,
        unit_label: &str,
        row_ids: I,
        f: F,
    ) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = D>,
        D: fmt::Display,
        F: Fn(&T) -> V,
        V: fmt::Display,
    {
        let path = self.dir_path(dir);
        write_atomic(&path, |w| self.write_with(w, unit_label, row_ids, f))
            .with_context(|| format!("Error writing matrix {}", path.display()))
    }
}

impl<T: fmt::Display> Matrix<T> {
    /// Write matrix with header line.  row_ids must produce exactly one label per row
    pub fn write<W, I, D>(&self, wrt: &mut W, unit_label: &str, row_ids: I) -> anyhow::Result<()>
    where
        W: Write,
        I: IntoIterator<Item = D>,
        D: fmt::Display,
    {
        self.write_cells(wrt, unit_label, row_ids, |w, x| write!(w, "\t{}", x))
    }

    /// Write matrix to dir/<name>.txt
    pub fn write_to_dir<I, D>(&self, dir: &Path, unit_label: &str, row_ids: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = D>,
        D: fmt::Display,
    {
        let path = self.dir_path(dir);
        write_atomic(&path, |w| self.write(w, unit_label, row_ids))
            .with_context(|| format!("Error writing matrix {}", path.display()))
    }
}
