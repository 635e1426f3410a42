// Precomputed-result store. Results of earlier runs are kept under
// <base>/<mode>/<canonical-genome>/<chromosome>/<coordinate>_<label>/out.csv
// and re-served for any query within a small coordinate tolerance.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A cached site may be re-used for queries up to this many bp away.
pub const MAX_COORDINATE_OFFSET: i64 = 20;

const RESULT_FILE_NAME: &str = "out.csv";
const RESULT_HEADER: &str = "genome,chromosome,coordinate,result";

/// Leading columns of a stored row that identify the original site; they are
/// dropped on re-serve and replaced by the caller's entry label.
const IDENTITY_FIELDS: usize = 3;

#[derive(Debug, Clone)]
pub struct PrecomputedStore {
    base_dir: PathBuf,
}

fn short_genome(genome: &str) -> &str {
    let stripped = genome.strip_prefix("ensembl_").unwrap_or(genome);
    stripped.strip_suffix("_latest").unwrap_or(stripped)
}

fn sanitize_label(label: &str) -> String {
    let mut out = String::new();
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "site".to_string()
    } else {
        trimmed.to_string()
    }
}

impl PrecomputedStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn chromosome_dir(&self, mode: &str, genome: &str, chromosome: &str) -> PathBuf {
        self.base_dir
            .join(mode)
            .join(format!("ensembl_{}_latest", short_genome(genome)))
            .join(chromosome)
    }

    /// Returns the re-stitched result line for the stored site closest to
    /// `coordinate`, or `None` on a miss. Any filesystem or parse irregularity
    /// is a miss as well; the cache never fails a batch.
    pub fn lookup(
        &self,
        mode: &str,
        genome: &str,
        chromosome: &str,
        coordinate: i64,
        entry_label: &str,
    ) -> Option<String> {
        let dir = self.chromosome_dir(mode, genome, chromosome);
        let entries = fs::read_dir(&dir).ok()?;

        // Candidate subdirectories start with an integer coordinate label.
        // Sorting first makes the nearest-match tie-break deterministic.
        let mut candidates: Vec<(i64, String)> = entries
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let label = name.split('_').next()?.parse::<i64>().ok()?;
                Some((label, name))
            })
            .collect();
        candidates.sort();

        let (label, name) = candidates
            .into_iter()
            .reduce(|best, next| {
                if (next.0 - coordinate).abs() < (best.0 - coordinate).abs() {
                    next
                } else {
                    best
                }
            })?;
        if (label - coordinate).abs() > MAX_COORDINATE_OFFSET {
            return None;
        }

        let file = File::open(dir.join(name).join(RESULT_FILE_NAME)).ok()?;
        let mut lines = BufReader::new(file).lines();
        let _header = lines.next()?.ok()?;
        let result = lines.next()?.ok()?;
        if result.trim().is_empty() {
            return None;
        }

        // A cached "no primers found" outcome is a valid hit too.
        let fields: Vec<&str> = result.split(',').collect();
        let rest = fields.get(IDENTITY_FIELDS..).unwrap_or(&[]).join(",");
        Some(format!("{entry_label},{rest}"))
    }

    /// Writes one computed result so later runs can re-serve it.
    pub fn record(
        &self,
        mode: &str,
        genome: &str,
        chromosome: &str,
        coordinate: i64,
        entry_label: &str,
        payload: &str,
    ) -> Result<(), String> {
        let dir = self
            .chromosome_dir(mode, genome, chromosome)
            .join(format!("{coordinate}_{}", sanitize_label(entry_label)));
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Could not create result dir '{}': {e}", dir.display()))?;
        let path = dir.join(RESULT_FILE_NAME);
        let mut file = File::create(&path)
            .map_err(|e| format!("Could not create result file '{}': {e}", path.display()))?;
        writeln!(file, "{RESULT_HEADER}")
            .and_then(|_| writeln!(file, "{genome},{chromosome},{coordinate},{payload}"))
            .map_err(|e| format!("Could not write result file '{}': {e}", path.display()))
    }
}
