// Genome sequence service. A JSON catalog maps assembly ids to local files or
// remote (optionally gzipped) FASTA sources; assemblies are materialized once
// into a cache directory with a line-index, then served by random access.

use crate::design::SequenceSource;
use flate2::read::GzDecoder;
use reqwest::blocking::get;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_GENOME_CATALOG_PATH: &str = "assets/genomes.json";
pub const DEFAULT_GENOME_CACHE_DIR: &str = "data/genomes";

/// Where to fetch one genome assembly from.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyEntry {
    pub description: Option<String>,
    pub sequence_remote: Option<String>,
    pub sequence_local: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<String>,
}

fn default_cache_dir() -> Option<String> {
    Some(DEFAULT_GENOME_CACHE_DIR.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssemblyManifest {
    genome_id: String,
    sequence_source: String,
    sequence_path: String,
    index_path: String,
    installed_at_unix_ms: u128,
}

#[derive(Debug, Clone)]
struct IndexedContig {
    length: u64,
    offset: u64,
    line_bases: u64,
    line_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GenomeCatalog {
    entries: HashMap<String, AssemblyEntry>,
    catalog_base_dir: PathBuf,
}

impl GenomeCatalog {
    pub fn from_json_file(path: &str) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Could not read genome catalog '{path}': {e}"))?;
        let entries: HashMap<String, AssemblyEntry> = serde_json::from_str(&text)
            .map_err(|e| format!("Could not parse genome catalog '{path}': {e}"))?;
        let base = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            entries,
            catalog_base_dir: base,
        })
    }

    pub fn assembly_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Maps a canonicalized genome string (`ensembl_GRCh38_latest`,
    /// `NCBI_refseq_GRCh38.p14`) back onto a catalog id.
    pub fn resolve_assembly_id(&self, genome: &str) -> Result<String, String> {
        if self.entries.contains_key(genome) {
            return Ok(genome.to_string());
        }
        let stripped = genome
            .strip_prefix("ensembl_")
            .and_then(|g| g.strip_suffix("_latest"))
            .or_else(|| {
                genome
                    .strip_prefix("NCBI_refseq_")
                    .map(|g| g.split_once(".p").map(|(v, _)| v).unwrap_or(g))
            });
        if let Some(id) = stripped {
            if self.entries.contains_key(id) {
                return Ok(id.to_string());
            }
        }
        Err(format!("Genome '{genome}' is not present in the catalog"))
    }

    /// Downloads/copies and indexes the assembly unless a valid installation
    /// already exists.
    pub fn prepare_assembly(&self, genome_id: &str) -> Result<AssemblyPaths, String> {
        let entry = self.entry(genome_id)?;
        let install_dir = self.install_dir(genome_id, entry);
        let manifest_path = install_dir.join("manifest.json");

        if manifest_path.exists() {
            let manifest = Self::load_manifest(&manifest_path)?;
            if Path::new(&manifest.sequence_path).exists()
                && Path::new(&manifest.index_path).exists()
            {
                return Ok(AssemblyPaths {
                    sequence_path: manifest.sequence_path,
                    index_path: manifest.index_path,
                    reused_existing: true,
                });
            }
        }

        fs::create_dir_all(&install_dir).map_err(|e| {
            format!(
                "Could not create genome cache dir '{}': {e}",
                install_dir.display()
            )
        })?;

        let source = self.sequence_source(genome_id, entry)?;
        let sequence_path = install_dir.join("sequence.fa");
        let index_path = install_dir.join("sequence.fa.fai");
        materialize_source(&source, &sequence_path)?;
        build_fasta_index(&sequence_path, &index_path)?;

        let manifest = AssemblyManifest {
            genome_id: genome_id.to_string(),
            sequence_source: source,
            sequence_path: sequence_path.to_string_lossy().into_owned(),
            index_path: index_path.to_string_lossy().into_owned(),
            installed_at_unix_ms: now_unix_ms(),
        };
        let text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| format!("Could not serialize genome manifest: {e}"))?;
        fs::write(&manifest_path, text).map_err(|e| {
            format!(
                "Could not write genome manifest '{}': {e}",
                manifest_path.display()
            )
        })?;

        Ok(AssemblyPaths {
            sequence_path: manifest.sequence_path,
            index_path: manifest.index_path,
            reused_existing: false,
        })
    }

    /// 1-based, inclusive chromosome interval.
    pub fn get_region(
        &self,
        genome_id: &str,
        chromosome: &str,
        start_1based: i64,
        end_1based: i64,
    ) -> Result<String, String> {
        if start_1based < 1 {
            return Err(format!(
                "Coordinates must be 1-based, got start {start_1based}"
            ));
        }
        if end_1based < start_1based {
            return Err(format!(
                "Invalid interval: start ({start_1based}) is greater than end ({end_1based})"
            ));
        }

        let paths = self.prepare_assembly(genome_id)?;
        let index = load_fasta_index(Path::new(&paths.index_path))?;

        let mut names = vec![chromosome.to_string(), format!("chr{chromosome}")];
        if let Some(trimmed) = chromosome.strip_prefix("chr") {
            names.push(trimmed.to_string());
        }
        let contig = names
            .iter()
            .find_map(|name| index.get(name.as_str()))
            .ok_or_else(|| {
                format!("Chromosome/contig '{chromosome}' not found in genome '{genome_id}'")
            })?;

        if end_1based as u64 > contig.length {
            return Err(format!(
                "Requested end {} exceeds chromosome length {}",
                end_1based, contig.length
            ));
        }

        read_region(
            Path::new(&paths.sequence_path),
            contig,
            start_1based as u64,
            end_1based as u64,
        )
    }

    fn entry(&self, genome_id: &str) -> Result<&AssemblyEntry, String> {
        self.entries
            .get(genome_id)
            .ok_or_else(|| format!("Genome '{genome_id}' is not present in the catalog"))
    }

    fn install_dir(&self, genome_id: &str, entry: &AssemblyEntry) -> PathBuf {
        let base = entry
            .cache_dir
            .as_ref()
            .map(|raw| self.resolve_local_path(raw))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_GENOME_CACHE_DIR));
        let safe: String = genome_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        base.join(safe)
    }

    fn sequence_source(&self, genome_id: &str, entry: &AssemblyEntry) -> Result<String, String> {
        if let Some(local) = &entry.sequence_local {
            let path = self.resolve_local_path(local);
            if path.exists() {
                return Ok(path.to_string_lossy().into_owned());
            }
            if entry.sequence_remote.is_none() {
                return Err(format!(
                    "Genome '{genome_id}' names sequence_local '{}', but that file does not exist",
                    path.display()
                ));
            }
        }
        entry
            .sequence_remote
            .clone()
            .ok_or_else(|| format!("Genome '{genome_id}' has no sequence_local or sequence_remote"))
    }

    fn resolve_local_path(&self, raw: &str) -> PathBuf {
        if let Some(stripped) = raw.strip_prefix("file://") {
            return PathBuf::from(stripped);
        }
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.catalog_base_dir.join(p)
        }
    }

    fn load_manifest(path: &Path) -> Result<AssemblyManifest, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Could not read genome manifest '{}': {e}", path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Could not parse genome manifest '{}': {e}", path.display()))
    }
}

impl SequenceSource for GenomeCatalog {
    fn fetch(
        &self,
        genome: &str,
        chromosome: &str,
        left: i64,
        right: i64,
    ) -> Result<String, String> {
        let genome_id = self.resolve_assembly_id(genome)?;
        self.get_region(&genome_id, chromosome, left, right)
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyPaths {
    pub sequence_path: String,
    pub index_path: String,
    pub reused_existing: bool,
}

fn now_unix_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn is_gzip_source(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(".gz")
}

fn open_source(source: &str) -> Result<Box<dyn Read>, String> {
    if is_http_source(source) {
        let response = get(source)
            .map_err(|e| format!("Could not fetch '{source}': {e}"))?
            .error_for_status()
            .map_err(|e| format!("Could not fetch '{source}': {e}"))?;
        return Ok(Box::new(response));
    }
    let path = source.strip_prefix("file://").unwrap_or(source);
    let file =
        File::open(path).map_err(|e| format!("Could not open source file '{path}': {e}"))?;
    Ok(Box::new(file))
}

/// Copies (and decompresses, when gzipped) the source into the destination via
/// a temporary `.part` file renamed on success.
fn materialize_source(source: &str, destination: &Path) -> Result<(), String> {
    let tmp_path = destination.with_extension("fa.part");
    let reader = open_source(source)?;
    let mut writer = BufWriter::new(
        File::create(&tmp_path)
            .map_err(|e| format!("Could not create '{}': {e}", tmp_path.display()))?,
    );

    let copied = if is_gzip_source(source) {
        let mut decoder = GzDecoder::new(reader);
        std::io::copy(&mut decoder, &mut writer)
            .map_err(|e| format!("Could not decompress '{source}': {e}"))
    } else {
        let mut reader = reader;
        std::io::copy(&mut reader, &mut writer)
            .map_err(|e| format!("Could not copy '{source}': {e}"))
    };
    if let Err(e) = copied {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    writer
        .flush()
        .map_err(|e| format!("Could not flush '{}': {e}", tmp_path.display()))?;
    fs::rename(&tmp_path, destination).map_err(|e| {
        format!(
            "Could not finalize destination '{}': {e}",
            destination.display()
        )
    })
}

fn build_fasta_index(fasta_path: &Path, index_path: &Path) -> Result<(), String> {
    let file = File::open(fasta_path)
        .map_err(|e| format!("Could not open FASTA '{}': {e}", fasta_path.display()))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut byte_offset: u64 = 0;
    let mut contigs: Vec<(String, IndexedContig)> = Vec::new();
    let mut active: Option<(String, IndexedContig)> = None;

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .map_err(|e| format!("Could not read FASTA '{}': {e}", fasta_path.display()))?;
        if bytes_read == 0 {
            break;
        }
        let stripped = line.trim_end_matches(['\n', '\r']);

        if let Some(header) = stripped.strip_prefix('>') {
            if let Some(done) = active.take() {
                contigs.push(done);
            }
            let name = header
                .split_whitespace()
                .next()
                .ok_or_else(|| {
                    format!("FASTA '{}' has a malformed header line", fasta_path.display())
                })?
                .to_string();
            active = Some((
                name,
                IndexedContig {
                    length: 0,
                    offset: 0,
                    line_bases: 0,
                    line_bytes: 0,
                },
            ));
        } else if !stripped.is_empty() {
            let (_, contig) = active.as_mut().ok_or_else(|| {
                format!(
                    "FASTA '{}' contains sequence data before the first header",
                    fasta_path.display()
                )
            })?;
            let bases = stripped.len() as u64;
            if contig.line_bases == 0 {
                contig.offset = byte_offset;
                contig.line_bases = bases;
                contig.line_bytes = bytes_read as u64;
            } else if bases > contig.line_bases {
                return Err(format!(
                    "FASTA '{}' has inconsistent line lengths in record",
                    fasta_path.display()
                ));
            }
            contig.length += bases;
        }
        byte_offset += bytes_read as u64;
    }
    if let Some(done) = active.take() {
        contigs.push(done);
    }
    if contigs.is_empty() {
        return Err(format!(
            "FASTA '{}' does not contain any sequence records",
            fasta_path.display()
        ));
    }

    let mut writer = BufWriter::new(File::create(index_path).map_err(|e| {
        format!(
            "Could not create FASTA index '{}': {e}",
            index_path.display()
        )
    })?);
    for (name, contig) in contigs {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            name, contig.length, contig.offset, contig.line_bases, contig.line_bytes
        )
        .map_err(|e| {
            format!(
                "Could not write FASTA index '{}': {e}",
                index_path.display()
            )
        })?;
    }
    writer.flush().map_err(|e| {
        format!(
            "Could not flush FASTA index '{}': {e}",
            index_path.display()
        )
    })
}

fn load_fasta_index(path: &Path) -> Result<HashMap<String, IndexedContig>, String> {
    let file = File::open(path)
        .map_err(|e| format!("Could not open FASTA index '{}': {e}", path.display()))?;
    let mut map = HashMap::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.map_err(|e| format!("Could not read FASTA index '{}': {e}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.trim().split('\t').collect();
        if cols.len() < 5 {
            return Err(format!(
                "Invalid FASTA index line {} in '{}': expected 5 tab-separated fields",
                i + 1,
                path.display()
            ));
        }
        let parse = |field: &str| {
            field.parse::<u64>().map_err(|e| {
                format!(
                    "Invalid FASTA index value '{}' at line {} in '{}': {e}",
                    field,
                    i + 1,
                    path.display()
                )
            })
        };
        let contig = IndexedContig {
            length: parse(cols[1])?,
            offset: parse(cols[2])?,
            line_bases: parse(cols[3])?,
            line_bytes: parse(cols[4])?,
        };
        if contig.line_bases == 0 || contig.line_bytes == 0 {
            return Err(format!(
                "Invalid FASTA index line {} in '{}': line_bases/line_bytes must be > 0",
                i + 1,
                path.display()
            ));
        }
        map.insert(cols[0].to_string(), contig);
    }
    if map.is_empty() {
        return Err(format!("FASTA index '{}' is empty", path.display()));
    }
    Ok(map)
}

fn read_region(
    fasta_path: &Path,
    contig: &IndexedContig,
    start_1based: u64,
    end_1based: u64,
) -> Result<String, String> {
    let start0 = start_1based - 1;
    let target_len = (end_1based - start_1based + 1) as usize;
    let row = start0 / contig.line_bases;
    let col = start0 % contig.line_bases;
    let seek_pos = contig.offset + row * contig.line_bytes + col;

    let mut file = File::open(fasta_path)
        .map_err(|e| format!("Could not open FASTA '{}': {e}", fasta_path.display()))?;
    file.seek(SeekFrom::Start(seek_pos))
        .map_err(|e| format!("Could not seek FASTA '{}': {e}", fasta_path.display()))?;
    let mut reader = BufReader::new(file);

    let mut out: Vec<u8> = Vec::with_capacity(target_len);
    let mut chunk = [0u8; 8192];
    while out.len() < target_len {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| format!("Could not read FASTA '{}': {e}", fasta_path.display()))?;
        if n == 0 {
            break;
        }
        for b in &chunk[..n] {
            if *b == b'\n' || *b == b'\r' {
                continue;
            }
            out.push(*b);
            if out.len() == target_len {
                break;
            }
        }
    }
    if out.len() != target_len {
        return Err(format!(
            "Could not read requested interval from FASTA '{}'; expected {} bases, got {}",
            fasta_path.display(),
            target_len,
            out.len()
        ));
    }
    String::from_utf8(out).map_err(|e| format!("Extracted sequence is not valid UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    fn write_gzip(path: &Path, text: &str) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    fn toy_catalog(root: &Path) -> GenomeCatalog {
        let fasta_gz = root.join("toy.fa.gz");
        write_gzip(&fasta_gz, ">chr1\nACGT\nACGT\nACGT\n>2\nTTTTT\nGGGGG\n");
        let catalog_path = root.join("catalog.json");
        let catalog_json = format!(
            r#"{{
  "GRCh38": {{
    "description": "toy assembly",
    "sequence_remote": "file://{}",
    "cache_dir": "{}"
  }}
}}"#,
            fasta_gz.display(),
            root.join("cache").display()
        );
        fs::write(&catalog_path, catalog_json).unwrap();
        GenomeCatalog::from_json_file(&catalog_path.to_string_lossy()).unwrap()
    }

    #[test]
    fn test_prepare_once_then_reuse() {
        let td = tempdir().unwrap();
        let catalog = toy_catalog(td.path());
        let first = catalog.prepare_assembly("GRCh38").unwrap();
        assert!(!first.reused_existing);
        assert!(Path::new(&first.sequence_path).exists());
        assert!(Path::new(&first.index_path).exists());
        let second = catalog.prepare_assembly("GRCh38").unwrap();
        assert!(second.reused_existing);
    }

    #[test]
    fn test_get_region_spans_lines_and_chr_prefix() {
        let td = tempdir().unwrap();
        let catalog = toy_catalog(td.path());
        // "chr1" in the FASTA, queried as bare "1".
        assert_eq!(catalog.get_region("GRCh38", "1", 3, 10).unwrap(), "GTACGTAC");
        assert_eq!(catalog.get_region("GRCh38", "chr1", 1, 4).unwrap(), "ACGT");
        // "2" in the FASTA, queried either way.
        assert_eq!(catalog.get_region("GRCh38", "2", 4, 7).unwrap(), "TTGG");
    }

    #[test]
    fn test_get_region_rejects_bad_intervals() {
        let td = tempdir().unwrap();
        let catalog = toy_catalog(td.path());
        assert!(catalog.get_region("GRCh38", "1", 0, 4).is_err());
        assert!(catalog.get_region("GRCh38", "1", 5, 4).is_err());
        assert!(catalog.get_region("GRCh38", "1", 1, 1000).is_err());
        assert!(catalog.get_region("GRCh38", "17", 1, 4).is_err());
    }

    #[test]
    fn test_fetch_resolves_canonical_genome_strings() {
        let td = tempdir().unwrap();
        let catalog = toy_catalog(td.path());
        let seq = catalog
            .fetch("ensembl_GRCh38_latest", "1", 1, 4)
            .unwrap();
        assert_eq!(seq, "ACGT");
        let seq = catalog.fetch("NCBI_refseq_GRCh38.p14", "1", 5, 8).unwrap();
        assert_eq!(seq, "ACGT");
        assert!(catalog.fetch("ensembl_mm39_latest", "1", 1, 4).is_err());
    }

    #[test]
    fn test_missing_catalog_entry() {
        let td = tempdir().unwrap();
        let catalog = toy_catalog(td.path());
        assert!(catalog.prepare_assembly("mm39").is_err());
    }
}
