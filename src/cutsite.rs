// Input row model and coordinate resolution, including index selection for
// multi-mapped (pipe-delimited) loci.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const COL_REF: &str = "ref";
pub const COL_CHR: &str = "chr";
pub const COL_COORDINATE: &str = "coordinate";
pub const COL_ENTRY: &str = "Entry";
pub const COL_MAPPED_CHR: &str = "mapping:Ensemble_chr";
pub const COL_MAPPED_CUT: &str = "mapping:gRNACut_in_chr";
pub const COL_MAPPED_GENE: &str = "mapping:Gene_name";
pub const COL_MAPPED_ID: &str = "mapping:ID";
pub const COL_GENE_NAME: &str = "gene_name";
pub const COL_ENST: &str = "ENST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenomeDatabase {
    Ensembl,
    Ncbi,
}

impl GenomeDatabase {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Ensembl" => Some(Self::Ensembl),
            "NCBI" => Some(Self::Ncbi),
            _ => None,
        }
    }
}

/// Rewrites a bare assembly name into the versioned form the rest of the
/// pipeline recognizes; already-versioned strings pass through unchanged.
pub fn canonical_genome(raw: &str, database: GenomeDatabase) -> String {
    if raw.starts_with("ensembl_") || raw.starts_with("NCBI_refseq") {
        return raw.to_string();
    }
    match database {
        GenomeDatabase::Ensembl => format!("ensembl_{raw}_latest"),
        GenomeDatabase::Ncbi => format!("NCBI_refseq_{raw}.p14"),
    }
}

/// Which of the two accepted column layouts is active. Decided once from the
/// header, never re-checked per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSchema {
    Explicit {
        ref_col: usize,
        chr_col: usize,
        coordinate_col: usize,
        entry_col: Option<usize>,
    },
    Mapped {
        ref_col: usize,
        chr_col: usize,
        coordinate_col: usize,
        mapped_gene_col: Option<usize>,
        mapped_id_col: Option<usize>,
        gene_name_col: Option<usize>,
        enst_col: Option<usize>,
    },
}

impl InputSchema {
    pub fn detect(headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        if let (Some(ref_col), Some(chr_col), Some(coordinate_col)) =
            (find(COL_REF), find(COL_CHR), find(COL_COORDINATE))
        {
            return Ok(Self::Explicit {
                ref_col,
                chr_col,
                coordinate_col,
                entry_col: find(COL_ENTRY),
            });
        }

        if let (Some(ref_col), Some(chr_col), Some(coordinate_col)) =
            (find(COL_REF), find(COL_MAPPED_CHR), find(COL_MAPPED_CUT))
        {
            return Ok(Self::Mapped {
                ref_col,
                chr_col,
                coordinate_col,
                mapped_gene_col: find(COL_MAPPED_GENE),
                mapped_id_col: find(COL_MAPPED_ID),
                gene_name_col: find(COL_GENE_NAME),
                enst_col: find(COL_ENST),
            });
        }

        Err(anyhow!(
            "input does not contain the required columns [{COL_REF}, {COL_CHR}, {COL_COORDINATE}] or [{COL_REF}, {COL_MAPPED_CHR}, {COL_MAPPED_CUT}]"
        ))
    }

    pub fn entry_col(&self) -> Option<usize> {
        match self {
            Self::Explicit { entry_col, .. } => *entry_col,
            Self::Mapped { .. } => None,
        }
    }
}

/// One input row, kept as the raw ordered columns so output rows can echo the
/// original fields verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutSiteRequest {
    pub columns: Vec<String>,
}

impl CutSiteRequest {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn field(&self, col: usize) -> &str {
        self.columns.get(col).map(String::as_str).unwrap_or("")
    }

    pub fn optional_field(&self, col: Option<usize>) -> &str {
        col.map(|c| self.field(c)).unwrap_or("")
    }

    pub fn entry_label(&self, schema: &InputSchema) -> &str {
        self.optional_field(schema.entry_col())
    }

    pub fn joined(&self) -> String {
        self.columns.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCutSite {
    pub genome: String,
    pub chromosome: String,
    pub coordinate: i64,
}

fn parse_coordinate(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("coordinate is not an integer: {raw}"))
}

/// Picks one index among pipe-delimited alternatives. Gene-name annotations
/// matching `{gene_name}-` set the index; a transcript-id match overrides it.
fn select_mapped_index(gene_annotations: &str, ids: &str, gene_name: &str, enst: &str) -> usize {
    let mut selected = 0;
    if !gene_name.is_empty() {
        let marker = format!("{gene_name}-");
        for (idx, item) in gene_annotations.split('|').enumerate() {
            if item.contains(&marker) {
                selected = idx;
            }
        }
    }
    if !enst.is_empty() {
        for (idx, item) in ids.split('|').enumerate() {
            if item.contains(enst) {
                selected = idx;
            }
        }
    }
    selected
}

/// Produces the canonical (genome, chromosome, coordinate) triple for one row.
/// Errors here skip the row, never the batch.
pub fn resolve(
    request: &CutSiteRequest,
    schema: &InputSchema,
    database: GenomeDatabase,
) -> Result<ResolvedCutSite> {
    match schema {
        InputSchema::Explicit {
            ref_col,
            chr_col,
            coordinate_col,
            ..
        } => Ok(ResolvedCutSite {
            genome: canonical_genome(request.field(*ref_col), database),
            chromosome: request.field(*chr_col).to_string(),
            coordinate: parse_coordinate(request.field(*coordinate_col))?,
        }),
        InputSchema::Mapped {
            ref_col,
            chr_col,
            coordinate_col,
            mapped_gene_col,
            mapped_id_col,
            gene_name_col,
            enst_col,
        } => {
            let genome = canonical_genome(request.field(*ref_col), database);
            let chromosome_field = request.field(*chr_col);
            let coordinate_field = request.field(*coordinate_col);

            if !chromosome_field.contains('|') {
                return Ok(ResolvedCutSite {
                    genome,
                    chromosome: chromosome_field.to_string(),
                    coordinate: parse_coordinate(coordinate_field)?,
                });
            }

            let selected = select_mapped_index(
                request.optional_field(*mapped_gene_col),
                request.optional_field(*mapped_id_col),
                request.optional_field(*gene_name_col),
                request.optional_field(*enst_col),
            );

            let chromosome = chromosome_field
                .split('|')
                .nth(selected)
                .ok_or_else(|| anyhow!("mapped chromosome field has no entry at index {selected}: {chromosome_field}"))?;
            let coordinate = coordinate_field
                .split('|')
                .nth(selected)
                .ok_or_else(|| anyhow!("mapped coordinate field has no entry at index {selected}: {coordinate_field}"))?;

            Ok(ResolvedCutSite {
                genome,
                chromosome: chromosome.to_string(),
                coordinate: parse_coordinate(coordinate)?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_schema(headers: &[&str]) -> InputSchema {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        InputSchema::detect(&headers).unwrap()
    }

    #[test]
    fn test_canonical_genome() {
        assert_eq!(
            canonical_genome("GRCh38", GenomeDatabase::Ensembl),
            "ensembl_GRCh38_latest"
        );
        assert_eq!(
            canonical_genome("GRCh38", GenomeDatabase::Ncbi),
            "NCBI_refseq_GRCh38.p14"
        );
        assert_eq!(
            canonical_genome("ensembl_GRCh38_latest", GenomeDatabase::Ncbi),
            "ensembl_GRCh38_latest"
        );
        assert_eq!(
            canonical_genome("NCBI_refseq_GRCh38.p14", GenomeDatabase::Ensembl),
            "NCBI_refseq_GRCh38.p14"
        );
    }

    #[test]
    fn test_detect_explicit_schema() {
        let headers: Vec<String> = ["Entry", "ref", "chr", "coordinate", "notes"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let schema = InputSchema::detect(&headers).unwrap();
        assert_eq!(
            schema,
            InputSchema::Explicit {
                ref_col: 1,
                chr_col: 2,
                coordinate_col: 3,
                entry_col: Some(0),
            }
        );
    }

    #[test]
    fn test_detect_rejects_unknown_layout() {
        let headers: Vec<String> = ["a", "b"].iter().map(|h| h.to_string()).collect();
        assert!(InputSchema::detect(&headers).is_err());
    }

    #[test]
    fn test_explicit_bad_coordinate_is_row_error() {
        let headers: Vec<String> = ["ref", "chr", "coordinate"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let schema = InputSchema::detect(&headers).unwrap();
        let row = CutSiteRequest::new(vec![
            "GRCh38".to_string(),
            "1".to_string(),
            "not-a-number".to_string(),
        ]);
        assert!(resolve(&row, &schema, GenomeDatabase::Ensembl).is_err());
    }

    #[test]
    fn test_mapped_gene_name_selection() {
        let schema = mapped_schema(&[
            "ref",
            "mapping:Ensemble_chr",
            "mapping:gRNACut_in_chr",
            "mapping:Gene_name",
            "mapping:ID",
            "gene_name",
            "ENST",
        ]);
        let row = CutSiteRequest::new(vec![
            "GRCh38".to_string(),
            "1|2".to_string(),
            "100|200".to_string(),
            "FOXP2-|OTHER".to_string(),
            "ENST001|ENST002".to_string(),
            "FOXP2".to_string(),
            "".to_string(),
        ]);
        let resolved = resolve(&row, &schema, GenomeDatabase::Ensembl).unwrap();
        assert_eq!(resolved.chromosome, "1");
        assert_eq!(resolved.coordinate, 100);
    }

    #[test]
    fn test_mapped_enst_overrides_gene_name() {
        let schema = mapped_schema(&[
            "ref",
            "mapping:Ensemble_chr",
            "mapping:gRNACut_in_chr",
            "mapping:Gene_name",
            "mapping:ID",
            "gene_name",
            "ENST",
        ]);
        let row = CutSiteRequest::new(vec![
            "GRCh38".to_string(),
            "1|2".to_string(),
            "100|200".to_string(),
            "FOXP2-|OTHER".to_string(),
            "ENST001|ENST002".to_string(),
            "FOXP2".to_string(),
            "ENST002".to_string(),
        ]);
        let resolved = resolve(&row, &schema, GenomeDatabase::Ensembl).unwrap();
        assert_eq!(resolved.chromosome, "2");
        assert_eq!(resolved.coordinate, 200);
    }

    #[test]
    fn test_mapped_without_hints_defaults_to_first() {
        let schema = mapped_schema(&[
            "ref",
            "mapping:Ensemble_chr",
            "mapping:gRNACut_in_chr",
        ]);
        let row = CutSiteRequest::new(vec![
            "GRCh38".to_string(),
            "3|4".to_string(),
            "300|400".to_string(),
        ]);
        let resolved = resolve(&row, &schema, GenomeDatabase::Ensembl).unwrap();
        assert_eq!(resolved.chromosome, "3");
        assert_eq!(resolved.coordinate, 300);
    }

    #[test]
    fn test_mapped_single_valued_field() {
        let schema = mapped_schema(&[
            "ref",
            "mapping:Ensemble_chr",
            "mapping:gRNACut_in_chr",
        ]);
        let row = CutSiteRequest::new(vec![
            "GRCh38".to_string(),
            "X".to_string(),
            "123456".to_string(),
        ]);
        let resolved = resolve(&row, &schema, GenomeDatabase::Ensembl).unwrap();
        assert_eq!(resolved.chromosome, "X");
        assert_eq!(resolved.coordinate, 123_456);
    }
}
