// Contracts for the external collaborators of the batch driver: the genome
// sequence service and the primer-design engine.

use crate::amplicon::TmBounds;
use serde::{Deserialize, Serialize};

/// Aligner used by an engine for non-specific-amplification checks. Carried
/// through opaquely; this layer never invokes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignerChoice {
    Bowtie,
    Blast,
}

impl AlignerChoice {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Bowtie" => Some(Self::Bowtie),
            "BLAST" => Some(Self::Blast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bowtie => "Bowtie",
            Self::Blast => "BLAST",
        }
    }
}

/// Worker threads available to an engine. `Auto` means all cores minus two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadCount {
    Auto,
    Fixed(usize),
}

impl ThreadCount {
    pub fn from_arg(arg: &str) -> Option<Self> {
        if arg == "auto" {
            return Some(Self::Auto);
        }
        arg.parse::<usize>().ok().map(Self::Fixed)
    }

    pub fn resolve(&self) -> usize {
        match self {
            Self::Fixed(n) => (*n).max(1),
            Self::Auto => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(2))
                .unwrap_or(1)
                .max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerPair {
    pub forward: String,
    pub reverse: String,
    pub forward_tm: f64,
    pub reverse_tm: f64,
    pub product_size: i64,
}

/// Everything an engine needs for one cut site. The sequence spans the search
/// window; `window_left` anchors it back onto the chromosome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRequest {
    pub sequence: String,
    pub genome: String,
    pub chromosome: String,
    pub cut_coordinate: i64,
    pub window_left: i64,
    pub prod_size_lower: i64,
    pub prod_size_upper: i64,
    pub tm: TmBounds,
    pub num_return: usize,
    pub step_size: i64,
    pub min_dist_to_center: i64,
    pub candidate_budget: usize,
    pub threads: ThreadCount,
    pub aligner: AlignerChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignReport {
    /// Ranked pairs, best first; `None` when relaxation was exhausted without a
    /// qualifying pair.
    pub pairs: Option<Vec<PrimerPair>>,
    pub relaxation_rounds: u32,
    pub good_pair_count: usize,
}

pub trait SequenceSource {
    fn fetch(
        &self,
        genome: &str,
        chromosome: &str,
        left: i64,
        right: i64,
    ) -> Result<String, String>;
}

pub trait PrimerDesigner {
    fn design(&self, request: &DesignRequest) -> Result<DesignReport, String>;
}
