// Built-in primer-design engine. Scans fixed-length primer candidates on both
// flanks of the cut site inside a considered zone, pairs them under the
// product-size and Tm constraints, and widens the zone step by step when
// nothing qualifies.

use crate::amplicon::WINDOW_BUFFER_STEPS;
use crate::design::{DesignReport, DesignRequest, PrimerDesigner, PrimerPair};
use bio::alphabets::dna::revcomp;
use itertools::Itertools;
use rayon::prelude::*;
use std::cmp::Ordering;

pub const PRIMER_MIN_LEN: usize = 18;
pub const PRIMER_MAX_LEN: usize = 25;

/// The retrieved sequence carries a buffer of `WINDOW_BUFFER_STEPS` steps per
/// side, so the zone can be widened this many times before it is exhausted.
pub const MAX_RELAXATION_ROUNDS: u32 = WINDOW_BUFFER_STEPS as u32;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    len: usize,
    tm: f64,
}

impl Candidate {
    #[inline(always)]
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// GC-fraction estimate of the melting temperature.
pub fn primer_tm(primer: &[u8]) -> f64 {
    let gc = primer
        .iter()
        .filter(|&&c| c == b'G' || c == b'C')
        .count() as f64;
    64.9 + 41.0 * (gc - 16.4) / primer.len() as f64
}

fn count_occurrences(sequence: &[u8], primer: &[u8]) -> usize {
    if primer.is_empty() || primer.len() > sequence.len() {
        return 0;
    }
    sequence.windows(primer.len()).filter(|w| *w == primer).count()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanningDesigner;

impl ScanningDesigner {
    pub fn new() -> Self {
        Self
    }

    fn candidates_in(
        sequence: &[u8],
        starts: std::ops::Range<usize>,
        region_end: usize,
        tm_min: f64,
        tm_max: f64,
    ) -> Vec<Candidate> {
        starts
            .into_par_iter()
            .flat_map_iter(|start| {
                (PRIMER_MIN_LEN..=PRIMER_MAX_LEN)
                    .filter(move |len| start + len <= region_end)
                    .map(move |len| Candidate {
                        start,
                        len,
                        tm: primer_tm(&sequence[start..start + len]),
                    })
                    .filter(move |c| c.tm >= tm_min && c.tm <= tm_max)
            })
            .filter(|c| count_occurrences(sequence, &sequence[c.start..c.end()]) == 1)
            .collect()
    }

    fn scan_zone(
        sequence: &[u8],
        cut: usize,
        zone_start: usize,
        zone_end: usize,
        request: &DesignRequest,
    ) -> Vec<PrimerPair> {
        let min_dist = request.min_dist_to_center.max(0) as usize;
        let tm = &request.tm;

        // Forward primers end at least min_dist before the cut, reverse primers
        // start at least min_dist after it.
        let forward_end = cut.saturating_sub(min_dist).min(zone_end);
        let forward_starts = zone_start..forward_end.saturating_sub(PRIMER_MIN_LEN).max(zone_start);
        let reverse_begin = (cut + min_dist).max(zone_start).min(zone_end);
        let reverse_starts =
            reverse_begin..zone_end.saturating_sub(PRIMER_MIN_LEN).max(reverse_begin);

        let forward = Self::candidates_in(sequence, forward_starts, forward_end, tm.min, tm.max);
        let reverse = Self::candidates_in(sequence, reverse_starts, zone_end, tm.min, tm.max);

        let mut pairs: Vec<(f64, PrimerPair)> = forward
            .iter()
            .cartesian_product(reverse.iter())
            .filter_map(|(f, r)| {
                let product_size = (r.end() - f.start) as i64;
                if product_size < request.prod_size_lower || product_size > request.prod_size_upper
                {
                    return None;
                }
                let score = (f.tm - tm.opt).abs() + (r.tm - tm.opt).abs();
                let reverse_seq = revcomp(&sequence[r.start..r.end()]);
                Some((
                    score,
                    PrimerPair {
                        forward: String::from_utf8_lossy(&sequence[f.start..f.end()]).into_owned(),
                        reverse: String::from_utf8_lossy(&reverse_seq).into_owned(),
                        forward_tm: f.tm,
                        reverse_tm: r.tm,
                        product_size,
                    },
                ))
            })
            .take(request.candidate_budget)
            .collect();

        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        pairs.into_iter().map(|(_, pair)| pair).collect()
    }
}

impl PrimerDesigner for ScanningDesigner {
    fn design(&self, request: &DesignRequest) -> Result<DesignReport, String> {
        let sequence = request.sequence.trim().to_ascii_uppercase().into_bytes();
        if sequence.is_empty() {
            return Err("empty sequence handed to the designer".to_string());
        }
        let cut = request.cut_coordinate - request.window_left;
        if cut <= 0 || cut as usize >= sequence.len() {
            return Err(format!(
                "cut coordinate {} falls outside the retrieved window [{}..{}]",
                request.cut_coordinate,
                request.window_left,
                request.window_left + sequence.len() as i64
            ));
        }
        let cut = cut as usize;
        let step = request.step_size.max(1) as usize;
        let buffer = step * WINDOW_BUFFER_STEPS as usize;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(request.threads.resolve())
            .build()
            .map_err(|e| format!("Could not start designer worker pool: {e}"))?;

        for round in 0..=MAX_RELAXATION_ROUNDS {
            let margin = buffer.saturating_sub(round as usize * step);
            if sequence.len() <= 2 * margin {
                continue;
            }
            let zone_start = margin;
            let zone_end = sequence.len() - margin;
            let pairs =
                pool.install(|| Self::scan_zone(&sequence, cut, zone_start, zone_end, request));
            if !pairs.is_empty() {
                let good_pair_count = pairs.len();
                let ranked: Vec<PrimerPair> =
                    pairs.into_iter().take(request.num_return).collect();
                return Ok(DesignReport {
                    pairs: Some(ranked),
                    relaxation_rounds: round,
                    good_pair_count,
                });
            }
        }

        Ok(DesignReport {
            pairs: None,
            relaxation_rounds: MAX_RELAXATION_ROUNDS,
            good_pair_count: 0,
        })
    }
}
