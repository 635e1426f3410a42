// Batch driver: walks the input rows in order, re-serves precomputed results,
// otherwise retrieves the search window and calls the design engine, streaming
// one output row per site as it goes.

use crate::amplicon::{AmpliconConfig, SearchWindow};
use crate::cutsite::{self, CutSiteRequest, GenomeDatabase, InputSchema};
use crate::design::{
    AlignerChoice, DesignRequest, PrimerDesigner, SequenceSource, ThreadCount,
};
use crate::error::PipelineError;
use crate::input::InputTable;
use crate::precomputed::PrecomputedStore;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

pub const PRIMER_PAIRS_RETURNED: usize = 3;

/// Candidates the engine may generate per site before ranking.
pub const CANDIDATE_BUDGET: usize = 400;

const NO_PRIMER_MARKER: &str = "No qualifying primer-pairs found";
const PRECOMPUTED_MARKER: &str = "precomputed primers exists";
const PROGRESS_INTERVAL: u64 = 10;

/// Output header: the input columns followed by the fixed three-pair layout.
pub fn output_header(input_headers: &[String]) -> String {
    let mut columns: Vec<String> = input_headers.to_vec();
    columns.push("Constraints_relaxation_iterations".to_string());
    for i in 1..=PRIMER_PAIRS_RETURNED {
        columns.push(format!("Primer Pair {i} For"));
        columns.push(format!("Primer Pair {i} Rev"));
        columns.push(format!("Primer Pair {i} For tm"));
        columns.push(format!("Primer Pair {i} Rev tm"));
        columns.push(format!("Primer Pair {i} Prod Size"));
    }
    columns.join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteOutcome {
    Cached,
    Designed,
    NoPrimer,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAggregates {
    pub cutsites: u64,
    pub primer_pairs: u64,
    pub good_primer_pairs: u64,
    pub cutsites_without_primers: u64,
}

/// Line-oriented progress log, mirrored to stderr and to `log.txt` next to the
/// output file.
pub struct RunLog {
    file: Option<BufWriter<File>>,
    quiet: bool,
}

impl RunLog {
    pub fn to_path(path: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path)?;
        Ok(Self {
            file: Some(BufWriter::new(file)),
            quiet: false,
        })
    }

    /// Discards everything; used by tests.
    pub fn sink() -> Self {
        Self {
            file: None,
            quiet: true,
        }
    }

    pub fn note(&mut self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{message}");
            let _ = file.flush();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub check_precomputed: bool,
    pub threads: ThreadCount,
    pub aligner: AlignerChoice,
    pub database: GenomeDatabase,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            check_precomputed: false,
            threads: ThreadCount::Auto,
            aligner: AlignerChoice::Bowtie,
            database: GenomeDatabase::Ensembl,
        }
    }
}

pub struct BatchDriver<'a> {
    config: &'a AmpliconConfig,
    store: &'a PrecomputedStore,
    sequences: &'a dyn SequenceSource,
    designer: &'a dyn PrimerDesigner,
    options: BatchOptions,
    aggregates: RunAggregates,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        config: &'a AmpliconConfig,
        store: &'a PrecomputedStore,
        sequences: &'a dyn SequenceSource,
        designer: &'a dyn PrimerDesigner,
        options: BatchOptions,
    ) -> Self {
        Self {
            config,
            store,
            sequences,
            designer,
            options,
            aggregates: RunAggregates::default(),
        }
    }

    pub fn aggregates(&self) -> &RunAggregates {
        &self.aggregates
    }

    /// Processes every row in input order. Output rows stream out one by one;
    /// per-row problems are logged and skipped, only I/O failures on the output
    /// stream abort the run.
    pub fn run(
        &mut self,
        table: &InputTable,
        out: &mut dyn Write,
        log: &mut RunLog,
    ) -> Result<Vec<SiteOutcome>, PipelineError> {
        writeln!(out, "{}", output_header(table.headers()))?;
        out.flush()?;

        let run_started = Instant::now();
        let mut outcomes = Vec::with_capacity(table.len());
        for (index, row) in table.rows().iter().enumerate() {
            let site_started = Instant::now();
            let outcome = self.process_site(index, table.len(), table.schema(), row, out, log)?;
            outcomes.push(outcome);

            if matches!(outcome, SiteOutcome::Designed | SiteOutcome::NoPrimer) {
                log.note(&format!(
                    "elapsed {:.2} min",
                    site_started.elapsed().as_secs_f64() / 60.0
                ));
                if self.aggregates.cutsites % PROGRESS_INTERVAL == 0
                    && self.aggregates.cutsites != 0
                {
                    log.note(&format!(
                        "elapsed {:.2} min, processed {} site(s), {} cutsite(s) failed to yield primers",
                        run_started.elapsed().as_secs_f64() / 60.0,
                        self.aggregates.cutsites,
                        self.aggregates.cutsites_without_primers
                    ));
                }
            }
        }

        log.note(&format!(
            "finished in {:.2} min, processed {} site(s), found {} primer pair(s), outputted {} primer pair(s), {} cutsite(s) failed to yield primers",
            run_started.elapsed().as_secs_f64() / 60.0,
            self.aggregates.cutsites,
            self.aggregates.good_primer_pairs,
            self.aggregates.primer_pairs,
            self.aggregates.cutsites_without_primers
        ));
        Ok(outcomes)
    }

    fn process_site(
        &mut self,
        index: usize,
        total: usize,
        schema: &InputSchema,
        row: &CutSiteRequest,
        out: &mut dyn Write,
        log: &mut RunLog,
    ) -> Result<SiteOutcome, PipelineError> {
        let resolved = match cutsite::resolve(row, schema, self.options.database) {
            Ok(resolved) => resolved,
            Err(e) => {
                log.note(&format!("({}/{total}) skipping row: {e}", index + 1));
                return Ok(SiteOutcome::Skipped);
            }
        };
        log.note(&format!(
            "({}/{total}) Processing cutsite: Genome:{}, Chr:{}, cut_coordinate: {}",
            index + 1,
            resolved.genome,
            resolved.chromosome,
            resolved.coordinate
        ));

        let entry = row.entry_label(schema);
        let mode = self.config.mode.as_str();

        if let Some(hit) = self.store.lookup(
            mode,
            &resolved.genome,
            &resolved.chromosome,
            resolved.coordinate,
            entry,
        ) {
            if self.options.check_precomputed {
                writeln!(out, "{},{PRECOMPUTED_MARKER}", row.joined())?;
                out.flush()?;
                return Ok(SiteOutcome::Cached);
            }
            writeln!(out, "{hit}")?;
            out.flush()?;
            self.aggregates.cutsites += 1;
            // TODO: persist the true pair counts in the store record; a hit is
            // booked as a fixed three pairs until then.
            self.aggregates.primer_pairs += PRIMER_PAIRS_RETURNED as u64;
            self.aggregates.good_primer_pairs += PRIMER_PAIRS_RETURNED as u64;
            log.note("found precomputed primers, skip calculation for this site");
            return Ok(SiteOutcome::Cached);
        }

        let window = SearchWindow::around(resolved.coordinate, self.config);
        let left = window.left.max(1);
        let sequence = match self.sequences.fetch(
            &resolved.genome,
            &resolved.chromosome,
            left,
            window.right,
        ) {
            Ok(sequence) => sequence,
            Err(e) => {
                log.note(&format!("skipping site: could not retrieve sequence: {e}"));
                return Ok(SiteOutcome::Skipped);
            }
        };

        let request = DesignRequest {
            sequence,
            genome: resolved.genome.clone(),
            chromosome: resolved.chromosome.clone(),
            cut_coordinate: resolved.coordinate,
            window_left: left,
            prod_size_lower: self.config.prod_size_lower,
            prod_size_upper: self.config.prod_size_upper,
            tm: self.config.tm,
            num_return: PRIMER_PAIRS_RETURNED,
            step_size: self.config.step_size,
            min_dist_to_center: self.config.min_dist_to_center,
            candidate_budget: CANDIDATE_BUDGET,
            threads: self.options.threads,
            aligner: self.options.aligner,
        };
        let report = match self.designer.design(&request) {
            Ok(report) => report,
            Err(e) => {
                log.note(&format!("skipping site: designer failed: {e}"));
                return Ok(SiteOutcome::Skipped);
            }
        };

        let (payload, outcome) = match report.pairs.as_deref() {
            None | Some([]) => {
                self.aggregates.cutsites_without_primers += 1;
                (
                    format!("{},{NO_PRIMER_MARKER}", report.relaxation_rounds),
                    SiteOutcome::NoPrimer,
                )
            }
            Some(pairs) => {
                self.aggregates.primer_pairs += pairs.len() as u64;
                self.aggregates.good_primer_pairs += report.good_pair_count as u64;
                let fields: Vec<String> = pairs
                    .iter()
                    .flat_map(|p| {
                        [
                            p.forward.clone(),
                            p.reverse.clone(),
                            format!("{:.2}", p.forward_tm),
                            format!("{:.2}", p.reverse_tm),
                            p.product_size.to_string(),
                        ]
                    })
                    .collect();
                (
                    format!("{},{}", report.relaxation_rounds, fields.join(",")),
                    SiteOutcome::Designed,
                )
            }
        };

        writeln!(out, "{},{payload}", row.joined())?;
        out.flush()?;
        self.aggregates.cutsites += 1;

        if let Err(e) = self.store.record(
            mode,
            &resolved.genome,
            &resolved.chromosome,
            resolved.coordinate,
            entry,
            &payload,
        ) {
            log.note(&format!("could not record result for reuse: {e}"));
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplicon::{AmpliconMode, TmBounds};
    use crate::design::{DesignReport, PrimerPair};
    use std::cell::RefCell;
    use tempfile::tempdir;

    struct RecordingSequences {
        requests: RefCell<Vec<(String, String, i64, i64)>>,
    }

    impl RecordingSequences {
        fn new() -> Self {
            Self {
                requests: RefCell::new(vec![]),
            }
        }
    }

    impl SequenceSource for RecordingSequences {
        fn fetch(
            &self,
            genome: &str,
            chromosome: &str,
            left: i64,
            right: i64,
        ) -> Result<String, String> {
            self.requests
                .borrow_mut()
                .push((genome.to_string(), chromosome.to_string(), left, right));
            Ok("A".repeat((right - left + 1) as usize))
        }
    }

    struct FailingSequences;

    impl SequenceSource for FailingSequences {
        fn fetch(&self, _: &str, _: &str, _: i64, _: i64) -> Result<String, String> {
            Err("no such genome".to_string())
        }
    }

    // Returns two pairs for even cut coordinates, nothing for odd ones.
    struct ScriptedDesigner;

    fn scripted_pair(n: i64) -> PrimerPair {
        PrimerPair {
            forward: "ACGTACGTACGTACGTAC".to_string(),
            reverse: "TGCATGCATGCATGCATG".to_string(),
            forward_tm: 59.5,
            reverse_tm: 60.5,
            product_size: 300 + n,
        }
    }

    impl PrimerDesigner for ScriptedDesigner {
        fn design(&self, request: &DesignRequest) -> Result<DesignReport, String> {
            if request.cut_coordinate % 2 == 1 {
                return Ok(DesignReport {
                    pairs: None,
                    relaxation_rounds: 3,
                    good_pair_count: 0,
                });
            }
            Ok(DesignReport {
                pairs: Some(vec![scripted_pair(0), scripted_pair(1)]),
                relaxation_rounds: 0,
                good_pair_count: 5,
            })
        }
    }

    fn short_config() -> AmpliconConfig {
        AmpliconConfig::resolve(AmpliconMode::Short, None, None, None, TmBounds::default())
            .unwrap()
    }

    fn table_from(lines: &[&str]) -> InputTable {
        let td = tempdir().unwrap();
        let path = td.path().join("input.csv");
        std::fs::write(&path, lines.join("\n")).unwrap();
        InputTable::from_csv_path(&path.to_string_lossy()).unwrap()
    }

    fn run_batch(
        table: &InputTable,
        store: &PrecomputedStore,
        options: BatchOptions,
    ) -> (Vec<SiteOutcome>, RunAggregates, String) {
        let config = short_config();
        let sequences = RecordingSequences::new();
        let designer = ScriptedDesigner;
        let mut driver = BatchDriver::new(&config, store, &sequences, &designer, options);
        let mut out: Vec<u8> = vec![];
        let outcomes = driver
            .run(table, &mut out, &mut RunLog::sink())
            .unwrap();
        let aggregates = *driver.aggregates();
        (outcomes, aggregates, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_output_header_layout() {
        let headers: Vec<String> = ["ref", "chr", "coordinate"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let header = output_header(&headers);
        assert!(header.starts_with("ref,chr,coordinate,Constraints_relaxation_iterations,"));
        assert!(header.contains("Primer Pair 1 For,Primer Pair 1 Rev,Primer Pair 1 For tm,Primer Pair 1 Rev tm,Primer Pair 1 Prod Size"));
        assert!(header.ends_with("Primer Pair 3 Prod Size"));
    }

    #[test]
    fn test_row_order_is_preserved_across_outcomes() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        let table = table_from(&[
            "Entry,ref,chr,coordinate",
            "e1,GRCh38,1,1000",
            "e2,GRCh38,1,not-a-number",
            "e3,GRCh38,1,5001",
            "e4,GRCh38,1,9000",
        ]);
        let (outcomes, aggregates, output) = run_batch(&table, &store, BatchOptions::default());

        assert_eq!(
            outcomes,
            vec![
                SiteOutcome::Designed,
                SiteOutcome::Skipped,
                SiteOutcome::NoPrimer,
                SiteOutcome::Designed,
            ]
        );
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 4); // header + three rows; the skipped row is omitted
        assert!(lines[1].starts_with("e1,GRCh38,1,1000,0,"));
        assert!(lines[2].starts_with("e3,GRCh38,1,5001,3,"));
        assert!(lines[2].ends_with("No qualifying primer-pairs found"));
        assert!(lines[3].starts_with("e4,GRCh38,1,9000,0,"));

        assert_eq!(aggregates.cutsites, 3);
        assert_eq!(aggregates.primer_pairs, 4);
        assert_eq!(aggregates.good_primer_pairs, 10);
        assert_eq!(aggregates.cutsites_without_primers, 1);
    }

    #[test]
    fn test_designed_row_carries_pair_fields() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        let table = table_from(&["Entry,ref,chr,coordinate", "e1,GRCh38,1,1000"]);
        let (_, _, output) = run_batch(&table, &store, BatchOptions::default());
        let line = output.lines().nth(1).unwrap();
        assert_eq!(
            line,
            "e1,GRCh38,1,1000,0,ACGTACGTACGTACGTAC,TGCATGCATGCATGCATG,59.50,60.50,300,ACGTACGTACGTACGTAC,TGCATGCATGCATGCATG,59.50,60.50,301"
        );
    }

    #[test]
    fn test_cache_hit_is_restitched_and_counted_as_three_pairs() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        store
            .record(
                "short",
                "ensembl_GRCh38_latest",
                "1",
                1000,
                "earlier",
                "0,AAAA,TTTT,59.00,60.00,300",
            )
            .unwrap();
        let table = table_from(&["Entry,ref,chr,coordinate", "mine,GRCh38,1,1005"]);
        let (outcomes, aggregates, output) = run_batch(&table, &store, BatchOptions::default());

        assert_eq!(outcomes, vec![SiteOutcome::Cached]);
        assert_eq!(output.lines().nth(1).unwrap(), "mine,0,AAAA,TTTT,59.00,60.00,300");
        assert_eq!(aggregates.cutsites, 1);
        assert_eq!(aggregates.primer_pairs, 3);
        assert_eq!(aggregates.good_primer_pairs, 3);
    }

    #[test]
    fn test_check_precomputed_is_idempotent_after_a_populating_run() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        let table = table_from(&[
            "Entry,ref,chr,coordinate",
            "e1,GRCh38,1,1000",
            "e2,GRCh38,2,5001",
        ]);

        let (outcomes, _, _) = run_batch(&table, &store, BatchOptions::default());
        assert_eq!(outcomes, vec![SiteOutcome::Designed, SiteOutcome::NoPrimer]);

        let (outcomes, aggregates, output) = run_batch(
            &table,
            &store,
            BatchOptions {
                check_precomputed: true,
                ..BatchOptions::default()
            },
        );
        assert_eq!(outcomes, vec![SiteOutcome::Cached, SiteOutcome::Cached]);
        for line in output.lines().skip(1) {
            assert!(line.ends_with("precomputed primers exists"), "line: {line}");
        }
        // The reporting variant leaves every counter untouched.
        assert_eq!(aggregates, RunAggregates::default());
    }

    #[test]
    fn test_requested_window_matches_short_preset() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        let config = short_config();
        let sequences = RecordingSequences::new();
        let designer = ScriptedDesigner;
        let mut driver = BatchDriver::new(
            &config,
            &store,
            &sequences,
            &designer,
            BatchOptions::default(),
        );
        let table = table_from(&["ref,chr,coordinate", "ensembl_GRCh38_latest,1,1000000"]);
        let mut out: Vec<u8> = vec![];
        driver.run(&table, &mut out, &mut RunLog::sink()).unwrap();

        let requests = sequences.requests.borrow();
        assert_eq!(
            *requests,
            vec![(
                "ensembl_GRCh38_latest".to_string(),
                "1".to_string(),
                1_000_000 - 175 - 3 * 40,
                1_000_000 + 175 + 3 * 40,
            )]
        );
    }

    #[test]
    fn test_sequence_failure_skips_the_row_only() {
        let td = tempdir().unwrap();
        let store = PrecomputedStore::new(td.path().join("precomputed"));
        let config = short_config();
        let sequences = FailingSequences;
        let designer = ScriptedDesigner;
        let mut driver = BatchDriver::new(
            &config,
            &store,
            &sequences,
            &designer,
            BatchOptions::default(),
        );
        let table = table_from(&[
            "Entry,ref,chr,coordinate",
            "e1,GRCh38,1,1000",
            "e2,GRCh38,1,2000",
        ]);
        let mut out: Vec<u8> = vec![];
        let outcomes = driver.run(&table, &mut out, &mut RunLog::sink()).unwrap();
        assert_eq!(outcomes, vec![SiteOutcome::Skipped, SiteOutcome::Skipped]);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
        assert_eq!(driver.aggregates().cutsites, 0);
    }
}
