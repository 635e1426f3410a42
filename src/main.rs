use ampliseek::amplicon::{AmpliconConfig, AmpliconMode, TmBounds};
use ampliseek::batch::{BatchDriver, BatchOptions, RunLog};
use ampliseek::cutsite::GenomeDatabase;
use ampliseek::design::{AlignerChoice, ThreadCount};
use ampliseek::designer::ScanningDesigner;
use ampliseek::genomes::{GenomeCatalog, DEFAULT_GENOME_CATALOG_PATH};
use ampliseek::input::InputTable;
use ampliseek::precomputed::PrecomputedStore;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::{env, process};

const DEFAULT_PRECOMPUTED_DIR: &str = "precomputed_primers";

fn usage() {
    eprintln!(
        "Designs PCR primers around genomic edit sites.\n\n\
Usage:\n  \
  ampliseek --csv PATH [options]\n  \
  ampliseek --oneliner-input 'ref,chr,coordinate' [options]\n\n\
Options:\n  \
  --csv PATH               input csv with the cut sites\n  \
  --type NAME              amplicon size preset: short (250-350bp), sanger (700-900bp), long (3.3-3.7kb); default short\n  \
  --prod-size-lower INT    minimum product size, overrides the preset\n  \
  --prod-size-upper INT    maximum product size, overrides the preset\n  \
  --min-dist2edit INT      minimum distance between a primer and the edit site\n  \
  --min-tm FLOAT           minimum melting temperature, default 57\n  \
  --opt-tm FLOAT           optimum melting temperature, default 60\n  \
  --max-tm FLOAT           maximum melting temperature, default 63\n  \
  --thread N|auto          designer worker threads, auto = cores minus two; default auto\n  \
  --db NAME                genome database for bare assembly names: Ensembl or NCBI; default Ensembl\n  \
  --aligner NAME           specificity aligner handed to the engine: Bowtie or BLAST; default Bowtie\n  \
  --outdir PATH            output directory, default 'out'\n  \
  --precomputed-dir PATH   precomputed-result store, default '{DEFAULT_PRECOMPUTED_DIR}'\n  \
  --genome-catalog PATH    genome catalog json, default '{DEFAULT_GENOME_CATALOG_PATH}'\n  \
  --check-precomputed      only report whether precomputed primers exist\n  \
  --oneliner-input TRIPLE  literal 'ref,chr,coordinate' instead of a csv"
    );
}

struct CliOptions {
    csv: Option<String>,
    oneliner: Option<String>,
    preset: AmpliconMode,
    prod_size_lower: Option<i64>,
    prod_size_upper: Option<i64>,
    min_dist: Option<i64>,
    tm: TmBounds,
    threads: ThreadCount,
    database: GenomeDatabase,
    aligner: AlignerChoice,
    outdir: String,
    precomputed_dir: String,
    genome_catalog: String,
    check_precomputed: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            csv: None,
            oneliner: None,
            preset: AmpliconMode::Short,
            prod_size_lower: None,
            prod_size_upper: None,
            min_dist: None,
            tm: TmBounds::default(),
            threads: ThreadCount::Auto,
            database: GenomeDatabase::Ensembl,
            aligner: AlignerChoice::Bowtie,
            outdir: "out".to_string(),
            precomputed_dir: DEFAULT_PRECOMPUTED_DIR.to_string(),
            genome_catalog: DEFAULT_GENOME_CATALOG_PATH.to_string(),
            check_precomputed: false,
        }
    }
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("Missing value for {name}"))
        };
        match flag.as_str() {
            "--csv" => options.csv = Some(value("--csv")?),
            "--oneliner-input" => options.oneliner = Some(value("--oneliner-input")?),
            "--type" => {
                let name = value("--type")?;
                options.preset = AmpliconMode::from_name(&name)
                    .ok_or_else(|| format!("Unknown amplicon type '{name}'"))?;
            }
            "--prod-size-lower" => {
                let raw = value("--prod-size-lower")?;
                options.prod_size_lower = Some(
                    raw.parse()
                        .map_err(|_| format!("Invalid --prod-size-lower '{raw}'"))?,
                );
            }
            "--prod-size-upper" => {
                let raw = value("--prod-size-upper")?;
                options.prod_size_upper = Some(
                    raw.parse()
                        .map_err(|_| format!("Invalid --prod-size-upper '{raw}'"))?,
                );
            }
            "--min-dist2edit" => {
                let raw = value("--min-dist2edit")?;
                options.min_dist = Some(
                    raw.parse()
                        .map_err(|_| format!("Invalid --min-dist2edit '{raw}'"))?,
                );
            }
            "--min-tm" => {
                let raw = value("--min-tm")?;
                options.tm.min = raw.parse().map_err(|_| format!("Invalid --min-tm '{raw}'"))?;
            }
            "--opt-tm" => {
                let raw = value("--opt-tm")?;
                options.tm.opt = raw.parse().map_err(|_| format!("Invalid --opt-tm '{raw}'"))?;
            }
            "--max-tm" => {
                let raw = value("--max-tm")?;
                options.tm.max = raw.parse().map_err(|_| format!("Invalid --max-tm '{raw}'"))?;
            }
            "--thread" => {
                let raw = value("--thread")?;
                options.threads = ThreadCount::from_arg(&raw)
                    .ok_or_else(|| format!("Invalid --thread '{raw}', expected 'auto' or an integer"))?;
            }
            "--db" => {
                let name = value("--db")?;
                options.database = GenomeDatabase::from_name(&name)
                    .ok_or_else(|| format!("Unknown database '{name}', expected Ensembl or NCBI"))?;
            }
            "--aligner" => {
                let name = value("--aligner")?;
                options.aligner = AlignerChoice::from_name(&name)
                    .ok_or_else(|| format!("Unknown aligner '{name}', expected Bowtie or BLAST"))?;
            }
            "--outdir" => options.outdir = value("--outdir")?,
            "--precomputed-dir" => options.precomputed_dir = value("--precomputed-dir")?,
            "--genome-catalog" => options.genome_catalog = value("--genome-catalog")?,
            "--check-precomputed" => options.check_precomputed = true,
            other => return Err(format!("Unknown argument '{other}'")),
        }
    }
    Ok(options)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        return Err("Missing arguments".to_string());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    let options = parse_args(&args).map_err(|e| {
        usage();
        e
    })?;

    // Fatal configuration problems surface here, before any row is read.
    let config = AmpliconConfig::resolve(
        options.preset,
        options.prod_size_lower,
        options.prod_size_upper,
        options.min_dist,
        options.tm,
    )
    .map_err(|e| e.to_string())?;

    let table = match (&options.csv, &options.oneliner) {
        (Some(csv), _) => InputTable::from_csv_path(csv).map_err(|e| e.to_string())?,
        (None, Some(oneliner)) => {
            InputTable::from_oneliner(oneliner).map_err(|e| e.to_string())?
        }
        (None, None) => {
            usage();
            return Err("Need an input csv or a one-liner input".to_string());
        }
    };

    let outdir = Path::new(&options.outdir);
    fs::create_dir_all(outdir)
        .map_err(|e| format!("Could not create output directory '{}': {e}", options.outdir))?;
    if let Some(csv) = &options.csv {
        let copy_target = outdir.join("input.csv");
        if !copy_target.exists() {
            fs::copy(csv, &copy_target)
                .map_err(|e| format!("Could not copy input csv into '{}': {e}", options.outdir))?;
        }
    }

    let out_name = if options.check_precomputed {
        "out_precomputed.csv"
    } else {
        "out.csv"
    };
    let out_path = outdir.join(out_name);
    let mut out = BufWriter::new(
        File::create(&out_path)
            .map_err(|e| format!("Could not create output file '{}': {e}", out_path.display()))?,
    );
    let mut log = RunLog::to_path(&outdir.join("log.txt")).map_err(|e| e.to_string())?;
    log.note(&format!(
        "Input: {} site(s), amplicon mode '{}', product size {}-{}bp",
        table.len(),
        config.mode,
        config.prod_size_lower,
        config.prod_size_upper
    ));

    let catalog = GenomeCatalog::from_json_file(&options.genome_catalog)?;
    let store = PrecomputedStore::new(&options.precomputed_dir);
    let designer = ScanningDesigner::new();

    let mut driver = BatchDriver::new(
        &config,
        &store,
        &catalog,
        &designer,
        BatchOptions {
            check_precomputed: options.check_precomputed,
            threads: options.threads,
            aligner: options.aligner,
            database: options.database,
        },
    );
    driver
        .run(&table, &mut out, &mut log)
        .map_err(|e| e.to_string())?;

    println!("Wrote {}", out_path.display());
    Ok(())
}
