use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use cpue_index::cache::{CacheMode, FileCache};
use cpue_index::compare::run_comparison;
use cpue_index::config::{ComparisonConfig, load_config};
use cpue_index::normalize::{geometric_mean, normalize_effects};
use cpue_index::simulate::{CpueRecord, SimulatedCpue, SimulationConfig, simulate_cpue};
use cpue_index::types::{LinkFunction, Parameterization};
use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cpue-index")]
#[command(
    about = "Anchor CPUE year-effect indices from different model families to a common scale",
    long_about = None
)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(alias = "generate")]
    Simulate(SimulateArgs),
    Normalize(NormalizeArgs),
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// JSON simulation config; missing fields take their defaults.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "seed")]
    seed: Option<u64>,
    #[arg(long = "years")]
    years: Option<usize>,
    #[arg(long = "samples-per-year")]
    samples_per_year: Option<usize>,
    /// Drop the spatial and spatio-temporal fields.
    #[arg(long = "non-spatial", default_value_t = false)]
    non_spatial: bool,
    #[arg(long = "out")]
    out: PathBuf,
    /// Also write the true per-year index.
    #[arg(long = "truth")]
    truth: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    /// CSV with a `coefficient` column and an optional `year` column.
    coefficients: PathBuf,
    #[arg(long = "link", value_enum)]
    link: LinkArg,
    #[arg(long = "parameterization", value_enum, default_value_t = ParameterizationArg::TreatmentContrast)]
    parameterization: ParameterizationArg,
    #[arg(long = "reference-geometric-mean", default_value_t = 1.0)]
    reference_geometric_mean: f64,
    #[arg(long = "out")]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// CSV with `year` and `cpue` columns.
    data: PathBuf,
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "out")]
    out: Option<PathBuf>,
    /// Refit every model and overwrite cached fits.
    #[arg(long = "recompute", default_value_t = false)]
    recompute: bool,
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LinkArg {
    Identity,
    Log,
    Logit,
}

impl LinkArg {
    fn link(self) -> LinkFunction {
        match self {
            Self::Identity => LinkFunction::Identity,
            Self::Log => LinkFunction::Log,
            Self::Logit => LinkFunction::Logit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ParameterizationArg {
    TreatmentContrast,
    NoIntercept,
}

impl ParameterizationArg {
    fn parameterization(self) -> Parameterization {
        match self {
            Self::TreatmentContrast => Parameterization::TreatmentContrast,
            Self::NoIntercept => Parameterization::NoIntercept,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoefficientRow {
    #[serde(default)]
    year: Option<i32>,
    coefficient: f64,
}

#[derive(Debug, Deserialize)]
struct CpueRow {
    year: i32,
    cpue: f64,
}

#[derive(Debug, Serialize)]
struct NormalizedRow {
    level: String,
    coefficient: f64,
    normalized: f64,
}

#[derive(Debug, Serialize)]
struct TruthRow {
    year: i32,
    log_effect: f64,
    index: f64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::debug!("cpue-index build {}", env!("CPUE_BUILD_TIMESTAMP"));
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(args) => run_simulate(args),
        Command::Normalize(args) => run_normalize(args),
        Command::Compare(args) => run_compare(args),
    }
}

fn run_simulate(args: SimulateArgs) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => {
            let payload = fs::read_to_string(path)
                .map_err(|e| format!("failed to read simulation config '{}': {e}", path.display()))?;
            serde_json::from_str::<SimulationConfig>(&payload)
                .map_err(|e| format!("failed to parse simulation config: {e}"))?
        }
        None => SimulationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(years) = args.years {
        config.n_years = years;
    }
    if let Some(n) = args.samples_per_year {
        config.samples_per_year = n;
    }
    if args.non_spatial {
        config = config.non_spatial();
    }

    let sim = simulate_cpue(&config).map_err(|e| e.to_string())?;
    write_records_csv(&args.out, &sim.records)?;
    println!(
        "saved {} simulated hauls: {} (encounter rate {:.3})",
        sim.records.len(),
        args.out.display(),
        sim.encounter_rate()
    );
    if let Some(path) = &args.truth {
        write_truth_csv(path, &sim)?;
        println!("saved true index: {}", path.display());
    }
    Ok(())
}

fn run_normalize(args: NormalizeArgs) -> Result<(), String> {
    let rows = read_coefficients(&args.coefficients)?;
    let raw = rows.iter().map(|r| r.coefficient).collect::<Array1<f64>>();
    let parameterization = args.parameterization.parameterization();
    let normalized = normalize_effects(
        raw.view(),
        args.link.link(),
        parameterization,
        args.reference_geometric_mean,
    )
    .map_err(|e| e.to_string())?;

    let mut labels = Vec::with_capacity(normalized.len());
    let mut full_raw = Vec::with_capacity(normalized.len());
    if parameterization == Parameterization::TreatmentContrast {
        labels.push("reference".to_string());
        full_raw.push(0.0);
    }
    for (i, row) in rows.iter().enumerate() {
        labels.push(row.year.map_or_else(|| format!("level_{}", i + 1), |y| y.to_string()));
        full_raw.push(row.coefficient);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Level", "Coefficient", "Normalized"]);
    for ((label, coef), value) in labels.iter().zip(&full_raw).zip(normalized.iter()) {
        table.add_row(Row::from(vec![
            Cell::new(label),
            Cell::new(format!("{coef:.6}")),
            Cell::new(format!("{value:.6}")),
        ]));
    }
    println!("{table}");
    let gm = geometric_mean(normalized.view()).map_err(|e| e.to_string())?;
    println!(
        "link={} | parameterization={} | geometric mean={gm:.6}",
        args.link.link().name(),
        parameterization.name()
    );

    if let Some(path) = &args.out {
        let out_rows = labels
            .into_iter()
            .zip(full_raw)
            .zip(normalized.iter().copied())
            .map(|((level, coefficient), normalized)| NormalizedRow {
                level,
                coefficient,
                normalized,
            })
            .collect::<Vec<_>>();
        write_serialized_csv(path, &out_rows)?;
        println!("saved normalized series: {}", path.display());
    }
    Ok(())
}

fn run_compare(args: CompareArgs) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => ComparisonConfig::default(),
    };
    if args.recompute {
        config.cache_mode = CacheMode::Recompute;
    }
    if let Some(dir) = args.cache_dir {
        config.cache_dir = dir;
    }

    let (years, cpue) = read_cpue_data(&args.data)?;
    let mut cache = FileCache::new(&config.cache_dir).map_err(|e| e.to_string())?;
    let table = run_comparison(&config, &years, cpue.view(), &mut cache).map_err(|e| e.to_string())?;

    println!(
        "comparison complete | series={} | years={} | reference={} | geometric mean={:.6}",
        table.series().len(),
        table.years().len(),
        table.reference().label,
        table.reference_geometric_mean()
    );
    println!("{}", table.render());

    if let Some(path) = &args.out {
        table.write_csv(path).map_err(|e| e.to_string())?;
        println!("saved comparison table: {}", path.display());
    }
    Ok(())
}

fn read_coefficients(path: &Path) -> Result<Vec<CoefficientRow>, String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("failed to open csv '{}': {e}", path.display()))?;
    let mut rows = Vec::new();
    for (i, rec) in rdr.deserialize::<CoefficientRow>().enumerate() {
        rows.push(rec.map_err(|e| format!("failed reading coefficient row {}: {e}", i + 1))?);
    }
    if rows.is_empty() {
        return Err(format!("coefficient file '{}' has no rows", path.display()));
    }
    Ok(rows)
}

fn read_cpue_data(path: &Path) -> Result<(Vec<i32>, Array1<f64>), String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("failed to open csv '{}': {e}", path.display()))?;
    let mut years = Vec::new();
    let mut cpue = Vec::new();
    for (i, rec) in rdr.deserialize::<CpueRow>().enumerate() {
        let row = rec.map_err(|e| format!("failed reading data row {}: {e}", i + 1))?;
        years.push(row.year);
        cpue.push(row.cpue);
    }
    if years.is_empty() {
        return Err(format!("data file '{}' has no rows", path.display()));
    }
    Ok((years, Array1::from_vec(cpue)))
}

fn write_serialized_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), String> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to create output csv '{}': {e}", path.display()))?;
    for (i, row) in rows.iter().enumerate() {
        wtr.serialize(row)
            .map_err(|e| format!("failed to write csv row {i}: {e}"))?;
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush csv writer: {e}"))?;
    Ok(())
}

fn write_records_csv(path: &Path, records: &[CpueRecord]) -> Result<(), String> {
    write_serialized_csv(path, records)
}

fn write_truth_csv(path: &Path, sim: &SimulatedCpue) -> Result<(), String> {
    let rows = sim
        .years
        .iter()
        .zip(sim.true_year_effects.iter())
        .zip(sim.true_index.iter())
        .map(|((&year, &log_effect), &index)| TruthRow {
            year,
            log_effect,
            index,
        })
        .collect::<Vec<_>>();
    write_serialized_csv(path, &rows)
}
