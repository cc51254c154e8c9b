//! causalpanel CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cp_core::EventWindow;
use cp_inference::econometrics::InferenceOverride;
use cp_inference::{
    Panel, PlaceboConfig, PlaceboMethod, ResultAssembler, RunOptions, SyntheticPanel,
    estimate_robustness, run_estimation, run_event_study, run_placebo,
};
use std::path::PathBuf;

mod config;
mod io;

use config::ProjectConfig;

#[derive(Parser)]
#[command(name = "causalpanel")]
#[command(about = "causalpanel - Fixed-effects DiD, event studies and placebo diagnostics")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Permute,
    Shift,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the panel and report timing and balance diagnostics
    BuildPanel {
        /// Input table (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Project config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Estimate one specification on one sample
    RunEstimation {
        /// Input table (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Project config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Specification name
        #[arg(short, long, default_value = "baseline")]
        specification: String,

        /// Sample restriction (configured name, `full`, `balanced`, `drop_first:K`, `drop_last:K`)
        #[arg(long, default_value = "full")]
        sample: String,

        /// Override inference: a cluster column, `none` (robust) or `classical`
        #[arg(long)]
        cluster: Option<String>,

        /// Directory for CSV tables
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the robustness menu against the baseline
    EstimateRobustness {
        /// Input table (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Project config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override inference: a cluster column, `none` (robust) or `classical`
        #[arg(long)]
        cluster: Option<String>,

        /// Directory for CSV tables
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Placebo distribution under randomized treatment timing
    Placebo {
        /// Input table (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Project config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Specification name
        #[arg(short, long, default_value = "baseline")]
        specification: String,

        /// Override inference: a cluster column, `none` (robust) or `classical`
        #[arg(long)]
        cluster: Option<String>,

        /// Number of draws (overrides config)
        #[arg(long)]
        draws: Option<usize>,

        /// Base seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Draw method (overrides config)
        #[arg(long, value_enum)]
        method: Option<MethodArg>,

        /// Largest onset shift for `--method shift`
        #[arg(long, default_value = "3")]
        max_offset: usize,

        /// Directory for CSV tables
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Event study with leads and lags of treatment onset
    EventStudy {
        /// Input table (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// Project config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Specification name
        #[arg(short, long, default_value = "baseline")]
        specification: String,

        /// Override inference: a cluster column, `none` (robust) or `classical`
        #[arg(long)]
        cluster: Option<String>,

        /// Earliest relative period (overrides config)
        #[arg(long, allow_hyphen_values = true)]
        min_lag: Option<i64>,

        /// Latest relative period (overrides config)
        #[arg(long, allow_hyphen_values = true)]
        max_lag: Option<i64>,

        /// Omitted relative period
        #[arg(long, allow_hyphen_values = true, default_value = "-1")]
        reference: i64,

        /// Fold event times outside the window into the endpoint bins
        #[arg(long)]
        bin_endpoints: bool,

        /// Directory for CSV tables
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a seeded synthetic panel with a known effect
    GenerateDemo {
        /// Output table (CSV)
        #[arg(short, long)]
        output: PathBuf,

        /// Number of units
        #[arg(long, default_value = "40")]
        units: usize,

        /// Number of periods
        #[arg(long, default_value = "10")]
        periods: usize,

        /// Cohort onset period (repeat for staggered adoption)
        #[arg(long, default_value = "6")]
        onset: Vec<i64>,

        /// Share of never-treated units
        #[arg(long, default_value = "0.5")]
        never_treated_share: f64,

        /// Treatment effect
        #[arg(long, default_value = "2.0")]
        effect: f64,

        /// Noise standard deviation
        #[arg(long, default_value = "1.0")]
        noise_sd: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::BuildPanel { input, config, output } => {
            cmd_build_panel(&input, config.as_ref(), output.as_ref())
        }
        Commands::RunEstimation {
            input,
            config,
            specification,
            sample,
            cluster,
            out_dir,
            output,
        } => cmd_run_estimation(
            &input,
            config.as_ref(),
            specification,
            sample,
            cluster,
            out_dir.as_ref(),
            output.as_ref(),
        ),
        Commands::EstimateRobustness { input, config, cluster, out_dir, output, threads } => {
            cmd_estimate_robustness(
                &input,
                config.as_ref(),
                cluster,
                out_dir.as_ref(),
                output.as_ref(),
                threads,
            )
        }
        Commands::Placebo {
            input,
            config,
            specification,
            cluster,
            draws,
            seed,
            method,
            max_offset,
            out_dir,
            output,
            threads,
        } => {
            let overrides = PlaceboOverrides { draws, seed, method, max_offset };
            cmd_placebo(
                &input,
                config.as_ref(),
                specification,
                cluster,
                overrides,
                out_dir.as_ref(),
                output.as_ref(),
                threads,
            )
        }
        Commands::EventStudy {
            input,
            config,
            specification,
            cluster,
            min_lag,
            max_lag,
            reference,
            bin_endpoints,
            out_dir,
            output,
        } => {
            let window = WindowArgs { min_lag, max_lag, reference, bin_endpoints };
            cmd_event_study(
                &input,
                config.as_ref(),
                specification,
                cluster,
                window,
                out_dir.as_ref(),
                output.as_ref(),
            )
        }
        Commands::GenerateDemo {
            output,
            units,
            periods,
            onset,
            never_treated_share,
            effect,
            noise_sd,
            seed,
        } => {
            let demo = SyntheticPanel {
                n_units: units,
                n_periods: periods,
                cohort_onsets: onset,
                never_treated_share,
                effect,
                noise_sd,
                seed,
                ..Default::default()
            };
            cmd_generate_demo(&output, &demo)
        }
    }
}

fn set_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load(input: &PathBuf, config: Option<&PathBuf>) -> Result<(ProjectConfig, Panel)> {
    let cfg = ProjectConfig::load(config.map(PathBuf::as_path))?;
    let table = io::read_table(input)?;
    let panel = Panel::build(&table, cfg.panel.clone()).context("failed to build panel")?;
    let d = panel.diagnostics();
    tracing::info!(
        rows = d.n_rows,
        units = d.n_units,
        periods = d.n_periods,
        cohorts = d.n_treated_cohorts,
        "panel built"
    );
    Ok((cfg, panel))
}

fn run_options(cfg: &ProjectConfig, specification: String, cluster: Option<String>) -> RunOptions {
    RunOptions {
        specification,
        inference: cluster.as_deref().map(InferenceOverride::parse),
        confidence: cfg.confidence,
        samples: cfg.samples.clone(),
        ..Default::default()
    }
}

fn emit(
    tables: &cp_core::ResultTables,
    out_dir: Option<&PathBuf>,
    output: Option<&PathBuf>,
    extra: serde_json::Value,
) -> Result<()> {
    let mut value = serde_json::to_value(tables)?;
    if let (Some(obj), serde_json::Value::Object(more)) = (value.as_object_mut(), extra) {
        obj.extend(more);
    }
    if let Some(dir) = out_dir {
        io::write_tables(dir, tables)?;
    }
    io::write_json(output, value)
}

fn cmd_build_panel(
    input: &PathBuf,
    config: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (_, panel) = load(input, config)?;
    let cohorts: Vec<serde_json::Value> = panel
        .cohort_sizes()
        .into_iter()
        .map(|(cohort, n_units)| serde_json::json!({ "cohort": cohort, "n_units": n_units }))
        .collect();
    let output_json = serde_json::json!({
        "diagnostics": panel.diagnostics(),
        "cohorts": cohorts,
        "timing": panel.timing(),
        "columns": panel.table().column_names(),
    });
    io::write_json(output, output_json)
}

fn cmd_run_estimation(
    input: &PathBuf,
    config: Option<&PathBuf>,
    specification: String,
    sample: String,
    cluster: Option<String>,
    out_dir: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (cfg, panel) = load(input, config)?;
    let registry = cfg.registry()?;
    let opts = RunOptions { sample, ..run_options(&cfg, specification, cluster) };
    let tables = run_estimation(&panel, &registry, &opts)
        .with_context(|| format!("estimation of '{}' failed", opts.specification))?;
    tracing::info!(specification = %opts.specification, sample = %opts.sample, "estimation complete");
    emit(&tables, out_dir, output, serde_json::json!({}))
}

fn cmd_estimate_robustness(
    input: &PathBuf,
    config: Option<&PathBuf>,
    cluster: Option<String>,
    out_dir: Option<&PathBuf>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    set_threads(threads);
    let (cfg, panel) = load(input, config)?;
    let registry = cfg.registry()?;
    let opts = run_options(&cfg, registry.baseline().name.clone(), cluster);

    let mut baseline = run_estimation(&panel, &registry, &opts)
        .context("baseline estimation failed")?;
    let robustness = estimate_robustness(&panel, &registry, cfg.robustness.as_deref(), &opts)?;
    let n_failed = robustness.robustness.iter().filter(|r| r.failure_marker).count();
    tracing::info!(tests = robustness.robustness.len(), failed = n_failed, "robustness complete");
    baseline.robustness = robustness.robustness;
    emit(&baseline, out_dir, output, serde_json::json!({}))
}

struct PlaceboOverrides {
    draws: Option<usize>,
    seed: Option<u64>,
    method: Option<MethodArg>,
    max_offset: usize,
}

#[allow(clippy::too_many_arguments)]
fn cmd_placebo(
    input: &PathBuf,
    config: Option<&PathBuf>,
    specification: String,
    cluster: Option<String>,
    overrides: PlaceboOverrides,
    out_dir: Option<&PathBuf>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    set_threads(threads);
    let (cfg, panel) = load(input, config)?;
    let registry = cfg.registry()?;
    let opts = run_options(&cfg, specification, cluster);

    let mut placebo: PlaceboConfig = cfg.placebo.clone();
    if let Some(d) = overrides.draws {
        placebo.draws = d;
    }
    if let Some(s) = overrides.seed {
        placebo.seed = s;
    }
    match overrides.method {
        Some(MethodArg::Permute) => placebo.method = PlaceboMethod::Permute,
        Some(MethodArg::Shift) => {
            placebo.method = PlaceboMethod::Shift { max_offset: overrides.max_offset }
        }
        None => {}
    }

    let tables = run_placebo(&panel, &registry, &placebo, &opts)
        .with_context(|| format!("placebo run of '{}' failed", opts.specification))?;
    tracing::info!(draws = placebo.draws, seed = placebo.seed, "placebo complete");
    emit(&tables, out_dir, output, serde_json::json!({ "placebo_config": placebo }))
}

struct WindowArgs {
    min_lag: Option<i64>,
    max_lag: Option<i64>,
    reference: i64,
    bin_endpoints: bool,
}

fn cmd_event_study(
    input: &PathBuf,
    config: Option<&PathBuf>,
    specification: String,
    cluster: Option<String>,
    args: WindowArgs,
    out_dir: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (cfg, panel) = load(input, config)?;
    let registry = cfg.registry()?;
    let opts = run_options(&cfg, specification, cluster);

    let window = match (args.min_lag, args.max_lag, cfg.event_window) {
        (Some(min_lag), Some(max_lag), _) => EventWindow {
            min_lag,
            max_lag,
            reference: args.reference,
            bin_endpoints: args.bin_endpoints,
        },
        (None, None, Some(w)) => w,
        _ => anyhow::bail!("event-study needs --min-lag and --max-lag (or event_window in the config)"),
    };

    let es = run_event_study(&panel, &registry, window, &opts)
        .with_context(|| format!("event study of '{}' failed", opts.specification))?;
    tracing::info!(n_obs = es.n_obs, leads_lags = es.relative_times.len(), "event study complete");

    let mut out = ResultAssembler::new();
    out.add_estimation(&es.regression);
    let tables = out.finish();
    let extra = serde_json::json!({
        "event_study": {
            "relative_times": es.relative_times,
            "coefficients": es.coefficients,
            "std_errors": es.std_errors,
            "p_values": es.p_values,
            "ci_lower": es.ci_lower,
            "ci_upper": es.ci_upper,
            "n_obs": es.n_obs,
            "reference_period": es.reference_period,
        }
    });
    emit(&tables, out_dir, output, extra)
}

fn cmd_generate_demo(output: &PathBuf, demo: &SyntheticPanel) -> Result<()> {
    let table = demo.generate()?;
    io::write_table(output, &table)?;
    tracing::info!(path = %output.display(), rows = table.n_rows(), "demo panel written");
    Ok(())
}
