use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use qi_core::{
    Chart, DEFAULT_MAX_ITERATIONS, EngineOutput, Group, OptimizerConfig, Pillar, Stem, Timeline,
    optimize, simulate, tunable, tunables,
};
use qi_store::{DataDir, LoadedParams, RunSink, Store, load_cases, params_to_toml, save_params};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "qi", about = "Chart energy propagation engine and calibrator")]
struct Cli {
    /// Data directory (default: $QI_DATA_DIR, then ~/.qi)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ChartArgs {
    /// Four pillars, year to hour (e.g. JiaZi BingYin GengWu RenShen)
    #[arg(required = true, num_args = 1..)]
    pillars: Vec<String>,

    /// Reference stem (default: day stem)
    #[arg(long)]
    reference: Option<String>,

    /// Decade overlay pillar
    #[arg(long)]
    decade: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one chart and print the evaluation
    Simulate {
        #[command(flatten)]
        chart: ChartArgs,

        /// Year overlay pillar
        #[arg(long)]
        year: Option<String>,

        /// Parameter document (default: <data-dir>/params.toml, else defaults)
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,

        /// Print the full engine output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-evaluate a chart under a sequence of year overlays
    Timeline {
        #[command(flatten)]
        chart: ChartArgs,

        /// Year pillars, comma separated
        #[arg(long, required = true, value_delimiter = ',')]
        years: Vec<String>,

        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,
    },

    /// Calibrate parameters against a labeled case set
    Calibrate(CalibrateArgs),

    /// Inspect parameter documents
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },

    /// Inspect calibration runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(clap::Args)]
struct CalibrateArgs {
    /// Case-set JSON file
    cases: PathBuf,

    /// Starting parameter document
    #[arg(long)]
    params: Option<PathBuf>,

    /// Where to write the best parameters (default: <data-dir>/best/<run>.toml)
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    #[arg(long, default_value_t = 1.0)]
    target: f64,

    /// RNG seed (random when omitted; printed either way)
    #[arg(long)]
    seed: Option<u64>,

    /// Parameter groups to hold fixed, comma separated
    #[arg(long, value_delimiter = ',')]
    lock: Vec<String>,

    /// Individual tunables to hold fixed, comma separated dotted names
    #[arg(long, value_delimiter = ',')]
    pin: Vec<String>,

    /// Initial step size as a fraction of each tunable's range; adapts during the run
    #[arg(long, default_value_t = 0.1)]
    step: f64,

    #[arg(long, default_value_t = 50)]
    stagnation: usize,

    #[arg(long, default_value_t = 256)]
    history: usize,

    /// Weight of the category-score error in the objective
    #[arg(long, default_value_t = 1.0)]
    category_weight: f64,

    /// Propagation pass cap per case
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_passes: usize,
}

#[derive(Subcommand)]
enum ParamsAction {
    /// List every tunable with its group, range and default
    List,
    /// Print the effective parameter document
    Show {
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Validate a parameter document and report clamped values
    Check { path: PathBuf },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List calibration runs, newest first
    List,
    /// Show the checkpoints of one run
    Show { id: String },
    /// Export the best checkpointed parameters
    Best {
        /// Restrict to one run
        #[arg(long)]
        run: Option<String>,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_data(cli: &Cli) -> Result<DataDir> {
    DataDir::open(cli.data_dir.as_deref()).context("failed to open data directory")
}

fn load_params(data: &DataDir, path: Option<&Path>) -> Result<LoadedParams> {
    let loaded = data
        .load_params(path)
        .context("failed to load parameter document")?;
    for name in &loaded.clamped {
        eprintln!("warning: {name} out of range, clamped");
    }
    Ok(loaded)
}

fn parse_chart(args: &ChartArgs, year: Option<&str>) -> Result<Chart> {
    let mut chart = Chart::parse(&args.pillars).context("invalid chart")?;
    if let Some(r) = &args.reference {
        chart = chart.with_reference(r.parse::<Stem>().context("invalid reference stem")?);
    }
    if let Some(d) = &args.decade {
        chart = chart.with_decade(d.parse::<Pillar>().context("invalid decade pillar")?);
    }
    if let Some(y) = year {
        chart = chart.with_year(y.parse::<Pillar>().context("invalid year pillar")?);
    }
    Ok(chart)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Simulate {
            chart,
            year,
            params,
            max_iterations,
            json,
        } => cmd_simulate(&cli, chart, year.as_deref(), params.as_deref(), *max_iterations, *json),
        Commands::Timeline {
            chart,
            years,
            params,
            max_iterations,
        } => cmd_timeline(&cli, chart, years, params.as_deref(), *max_iterations),
        Commands::Calibrate(args) => cmd_calibrate(&cli, args).await,
        Commands::Params { action } => cmd_params(&cli, action),
        Commands::Runs { action } => cmd_runs(&cli, action),
    }
}

fn print_output(out: &EngineOutput) {
    let eval = &out.evaluation;
    println!("chart:       {}", out.chart);
    println!("reference:   {}", eval.reference);
    println!(
        "converged:   {} ({} iterations)",
        out.converged, out.iterations
    );
    match out.collapse {
        Some(e) => println!("collapse:    {e}"),
        None => println!("collapse:    none"),
    }
    println!("class:       {}", eval.classification);
    println!("net force:   {:.4} (band {:.4})", eval.net_force, eval.band);
    let totals: Vec<String> = out
        .totals
        .iter()
        .map(|t| format!("{}={:.3}", t.element, t.energy))
        .collect();
    println!("totals:      {}", totals.join(" "));
    let scores: Vec<String> = eval
        .scores
        .iter()
        .map(|(c, v)| format!("{c}={v:.3}"))
        .collect();
    println!("categories:  {}", scores.join(" "));
    if !out.transformations.is_empty() {
        println!("transformed: {}", out.transformations.len());
    }
    if !out.vaults_released.is_empty() {
        println!("vaults:      {} released", out.vaults_released.len());
    }
}

fn cmd_simulate(
    cli: &Cli,
    chart: &ChartArgs,
    year: Option<&str>,
    params: Option<&Path>,
    max_iterations: usize,
    json: bool,
) -> Result<()> {
    let chart = parse_chart(chart, year)?;
    let data = open_data(cli)?;
    let loaded = load_params(&data, params)?;

    let out = simulate(&chart, &loaded.params, max_iterations);
    if json {
        println!("{}", out.to_json().context("failed to serialize output")?);
    } else {
        print_output(&out);
    }
    Ok(())
}

fn cmd_timeline(
    cli: &Cli,
    chart: &ChartArgs,
    years: &[String],
    params: Option<&Path>,
    max_iterations: usize,
) -> Result<()> {
    let chart = parse_chart(chart, None)?;
    let years = years
        .iter()
        .map(|y| {
            y.parse::<Pillar>()
                .with_context(|| format!("invalid year pillar {y:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let data = open_data(cli)?;
    let loaded = load_params(&data, params)?;

    let mut timeline = Timeline::new(chart, &loaded.params, max_iterations);
    let mut line = |out: &EngineOutput| {
        format!(
            "{:<20} net={:+.4} converged={}",
            out.evaluation.classification.as_str(),
            out.evaluation.net_force,
            out.converged
        )
    };
    let rows = timeline.years(&years, &mut line);
    for (year, row) in years.iter().zip(rows) {
        println!("{:<10} {row}", year.to_string());
    }
    Ok(())
}

async fn cmd_calibrate(cli: &Cli, args: &CalibrateArgs) -> Result<()> {
    let data = open_data(cli)?;
    let loaded = load_params(&data, args.params.as_deref())?;
    let cases = load_cases(&args.cases)
        .with_context(|| format!("failed to load case set {}", args.cases.display()))?
        .with_max_iterations(args.max_passes)
        .with_category_loss_weight(args.category_weight);

    let mut locked = std::collections::BTreeSet::new();
    for g in &args.lock {
        match Group::from_str_opt(g) {
            Some(group) => {
                locked.insert(group);
            }
            None => bail!("unknown parameter group {g:?}"),
        }
    }
    for name in &args.pin {
        if tunable(name).is_none() {
            bail!("unknown tunable {name:?}");
        }
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    let config = OptimizerConfig {
        step_magnitude: args.step,
        stagnation_threshold: args.stagnation,
        history_limit: args.history,
        max_iterations: args.iterations,
        target_score: args.target,
        seed: Some(seed),
        locked,
        pinned: args.pin.iter().cloned().collect(),
        ..OptimizerConfig::default()
    };

    let store = data.store().context("failed to open run store")?;
    let run_id = store
        .begin_run(&args.cases.display().to_string(), cases.len(), &config)
        .context("failed to record run")?;
    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| data.best_params_path(run_id));
    println!("run:         {run_id}");
    println!("seed:        {seed}");

    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current iteration");
                token.cancel();
            }
        })
    };

    let worker_token = token.clone();
    let sink_path = out_path.clone();
    let initial = loaded.params;
    let result = tokio::task::spawn_blocking(move || {
        let result = {
            let mut sink = RunSink::new(&store, run_id).with_params_path(sink_path);
            let cancel = || worker_token.is_cancelled();
            optimize(initial, &cases, &config, &mut sink, &cancel)
        };
        if result.is_err()
            && let Err(e) = store.mark_failed(run_id)
        {
            tracing::warn!(run = %run_id, error = %e, "failed to mark run as failed");
        }
        result
    })
    .await
    .context("calibration task failed")?;
    watcher.abort();

    let outcome = result.context("calibration failed")?;
    let state = &outcome.state;
    println!("stopped:     {}", outcome.reason);
    println!("iterations:  {}", state.iteration);
    println!("bursts:      {}", state.bursts);
    println!("best score:  {:.6}", state.best_score);
    println!("best params: {}", out_path.display());
    Ok(())
}

fn cmd_params(cli: &Cli, action: &ParamsAction) -> Result<()> {
    match action {
        ParamsAction::List => {
            for t in tunables() {
                println!(
                    "{:<38} {:<12} [{}, {}] default {}",
                    t.name, t.group, t.min, t.max, t.default
                );
            }
        }
        ParamsAction::Show { params } => {
            let data = open_data(cli)?;
            let loaded = load_params(&data, params.as_deref())?;
            print!("{}", params_to_toml(&loaded.params)?);
        }
        ParamsAction::Check { path } => {
            let data = open_data(cli)?;
            let loaded = load_params(&data, Some(path))?;
            if loaded.clamped.is_empty() {
                println!("ok");
            } else {
                println!("ok, {} value(s) clamped", loaded.clamped.len());
            }
        }
    }
    Ok(())
}

fn cmd_runs(cli: &Cli, action: &RunsAction) -> Result<()> {
    let data = open_data(cli)?;
    let store = data.store().context("failed to open run store")?;

    match action {
        RunsAction::List => {
            let runs = store.list_runs().context("failed to list runs")?;
            if runs.is_empty() {
                println!("(no runs)");
            }
            for r in runs {
                let id = r.id.to_string();
                let best = r
                    .best_score
                    .map(|s| format!("{s:.4}"))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}  {}  {:<16} best={} iterations={} cases={} {}",
                    id.split('-').next().unwrap_or(&id),
                    r.started_at,
                    r.status,
                    best,
                    r.iterations,
                    r.case_count,
                    r.case_source
                );
            }
        }
        RunsAction::Show { id } => {
            let id = resolve_run(&store, id)?;
            for c in store.checkpoints(id).context("failed to read checkpoints")? {
                println!("iteration={:<6} score={:.6}", c.iteration, c.score);
            }
        }
        RunsAction::Best { run, out } => {
            let run = run
                .as_deref()
                .map(|prefix| resolve_run(&store, prefix))
                .transpose()?;
            let Some(best) = store.best_checkpoint(run).context("failed to read checkpoints")? else {
                bail!("no checkpoints recorded");
            };
            match out {
                Some(path) => {
                    save_params(path, &best.params)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("score {:.6} written to {}", best.score, path.display());
                }
                None => print!("{}", params_to_toml(&best.params)?),
            }
        }
    }
    Ok(())
}

/// Accepts a full run id or any unambiguous prefix of one.
fn resolve_run(store: &Store, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = store
        .list_runs()
        .context("failed to list runs")?
        .into_iter()
        .map(|r| r.id)
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [one] => Ok(*one),
        [] => bail!("no run matching {prefix:?}"),
        _ => bail!("run id {prefix:?} is ambiguous"),
    }
}
