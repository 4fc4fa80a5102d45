//! `homeseq` CLI (C11): a `learn` pass that calibrates, generates, dedups,
//! and persists event sequences per catalog group, and an `explain`
//! subcommand that classifies a candidate sequence against the learned
//! library (`SPEC_FULL.md` §4.11).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use homeseq_core::{
    calibrate, explain_anomaly, generate_sequences, init_logging, CalibratorParams, Catalog,
    Config, Event, EventSequence, LogConfig, SqliteStore,
};

#[derive(Parser)]
#[command(name = "homeseq", about = "Learns and explains smart-home event sequences")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one learning pass per catalog group.
    Learn(LearnArgs),
    /// Explains a candidate sequence against the learned library.
    Explain(ExplainArgs),
}

#[derive(Args)]
struct LearnArgs {
    /// Falls back to `./homeseq.ini`, then the platform config directory,
    /// when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    debug: bool,
    /// How many days of event history to consider.
    #[arg(long, default_value_t = 7)]
    interval: i64,
    /// Accepted for parity with the source; writes a textual node/edge dump
    /// next to the database instead of rendering a graph image (§4.11).
    #[arg(long)]
    visualize: bool,
    #[arg(long)]
    visualize_zero_edges: bool,
    /// Writes the calibrator's trace frame as a CSV next to the database.
    #[arg(long)]
    plot: bool,
}

#[derive(Args)]
struct ExplainArgs {
    /// Falls back to `./homeseq.ini`, then the platform config directory,
    /// when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    group: String,
    /// Path to a JSON file holding the candidate sequence's events (the
    /// same shape `Event` serializes to).
    candidate: PathBuf,
}

/// Resolves the configuration file path: the explicit `--config` flag when
/// given, else `./homeseq.ini` in the working directory, else
/// `<platform config dir>/homeseq/homeseq.ini` (mirroring `wa-core`'s own
/// use of `dirs::config_dir()` for its data directory).
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let cwd_default = PathBuf::from("homeseq.ini");
    if cwd_default.is_file() {
        return Ok(cwd_default);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("homeseq").join("homeseq.ini");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    anyhow::bail!(
        "no --config given and no homeseq.ini found in the working directory or platform config directory"
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Learn(args) => run_learn(&args),
        Command::Explain(args) => run_explain(&args),
    }
}

fn run_learn(args: &LearnArgs) -> Result<()> {
    init_logging(&LogConfig::from_flags(args.verbose, args.debug))
        .context("failed to initialize logging")?;

    let config_path = resolve_config_path(args.config.clone())?;
    let config = Config::load_file(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let catalog = Catalog::load_file(&config.item_list)
        .with_context(|| format!("failed to load item catalog {}", config.item_list.display()))?;
    let store = SqliteStore::open(&config.database.name).context("failed to open database")?;

    store.clear_learned().context("failed to clear previously learned state")?;

    for group in catalog.groups() {
        if let Err(err) = learn_group(&store, &catalog, &config, &group, args) {
            tracing::error!(group = %group, error = %err, "skipping group after learning failure");
        }
    }

    tracing::info!("learning run complete");
    Ok(())
}

fn learn_group(
    store: &SqliteStore,
    catalog: &Catalog,
    config: &Config,
    group: &str,
    args: &LearnArgs,
) -> homeseq_core::Result<()> {
    let events = store.get_events(catalog, Some(group), Some(args.interval))?;
    if events.is_empty() {
        tracing::info!(group, "no events in interval, skipping");
        return Ok(());
    }

    let params = CalibratorParams {
        t_init: config.parameters.t_init,
        t_inc: config.parameters.t_inc,
        t_inc_stable: config.parameters.t_inc_stable,
        n: config.parameters.n,
        t_max: config.parameters.t_init.max(1) * 20,
        debounce_secs: config.parameters.t_inc as i64,
    };

    let (delay_secs, trace) = calibrate(&events, group, &params)?;
    store.store_event_delay(group, delay_secs)?;
    tracing::info!(group, delay_secs, "calibrated delay");

    if args.plot {
        write_trace_csv(&config.database.name, group, &trace)?;
    }

    let mut library: Vec<EventSequence> = Vec::new();
    for sequence in generate_sequences(events.into_iter(), delay_secs as i64, params.debounce_secs) {
        if sequence.node_count() < 2 {
            continue;
        }
        match library.iter().position(|existing| *existing == sequence) {
            Some(idx) => {
                library[idx] = library[idx].merge(&sequence)?;
            }
            None => library.push(sequence),
        }
    }

    for sequence in &library {
        store.store_event_sequence(sequence, group)?;
    }
    tracing::info!(group, learned = library.len(), "persisted learned sequences");

    if args.visualize || args.visualize_zero_edges {
        write_visualization(&config.database.name, group, &library, args.visualize_zero_edges)?;
    }

    Ok(())
}

fn write_trace_csv(db_name: &str, group: &str, trace: &std::collections::BTreeMap<u64, u64>) -> homeseq_core::Result<()> {
    let path = PathBuf::from(format!("{db_name}.{group}.trace.csv"));
    let mut out = String::from("t,pairs\n");
    for (t, pairs) in trace {
        out.push_str(&format!("{t},{pairs}\n"));
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn write_visualization(
    db_name: &str,
    group: &str,
    library: &[EventSequence],
    include_zero_edges: bool,
) -> homeseq_core::Result<()> {
    let path = PathBuf::from(format!("{db_name}.{group}.sequences.txt"));
    let mut out = String::new();
    for (i, sequence) in library.iter().enumerate() {
        out.push_str(&format!("# sequence {i}\n"));
        for (event, occ) in sequence.nodes() {
            out.push_str(&format!("node {} (x{occ})\n", event.item.name));
        }
        for (u, v, weight) in sequence.edges() {
            if weight == 0 && !include_zero_edges {
                continue;
            }
            out.push_str(&format!("edge {} -> {} [{weight}]\n", u.item.name, v.item.name));
        }
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn run_explain(args: &ExplainArgs) -> Result<()> {
    init_logging(&LogConfig::from_flags(false, false)).ok();

    let config_path = resolve_config_path(args.config.clone())?;
    let config = Config::load_file(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let catalog = Catalog::load_file(&config.item_list)
        .with_context(|| format!("failed to load item catalog {}", config.item_list.display()))?;
    let store = SqliteStore::open(&config.database.name).context("failed to open database")?;

    let text = std::fs::read_to_string(&args.candidate)
        .with_context(|| format!("failed to read candidate sequence {}", args.candidate.display()))?;
    let candidate_events: Vec<Event> =
        serde_json::from_str(&text).context("candidate sequence file is not a valid event list")?;
    let delay_secs = store
        .get_event_delay(&args.group)
        .unwrap_or(config.parameters.t_init);
    let candidate = generate_sequences(candidate_events, delay_secs as i64, config.parameters.t_inc as i64)
        .next()
        .context("candidate sequence file contained no events")?;

    let library = store
        .get_event_sequences(&catalog, &args.group)
        .context("failed to load learned sequence library")?;
    let explanation = explain_anomaly(&candidate, &library, config.parameters.anomaly_weight_threshold);

    println!("{}", explanation.reason);
    if let Some(best) = explanation.best_match {
        let items: Vec<String> = best.nodes().map(|(e, _)| e.item.name.clone()).collect();
        println!("best match: [{}]", items.join(", "));
    }

    Ok(())
}
