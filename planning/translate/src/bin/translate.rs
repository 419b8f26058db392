use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use aries_translate::errors::{Ctx, Message, TranslateError};
use aries_translate::limits::{Budget, MemoryReserve, Signal};
use aries_translate::options::{LayerStrategy, TranslateOptions};
use aries_translate::pddl::find_file::find_domain_of;
use aries_translate::pddl::input::Input;
use aries_translate::translate::{Outcome, translate};
use clap::Parser;
use tracing::{error, info};

/// Translates a PDDL domain and problem into a finite-domain task in the SAS format.
#[derive(Debug, Parser)]
#[command(name = "aries-translate", rename_all = "kebab-case")]
struct Args {
    /// If not set, will look for a `domain.pddl` file in the directory of the
    /// problem file or in the parent directory.
    #[arg(long, short)]
    domain: Option<PathBuf>,
    /// Path to the problem file.
    problem: PathBuf,
    /// File in which the translated task is written.
    #[arg(long, default_value = "output.sas")]
    sas_file: PathBuf,
    /// Write the translated task to the standard output instead of `--sas-file`.
    #[arg(long)]
    stdout: bool,
    /// Encode every fact group as its own variable, even if some atoms end up in several variables.
    #[arg(long)]
    full_encoding: bool,
    /// Keep the values that are unreachable in the domain transition graph of their variable.
    #[arg(long)]
    keep_unreachable_facts: bool,
    /// Keep the variables that are irrelevant to the goal.
    #[arg(long)]
    keep_unimportant_variables: bool,
    /// Keep variables in the order of fact groups instead of following the causal graph.
    #[arg(long)]
    skip_variable_reordering: bool,
    /// Maximal number of candidates examined by the invariant synthesis.
    #[arg(long, default_value_t = 100_000)]
    invariant_generation_max_candidates: usize,
    /// Time limit (in seconds) of the invariant synthesis.
    #[arg(long, default_value_t = 300)]
    invariant_generation_max_time: u64,
    /// Assignment of derived variables to axiom layers: `min` or `max`.
    #[arg(long, default_value_t = LayerStrategy::Min)]
    layer_strategy: LayerStrategy,
    /// Wall-clock limit (in seconds) for the entire translation.
    #[arg(long)]
    time_limit: Option<f64>,
    /// Fail with an out-of-memory error if grounding derives more atoms than this.
    #[arg(long)]
    max_model_atoms: Option<usize>,
    /// Log the grounded task before its finite-domain encoding.
    #[arg(long)]
    dump_task: bool,
    /// Write the fact groups from which variables were built to this file.
    #[arg(long)]
    dump_groups: Option<PathBuf>,
    /// Logging level to use: one of "error", "warn", "info", "debug", "trace"
    #[arg(long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
}

impl Args {
    fn options(&self) -> TranslateOptions {
        TranslateOptions {
            use_partial_encoding: !self.full_encoding,
            filter_unreachable_facts: !self.keep_unreachable_facts,
            filter_unimportant_vars: !self.keep_unimportant_variables,
            reorder_variables: !self.skip_variable_reordering,
            invariant_max_candidates: self.invariant_generation_max_candidates,
            invariant_max_time: Duration::from_secs(self.invariant_generation_max_time),
            layer_strategy: self.layer_strategy,
            time_limit: self.time_limit.map(Duration::from_secs_f64),
            max_model_atoms: self.max_model_atoms,
            dump_task: self.dump_task,
        }
    }
}

fn main() -> Result<()> {
    // a panic is a bug of the translator, reported as a critical error
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(TranslateError::EXIT_CRITICAL);
    }));

    let args = Args::parse();

    // logs go to stderr so that the task can be written to stdout
    let subscriber = tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::Uptime::from(Instant::now()))
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut reserve = MemoryReserve::allocate(MemoryReserve::DEFAULT_SIZE);

    let (snd, rcv) = crossbeam_channel::unbounded();
    ctrlc::set_handler(move || {
        // the receiver only disappears when the translation is over
        let _ = snd.send(Signal::Interrupt);
    })
    .context("Error setting the interruption handler")?;

    let options = args.options();
    let budget = Budget::new(options.time_limit, Some(rcv)).with_max_model_atoms(options.max_model_atoms);

    let outcome = match run(&args, &options, &budget) {
        Ok(outcome) => outcome,
        Err(err) => {
            if matches!(err, TranslateError::OutOfMemory) {
                reserve.release();
            }
            match &err {
                TranslateError::Input(msg) => eprintln!("{msg}"),
                err => error!("{err}"),
            }
            std::process::exit(err.exit_code());
        }
    };

    outcome.task().log_statistics();
    if let Err(err) = write_outputs(&args, &outcome) {
        error!("{err:?}");
        std::process::exit(TranslateError::EXIT_CRITICAL);
    }
    info!("Done!");
    std::process::exit(outcome.exit_code())
}

fn run(args: &Args, options: &TranslateOptions, budget: &Budget) -> Result<Outcome, TranslateError> {
    let problem_file = &args.problem;
    if !problem_file.exists() {
        return Err(Message::error(format!("Problem file {} does not exist", problem_file.display())).into());
    }
    let domain_file = match &args.domain {
        Some(name) => name.clone(),
        None => find_domain_of(problem_file).title("Consider specifying the domain with the option -d/--domain")?,
    };
    info!("Domain: {}", domain_file.display());
    info!("Problem: {}", problem_file.display());

    let domain = Input::from_file(&domain_file).map_err(Message::from)?;
    let problem = Input::from_file(problem_file).map_err(Message::from)?;
    translate(domain, problem, options, budget)
}

fn write_outputs(args: &Args, outcome: &Outcome) -> Result<()> {
    if args.stdout {
        let mut out = std::io::stdout().lock();
        outcome.task().write(&mut out)?;
        out.flush()?;
    } else {
        write_file(&args.sas_file, |out| outcome.task().write(out))?;
    }
    if let Some(path) = &args.dump_groups {
        // an unsolvable task has no groups, the file is still created
        let groups = outcome.groups().cloned().unwrap_or_default();
        write_file(path, |out| groups.write_groups(out))?;
    }
    Ok(())
}

fn write_file(path: &Path, write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write(&mut out).with_context(|| format!("Could not write {}", path.display()))?;
    out.flush()?;
    Ok(())
}
