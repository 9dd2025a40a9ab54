use std::ffi::OsString;
use std::io::{self, Write};

use serde::Serialize;
use spikefuse_core::{FuseDevice, FuseMetrics, fuse_metrics};
use spikefuse_error::{ErrorCode, FuseError};
use spikefuse_harness::{
    KernelConfig, LockstepKernel, PoissonConfig, PoissonSource, RunReport, SweepConfig, SweepGrid,
    SweepResult, sweep,
};
use spikefuse_types::{
    FuseParams, KEY_FREQUENCY_THRESH, KEY_LENGTH_THRESH, KEY_N_CONNECTED_NEURONS, SpikeEvent,
    status_dict,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CYCLE_MS: f64 = 1.0;
const DEFAULT_SEED: u64 = 0x5eed;
const DEFAULT_SWEEP_CYCLES: u64 = 500;

#[derive(Debug, Clone, PartialEq)]
struct RunOptions {
    rate_hz: f64,
    frequency_thresh: f64,
    length_thresh: f64,
    sources: u64,
    siblings: usize,
    cycles: u64,
    cycle_ms: f64,
    seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct SweepOptions {
    cycles: u64,
    cycle_ms: f64,
    seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Run(RunOptions),
    Sweep(SweepOptions),
    Help,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    params: FuseParams,
    report: RunReport,
    metrics: FuseMetrics,
}

#[derive(Debug, Serialize)]
struct SweepOutput {
    points: usize,
    inconsistent: usize,
    results: Vec<SweepResult>,
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .with_target(true)
        .try_init();

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let exit_code = run(std::env::args_os(), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let command = match parse_args(args) {
        Ok(command) => command,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return ErrorCode::Misuse as i32;
        }
    };

    match command {
        CliCommand::Help => {
            if write_usage(out).is_err() {
                return ErrorCode::Internal as i32;
            }
            0
        }
        CliCommand::Run(options) => run_scenario(&options, out, err),
        CliCommand::Sweep(options) => run_sweep(&options, out, err),
    }
}

fn run_scenario<W, E>(options: &RunOptions, out: &mut W, err: &mut E) -> i32
where
    W: Write,
    E: Write,
{
    let result = simulate(options).and_then(|(params, report)| {
        let aborted = report.outcome.is_aborted();
        let output = RunOutput {
            params,
            report,
            metrics: fuse_metrics(),
        };
        write_json(out, &output)?;
        Ok(aborted)
    });

    match result {
        Ok(false) => 0,
        Ok(true) => ErrorCode::Unstable as i32,
        Err(error) => report_error(err, &error),
    }
}

fn simulate(options: &RunOptions) -> Result<(FuseParams, RunReport), FuseError> {
    let n_connected = i64::try_from(options.sources).map_err(|_| {
        FuseError::bad_parameter(
            vec![KEY_N_CONNECTED_NEURONS],
            format!("{} sources is out of range", options.sources),
        )
    })?;
    let config = status_dict([
        (KEY_FREQUENCY_THRESH, options.frequency_thresh.into()),
        (KEY_LENGTH_THRESH, options.length_thresh.into()),
        (KEY_N_CONNECTED_NEURONS, n_connected.into()),
    ]);
    let nodes = FuseDevice::<SpikeEvent>::replicas(options.siblings, &config)?;
    let params = nodes.first().map(FuseDevice::params).unwrap_or_default();

    let poisson = PoissonConfig::new(options.rate_hz, options.sources, options.seed, options.cycle_ms);
    let sources = PoissonSource::per_sibling(&poisson, options.siblings);
    let kernel = LockstepKernel::new(KernelConfig::new(options.cycles, options.cycle_ms));
    let report = kernel.run(nodes, sources)?;
    Ok((params, report))
}

fn run_sweep<W, E>(options: &SweepOptions, out: &mut W, err: &mut E) -> i32
where
    W: Write,
    E: Write,
{
    let config = SweepConfig {
        cycles: options.cycles,
        cycle_duration_ms: options.cycle_ms,
        seed: options.seed,
    };
    let result = sweep(&SweepGrid::default(), &config).and_then(|results| {
        let inconsistent = results.iter().filter(|r| !r.consistent).count();
        let output = SweepOutput {
            points: results.len(),
            inconsistent,
            results,
        };
        write_json(out, &output)?;
        Ok(inconsistent)
    });

    match result {
        Ok(0) => 0,
        Ok(_) => ErrorCode::Internal as i32,
        Err(error) => report_error(err, &error),
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), FuseError> {
    serde_json::to_writer_pretty(&mut *out, value)
        .map_err(|e| FuseError::internal(format!("cannot encode output: {e}")))?;
    writeln!(out).map_err(|e| FuseError::internal(format!("cannot write output: {e}")))
}

fn report_error<E: Write>(err: &mut E, error: &FuseError) -> i32 {
    let _ = writeln!(err, "error: {error}");
    if let Some(hint) = error.suggestion() {
        let _ = writeln!(err, "hint: {hint}");
    }
    error.exit_code()
}

#[allow(clippy::too_many_lines)]
fn parse_args<I>(args: I) -> Result<CliCommand, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let Some(subcommand) = iter.next() else {
        return Err(String::from("missing command; expected `run` or `sweep`"));
    };
    let subcommand = subcommand.to_string_lossy().into_owned();
    let is_run = match subcommand.as_str() {
        "-h" | "--help" | "help" => return Ok(CliCommand::Help),
        "run" => true,
        "sweep" => false,
        other => return Err(format!("unknown command `{other}`")),
    };

    let mut rate_hz: Option<f64> = None;
    let mut frequency_thresh: Option<f64> = None;
    let mut length_thresh: Option<f64> = None;
    let mut sources: Option<u64> = None;
    let mut siblings: Option<u64> = None;
    let mut cycles: Option<u64> = None;
    let mut cycle_ms = DEFAULT_CYCLE_MS;
    let mut seed = DEFAULT_SEED;

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy().into_owned();
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_owned(), Some(value.to_owned())),
            _ => (arg.clone(), None),
        };
        if flag == "-h" || flag == "--help" {
            return Ok(CliCommand::Help);
        }

        let mut value = || -> Result<String, String> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => iter
                    .next()
                    .map(|v| v.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("missing value for `{flag}`")),
            }
        };

        match (is_run, flag.as_str()) {
            (true, "--rate") => rate_hz = Some(parse_f64_option(&value()?, "--rate")?),
            (true, "--freq-thresh") => {
                frequency_thresh = Some(parse_f64_option(&value()?, "--freq-thresh")?);
            }
            (true, "--length-thresh") => {
                length_thresh = Some(parse_f64_option(&value()?, "--length-thresh")?);
            }
            (true, "--sources") => sources = Some(parse_u64_option(&value()?, "--sources")?),
            (true, "--siblings") => siblings = Some(parse_u64_option(&value()?, "--siblings")?),
            (_, "--cycles") => cycles = Some(parse_u64_option(&value()?, "--cycles")?),
            (_, "--cycle-ms") => cycle_ms = parse_f64_option(&value()?, "--cycle-ms")?,
            (_, "--seed") => seed = parse_u64_option(&value()?, "--seed")?,
            _ => return Err(format!("unknown option `{arg}` for `{subcommand}`")),
        }
    }

    if !is_run {
        return Ok(CliCommand::Sweep(SweepOptions {
            cycles: cycles.unwrap_or(DEFAULT_SWEEP_CYCLES),
            cycle_ms,
            seed,
        }));
    }

    let require = |v: Option<f64>, flag: &str| v.ok_or_else(|| format!("`run` requires `{flag}`"));
    let require_int =
        |v: Option<u64>, flag: &str| v.ok_or_else(|| format!("`run` requires `{flag}`"));
    let siblings = require_int(siblings, "--siblings")?;
    if siblings == 0 {
        return Err(String::from("`--siblings` must be at least 1"));
    }
    Ok(CliCommand::Run(RunOptions {
        rate_hz: require(rate_hz, "--rate")?,
        frequency_thresh: require(frequency_thresh, "--freq-thresh")?,
        length_thresh: require(length_thresh, "--length-thresh")?,
        sources: require_int(sources, "--sources")?,
        siblings: usize::try_from(siblings)
            .map_err(|_| format!("`--siblings` out of range: {siblings}"))?,
        cycles: require_int(cycles, "--cycles")?,
        cycle_ms,
        seed,
    }))
}

fn parse_f64_option(value: &str, flag: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|_| format!("invalid number for `{flag}`: `{value}`"))
}

fn parse_u64_option(value: &str, flag: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("invalid integer for `{flag}`: `{value}`"))
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(out, "Usage:")?;
    writeln!(
        out,
        "  spikefuse run --rate HZ --freq-thresh HZ --length-thresh MS --sources N \\"
    )?;
    writeln!(out, "                --siblings N --cycles N [--cycle-ms MS] [--seed S]")?;
    writeln!(out, "  spikefuse sweep [--cycles N] [--cycle-ms MS] [--seed S]")?;
    writeln!(out)?;
    writeln!(out, "Output is JSON on stdout. Exit codes:")?;
    writeln!(out, "  0  run completed / sweep consistent")?;
    writeln!(out, "  1  configuration rejected")?;
    writeln!(out, "  2  sweep verdict contradicted the drive")?;
    writeln!(out, "  3  bad command line")?;
    writeln!(out, "  4  run aborted on unstable spiking")?;
    writeln!(out, "  5  siblings disagreed on abort")?;
    Ok(())
}
