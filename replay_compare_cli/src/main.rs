use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use rayon::prelude::*;
use replay_compare::{
    compare_replay_set, compare_single_with_set, parse_events, Replay, SetComparison, SetOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay cursor-trace comparison CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare every unordered pair of the given replay files
    Set(CompareArgs),
    /// Compare the first replay file against every other input
    Single(CompareArgs),
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Replay data files (base64 + LZMA unless --text)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "comparison.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Per-input replay ids (comma separated; defaults to input order)
    #[arg(long)]
    ids: Option<String>,

    /// Per-input mods bitmasks (comma separated; defaults to 0)
    #[arg(long)]
    mods: Option<String>,

    /// Worker pool size (0 = host parallelism)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Treat inputs as plain `dt|x|y,` text instead of base64 + LZMA
    #[arg(long, action = ArgAction::SetTrue)]
    text: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Set(args) | Command::Single(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Set(args) => handle_compare(args, Mode::Set),
        Command::Single(args) => handle_compare(args, Mode::Single),
    }
}

enum Mode {
    Set,
    Single,
}

fn handle_compare(args: CompareArgs, mode: Mode) -> Result<()> {
    if matches!(mode, Mode::Single) && args.inputs.len() < 2 {
        return Err(anyhow!("single mode needs a reference and at least one other input"));
    }

    let ids = parse_u64_list(args.ids.as_deref(), args.inputs.len(), "--ids")?;
    let mods = parse_u32_list(args.mods.as_deref(), args.inputs.len(), "--mods")?;

    let t_load = Instant::now();
    let indexed: Vec<(usize, PathBuf)> = args.inputs.iter().cloned().enumerate().collect();
    let mut replays: Vec<(usize, Replay)> = indexed
        .par_iter()
        .map(|(index, path)| -> Result<(usize, Replay)> {
            let replay = load_replay(path, ids[*index], mods[*index], args.text)?;
            Ok((*index, replay))
        })
        .collect::<Result<Vec<_>>>()?;
    replays.sort_by_key(|(index, _)| *index);
    let replays: Vec<Replay> = replays.into_iter().map(|(_, r)| r).collect();
    info!(
        "Loaded {} replays in {:.1} ms",
        replays.len(),
        t_load.elapsed().as_secs_f64() * 1000.0
    );

    let options = SetOptions {
        num_threads: args.threads,
    };
    let t_compare = Instant::now();
    let rows = match mode {
        Mode::Set => compare_replay_set(&replays, &options)?,
        Mode::Single => compare_single_with_set(&replays[0], &replays[1..], &options)?,
    };
    info!(
        "Compared {} pairs in {:.1} ms",
        rows.len(),
        t_compare.elapsed().as_secs_f64() * 1000.0
    );

    if rows.is_empty() {
        warn!("No pairs to compare; nothing written");
        return Ok(());
    }

    if args.output.as_os_str() == "-" {
        write_rows_stdout(&rows)?;
    } else {
        write_rows_csv(&rows, &args.output)?;
        info!("Wrote comparison CSV: {}", args.output.display());
    }
    Ok(())
}

fn load_replay(path: &Path, id: u64, mods: u32, text: bool) -> Result<Replay> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let replay = if text {
        let events = parse_events(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Replay::from_events(&events, Some(id), mods)
    } else {
        Replay::from_encoded(&data, Some(id), mods)
    };
    replay.with_context(|| format!("failed to build replay from {}", path.display()))
}

fn parse_u64_list(input: Option<&str>, count: usize, flag: &str) -> Result<Vec<u64>> {
    match input {
        None => Ok((0..count as u64).collect()),
        Some(list) => {
            let values: Vec<u64> = list
                .split(',')
                .map(|token| {
                    token
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid {flag} entry '{}'", token.trim()))
                })
                .collect::<Result<Vec<_>>>()?;
            if values.len() != count {
                return Err(anyhow!(
                    "{flag} lists {} entries for {} inputs",
                    values.len(),
                    count
                ));
            }
            Ok(values)
        }
    }
}

fn parse_u32_list(input: Option<&str>, count: usize, flag: &str) -> Result<Vec<u32>> {
    match input {
        None => Ok(vec![0; count]),
        Some(list) => {
            let values: Vec<u32> = list
                .split(',')
                .map(|token| {
                    token
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid {flag} entry '{}'", token.trim()))
                })
                .collect::<Result<Vec<_>>>()?;
            if values.len() != count {
                return Err(anyhow!(
                    "{flag} lists {} entries for {} inputs",
                    values.len(),
                    count
                ));
            }
            Ok(values)
        }
    }
}

fn write_rows_stdout(rows: &[SetComparison]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_rows(rows, &mut writer)
}

fn write_rows_csv(rows: &[SetComparison], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_rows(rows, &mut writer)
}

fn write_rows<W: Write>(rows: &[SetComparison], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "replay1_id",
        "replay1_mods",
        "replay2_id",
        "replay2_mods",
        "similarity",
        "correlation",
    ])?;
    for row in rows {
        writer.write_record([
            row.replay1_id.to_string(),
            row.replay1_mods.to_string(),
            row.replay2_id.to_string(),
            row.replay2_mods.to_string(),
            format!("{:.6}", row.similarity),
            format!("{:.6}", row.correlation),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
