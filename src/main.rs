//! VM Pager - Main Entry Point
//!
//! Usage: vm-pager [OPTIONS] -f<frames> -a<algo> <input_file> [random_file]
//!
//! Arguments:
//!   input_file  - Processes, their regions, and the instruction trace
//!   random_file - Random values for the random pager (count first)
//!
//! Options:
//!   -f<n>          Number of physical frames
//!   -a<c>          Replacement algorithm: f c r e a w
//!   -o<flags>      Output: O trace, P page tables, F frame table, S summary
//!   -v, --verbose  Debug logging on stderr
//!   -h, --help     Print help information

use std::env;
use std::io::{self, BufWriter, Write};
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};

use vm_pager::io::{self as vmio, read_random_values, Workload};
use vm_pager::{Pager, PolicyKind, VmManager};

/// Which report sections to print
#[derive(Debug, Default, Clone, Copy)]
struct ReportOptions {
    trace: bool,
    page_tables: bool,
    frame_table: bool,
    summary: bool,
}

/// Command-line configuration
struct Config {
    frames: usize,
    policy: PolicyKind,
    report: ReportOptions,
    input_file: String,
    random_file: Option<String>,
    verbose: bool,
    /// `-o` letters that name no report
    unknown_flags: Vec<char>,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let default_filter = if config.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    for flag in &config.unknown_flags {
        warn!("ignoring unknown output flag '{}'", flag);
    }

    if let Err(e) = run(&config) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn print_help(program: &str) {
    eprintln!("Virtual Memory Pager - Simulates demand paging under a replacement algorithm");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] -f<frames> -a<algo> <input_file> [random_file]", program);
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  input_file  - Process regions followed by the instruction trace");
    eprintln!("  random_file - Random values (required for -ar)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -f<n>          Number of physical frames");
    eprintln!("  -a<c>          Algorithm: f=FIFO r=Random c=Clock e=NRU a=Aging w=Working-Set");
    eprintln!("  -o<flags>      O=trace P=page tables F=frame table S=summary");
    eprintln!("  -v, --verbose  Print debug logging to stderr");
    eprintln!("  -h, --help     Print this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} -f16 -ac -oOPFS input1 rfile", program);
    eprintln!("  {} -f 4 -a f -o S input1", program);
}

/// Value of a short option given either attached (`-f16`) or as the next argument (`-f 16`).
fn option_value<'a, I>(attached: &'a str, rest: &mut I, name: char) -> Result<String>
where
    I: Iterator<Item = &'a String>,
{
    if !attached.is_empty() {
        return Ok(attached.to_string());
    }
    rest.next()
        .cloned()
        .ok_or_else(|| anyhow!("Option -{} requires a value", name))
}

fn parse_args(args: &[String]) -> Result<Config> {
    let program = args.first().map(String::as_str).unwrap_or("vm-pager");

    let mut frames = None;
    let mut policy = None;
    let mut report = ReportOptions::default();
    let mut verbose = false;
    let mut unknown_flags = Vec::new();
    let mut positional: Vec<&String> = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help(program);
                process::exit(0);
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            _ if arg.starts_with("-f") => {
                let value = option_value(&arg[2..], &mut iter, 'f')?;
                let n: usize = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid frame count: {}", value))?;
                frames = Some(n);
            }
            _ if arg.starts_with("-a") => {
                let value = option_value(&arg[2..], &mut iter, 'a')?;
                let letter = value
                    .chars()
                    .next()
                    .ok_or_else(|| anyhow!("Option -a requires an algorithm letter"))?;
                policy = Some(PolicyKind::from_letter(letter)?);
            }
            _ if arg.starts_with("-o") => {
                let value = option_value(&arg[2..], &mut iter, 'o')?;
                for flag in value.chars() {
                    match flag {
                        'O' => report.trace = true,
                        'P' => report.page_tables = true,
                        'F' => report.frame_table = true,
                        'S' => report.summary = true,
                        other => unknown_flags.push(other),
                    }
                }
            }
            _ if arg.starts_with('-') => {
                bail!("Unknown option: {}\nUse --help for usage information.", arg);
            }
            _ => {
                positional.push(arg);
            }
        }
    }

    let frames = frames.ok_or_else(|| anyhow!("Missing frame count (-f<n>)"))?;
    let policy = policy.ok_or_else(|| anyhow!("Missing algorithm (-a<c>)"))?;

    if positional.is_empty() || positional.len() > 2 {
        print_help(program);
        bail!("\nError: Expected 1 or 2 file arguments, got {}", positional.len());
    }

    Ok(Config {
        frames,
        policy,
        report,
        input_file: positional[0].clone(),
        random_file: positional.get(1).map(|s| s.to_string()),
        verbose,
        unknown_flags,
    })
}

/// Main logic separated from main() for cleaner error handling
fn run(config: &Config) -> Result<()> {
    // Step 1: Load the workload
    let workload = Workload::from_file(&config.input_file)?;
    info!(
        "loaded {} processes and {} instructions from {}",
        workload.region_lists.len(),
        workload.trace.len(),
        config.input_file
    );

    // Step 2: Random values are only needed by the random pager
    let randoms = match (&config.random_file, config.policy) {
        (Some(path), PolicyKind::Random) => read_random_values(path)?,
        (None, PolicyKind::Random) => bail!("The random algorithm needs a random file"),
        (Some(path), _) => read_random_values(path).unwrap_or_else(|e| {
            debug!("ignoring unreadable random file: {:#}", e);
            Vec::new()
        }),
        (None, _) => Vec::new(),
    };

    // Step 3: Build and validate the simulation
    let pager = Pager::new(config.policy, randoms)?;
    let mut vm = VmManager::new(config.frames, pager, workload.region_lists)
        .context("invalid configuration")?;

    // Step 4: Run the trace, printing each step if asked to
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut write_err = None;
    vm.run_with(&workload.trace, |record| {
        if config.report.trace && write_err.is_none() {
            if let Err(e) = out.write_all(vmio::format_step(record).as_bytes()) {
                write_err = Some(e);
            }
        }
    })
    .context("invalid instruction trace")?;
    if let Some(e) = write_err {
        return Err(e).context("failed to write trace");
    }

    // Step 5: Final reports
    if config.report.page_tables {
        out.write_all(vmio::format_page_tables(&vm).as_bytes())?;
    }
    if config.report.frame_table {
        out.write_all(vmio::format_frame_table(&vm).as_bytes())?;
    }
    if config.report.summary {
        out.write_all(vmio::format_summary(&vm).as_bytes())?;
    }
    out.flush().context("failed to write report")?;

    Ok(())
}
