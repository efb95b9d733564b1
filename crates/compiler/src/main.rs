//! C-Next Compiler CLI
//!
//! Command-line interface for transpiling `.cnx` sources to C99/C++14
//! and managing the PlatformIO build integration.

use clap::{CommandFactory, Parser as ClapParser};
use cnextc::resolver::OsFileLoader;
use cnextc::{Cache, CancelToken, DriveOptions, format_diagnostics};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "cnextc")]
#[command(disable_version_flag = true)]
#[command(about = "C-Next transpiler - compile .cnx sources to C99/C++14", long_about = None)]
struct Cli {
    /// Input .cnx source file
    input: Option<PathBuf>,

    /// Override output path
    #[arg(short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Force C++ emission
    #[arg(long)]
    cpp: bool,

    /// Parse and analyse only; write no output
    #[arg(long)]
    parse: bool,

    /// Prepend to include search path (repeatable)
    #[arg(long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Target profile: teensy41, cortex-m0, avr, host, ...
    #[arg(long, value_name = "PROFILE")]
    target: Option<String>,

    /// Memoise per-file parse results for this invocation
    #[arg(long)]
    cache: bool,

    /// Install PlatformIO build integration in the current directory
    #[arg(long)]
    pio_install: bool,

    /// Remove PlatformIO build integration from the current directory
    #[arg(long)]
    pio_uninstall: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn main() {
    let cli = Cli::parse();
    if cli.version {
        println!("cnextc {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    init_tracing(cli.input.as_deref());

    if cli.pio_install || cli.pio_uninstall {
        run_pio(cli.pio_install);
        return;
    }

    let Some(input) = cli.input else {
        // No arguments: print help and succeed.
        let mut command = Cli::command();
        command.print_help().expect("help output");
        println!();
        process::exit(0);
    };

    let options = DriveOptions {
        input,
        output: cli.output,
        force_cpp: cli.cpp,
        parse_only: cli.parse,
        include_dirs: cli.include,
        target: cli.target,
    };
    let cache = if cli.cache { Some(Cache::new()) } else { None };

    let outcome = cnextc::drive(&options, &OsFileLoader, cache.as_ref(), &CancelToken::new());
    if !outcome.diagnostics.is_empty() {
        eprint!("{}", format_diagnostics(&outcome.diagnostics));
    }
    process::exit(outcome.exit_code());
}

fn run_pio(install: bool) {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: cannot determine current directory: {}", e);
            process::exit(1);
        }
    };
    if install {
        match cnextc::pio::install(&cwd) {
            Ok(cnextc::pio::InstallOutcome::Installed) => {
                println!("Installed PlatformIO integration ({})", cnextc::pio::BUILD_SCRIPT_NAME);
            }
            Ok(cnextc::pio::InstallOutcome::AlreadyConfigured) => {
                println!("PlatformIO integration already configured");
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    } else {
        match cnextc::pio::uninstall(&cwd) {
            Ok(()) => println!("Removed PlatformIO integration"),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
    }
}

/// Install the tracing subscriber once. `CNEXT_LOG` controls filtering;
/// without it the default level is `warn`, raised to `debug` when the
/// project configuration sets `debugMode`.
fn init_tracing(input: Option<&Path>) {
    let debug_mode = input
        .and_then(Path::parent)
        .and_then(|dir| cnextc::config::discover(dir, &OsFileLoader))
        .map(|(_, config)| config.debug_mode)
        .unwrap_or(false);
    let filter = EnvFilter::try_from_env("CNEXT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if debug_mode { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
