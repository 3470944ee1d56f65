//! rust_dino command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_dino::cli::{Cli, Commands, NormalizeArgs};
use rust_dino::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["normalize", "depth", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_dino {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Normalize(args)) => run_normalize(&args),
        Some(Commands::Depth { counts, output }) => run_depth(&counts, &output),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_dino v{}", VERSION);
    println!("Run `rust_dino -h` for usage or `rust_dino --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_dino v{}", VERSION);
    println!();
    println!("Usage: rust_dino <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  normalize  Normalize a count matrix");
    println!("  depth      Estimate per-cell depth");
    println!();
    println!("Run `rust_dino <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_dino v{}", VERSION);
    println!("Depth normalization of single-cell counts by Gamma-Poisson mixture resampling");
    println!();
    println!("Usage: rust_dino <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  normalize  Normalize a count matrix");
    println!("               - per-gene Gamma-Poisson mixture fitted by accelerated EM");
    println!("               - posterior resampling with concentration γ");
    println!("               - depth scaling for genes with few non-zero cells");
    println!("               - estimated or supplied (linear or log) depth");
    println!("  depth      Estimate per-cell depth from cell totals");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_dino normalize -c counts.tsv -o normalized.tsv --seed 1");
    println!();
    println!("  rust_dino normalize -c counts.tsv --depth sf.tsv --log-depth -w 0 \\");
    println!("    --diagnostics fits.json");
    println!();
    println!("  rust_dino depth -c counts.tsv -o depth.tsv");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_normalize(args: &NormalizeArgs) -> Result<()> {
    let params = args.to_params()?;

    info!("Loading count matrix from: {}", args.counts);
    let counts = read_count_matrix(&args.counts)?;
    info!("  {} genes, {} cells", counts.n_genes(), counts.n_cells());

    let depth = match &args.depth {
        Some(path) => {
            info!("Loading depth from: {}", path);
            let values = read_depth(path, counts.cell_ids())?;
            Some(if args.log_depth {
                DepthInput::Log(values)
            } else {
                DepthInput::Linear(values)
            })
        }
        None => None,
    };

    let result = normalize(&counts, depth.as_ref(), &params)?;
    print!("{}", result.summary());

    info!("Writing normalized values to: {}", args.output);
    write_normalized(&args.output, &result.matrix)?;

    if let Some(path) = &args.diagnostics {
        info!("Writing diagnostics to: {}", path);
        write_diagnostics(path, &result.diagnostics)?;
    }

    info!("Done!");
    Ok(())
}

fn run_depth(counts_path: &str, output_path: &str) -> Result<()> {
    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_matrix(counts_path)?;
    info!("  {} genes, {} cells", counts.n_genes(), counts.n_cells());

    let depth = estimate_depth(&counts)?;

    info!("Writing depth to: {}", output_path);
    write_depth(output_path, counts.cell_ids(), &depth)?;

    info!("Done!");
    Ok(())
}
