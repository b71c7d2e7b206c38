//! CLI wrapper around the `debugedit` library: flag parsing, logging setup,
//! and top-level error reporting. All rewrite logic lives in `lib.rs`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

/// Rewrite embedded source-file paths and the build-ID note of an ELF
/// object in place.
#[derive(Debug, Parser)]
#[command(name = "debugedit", version, about, long_about = None)]
struct Cli {
    /// Source-tree prefix to strip from embedded paths.
    #[arg(short = 'b', long = "base-dir", value_name = "DIR")]
    base_dir: Option<String>,

    /// Replacement prefix substituted for `--base-dir`.
    #[arg(short = 'd', long = "dest-dir", value_name = "DIR")]
    dest_dir: Option<String>,

    /// Append every discovered source path to FILE, NUL-terminated.
    #[arg(short = 'l', long = "list-file", value_name = "FILE")]
    list_file: Option<PathBuf>,

    /// Recompute the `NT_GNU_BUILD_ID` note and print it.
    #[arg(short = 'i', long = "build-id")]
    build_id: bool,

    /// Extra seed material folded into the build-ID hash.
    #[arg(long = "build-id-seed", value_name = "STRING")]
    build_id_seed: Option<String>,

    /// Print the existing build-ID without recomputing it.
    #[arg(long = "no-recompute-build-id")]
    no_recompute_build_id: bool,

    /// Restore the file's mtime, atime, and permissions afterward.
    #[arg(short = 'p', long = "preserve-dates")]
    preserve_dates: bool,

    /// The ELF object to rewrite in place.
    input: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = debugedit::Config {
        base_dir: cli.base_dir,
        dest_dir: cli.dest_dir,
        list_file: cli.list_file,
        build_id: cli.build_id || cli.no_recompute_build_id,
        build_id_seed: cli.build_id_seed,
        no_recompute_build_id: cli.no_recompute_build_id,
        preserve_dates: cli.preserve_dates,
    };

    let build_id = debugedit::run(&cli.input, &config)
        .with_context(|| format!("rewriting {}", cli.input.display()))?;

    if let Some(hex) = build_id {
        println!("{hex}");
    }

    Ok(())
}
