use clap::{Parser, Subcommand};
use csd_migrate::types::DEFAULT_CACHE_FILE;
use csd_migrate::MigrateConfig;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "csd-migrate")]
#[command(about = "Migrate Cocos Studio CSD scenes and resources to Cocos Creator assets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress progress output (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert scenes and copy the resources they use
    Convert {
        /// Cocos Studio project root
        input: PathBuf,

        /// Output root for generated assets
        #[arg(short, long)]
        output: PathBuf,

        /// Convert only this CSD file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Copy every discovered resource, used or not
        #[arg(long)]
        copy_all: bool,

        /// Ignore the persisted identity cache
        #[arg(long)]
        no_read_cache: bool,

        /// Do not persist the identity cache
        #[arg(long)]
        no_write_cache: bool,

        /// Cache descriptor path [default: <output>/input_resources.json]
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Not-found report path [default: <output>/not_found_resources.txt]
        #[arg(long)]
        report: Option<PathBuf>,

        /// Additional directory name accepted as a trusted root (repeatable)
        #[arg(long = "trusted-root")]
        trusted_roots: Vec<String>,
    },
    /// Re-key a cache descriptor against the current input tree
    Refresh {
        /// Existing cache descriptor
        descriptor: PathBuf,

        /// Cocos Studio project root
        input: PathBuf,

        /// Where to write the refreshed descriptor [default: in place]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Additional directory name accepted as a trusted root (repeatable)
        #[arg(long = "trusted-root")]
        trusted_roots: Vec<String>,
    },
    /// Rebuild a cache descriptor from the metas of a migrated output tree
    Reverse {
        /// Output root of an earlier conversion
        output_root: PathBuf,

        /// Where to write the descriptor [default: <output_root>/input_resources.json]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Additional directory name accepted as a trusted root (repeatable)
        #[arg(long = "trusted-root")]
        trusted_roots: Vec<String>,
    },
    /// Merge two cache descriptors; entries of the newer one win
    Merge {
        /// Descriptor whose entries take precedence
        newer: PathBuf,

        /// Descriptor providing the remaining entries
        older: PathBuf,

        /// Merged descriptor path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging (suppressed if --quiet)
    if !cli.quiet {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            file,
            copy_all,
            no_read_cache,
            no_write_cache,
            cache,
            report,
            trusted_roots,
        } => {
            let config = MigrateConfig {
                single_file: file,
                copy_all,
                read_cache: !no_read_cache,
                write_cache: !no_write_cache,
                cache_path: cache,
                report_path: report,
                extra_trusted_roots: trusted_roots,
                ..MigrateConfig::new(input, output)
            };
            csd_migrate::migrate(config).map(|stats| {
                if !cli.quiet {
                    eprintln!(
                        "Done: {} converted, {} failed, {} skipped, {} not found",
                        stats.success, stats.errors, stats.skipped, stats.not_found
                    );
                    eprintln!(
                        "  {} resources copied, {} copy failures",
                        stats.copied, stats.copy_errors
                    );
                    for failure in &stats.failures {
                        eprintln!("  {}: {}", failure.file.display(), failure.message);
                    }
                }
            })
        }
        Commands::Refresh {
            descriptor,
            input,
            output,
            trusted_roots,
        } => csd_migrate::session::refresh_descriptor(
            &descriptor,
            &input,
            output.as_deref(),
            &trusted_roots,
        )
        .map(|report| {
            if !cli.quiet {
                eprintln!(
                    "Refreshed: {} kept, {} re-keyed, {} dropped",
                    report.kept,
                    report.rekeyed,
                    report.dropped.len()
                );
            }
        }),
        Commands::Reverse {
            output_root,
            output,
            trusted_roots,
        } => {
            let dest = output.unwrap_or_else(|| output_root.join(DEFAULT_CACHE_FILE));
            csd_migrate::session::reverse_descriptor(&output_root, &dest, &trusted_roots).map(
                |descriptor| {
                    if !cli.quiet {
                        eprintln!(
                            "Recovered: {} cached entries -> {}",
                            descriptor.cached_entries(),
                            dest.display()
                        );
                    }
                },
            )
        }
        Commands::Merge {
            newer,
            older,
            output,
        } => csd_migrate::session::merge_descriptor_files(&newer, &older, &output).map(|merged| {
            if !cli.quiet {
                eprintln!(
                    "Merged: {} cached entries -> {}",
                    merged.cached_entries(),
                    output.display()
                );
            }
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
