pub mod config;
pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use ata_core::error::Result;
use clap::Parser;
use handlers::CreateFlags;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Create {
            archive,
            inputs,
            compression,
            level,
            chunk_size,
            jobs,
            encrypt,
            deterministic,
        } => handlers::handle_create(
            archive,
            inputs,
            CreateFlags {
                compression,
                level,
                chunk_size,
                jobs,
                encrypt,
                deterministic,
            },
            config,
        ),
        Commands::List {
            archive,
            long,
            json,
        } => handlers::handle_list(archive, long, json),
        Commands::Extract {
            archive,
            paths,
            dest,
            all_or_nothing,
            read,
        } => handlers::handle_extract(archive, paths, dest, all_or_nothing, read, config),
        Commands::Verify { archive, read } => handlers::handle_verify(archive, read, config),
        Commands::Cat {
            archive,
            path,
            allow_incomplete,
        } => handlers::handle_cat(archive, path, allow_incomplete, config),
    }
}
