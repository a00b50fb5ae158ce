use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "ata: chunked, compressed, optionally encrypted archives", long_about = None)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG wins when unset.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON file with default options; command-line flags override it
    #[arg(long, global = true, env = "ATA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    Zstd,
    None,
}

/// Flags shared by commands that read chunk data.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Accept an archive whose creation was interrupted (finished entries only)
    #[arg(long)]
    pub allow_incomplete: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an archive from files and directories
    Create {
        archive: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short = 'c', long, value_enum)]
        compression: Option<Compression>,

        /// zstd level
        #[arg(short = 'l', long, value_parser = clap::value_parser!(i32).range(1..=19))]
        level: Option<i32>,

        /// Plaintext bytes per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Worker threads (0 = one per CPU)
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<usize>,

        /// Encrypt with a passphrase (ATA_PASSPHRASE or prompt)
        #[arg(long)]
        encrypt: bool,

        /// Zero timestamps for reproducible output
        #[arg(long)]
        deterministic: bool,
    },

    /// List archive contents (no passphrase needed)
    List {
        archive: PathBuf,

        /// kind, mode, size, stored bytes, mtime and chunk count
        #[arg(long)]
        long: bool,

        #[arg(long, conflicts_with = "long")]
        json: bool,
    },

    /// Extract entries into a directory
    Extract {
        archive: PathBuf,

        /// Only these entries (a directory selects its subtree)
        paths: Vec<String>,

        #[arg(short = 'C', long = "directory", default_value = ".")]
        dest: PathBuf,

        /// Verify everything first and write nothing if any entry fails
        #[arg(long)]
        all_or_nothing: bool,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Verify every entry without writing anything
    Verify {
        archive: PathBuf,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Write one file entry to stdout
    Cat {
        archive: PathBuf,
        path: String,

        #[arg(long)]
        allow_incomplete: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn extract_flags_parse() {
        let cli = Cli::try_parse_from([
            "ata", "-vv", "extract", "a.ata", "-C", "out", "docs", "--all-or-nothing", "-j", "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Extract {
                paths,
                dest,
                all_or_nothing,
                read,
                ..
            } => {
                assert_eq!(paths, ["docs"]);
                assert_eq!(dest, PathBuf::from("out"));
                assert!(all_or_nothing);
                assert_eq!(read.jobs, Some(3));
                assert!(!read.allow_incomplete);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn level_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["ata", "create", "a.ata", "x", "-l", "30"]).is_err());
        assert!(Cli::try_parse_from(["ata", "create", "a.ata"]).is_err());
    }
}
