use clap::{Parser, Subcommand, ValueEnum};

const CMD_NAME: &str = "sc";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Write results to this file instead of stdout
    #[arg(short, long, value_name = "FILE", global = true)]
    pub output: Option<String>,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Dry run; print info but don't modify anything.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stage a task's inputs; print the container mounts it needs, if any
    Stage(StageArgs),
    /// Describe files and directories as JSON
    List(ListArgs),
    /// Collect a task's declared outputs from its work dir
    Collect(CollectArgs),
}

#[derive(clap::Args)]
pub struct StageArgs {
    /// Staging request (JSON)
    #[arg(value_name = "REQUEST")]
    pub request: String,

    /// Mount or link writable inputs in place instead of copying them
    #[arg(short, long)]
    pub inplace_update: bool,

    /// Where to put content that lives outside the container work dir
    #[arg(short, long, value_name = "DIR")]
    #[arg(env = "STAGECOACH_STAGING_DIR")]
    pub staging_dir: Option<String>,

    /// Download command for remote sources, e.g. 'curl -fsSL -o {dest} {url}'
    #[arg(short, long, value_name = "CMD")]
    #[arg(env = "STAGECOACH_FETCH_CMD")]
    pub fetch_cmd: Option<String>,

    /// Print a JSON report instead of mount args
    #[arg(short, long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// Files or directories to describe
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// How far to descend into directories
    #[arg(short, long, value_enum, default_value_t = Depth::Deep)]
    pub depth: Depth,

    /// Include a checksum for every file
    #[arg(short, long)]
    pub checksums: bool,
}

#[derive(clap::Args)]
pub struct CollectArgs {
    /// Task work dir
    #[arg(value_name = "DIR")]
    pub work_dir: String,

    /// Output bindings (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub bindings: String,

    /// Skip file checksums
    #[arg(short = 'C', long)]
    pub no_checksums: bool,
}

/// How much of a directory to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Depth {
    None,
    Shallow,
    Deep,
}
