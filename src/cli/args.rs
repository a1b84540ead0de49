//! Command-line argument parsing

use crate::config::{DEFAULT_NETWORK, DEFAULT_WORKERS};
use crate::upload::DEFAULT_CHUNK_SIZE;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

pub const PASSWORD_ENV: &str = "OVA_PUSHER_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "ova-pusher")]
#[command(about = "Upload OVA appliances to ESXi datastores with resumable, retrying chunked transfers")]
#[command(version)]
pub struct Args {
    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write detailed logs to this file (always at debug level)
    #[arg(long = "log", global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload an OVA file to an ESXi host
    Upload(UploadArgs),

    /// List resumable upload sessions in the current directory
    ListSessions,

    /// Resume an interrupted upload session
    Resume(ResumeArgs),

    /// Delete all upload session files in the current directory
    CleanSessions {
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ConnectionArgs {
    /// ESXi username
    #[arg(long, short = 'u', default_value = "root")]
    pub username: String,

    /// ESXi password (prompted for if not provided)
    #[arg(long, short = 'p', env = PASSWORD_ENV, hide_env_values = true)]
    pub password: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub insecure: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TransferArgs {
    /// Upload chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Maximum attempts per disk (0 retries forever)
    #[arg(long, default_value_t = 0)]
    pub max_retries: u32,

    /// Base delay between retries, in seconds
    #[arg(long, default_value_t = 2.0)]
    pub base_delay: f64,

    /// Maximum delay between retries, in seconds
    #[arg(long, default_value_t = 120.0)]
    pub max_delay: f64,

    /// Stream disks directly out of the OVA instead of extracting them first
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub stream: bool,

    /// Number of parallel upload workers per disk (1-10)
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Verify manifest checksums before uploading
    #[arg(long)]
    pub verify_checksums: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct UploadArgs {
    /// Path to the OVA file
    pub ova: PathBuf,

    /// ESXi host name or address
    pub host: String,

    /// Target datastore name
    #[arg(long, short = 'd')]
    pub datastore: String,

    /// Virtual machine name (defaults to the OVA file name)
    #[arg(long = "vm-name", short = 'n')]
    pub vm_name: Option<String>,

    /// Network name for the VM
    #[arg(long, default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Resume from a previous upload session
    #[arg(long)]
    pub resume: bool,

    /// Specific session ID to resume
    #[arg(long = "session-id", requires = "resume")]
    pub session_id: Option<String>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ResumeArgs {
    /// Specific session ID to resume (defaults to the most recent)
    #[arg(long = "session-id")]
    pub session_id: Option<String>,

    /// Network name for the VM
    #[arg(long, default_value = DEFAULT_NETWORK)]
    pub network: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub transfer: TransferArgs,
}
