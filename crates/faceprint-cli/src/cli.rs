use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "faceprint",
    about = "Enroll faces through a guided pose sequence and recognize them later",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Walk the pose sequence for a user using captured feature payloads
    Enroll(EnrollArgs),
    /// Match a probe against enrolled identities or an external candidate set
    Recognize(RecognizeArgs),
    /// Inspect or delete enrolled identities
    #[command(subcommand)]
    Identities(IdentitiesCommands),
    /// Generate an AES-256 key file for encrypting the embedding store
    Keygen(KeygenArgs),
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Identity to enroll
    pub user: String,

    /// Feature payload per capture attempt, consumed in pose order
    #[arg(long = "capture", value_name = "FILE", required = true)]
    pub captures: Vec<PathBuf>,

    /// Override the pose sequence (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub poses: Option<Vec<String>>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RecognizeArgs {
    /// Feature payload extracted from the probe image
    #[arg(long, value_name = "FILE")]
    pub probe: PathBuf,

    /// JSON candidate list (`[{"name", "embedding"}]`) used instead of the store
    #[arg(long, value_name = "FILE")]
    pub candidates: Option<PathBuf>,

    /// Minimum similarity accepted as a match (inclusive)
    #[arg(long)]
    pub threshold: Option<f64>,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum IdentitiesCommands {
    /// List enrolled identity names
    List(StoreArgs),
    /// Show the poses and embedding ids stored for an identity
    Show(IdentityArgs),
    /// Delete the stored record for an identity
    Remove(IdentityArgs),
}

#[derive(Debug, Clone, Args)]
pub struct IdentityArgs {
    pub name: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Embedding store directory (overrides FACEPRINT_STORE_DIR and config)
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Base64 AES-256 key file used to encrypt the store (overrides config)
    #[arg(long, value_name = "FILE")]
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct KeygenArgs {
    /// Destination of the generated key file
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,

    /// Replace an existing key file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}
