use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modelcast")]
#[command(
    author,
    version,
    about = "Publish model artifacts and follow the current one"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "modelcast.yaml")]
    pub config: String,

    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish an artifact file as a new version
    Publish {
        /// Serialized model to publish
        file: PathBuf,

        /// Publish under this id instead of a generated one
        #[arg(long)]
        version_id: Option<String>,
    },

    /// Initialize the store from a pre-existing artifact
    Seed {
        /// Serialized model to publish
        file: PathBuf,

        /// Version id of the seed artifact
        #[arg(long, default_value = "v0")]
        version_id: String,
    },

    /// Follow the current model until interrupted
    Watch {
        /// Serve /live, /ready and /metrics on this address
        #[arg(long)]
        health_listen: Option<String>,

        /// Write each activated payload to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the record behind the current pointer
    Current,

    /// Show the record stored for one version
    Show {
        /// Version id to look up
        version_id: String,
    },

    /// Print the effective configuration as YAML
    PrintConfig,
}
