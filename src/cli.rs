use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "shipwright",
    version,
    about = "Build, run and proxy ephemeral user projects"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true, env = "SHIPWRIGHT_CONFIG")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the deployment API server
    Serve(ServeArgs),
    /// Check which external toolchains are installed
    Doctor,
    /// Print version information
    Version,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::aot::Shell,
    },
}

#[derive(Debug, Args, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL handed back in project and download links
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_url: Option<String>,
}
