use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use shipwright::cli::{Cli, Commands};
use shipwright::commands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file;

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(config_file.as_deref(), args).await,
        Commands::Doctor => commands::doctor::run(config_file.as_deref()).await,
        Commands::Version => {
            println!("shipwright {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "shipwright", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
