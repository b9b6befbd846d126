//! jml - Command-line runner for the identity lifecycle decision engine
//!
//! This CLI enables administrators to:
//! - Evaluate a scenario of attribute changes through the full pipeline
//! - Validate trigger rules, sources and policies before deploying them
//! - Inspect the effective engine configuration

use clap::{Parser, Subcommand};
use jml_cli::commands::{self, ConfigArgs, EvaluateArgs, ValidateArgs};
use jml_cli::logging::{self, LogFormat};
use jml_cli::CliResult;
use jml_engine::EngineConfig;

/// jml - Joiner/mover/leaver decision engine
#[derive(Parser)]
#[command(name = "jml")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, env = "JML_LOG", default_value = "warn,jml_engine=info")]
    log: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file through the engine and print the result
    Evaluate(EvaluateArgs),

    /// Check rules, sources and policies in a scenario file
    ValidateRules(ValidateArgs),

    /// Print the effective engine configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&cli.log, cli.log_format) {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            std::process::exit(0);
        }
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<String> {
    let config = EngineConfig::from_env()?;
    match cli.command {
        Commands::Evaluate(args) => commands::evaluate(args, config).await,
        Commands::ValidateRules(args) => commands::validate_rules(args),
        Commands::Config(args) => commands::show_config(&args, &config),
    }
}
