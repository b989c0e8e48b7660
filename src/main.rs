use clap::Parser;

use dockerbox::cli::args::{Cli, Commands};
use dockerbox::cli::commands;
use dockerbox::config::loader::load_config;
use dockerbox::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global_opts.verbose);

    let config = load_config(cli.global_opts.config.as_deref())?;
    let format = cli.global_opts.format.clone();

    match cli.command {
        Commands::Run(args) => {
            let code = commands::run(args, config, format).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Ping => commands::ping(config, format).await?,
        Commands::Init(args) => commands::init(args).await?,
        Commands::Config(args) => commands::config(args, config).await?,
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
