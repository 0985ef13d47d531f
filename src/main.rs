use clap::Parser;
use std::error::Error;
use tokengate::cli::{
    handle_completions, handle_config_init, policy, usage, Cli, Commands, ConfigCommands,
    PolicyCommands,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result: Result<(), Box<dyn Error>> = match cli.command {
        Commands::Serve(args) => tokengate::cli::serve::run_serve(args).await,
        Commands::Policy(cmd) => match cmd {
            PolicyCommands::Check(args) => policy::handle_policy_check(&args)
                .map(|output| println!("{}", output))
                .map_err(Into::into),
        },
        Commands::Usage(args) => usage::handle_usage(&args)
            .await
            .map(|output| println!("{}", output))
            .map_err(Into::into),
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init(args) => handle_config_init(&args),
        },
        Commands::Completions(args) => {
            handle_completions(&args);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}
