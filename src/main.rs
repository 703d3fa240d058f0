use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use plat::cli::{self, Cli, CommandError, CommandResult, Commands, ConfigCommand, ServiceAction};
use plat::orchestrator::{Orchestrator, OrchestratorConfig};
use plat::tools::SystemExecutor;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Dropping the command future on Ctrl+C kills any running tool
    let code = tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                1
            }
        },
        _ = interrupted() => {
            warn!("Interrupted");
            130
        }
    };

    process::exit(code);
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn confirm(prompt: &str) -> CommandResult<bool> {
    if cli::auto_confirm() {
        return Ok(true);
    }

    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(cli::is_affirmative(&answer))
}

async fn run(cli: Cli) -> CommandResult<i32> {
    let executor = Arc::new(SystemExecutor::new());
    let orchestrator = Orchestrator::with_executor(executor.clone(), OrchestratorConfig::default());
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Up(args) => {
            let env = cli::load(config, cli.mode)?;
            let access = cli::up(&orchestrator, &env, &args).await?;
            print!("{}", cli::format_access_info(&access));
        }

        Commands::Down(args) => {
            let env = cli::load(config, cli.mode)?;
            if !args.yes && !confirm(&cli::down_prompt(&env, args.cluster)).await? {
                return Err(CommandError::Aborted);
            }
            let summary = cli::down(&orchestrator, &env, args.cluster).await?;
            print!("{}", cli::format_down_summary(&summary));
        }

        Commands::Status(args) => {
            let env = cli::load(config, cli.mode)?;
            let status = cli::status(&orchestrator, &env).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", cli::format_status(&status, args.detailed));
            }
        }

        Commands::Logs(args) => {
            let env = cli::load(config, cli.mode)?;
            let mut stdout = tokio::io::stdout();
            cli::logs(executor.as_ref(), &env, &args, &mut stdout).await?;
        }

        Commands::Doctor => {
            let checks = cli::doctor(executor.as_ref()).await;
            print!("{}", cli::format_doctor(&checks));
            if !cli::doctor_passed(&checks) {
                return Ok(1);
            }
            match orchestrator.clusters().list_clusters().await {
                Ok(clusters) => print!("\n{}", cli::format_cluster_list(&clusters)),
                Err(e) => warn!("Could not list clusters: {}", e),
            }
        }

        Commands::Validate(args) => {
            let result = cli::validate(config, cli.mode, args.strict).await;
            let path = config
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "configuration".to_string());
            print!("{}", cli::format_validation_result(&result, &path));
            if !result.valid {
                return Ok(1);
            }
        }

        Commands::Start(args) => {
            let env = cli::load(config, cli.mode)?;
            cli::service_action(&orchestrator, &env, &args.service, ServiceAction::Start).await?;
            info!("Started {}", args.service);
            println!("✓ {} started", args.service);
        }

        Commands::Stop(args) => {
            let env = cli::load(config, cli.mode)?;
            cli::service_action(&orchestrator, &env, &args.service, ServiceAction::Stop).await?;
            println!("✓ {} stopped", args.service);
        }

        Commands::Restart(args) => {
            let env = cli::load(config, cli.mode)?;
            cli::service_action(&orchestrator, &env, &args.service, ServiceAction::Restart).await?;
            println!("✓ {} restarted", args.service);
        }

        Commands::Init(args) => {
            let report = cli::init(Path::new("."), &args)?;
            print!("{}", cli::format_init_report(&report));
        }

        Commands::Config(ConfigCommand::Show) => {
            let env = cli::load(config, cli.mode)?;
            print!("{}", cli::format_environment(&env));
        }

        Commands::Config(ConfigCommand::Example) => {
            print!("{}", cli::format_example(&cli::example_files()?));
        }
    }

    Ok(0)
}
