// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::{InstallArgs, Session};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.global.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let session = Session::open(&cli.global)?;

    match cli.command {
        Commands::Install {
            names,
            build_from_source,
            test,
            with,
            without,
            jobs,
            dry_run,
            timeout,
        } => commands::cmd_install(
            &session,
            InstallArgs {
                names,
                build_from_source,
                test,
                with,
                without,
                jobs,
                dry_run,
                timeout,
            },
        ),

        Commands::Test { name } => commands::cmd_test(&session, &name),

        Commands::Livecheck { names, json } => commands::cmd_livecheck(&session, &names, json),

        Commands::Fetch {
            names,
            build_from_source,
        } => commands::cmd_fetch(&session, &names, build_from_source),

        Commands::Deps {
            names,
            include_test,
            with,
            without,
            json,
        } => commands::cmd_deps(&session, &names, include_test, &with, &without, json),

        Commands::List { requested } => commands::cmd_list(&session, requested),

        Commands::Uninstall {
            name,
            ignore_dependents,
        } => commands::cmd_uninstall(&session, &name, ignore_dependents),
    }
}
