mod cli;
mod commands;
mod config;
mod manifest;
mod paths;
mod sandbox;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, UserCommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config.clone(),
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<apikey::Error>() {
                Some(api_err) if err.chain().count() == 1 => ui::report(api_err),
                Some(api_err) => {
                    ui::error(&format!("{err:#}"));
                    let category = api_err.category();
                    ui::dim(&format!("{}: {}", category.description(), category.advice()));
                }
                None => ui::error(&format!("{err:#}")),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    log::debug!("verbosity {} (quiet: {})", ctx.verbose, ctx.quiet);

    match command {
        Command::Plan(args) => commands::keys::plan(ctx, &args),
        Command::Apply(args) => commands::keys::apply(ctx, &args),
        Command::Refresh => commands::keys::refresh(ctx),
        Command::Import { slot, id, force } => commands::keys::import(ctx, &slot, &id, force),
        Command::Destroy { slot, yes } => commands::keys::destroy(ctx, &slot, yes),
        Command::List(args) => commands::list::run(ctx, &args),
        Command::Show => commands::keys::show(ctx),
        Command::User(cmd) => match cmd {
            UserCommand::Add { id } => commands::user::add(ctx, &id),
            UserCommand::List => commands::user::list(ctx),
        },
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "keyward", &mut io::stdout());
            Ok(())
        }
    }
}
