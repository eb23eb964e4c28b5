use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use enrollment_workflow::error::AppError;
use enrollment_workflow::workflows::enrollment::{
    PredicateRegistry, StateMachine, TransitionRuleTable,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Enrollment Workflow Engine",
    about = "Run and inspect the enrollment review workflow engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Validate a transition rule table and print it as JSON
    Rules(RulesArgs),
    /// Drive a cohort of synthetic applications through the engine
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Load the transition rule table from a JSON file
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RulesArgs {
    /// Rule table to validate; the standard enrollment table when omitted
    #[arg(long)]
    pub(crate) path: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rules(args) => print_rules(args),
        Command::Demo(args) => run_demo(args).await,
    }
}

fn print_rules(args: RulesArgs) -> Result<(), AppError> {
    let table = match args.path {
        Some(path) => TransitionRuleTable::from_path(path)?,
        None => TransitionRuleTable::standard(),
    };
    let rendered = table.to_json_pretty()?;
    // Building the machine resolves every predicate the table names.
    StateMachine::new(table, PredicateRegistry::with_builtins())?;
    println!("{rendered}");
    Ok(())
}
