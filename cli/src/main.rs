//! `shuttle-cli` binary: drive the graph execution runtime from subcommands
//! (`run`, `cancel`, `fork`, `list`, `watch`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cli::{run, Backend, CliError};

#[derive(Parser, Debug)]
#[command(name = "shuttle-cli")]
#[command(about = "Drive the shuttle graph execution runtime from the command line")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// App name used to resolve `$XDG_CONFIG_HOME/<name>/config.toml`.
    #[arg(long, default_value = "shuttle")]
    app_name: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new Run from a graph definition file and print its events.
    Run {
        /// Path to a JSON `GraphDefinition`.
        graph: PathBuf,
        /// JSON value for `globalInput` (a raw string is wrapped as a JSON string).
        #[arg(long)]
        input: Option<String>,
    },
    /// Cancel a Run that is in flight in this same process.
    Cancel {
        run_id: String,
    },
    /// Re-execute from a parent Run's Step, against a new Run.
    Fork {
        parent_run_id: String,
        from_step_id: String,
        /// Path to the JSON `GraphDefinition` (usually the same file `run` used).
        graph: PathBuf,
        /// Overrides `globalInput` for the forked Run; defaults to the parent Step's input.
        #[arg(long)]
        input: Option<String>,
    },
    /// List every persisted Run.
    List,
    /// Replay a Run's persisted Event log.
    Watch {
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::logging::init();
    let args = Args::parse();

    let cfg = config::load(&args.app_name, None)?;
    let backend = Backend::build(&cfg)?;

    let result: Result<(), CliError> = match args.cmd {
        Command::Run { graph, input } => {
            let graph = run::load_graph(&graph)?;
            let input = run::parse_input(input.as_deref())?;
            run::run_cmd(&backend, &graph, input).await
        }
        Command::Cancel { run_id } => run::cancel_cmd(&backend, &run_id),
        Command::Fork {
            parent_run_id,
            from_step_id,
            graph,
            input,
        } => {
            let graph = run::load_graph(&graph)?;
            let input = match input {
                Some(s) => Some(run::parse_input(Some(&s))?),
                None => None,
            };
            run::fork_cmd(&backend, &parent_run_id, &from_step_id, &graph, input).await
        }
        Command::List => run::list_cmd(&backend).await,
        Command::Watch { run_id } => run::watch_cmd(&backend, &run_id).await,
    };

    if let Err(e) = result {
        eprintln!("shuttle-cli: {e}");
        std::process::exit(1);
    }
    Ok(())
}
