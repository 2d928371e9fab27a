use crate::demo::{run_demo, DemoArgs};
use crate::server;
use bhxh_declarations::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "BHXH Declarations",
    about = "Submit declaration participants, bill them and reconcile confirmed payments",
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
    /// Walk through submit, split, reject and reconcile against an in-memory store
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
    /// Load the sample declarations into the in-memory store at startup
    #[arg(long)]
    pub(crate) seed: bool,
    /// Only remind about pending payments of this owner
    #[arg(long)]
    pub(crate) owner: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["bhxh-declarations-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn demo_accepts_json_flag() {
        let cli = Cli::try_parse_from(["bhxh-declarations-api", "demo", "--json"]).expect("parses");
        match cli.command {
            Some(Command::Demo(args)) => assert!(args.json),
            other => panic!("expected demo command, got {other:?}"),
        }
    }

    #[test]
    fn serve_overrides_parse() {
        let cli = Cli::try_parse_from([
            "bhxh-declarations-api",
            "serve",
            "--port",
            "8081",
            "--seed",
            "--owner",
            "agent-01",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8081));
                assert!(args.seed);
                assert_eq!(args.owner.as_deref(), Some("agent-01"));
            }
            other => panic!("expected serve command, got {other:?}"),
        }
    }
}
