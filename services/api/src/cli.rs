use crate::demo::{run_demo, DemoArgs};
use crate::server;
use case_assignment::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Case Assignment Service",
    about = "Route debt-collection cases to mediators from the command line or over HTTP",
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
    /// Run an assignment batch against seeded demo data and print the outcome
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
    use case_assignment::workflows::assignment::StrategyKind;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["case-assignment-api"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["case-assignment-api", "serve", "--port", "8080"])
            .expect("parse");
        match cli.command {
            Some(Command::Serve(args)) => assert_eq!(args.port, Some(8080)),
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn demo_strategy_is_validated() {
        let cli = Cli::try_parse_from(["case-assignment-api", "demo", "--strategy", "random"])
            .expect("parse");
        match cli.command {
            Some(Command::Demo(args)) => assert_eq!(args.strategy, StrategyKind::Random),
            other => panic!("expected demo, got {other:?}"),
        }

        assert!(Cli::try_parse_from(["case-assignment-api", "demo", "--strategy", "fifo"]).is_err());
    }
}
