//! Argument parsing and command dispatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pressline_config::{DEFAULT_INBOUND_PATH, DEFAULT_REPLY_DIR};
use pressline_protocol::{CompletionNotice, Request, Transformation};

use crate::client::{ClientContext, CliError, CliResult, submit};
use crate::output::render_notice;

/// Parses arguments, runs the command, and returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let ctx = ClientContext {
        inbound_path: cli.inbound,
        reply_dir: cli.reply_dir,
        timeout: cli.timeout.map(Duration::from_secs),
    };
    let sender = current_sender()?;
    let request = match cli.command {
        Command::ProcFile(args) => build_process_request(sender, &args)?,
        Command::Status => Request::status(sender),
    };

    match submit(&ctx, &request).await? {
        CompletionNotice::Failed { reason } => {
            Err(CliError::failure(anyhow!("pipeline failed: {reason}")))
        }
        notice => render_notice(&notice, cli.output),
    }
}

#[derive(Parser)]
#[command(name = "pressline", about = "Submit file pipelines to a pressline server")]
pub(crate) struct Cli {
    #[arg(long, global = true, env = "PRESSLINE_INBOUND_PATH", default_value = DEFAULT_INBOUND_PATH)]
    inbound: PathBuf,
    #[arg(long, global = true, env = "PRESSLINE_REPLY_DIR", default_value = DEFAULT_REPLY_DIR)]
    reply_dir: PathBuf,
    #[arg(
        long,
        global = true,
        env = "PRESSLINE_TIMEOUT_SECS",
        help = "Give up waiting for the reply after this many seconds"
    )]
    timeout: Option<u64>,
    #[arg(
        id = "output_format",
        long = "output",
        value_name = "OUTPUT",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Select how the completion notice is printed"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the input file through the listed transformations into the output file.
    ProcFile(ProcFileArgs),
    /// Show running pipelines and capacity usage.
    Status,
}

#[derive(Args)]
struct ProcFileArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(required = true, num_args = 1.., value_parser = parse_transformation)]
    transformations: Vec<Transformation>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn parse_transformation(input: &str) -> Result<Transformation, String> {
    input.parse::<Transformation>().map_err(|_| {
        let known: Vec<&str> = Transformation::ALL.iter().map(|t| t.name()).collect();
        format!(
            "unknown transformation '{input}' (expected one of: {})",
            known.join(", ")
        )
    })
}

fn current_sender() -> CliResult<i32> {
    i32::try_from(std::process::id())
        .map_err(|_| CliError::failure(anyhow!("process id does not fit the wire format")))
}

/// The server resolves paths against its own working directory.
fn build_process_request(sender: i32, args: &ProcFileArgs) -> CliResult<Request> {
    let input = absolute(&args.input)?;
    let output = absolute(&args.output)?;
    if input == output {
        return Err(CliError::validation(
            "input and output must be different files",
        ));
    }
    Ok(Request::process_file(
        sender,
        input,
        output,
        &args.transformations,
    ))
}

fn absolute(path: &Path) -> CliResult<PathBuf> {
    std::path::absolute(path).map_err(|err| {
        CliError::validation(format!("cannot resolve path {}: {err}", path.display()))
    })
}
