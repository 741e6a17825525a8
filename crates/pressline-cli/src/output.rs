//! Renderers for completion notices.

use anyhow::anyhow;
use pressline_protocol::CompletionNotice;
use serde_json::{Value, json};

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn render_notice(notice: &CompletionNotice, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Text => println!("{notice}"),
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(&notice_json(notice))
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
    }
    Ok(())
}

fn notice_json(notice: &CompletionNotice) -> Value {
    match notice {
        CompletionNotice::Done {
            bytes_input,
            bytes_output,
        } => json!({
            "outcome": "done",
            "bytes_input": bytes_input,
            "bytes_output": bytes_output,
        }),
        CompletionNotice::Failed { reason } => json!({
            "outcome": "failed",
            "reason": reason,
        }),
        CompletionNotice::Status { report } => json!({
            "outcome": "status",
            "lines": report.lines().collect::<Vec<_>>(),
        }),
    }
}
