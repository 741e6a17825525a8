//! Reply channel handling, request submission, and CLI errors.

use std::fmt::{self, Display, Formatter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use pressline_protocol::{CompletionNotice, Request, RequestKind, encode, reply_channel_path};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::signal::unix::{SignalKind, signal};
use tracing::debug;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Where to reach the server and how long to wait for it.
#[derive(Debug, Clone)]
pub(crate) struct ClientContext {
    pub(crate) inbound_path: PathBuf,
    pub(crate) reply_dir: PathBuf,
    pub(crate) timeout: Option<Duration>,
}

/// The client's private reply FIFO; removed when dropped.
struct ReplyChannel {
    path: PathBuf,
    reader: BufReader<pipe::Receiver>,
}

impl ReplyChannel {
    /// Create the FIFO and hold it open read-write so the server's
    /// non-blocking open always finds a reader.
    fn create(reply_dir: &Path, sender: i32) -> CliResult<Self> {
        let path = reply_channel_path(reply_dir, sender);
        match mkfifo(&path, Mode::from_bits_truncate(0o600)) {
            Ok(()) => {}
            Err(Errno::EEXIST) => {
                return Err(CliError::failure(anyhow!(
                    "reply channel {} already exists",
                    path.display()
                )));
            }
            Err(errno) => {
                return Err(CliError::failure(anyhow!(
                    "failed to create reply channel {}: {errno}",
                    path.display()
                )));
            }
        }
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)
            .map_err(|err| {
                let _ = std::fs::remove_file(&path);
                CliError::failure(anyhow!(
                    "failed to open reply channel {}: {err}",
                    path.display()
                ))
            })?;
        Ok(Self {
            path,
            reader: BufReader::new(receiver),
        })
    }

    async fn read_notice(&mut self, kind: RequestKind) -> CliResult<CompletionNotice> {
        let first = self.read_line().await?;
        if kind == RequestKind::ProcessFile {
            return CompletionNotice::parse(&first)
                .map_err(|err| CliError::failure(anyhow!("unreadable reply: {err}")));
        }
        let mut report = first;
        loop {
            let line = self.read_line().await?;
            if line == "\n" {
                break;
            }
            report.push_str(&line);
        }
        Ok(CompletionNotice::Status {
            report: report.trim_end_matches('\n').to_string(),
        })
    }

    async fn read_line(&mut self) -> CliResult<String> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|err| CliError::failure(anyhow!("failed to read reply: {err}")))?;
        if read == 0 {
            return Err(CliError::failure(anyhow!("reply channel closed")));
        }
        Ok(line)
    }
}

impl Drop for ReplyChannel {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "failed to remove reply channel");
        }
    }
}

/// Send `request` and wait for the server's notice.
pub(crate) async fn submit(ctx: &ClientContext, request: &Request) -> CliResult<CompletionNotice> {
    let mut reply = ReplyChannel::create(&ctx.reply_dir, request.sender)?;
    let mut wakeups = signal(SignalKind::user_defined1())
        .map_err(|err| CliError::failure(anyhow!("failed to install signal handler: {err}")))?;

    send_request(&ctx.inbound_path, request).await?;

    let wait = async {
        let read = reply.read_notice(request.kind);
        tokio::pin!(read);
        loop {
            tokio::select! {
                notice = &mut read => return notice,
                Some(()) = wakeups.recv() => debug!("wake-up signal received"),
            }
        }
    };
    match ctx.timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            CliError::failure(anyhow!("no reply within {} seconds", limit.as_secs()))
        })?,
        None => wait.await,
    }
}

/// Write one encoded request into the inbound channel.
///
/// Blocks until the server opens the channel for reading.
async fn send_request(inbound: &Path, request: &Request) -> CliResult<()> {
    if !inbound.exists() {
        return Err(CliError::failure(anyhow!(
            "no server is listening at {}",
            inbound.display()
        )));
    }
    let bytes = encode(request)
        .map_err(|err| CliError::validation(format!("request cannot be encoded: {err}")))?;
    let path = inbound.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut writer = std::fs::OpenOptions::new().write(true).open(path)?;
        writer.write_all(&bytes)
    })
    .await
    .map_err(|err| CliError::failure(anyhow!("request writer stopped: {err}")))?
    .map_err(|err| {
        CliError::failure(anyhow!(
            "failed to send request to {}: {err}",
            inbound.display()
        ))
    })
}
