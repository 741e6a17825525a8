//! Best-effort delivery of completion notices.
//!
//! Writing the reply and signalling the client are independent steps. Each
//! failure is logged and counted; neither is retried or rolled back.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use pressline_protocol::{CompletionNotice, reply_channel_path};
use pressline_telemetry::Metrics;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tracing::{debug, warn};

use crate::error::{NotifyError, NotifyResult};

/// Longest a stalled reader may hold up a reply write.
const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of both notification steps.
#[derive(Debug)]
pub struct NotifyReport {
    /// Outcome of writing the notice to the reply channel.
    pub reply: NotifyResult<()>,
    /// Outcome of the wake-up signal; `None` when signalling is disabled.
    pub signal: Option<NotifyResult<()>>,
}

impl NotifyReport {
    /// Whether the notice reached the reply channel.
    #[must_use]
    pub const fn delivered(&self) -> bool {
        self.reply.is_ok()
    }
}

/// Sends completion notices to client reply channels.
#[derive(Clone)]
pub struct ClientNotifier {
    reply_dir: PathBuf,
    signal_clients: bool,
    metrics: Metrics,
}

impl ClientNotifier {
    /// Notifier writing under `reply_dir`.
    #[must_use]
    pub fn new(reply_dir: impl Into<PathBuf>, signal_clients: bool, metrics: Metrics) -> Self {
        Self {
            reply_dir: reply_dir.into(),
            signal_clients,
            metrics,
        }
    }

    /// Deliver `notice` to `sender`'s reply channel, then optionally signal it.
    pub async fn notify(&self, sender: i32, notice: &CompletionNotice) -> NotifyReport {
        let reply = self.write_reply(sender, notice).await;
        if let Err(err) = &reply {
            self.metrics.inc_notify_failure("reply");
            warn!(sender, error = %err, detail = ?err, "completion notice not delivered");
        }

        let signal = self.signal_clients.then(|| signal_client(sender));
        if let Some(Err(err)) = &signal {
            self.metrics.inc_notify_failure("signal");
            warn!(sender, error = %err, detail = ?err, "client wake-up signal failed");
        }

        NotifyReport { reply, signal }
    }

    async fn write_reply(&self, sender: i32, notice: &CompletionNotice) -> NotifyResult<()> {
        let path = reply_channel_path(&self.reply_dir, sender);
        let mut channel = pipe::OpenOptions::new()
            .open_sender(&path)
            .map_err(|source| {
                if source.raw_os_error() == Some(Errno::ENXIO as i32) {
                    NotifyError::NoReader { path: path.clone() }
                } else {
                    NotifyError::Open {
                        path: path.clone(),
                        source,
                    }
                }
            })?;
        let wire = notice.to_wire();
        tokio::time::timeout(REPLY_WRITE_TIMEOUT, channel.write_all(wire.as_bytes()))
            .await
            .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut)))
            .map_err(|source| NotifyError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(sender, path = %path.display(), "completion notice written");
        Ok(())
    }
}

fn signal_client(sender: i32) -> NotifyResult<()> {
    if sender <= 0 {
        return Err(NotifyError::InvalidSender { sender });
    }
    kill(Pid::from_raw(sender), Signal::SIGUSR1)
        .map_err(|source| NotifyError::Signal { sender, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(dir: &std::path::Path, signal_clients: bool) -> ClientNotifier {
        let metrics = Metrics::new().expect("metrics registry");
        ClientNotifier::new(dir, signal_clients, metrics)
    }

    #[tokio::test]
    async fn missing_reply_channel_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let report = notifier(dir.path(), false)
            .notify(7, &CompletionNotice::Failed { reason: "x".into() })
            .await;
        assert!(!report.delivered());
        assert!(matches!(report.reply, Err(NotifyError::Open { .. })));
        assert!(report.signal.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn fifo_without_reader_is_no_reader() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = reply_channel_path(dir.path(), 8);
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(0o600))?;
        let notifier = notifier(dir.path(), false);
        let report = notifier.notify(8, &CompletionNotice::Failed { reason: "x".into() }).await;
        assert!(matches!(report.reply, Err(NotifyError::NoReader { .. })));
        assert!(notifier.metrics.render()?.contains("step=\"reply\""));
        Ok(())
    }

    #[tokio::test]
    async fn notice_reaches_a_waiting_reader() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = reply_channel_path(dir.path(), 9);
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(0o600))?;
        let mut receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)?;

        let notice = CompletionNotice::Done {
            bytes_input: 10,
            bytes_output: 12,
        };
        let report = notifier(dir.path(), false).notify(9, &notice).await;
        assert!(report.delivered());

        let mut buf = vec![0_u8; 128];
        let read = tokio::io::AsyncReadExt::read(&mut receiver, &mut buf).await?;
        let line = std::str::from_utf8(&buf[..read])?;
        assert_eq!(CompletionNotice::parse(line)?, notice);
        Ok(())
    }

    #[test]
    fn non_positive_senders_are_never_signalled() {
        assert!(matches!(
            signal_client(0),
            Err(NotifyError::InvalidSender { sender: 0 })
        ));
        assert!(matches!(
            signal_client(-1),
            Err(NotifyError::InvalidSender { sender: -1 })
        ));
    }
}
