//! Shared inbound FIFO that clients write requests into.
//!
//! The channel is created at startup and unlinked when the guard drops, on
//! every exit path. Each accept opens the read end and decodes requests until
//! every writer has closed, so clients that connect in the same cycle are all
//! served. Reads are unbuffered; nothing past a frame is consumed early.

use std::fs::File;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use pressline_protocol::{ProtocolError, ProtocolResult, Request, decode_from};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Outcome of one accept: the open failed, or every frame read before the
/// last writer closed, in arrival order. A wake-up yields an empty batch.
pub type Accepted = AppResult<Vec<ProtocolResult<Request>>>;

/// Owner of the inbound FIFO's filesystem entry.
#[derive(Debug)]
pub struct InboundChannel {
    path: PathBuf,
}

impl InboundChannel {
    /// Create the FIFO at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ChannelExists`] if anything already exists at
    /// `path`, or [`AppError::Io`] if the FIFO cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        match mkfifo(&path, Mode::from_bits_truncate(0o666)) {
            Ok(()) => {
                info!(path = %path.display(), "inbound channel created");
                Ok(Self { path })
            }
            Err(Errno::EEXIST) => Err(AppError::ChannelExists { path }),
            Err(errno) => Err(AppError::io(
                "inbound.mkfifo",
                Some(path),
                io::Error::from(errno),
            )),
        }
    }

    /// Filesystem path of the FIFO.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a blocking accept on the runtime's blocking pool.
    ///
    /// The task waits until a client opens the write end, then decodes
    /// requests until end of stream and closes the read end.
    #[must_use]
    pub fn accept(&self) -> JoinHandle<Accepted> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_batch(&path))
    }

    /// Release an accept blocked in `open` by briefly opening the write end.
    ///
    /// Returns `false` when no reader is currently waiting.
    #[must_use]
    pub fn wake(&self) -> bool {
        match std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(&self.path)
        {
            Ok(_) => true,
            Err(err) => {
                if err.raw_os_error() != Some(Errno::ENXIO as i32) {
                    debug!(error = %err, "inbound wake failed");
                }
                false
            }
        }
    }
}

impl Drop for InboundChannel {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "inbound channel removed"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove inbound channel"
            ),
        }
    }
}

fn read_batch(path: &Path) -> Accepted {
    let mut file = File::open(path).map_err(|source| {
        AppError::io("inbound.open", Some(path.to_path_buf()), source)
    })?;
    let mut batch = Vec::new();
    loop {
        match decode_from(&mut file) {
            Ok(request) => batch.push(Ok(request)),
            Err(ProtocolError::Empty) => break,
            Err(err) => {
                // Frame boundaries are lost; whatever follows cannot be decoded.
                match io::copy(&mut file, &mut io::sink()) {
                    Ok(0) => {}
                    Ok(skipped) => warn!(skipped, "inbound bytes dropped after undecodable frame"),
                    Err(copy_err) => debug!(error = %copy_err, "inbound drain failed"),
                }
                batch.push(Err(err));
                break;
            }
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressline_protocol::{Transformation, encode};
    use std::io::Write;

    #[test]
    fn create_refuses_existing_path_and_drop_unlinks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("inbound.fifo");
        let channel = InboundChannel::create(&path)?;
        assert!(path.exists());
        let err = InboundChannel::create(&path).expect_err("path is taken");
        assert!(matches!(err, AppError::ChannelExists { .. }));
        assert!(err.to_string().contains(&path.display().to_string()), "{err}");
        drop(channel);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn wake_without_reader_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let channel = InboundChannel::create(dir.path().join("inbound.fifo"))?;
        assert!(!channel.wake());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_decodes_one_request() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let channel = InboundChannel::create(dir.path().join("inbound.fifo"))?;
        let accept = channel.accept();

        let request = Request::process_file(11, "a", "b", &[Transformation::Encrypt]);
        let bytes = encode(&request)?;
        let path = channel.path().to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut writer = std::fs::OpenOptions::new().write(true).open(path)?;
            writer.write_all(&bytes)
        })
        .await??;

        let decoded = accept.await??;
        assert_eq!(decoded.len(), 1);
        assert!(matches!(&decoded[0], Ok(got) if *got == request));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_keeps_frames_from_concurrent_writers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let channel = InboundChannel::create(dir.path().join("inbound.fifo"))?;
        let path = channel.path().to_path_buf();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(3));
        let writers: Vec<_> = (0..3)
            .map(|sender| {
                let path = path.clone();
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || -> io::Result<()> {
                    let mut writer = std::fs::OpenOptions::new().write(true).open(&path)?;
                    barrier.wait();
                    let request = Request::process_file(sender, "in", "out", &[Transformation::Nop]);
                    let bytes = encode(&request).map_err(io::Error::other)?;
                    writer.write_all(&bytes)?;
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    Ok(())
                })
            })
            .collect();

        let mut senders = Vec::new();
        while senders.len() < 3 {
            for frame in channel.accept().await?? {
                senders.push(frame?.sender);
            }
        }
        for writer in writers {
            writer.join().map_err(|_| "writer panicked")??;
        }
        senders.sort_unstable();
        assert_eq!(senders, vec![0, 1, 2]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecodable_frame_ends_the_batch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let channel = InboundChannel::create(dir.path().join("inbound.fifo"))?;
        let accept = channel.accept();

        let mut bytes = encode(&Request::status(4))?;
        bytes.extend_from_slice(&[9, 9, 9, 9, 9, 9, 9, 9]);
        bytes.extend(encode(&Request::status(5))?);
        let path = channel.path().to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut writer = std::fs::OpenOptions::new().write(true).open(path)?;
            writer.write_all(&bytes)
        })
        .await??;

        let batch = accept.await??;
        assert_eq!(batch.len(), 2);
        assert!(matches!(&batch[0], Ok(request) if request.sender == 4));
        assert!(batch[1].is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wake_releases_a_blocked_accept_as_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let channel = InboundChannel::create(dir.path().join("inbound.fifo"))?;
        let accept = channel.accept();

        while !accept.is_finished() {
            let _ = channel.wake();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(accept.await??.is_empty());
        Ok(())
    }
}
