//! Stdio plumbing between the host terminal and the attached container.
//!
//! Three small streaming pieces plus the copy loops that use them:
//!
//! - [`ReadyMarkerDetector`] watches container stdout for the bootstrap's
//!   ready marker. It keeps a sliding window of `marker.len() - 1` bytes so
//!   a marker split across writes is still seen, fires a one-shot callback,
//!   and never alters the stream.
//! - [`CtrlCFilter`] drops 0x03 bytes from host stdin until its latch is
//!   enabled (which happens when the ready marker is observed), so an early
//!   Ctrl-C cannot kill the bootstrap mid-isolation.
//! - [`RawModeGuard`] puts the host terminal into raw mode and guarantees
//!   restoration on drop, including unwind paths.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bollard::Docker;
use bollard::container::{LogOutput, ResizeContainerTtyOptions};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Boxed async writer used for caller-supplied output sinks.
pub type OutputWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Watches a byte stream for a fixed marker and fires a callback once.
pub struct ReadyMarkerDetector {
    marker: Vec<u8>,
    window: Vec<u8>,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl ReadyMarkerDetector {
    pub fn new(marker: &str, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
            window: Vec::with_capacity(marker.len().saturating_sub(1)),
            callback: Some(Box::new(callback)),
        }
    }

    /// Observe a chunk. The chunk itself flows on unchanged; this only
    /// updates the sliding window and fires the callback on first sight of
    /// the marker.
    pub fn observe(&mut self, chunk: &[u8]) {
        if self.callback.is_none() {
            return;
        }

        let mut haystack = Vec::with_capacity(self.window.len() + chunk.len());
        haystack.extend_from_slice(&self.window);
        haystack.extend_from_slice(chunk);

        if haystack
            .windows(self.marker.len())
            .any(|w| w == self.marker.as_slice())
            && let Some(callback) = self.callback.take()
        {
            callback();
            self.window.clear();
            return;
        }

        let keep = self.marker.len().saturating_sub(1).min(haystack.len());
        self.window = haystack[haystack.len() - keep..].to_vec();
    }

    /// Whether the marker has been seen.
    pub fn triggered(&self) -> bool {
        self.callback.is_none()
    }
}

/// Enable latch handed to whoever observes the ready marker.
#[derive(Clone)]
pub struct CtrlCEnable {
    enabled: Arc<AtomicBool>,
}

impl CtrlCEnable {
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
}

/// Drops 0x03 (ETX / Ctrl-C) bytes from a stream until enabled.
#[derive(Clone)]
pub struct CtrlCFilter {
    enabled: Arc<AtomicBool>,
}

impl CtrlCFilter {
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Latch handle; once enabled, 0x03 passes through verbatim.
    pub fn enable_handle(&self) -> CtrlCEnable {
        CtrlCEnable {
            enabled: self.enabled.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Filter one chunk. Non-0x03 bytes always pass unchanged.
    pub fn filter(&self, chunk: &[u8]) -> Vec<u8> {
        if self.is_enabled() {
            return chunk.to_vec();
        }
        chunk.iter().copied().filter(|b| *b != 0x03).collect()
    }
}

impl Default for CtrlCFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw-mode scope for the host terminal. Enabling only happens when stdin
/// is a terminal; drop always restores.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Enter raw mode if stdin is a terminal.
    pub fn enable() -> Self {
        use std::io::IsTerminal;

        if !std::io::stdin().is_terminal() {
            return Self { active: false };
        }
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Self { active: true },
            Err(e) => {
                tracing::warn!(error = %e, "could not enable raw mode");
                Self { active: false }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active
            && let Err(e) = crossterm::terminal::disable_raw_mode()
        {
            tracing::warn!(error = %e, "could not restore terminal mode");
        }
    }
}

/// Forward SIGWINCH-driven terminal sizes to the container TTY.
///
/// Sends the current size immediately, then on every window change. The
/// returned handle should be aborted during cleanup.
pub fn spawn_resize_forwarder(docker: Docker, container_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut winch =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot watch window size changes");
                    return;
                }
            };

        loop {
            if let Ok((cols, rows)) = crossterm::terminal::size() {
                let options = ResizeContainerTtyOptions {
                    width: cols,
                    height: rows,
                };
                if let Err(e) = docker.resize_container_tty(&container_id, options).await {
                    tracing::debug!(error = %e, "tty resize failed");
                }
            }
            if winch.recv().await.is_none() {
                return;
            }
        }
    })
}

/// Copy host stdin into the container's input, applying the Ctrl-C filter.
/// Returns on stdin EOF or write failure.
pub async fn copy_stdin(
    mut reader: impl AsyncRead + Unpin,
    mut input: Pin<Box<dyn AsyncWrite + Send>>,
    filter: CtrlCFilter,
) -> std::io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let filtered = filter.filter(&buf[..n]);
        if filtered.is_empty() {
            continue;
        }
        input.write_all(&filtered).await?;
        input.flush().await?;
    }
}

/// Copy the attached container stream to the host.
///
/// In TTY mode everything arrives as one raw stream and goes to `stdout`;
/// otherwise stdout/stderr frames are demultiplexed into their writers. The
/// detector observes stdout bytes in both modes; output bytes are written
/// unchanged.
pub async fn copy_container_output(
    mut output: impl futures::Stream<Item = Result<LogOutput, bollard::errors::Error>>
    + Unpin
    + Send,
    stdout: &mut OutputWriter,
    stderr: &mut OutputWriter,
    detector: &mut ReadyMarkerDetector,
) -> std::io::Result<()> {
    while let Some(frame) = output.next().await {
        let frame = frame.map_err(std::io::Error::other)?;
        match frame {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                detector.observe(&message);
                stdout.write_all(&message).await?;
                stdout.flush().await?;
            }
            LogOutput::StdErr { message } => {
                stderr.write_all(&message).await?;
                stderr.flush().await?;
            }
            LogOutput::StdIn { .. } => {}
        }
    }
    Ok(())
}
