//! Byte accounting for long-running operations.
//!
//! Workers only touch two atomic counters (`current` = bytes consumed from
//! the source side, `written` = bytes emitted to the sink side) plus the
//! name of the file in flight. A ticker thread samples the counters on a
//! fixed interval, keeps a moving window for an instantaneous rate, and
//! hands snapshots to a render callback. Rendering is entirely
//! side-channel: its failures never reach the engine.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, tick, Receiver, Sender};

/// How often the ticker samples the counters.
pub const UPDATE_PERIOD: Duration = Duration::from_millis(250);

/// Width of the moving window used for the instantaneous rate.
pub const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Shared byte counters for one create or extract operation.
pub struct Progress {
    current: AtomicU64,
    written: AtomicU64,
    total: u64,
    file: Mutex<String>,
}

impl Progress {
    pub fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicU64::new(0),
            written: AtomicU64::new(0),
            total,
            file: Mutex::new(String::new()),
        })
    }

    pub fn add_current(&self, n: u64) {
        self.current.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_written(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Records the file currently in flight, for display only.
    pub fn set_file(&self, name: &str) {
        if let Ok(mut f) = self.file.lock() {
            f.clear();
            f.push_str(name);
        }
    }

    pub fn file(&self) -> String {
        self.file.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

/// One sampled view of the counters, delivered to the render callback.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub current: u64,
    pub written: u64,
    pub total: u64,
    /// Moving-window rate in bytes per second over the sink counter.
    pub rate: f64,
    pub file: String,
    /// True for the last snapshot emitted before the ticker stops.
    pub finished: bool,
}

/// Periodic sampler. Dropping the handle (or calling [`Ticker::stop`])
/// terminates the thread after one final snapshot.
pub struct Ticker {
    done: Option<Sender<()>>,
    finished: Receiver<()>,
}

impl Ticker {
    /// Spawns the sampling thread. `render` runs on that thread.
    pub fn start<F>(progress: Arc<Progress>, render: F) -> Self
    where
        F: Fn(Snapshot) + Send + 'static,
    {
        let (done_tx, done_rx) = bounded::<()>(1);
        let (fin_tx, fin_rx) = bounded::<()>(1);

        std::thread::spawn(move || {
            let ticks = tick(UPDATE_PERIOD);
            let start = Instant::now();
            let mut window: Vec<(Instant, u64)> = Vec::new();

            let sample = |window: &mut Vec<(Instant, u64)>, finished: bool| {
                let now = Instant::now();
                let written = progress.written();
                window.push((now, written));
                if let Some(cutoff) = now.checked_sub(SPEED_WINDOW) {
                    window.retain(|(t, _)| *t > cutoff);
                }

                let rate = if window.len() > 1 {
                    let (t0, b0) = window[0];
                    let (t1, b1) = window[window.len() - 1];
                    let secs = (t1 - t0).as_secs_f64();
                    if secs > 0.0 {
                        (b1 - b0) as f64 / secs
                    } else {
                        0.0
                    }
                } else {
                    let secs = now.duration_since(start).as_secs_f64();
                    if secs > 0.0 {
                        written as f64 / secs
                    } else {
                        0.0
                    }
                };

                Snapshot {
                    current: progress.current(),
                    written,
                    total: progress.total(),
                    rate,
                    file: progress.file(),
                    finished,
                }
            };

            loop {
                crossbeam_channel::select! {
                    recv(ticks) -> _ => {
                        render(sample(&mut window, false));
                    }
                    recv(done_rx) -> _ => {
                        render(sample(&mut window, true));
                        let _ = fin_tx.send(());
                        return;
                    }
                }
            }
        });

        Ticker { done: Some(done_tx), finished: fin_rx }
    }

    /// Stops the sampler and waits for its final snapshot to render.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
            let _ = self.finished.recv_timeout(Duration::from_secs(1));
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader adapter counting consumed source bytes.
pub struct ProgressReader<R> {
    inner: R,
    progress: Arc<Progress>,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, progress: Arc<Progress>) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.add_current(n as u64);
        Ok(n)
    }
}

/// Writer adapter counting emitted sink bytes.
pub struct ProgressWriter<W> {
    inner: W,
    progress: Arc<Progress>,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(inner: W, progress: Arc<Progress>) -> Self {
        Self { inner, progress }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write + io::Seek> io::Seek for ProgressWriter<W> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.progress.add_written(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
