//! Running a route.
//!
//! A route is two threads connected by a bounded queue of [Frame]s:
//!
//! * `route::reader` reads the source, decodes and filters frames and queues the
//!   accepted ones. It blocks when the queue is full.
//! * `route::writer` holds each frame until the [Scheduler] releases it, then frames it
//!   and writes it to the sink.
//!
//! Both threads watch a shared stop signal. Every blocking wait in the pipeline is either
//! a channel select that includes the stop signal or a transport poll bounded by
//! [POLL_INTERVAL](crate::transport::POLL_INTERVAL), so [RunHandle::stop] takes effect
//! promptly, even while a frame is held for a long delay.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, Receiver, Sender, TryRecvError};
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RouteConfig;
use crate::decoder::{Decoded, Frame, FrameDecoder};
use crate::event::{DropReason, Events, RouteEvent};
use crate::filter::{Filter, Verdict};
use crate::framer::Framer;
use crate::schedule::Scheduler;
use crate::stats::{RunStats, SharedStats};
use crate::transport::{open_sink, open_source, ReadStatus, Sink, Source, WriteStatus};
use crate::{Error, Result};

/// Final statistics of a finished route.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RunSummary {
    pub stats: RunStats,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "elapsed_secs", with = "crate::config::secs_f64")
    )]
    pub elapsed: Duration,
}

/// Stop flag shared by the handle and both route threads.
///
/// Stopping drops the only sender, which wakes every receiver at once.
#[derive(Debug, Clone)]
struct StopSignal {
    tx: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        StopSignal {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    fn trigger(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_set(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Control of a running route.
///
/// Dropping the handle stops the route without waiting for it.
#[derive(Debug)]
pub struct RunHandle {
    stop: StopSignal,
    paused: Arc<AtomicBool>,
    wake: Sender<()>,
    stats: SharedStats,
    events: Receiver<RouteEvent>,
    event_tx: Events,
    started: Instant,
    thread: Option<JoinHandle<Result<()>>>,
}

impl RunHandle {
    /// Request the route to stop. Frames still queued are discarded. Calling more than
    /// once has no effect.
    pub fn stop(&self) {
        debug!("stop requested");
        self.stop.trigger();
    }

    /// Stop writing to the sink. The reader continues until the queue is full.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.event_tx.send(RouteEvent::Paused);
            let _ = self.wake.try_send(());
        }
    }

    /// Resume writing after [RunHandle::pause].
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.event_tx.send(RouteEvent::Resumed);
            let _ = self.wake.try_send(());
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Snapshot of the statistics so far.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.stats.snapshot()
    }

    /// Receiver for [RouteEvent]s. All clones share the same queue.
    #[must_use]
    pub fn events(&self) -> Receiver<RouteEvent> {
        self.events.clone()
    }

    /// True once both route threads have exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the route to finish.
    ///
    /// # Errors
    /// [Error::TransportRead] or [Error::TransportWrite] if a transport failed, or
    /// [Error::Thread] if a route thread panicked.
    pub fn join(mut self) -> Result<RunSummary> {
        let result = match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Thread("route writer panicked".into()))?,
            None => Ok(()),
        };
        result?;
        Ok(RunSummary {
            stats: self.stats.snapshot(),
            elapsed: self.started.elapsed(),
        })
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop.trigger();
        }
    }
}

/// Validate `config`, open its sink then its source, and start routing.
///
/// # Errors
/// [Error::Config] if the configuration is invalid, [Error::Io] if an endpoint cannot
/// be opened, or [Error::Thread] if the route threads cannot be started.
pub fn start_route(config: RouteConfig) -> Result<RunHandle> {
    config.validate()?;
    let sink = open_sink(&config.sink)?;
    let source = open_source(&config.source, config.read_size)?;
    spawn(config, source, sink)
}

/// Like [start_route] but with caller provided transports. The endpoints in `config`
/// are not opened.
///
/// # Errors
/// [Error::Config] if the configuration is invalid or [Error::Thread] if the route
/// threads cannot be started.
pub fn start_route_with(
    config: RouteConfig,
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
) -> Result<RunHandle> {
    config.validate()?;
    spawn(config, source, sink)
}

fn spawn(config: RouteConfig, source: Box<dyn Source>, sink: Box<dyn Sink>) -> Result<RunHandle> {
    let (frames_tx, frames_rx) = bounded(config.queue_depth);
    let (wake_tx, wake_rx) = bounded(1);
    let (events, events_rx) = Events::new();
    let stop = StopSignal::new();
    let paused = Arc::new(AtomicBool::new(false));
    let stats = SharedStats::default();

    debug!(
        source = %config.source,
        sink = %config.sink,
        timing = config.timing.name(),
        "starting route"
    );
    events.send(RouteEvent::Started);

    let reader = Reader {
        source,
        decoder: FrameDecoder::from_config(&config),
        filter: Filter::from_config(&config),
        frames: frames_tx,
        stop: stop.clone(),
        stats: stats.clone(),
        events: events.clone(),
    };
    let reader = thread::Builder::new()
        .name("route::reader".into())
        .spawn(move || reader.run())
        .map_err(|err| Error::Thread(format!("failed to spawn reader: {err}")))?;

    let writer = Writer {
        sink,
        scheduler: Scheduler::new(config.timing.clone()),
        framer: Framer::new(config.effective_framing()),
        frames: frames_rx,
        wake: wake_rx,
        paused: paused.clone(),
        stop: stop.clone(),
        stats: stats.clone(),
        events: events.clone(),
    };
    let stop_on_err = stop.clone();
    let thread = thread::Builder::new()
        .name("route::writer".into())
        .spawn(move || writer.run(reader))
        .map_err(|err| {
            // the reader is already running
            stop_on_err.trigger();
            Error::Thread(format!("failed to spawn writer: {err}"))
        })?;

    Ok(RunHandle {
        stop,
        paused,
        wake: wake_tx,
        stats,
        events: events_rx,
        event_tx: events,
        started: Instant::now(),
        thread: Some(thread),
    })
}

struct Reader {
    source: Box<dyn Source>,
    decoder: FrameDecoder,
    filter: Filter,
    frames: Sender<Frame>,
    stop: StopSignal,
    stats: SharedStats,
    events: Events,
}

impl Reader {
    fn run(mut self) -> Result<()> {
        let result = self.read_loop();
        self.source.close();
        if let Err(err) = &result {
            self.events.send(RouteEvent::TransportError {
                message: err.to_string(),
            });
        }
        debug!("route::reader exit");
        result
    }

    fn read_loop(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        while !self.stop.is_set() {
            let status = match self.source.read(&mut buf) {
                Ok(status) => status,
                Err(err) => {
                    self.flush();
                    return Err(Error::TransportRead(err));
                }
            };
            match status {
                ReadStatus::Data => {
                    self.stats.update(|s| s.bytes_read += buf.len() as u64);
                    self.decoder.push(&buf, Instant::now());
                    while let Some(decoded) = self.decoder.next() {
                        if !self.dispatch(decoded) {
                            return Ok(());
                        }
                    }
                }
                ReadStatus::Idle => {}
                ReadStatus::EndOfStream => {
                    self.flush();
                    debug!("end of source stream");
                    return Ok(());
                }
                ReadStatus::Connected(peer) => {
                    self.decoder.reset();
                    self.stats.update(|s| s.connections += 1);
                    self.events.send(RouteEvent::Connected { peer });
                }
                ReadStatus::Disconnected => {
                    self.flush();
                    self.events.send(RouteEvent::Disconnected);
                }
            }
        }
        Ok(())
    }

    /// Discard a partial frame left at the end of a stream.
    fn flush(&mut self) {
        if let Some(len) = self.decoder.finish() {
            self.drop_bytes(DropReason::Incomplete, len);
        }
    }

    fn drop_bytes(&self, reason: DropReason, len: usize) {
        self.stats.update(|s| s.record_drop(reason));
        self.events.send(RouteEvent::Dropped { reason, len });
    }

    /// Returns false if the route is stopping.
    fn dispatch(&self, decoded: Decoded) -> bool {
        match decoded {
            Decoded::Frame(frame) => {
                self.stats.update(|s| s.decoded += 1);
                match self.filter.check(&frame) {
                    Verdict::Accept => self.enqueue(frame),
                    Verdict::Reject(reason) => {
                        self.drop_bytes(reason, frame.wire_len());
                        true
                    }
                }
            }
            Decoded::Dropped { reason, len } => {
                self.drop_bytes(reason, len);
                true
            }
            Decoded::Resynced { skipped } => {
                self.stats.update(|s| {
                    s.resyncs += 1;
                    s.bytes_skipped += skipped as u64;
                });
                self.events.send(RouteEvent::Resynced { skipped });
                true
            }
            Decoded::ResyncExhausted { skipped } => {
                warn!(skipped, "no plausible header found; still scanning");
                self.stats.update(|s| s.bytes_skipped += skipped as u64);
                self.drop_bytes(DropReason::Malformed, skipped);
                true
            }
        }
    }

    fn enqueue(&self, frame: Frame) -> bool {
        let (apid, len) = (frame.apid(), frame.wire_len());
        self.stats.update(|s| s.accepted += 1);
        self.events.send(RouteEvent::Accepted { apid, len });
        select! {
            send(self.frames, frame) -> res => res.is_ok(),
            recv(self.stop.rx) -> _ => false,
        }
    }
}

enum Hold {
    Emit,
    Stop,
}

struct Writer {
    sink: Box<dyn Sink>,
    scheduler: Scheduler,
    framer: Framer,
    frames: Receiver<Frame>,
    wake: Receiver<()>,
    paused: Arc<AtomicBool>,
    stop: StopSignal,
    stats: SharedStats,
    events: Events,
}

impl Writer {
    fn run(mut self, reader: JoinHandle<Result<()>>) -> Result<()> {
        let written = self.write_loop();
        self.sink.close();
        if let Err(err) = &written {
            self.events.send(RouteEvent::TransportError {
                message: err.to_string(),
            });
        }

        // The writer is done, whatever the reason; make sure the reader is too.
        self.stop.trigger();
        drop(self.frames);
        let read = reader
            .join()
            .map_err(|_| Error::Thread("route reader panicked".into()))?;

        self.events.send(RouteEvent::Stopped);
        debug!("route::writer exit");
        written.and(read)
    }

    fn write_loop(&mut self) -> Result<()> {
        loop {
            if self.stop.is_set() {
                return Ok(());
            }
            let frame = select! {
                recv(self.frames) -> frame => match frame {
                    Ok(frame) => frame,
                    // reader finished and the queue is drained
                    Err(_) => return Ok(()),
                },
                recv(self.wake) -> msg => {
                    if msg.is_err() {
                        return Ok(());
                    }
                    continue;
                },
                recv(self.stop.rx) -> _ => return Ok(()),
            };

            if let Hold::Stop = self.hold(&frame) {
                return Ok(());
            }
            let bytes = self.framer.encode(&frame);
            let Some(at) = self.deliver(&bytes)? else {
                return Ok(());
            };
            self.scheduler.emitted(at);

            let (untimed, reanchored) = (self.scheduler.untimed(), self.scheduler.reanchored());
            self.stats.update(|s| {
                s.record_emit(frame.primary.as_ref(), bytes.len());
                s.replay_untimed = untimed;
                s.replay_reanchored = reanchored;
            });
            self.events.send(RouteEvent::Emitted {
                apid: frame.apid(),
                len: bytes.len(),
            });
        }
    }

    /// Suspend until the scheduler releases `frame`.
    ///
    /// A frame held when the route is paused is scheduled again after resuming. The pause
    /// flag is read after every wakeup, including the one that ends the suspension, so a
    /// frame is never written while paused.
    fn hold(&mut self, frame: &Frame) -> Hold {
        let mut target = None;
        loop {
            if self.paused.load(Ordering::SeqCst) {
                if let Hold::Stop = self.wait_resumed() {
                    return Hold::Stop;
                }
                target = None;
            }
            let at = *target.get_or_insert_with(|| self.scheduler.target(frame, Instant::now()));
            let remaining = at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Hold::Emit;
            }
            let woke = select! {
                recv(self.wake) -> msg => msg.is_ok(),
                recv(self.stop.rx) -> _ => return Hold::Stop,
                default(remaining) => true,
            };
            // the wake sender only goes away with the handle, which stops the route
            if !woke {
                return Hold::Stop;
            }
        }
    }

    fn wait_resumed(&mut self) -> Hold {
        debug!("writer paused");
        while self.paused.load(Ordering::SeqCst) {
            let woke = select! {
                recv(self.wake) -> msg => msg.is_ok(),
                recv(self.stop.rx) -> _ => false,
            };
            if !woke {
                return Hold::Stop;
            }
        }
        debug!("writer resumed");
        self.scheduler.resumed();
        Hold::Emit
    }

    /// Write `bytes` once the sink is ready, writing them again to the next peer if the
    /// current one disconnects. Returns when the write started, or `None` if the route
    /// stopped first.
    fn deliver(&mut self, bytes: &[u8]) -> Result<Option<Instant>> {
        loop {
            if !self.sink_ready()? {
                return Ok(None);
            }
            let at = Instant::now();
            match self.sink.write(bytes).map_err(Error::TransportWrite)? {
                WriteStatus::Written => return Ok(Some(at)),
                WriteStatus::Disconnected => self.events.send(RouteEvent::Disconnected),
            }
        }
    }

    /// Returns false if the route stopped while waiting for the sink.
    fn sink_ready(&mut self) -> Result<bool> {
        loop {
            if self.sink.poll_ready().map_err(Error::TransportWrite)? {
                return Ok(true);
            }
            if self.stop.is_set() {
                return Ok(false);
            }
        }
    }
}
