use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent};
use tracing::{info, warn};

use crate::landmark::LandmarkFrame;
use crate::relay::{InboundMessage, ScoreOutcome};

/// Unified event type consumed by the app runner
#[derive(Clone, Debug)]
pub enum TaisoEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    /// One detector frame from the landmark feed.
    Frame(LandmarkFrame),
    /// Decoded frame from the voice relay.
    Control(InboundMessage),
    /// Outcome of an async chat request.
    ChatReply(Result<String, String>),
    /// Outcome of an async scoring submission.
    Score(Result<ScoreOutcome, String>),
}

/// Source of events (keyboard, detector frames, relay messages)
pub trait TaisoEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<TaisoEvent, RecvTimeoutError>;
}

/// Forward terminal input onto an event channel shared with the other
/// producers (ticker, landmark feed, relay).
pub fn spawn_input_reader(tx: Sender<TaisoEvent>) {
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(CtEvent::Key(key)) => {
                if tx.send(TaisoEvent::Key(key)).is_err() {
                    break;
                }
            }
            Ok(CtEvent::Resize(_, _)) => {
                if tx.send(TaisoEvent::Resize).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });
}

/// Stream a JSON Lines landmark feed onto the event channel. The file may
/// be a plain recording or a FIFO the detector writes into; reads block
/// until frames arrive. Malformed lines are logged and skipped. With
/// `replay_fps` set, frames are paced instead of delivered as fast as the
/// file can be read.
pub fn spawn_frame_feed(path: PathBuf, replay_fps: Option<f64>, tx: Sender<TaisoEvent>) {
    std::thread::spawn(move || {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!("landmark feed {} not readable: {e}", path.display());
                return;
            }
        };
        let pace = replay_fps
            .filter(|fps| *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps));

        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("landmark feed read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match LandmarkFrame::parse_line(&line) {
                Ok(frame) => {
                    if tx.send(TaisoEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("skipping malformed landmark frame: {e}"),
            }
            if let Some(pace) = pace {
                std::thread::sleep(pace);
            }
        }
        info!("landmark feed {} ended", path.display());
    });
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<TaisoEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<TaisoEvent>) -> Self {
        Self { rx }
    }
}

impl TaisoEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<TaisoEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the application one event/tick at a time
pub struct Runner<E: TaisoEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
}

impl<E: TaisoEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    /// Blocks up to tick interval and returns the next event, or Tick on timeout
    pub fn step(&self) -> TaisoEvent {
        match self.event_source.recv_timeout(self.ticker.interval()) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                TaisoEvent::Tick
            }
        }
    }
}
