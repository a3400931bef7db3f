use std::future::pending;

use playlink_proto::latency::STAGE_CLIENT_SEND;
use playlink_proto::{InputEvent, LatencyTrace};
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior, interval};

use super::RawInput;
use super::keyboard::KeyboardState;
use super::keymap::mouse_button_code;
use super::mouse::MotionAccumulator;
use super::sender::InputSender;
use crate::config::ClientConfig;

const KEYBOARD_TRACE_PREFIX: &str = "input-keyboard";
const MOUSE_TRACE_PREFIX: &str = "input-mouse";

/// State that exists only while pointer capture is held. Dropping it stops
/// the motion ticker and discards motion that was never flushed.
struct CaptureSession {
    keyboard: KeyboardState,
    motion: MotionAccumulator,
    ticker: Interval,
    fps: u32,
}

impl CaptureSession {
    fn new(fps: u32) -> Self {
        Self {
            keyboard: KeyboardState::new(),
            motion: MotionAccumulator::default(),
            ticker: frame_ticker(fps),
            fps,
        }
    }
}

fn frame_ticker(fps: u32) -> Interval {
    let period = ClientConfig::frame_interval(fps);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Translates raw local input into wire events while capture is held.
pub struct InputCapture {
    sender: InputSender,
    frame_rate: watch::Receiver<u32>,
    session: Option<CaptureSession>,
}

impl InputCapture {
    pub fn new(sender: InputSender, frame_rate: watch::Receiver<u32>) -> Self {
        Self {
            sender,
            frame_rate,
            session: None,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.session.is_some()
    }

    /// Process raw events until the source closes.
    pub async fn run(mut self, mut raw: mpsc::Receiver<RawInput>) {
        loop {
            tokio::select! {
                event = raw.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = next_tick(&mut self.session) => self.flush_motion(),
            }
        }
        self.session = None;
        tracing::debug!(target: "playlink::input", "input source closed");
    }

    pub fn handle(&mut self, event: RawInput) {
        match event {
            RawInput::CaptureAcquired => {
                if self.session.is_none() {
                    let fps = *self.frame_rate.borrow_and_update();
                    tracing::debug!(target: "playlink::input", fps, "pointer capture acquired");
                    self.session = Some(CaptureSession::new(fps));
                }
            }
            RawInput::CaptureReleased => {
                if self.session.take().is_some() {
                    tracing::debug!(target: "playlink::input", "pointer capture released");
                }
            }
            RawInput::Key {
                code,
                pressed,
                repeat,
            } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Some(event) = session.keyboard.on_key(&code, pressed, repeat) {
                    self.send(KEYBOARD_TRACE_PREFIX, event);
                }
            }
            RawInput::MouseMotion { dx, dy } => {
                if let Some(session) = self.session.as_mut() {
                    session.motion.add(dx, dy);
                }
            }
            RawInput::MouseButton { button, pressed } => {
                if self.session.is_none() {
                    return;
                }
                let key = mouse_button_code(button);
                let event = if pressed {
                    InputEvent::MouseKeyDown { key }
                } else {
                    InputEvent::MouseKeyUp { key }
                };
                self.send(MOUSE_TRACE_PREFIX, event);
            }
            RawInput::Wheel { dx, dy } => {
                if self.session.is_some() {
                    self.send(MOUSE_TRACE_PREFIX, InputEvent::MouseWheel { dx, dy });
                }
            }
        }
    }

    /// Send accumulated motion, if any, as one move. Also picks up a changed
    /// frame rate for the next interval.
    pub fn flush_motion(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let pending = session.motion.take();
        if self.frame_rate.has_changed().unwrap_or(false) {
            let fps = *self.frame_rate.borrow_and_update();
            if fps != session.fps {
                session.fps = fps;
                session.ticker = frame_ticker(fps);
            }
        }
        if let Some(event) = pending {
            self.send(MOUSE_TRACE_PREFIX, event);
        }
    }

    fn send(&self, prefix: &str, event: InputEvent) {
        let mut trace = LatencyTrace::start(prefix);
        trace.add_timestamp(STAGE_CLIENT_SEND);
        tracing::trace!(target: "playlink::input", event = event.name(), sequence_id = %trace.sequence_id, "input queued");
        self.sender.send(event, trace);
    }
}

async fn next_tick(session: &mut Option<CaptureSession>) {
    match session {
        Some(session) => {
            session.ticker.tick().await;
        }
        None => pending().await,
    }
}
