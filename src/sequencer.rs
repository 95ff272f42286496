use chrono::{DateTime, Local};

use crate::gate::{inside_box, PresenceGate};
use crate::landmark::{FrameMailbox, LandmarkFrame};
use crate::schedule::{CancelFlag, FireOutcome, ScheduledTask};
use crate::steps::{Routine, Step};

pub const COUNTDOWN_START: i32 = 3;
pub const COUNTDOWN_TICK_MS: u64 = 1000;
pub const START_MARKER: &str = "スタート！";

/// Where the session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    Waiting,
    Counting,
    Running,
    Scoring,
}

#[derive(Debug)]
struct Countdown {
    count: i32,
    next_due_ms: u64,
}

/// The pose-gated countdown and timed-step state machine.
///
/// Driven by two inputs: landmark frames (`on_frame`) and elapsed time
/// (`advance_ms`). All per-session mutable state lives here and is reset on
/// each phase transition; there are no globals.
#[derive(Debug)]
pub struct Sequencer {
    pub routine: Routine,
    phase: Phase,
    gate: PresenceGate,
    mailbox: FrameMailbox,
    /// The positioning overlay (and with it the presence gate) is disabled
    /// permanently for the session once a countdown completes.
    overlay_enabled: bool,
    countdown: Option<Countdown>,
    countdown_text: Option<String>,
    clock_ms: u64,
    step_index: Option<usize>,
    next_step: Option<ScheduledTask<usize>>,
    run_cancel: CancelFlag,
    frames: Vec<LandmarkFrame>,
    recording: Option<Vec<LandmarkFrame>>,
    pub started_at: Option<DateTime<Local>>,
}

impl Sequencer {
    pub fn new(routine: Routine) -> Self {
        Self {
            routine,
            phase: Phase::Waiting,
            gate: PresenceGate::new(),
            mailbox: FrameMailbox::new(),
            overlay_enabled: true,
            countdown: None,
            countdown_text: None,
            clock_ms: 0,
            step_index: None,
            next_step: None,
            run_cancel: CancelFlag::new(),
            frames: Vec::new(),
            recording: None,
            started_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay_enabled
    }

    pub fn countdown_text(&self) -> Option<&str> {
        self.countdown_text.as_deref()
    }

    /// Step currently displayed; None outside `Running`.
    pub fn current_step(&self) -> Option<&Step> {
        self.step_index.and_then(|i| self.routine.steps.get(i))
    }

    pub fn step_index(&self) -> Option<usize> {
        self.step_index
    }

    pub fn latest_frame(&self) -> Option<&LandmarkFrame> {
        self.mailbox.latest()
    }

    pub fn inside_streak(&self) -> u32 {
        self.gate.consecutive()
    }

    pub fn frames_collected(&self) -> usize {
        self.frames.len()
    }

    pub fn has_finished(&self) -> bool {
        self.phase == Phase::Scoring
    }

    /// Deliver one detector frame. The latest frame is always retained for
    /// countdown checks; frames are accumulated only while running.
    pub fn on_frame(&mut self, frame: LandmarkFrame) {
        match self.phase {
            Phase::Waiting if self.overlay_enabled => {
                let inside = inside_box(&frame);
                self.mailbox.put(frame);
                if self.gate.observe(inside) {
                    self.begin_countdown();
                }
            }
            Phase::Running => {
                self.mailbox.put(frame.clone());
                self.frames.push(frame);
            }
            _ => self.mailbox.put(frame),
        }
    }

    /// Advance the session clock. Countdown ticks and step deadlines fire
    /// from here; a large `dt_ms` fires everything that became due.
    pub fn advance_ms(&mut self, dt_ms: u64) {
        self.clock_ms += dt_ms;

        while self.phase == Phase::Counting {
            let due = match &self.countdown {
                Some(c) if self.clock_ms >= c.next_due_ms => true,
                _ => false,
            };
            if !due {
                break;
            }
            self.tick_countdown();
        }

        while self.phase == Phase::Running {
            let Some(task) = self.next_step.take() else {
                break;
            };
            let fired_at = task.due_ms;
            match task.fire(self.clock_ms) {
                FireOutcome::Pending(task) => {
                    self.next_step = Some(task);
                    break;
                }
                FireOutcome::Cancelled => break,
                FireOutcome::Due(next_index) => self.show_step_from(next_index, fired_at),
            }
        }
    }

    /// Manual stop: straight to scoring, discarding the rest of the current
    /// step's time budget. Pending step tasks are cancelled, not torn down.
    pub fn stop(&mut self) {
        if self.phase == Phase::Running {
            self.finish();
        }
    }

    /// Flush the collected frames. Yields Some exactly once per run.
    pub fn take_recording(&mut self) -> Option<Vec<LandmarkFrame>> {
        self.recording.take()
    }

    fn begin_countdown(&mut self) {
        self.phase = Phase::Counting;
        self.countdown_text = Some(COUNTDOWN_START.to_string());
        self.countdown = Some(Countdown {
            count: COUNTDOWN_START,
            next_due_ms: self.clock_ms + COUNTDOWN_TICK_MS,
        });
    }

    fn tick_countdown(&mut self) {
        let still_inside = self.mailbox.latest().map(inside_box).unwrap_or(false);

        if !still_inside {
            // position lost: never resume a partial countdown
            self.countdown = None;
            self.countdown_text = None;
            self.gate.reset();
            self.phase = Phase::Waiting;
            return;
        }

        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        countdown.count -= 1;
        countdown.next_due_ms += COUNTDOWN_TICK_MS;

        match countdown.count {
            c if c > 0 => self.countdown_text = Some(c.to_string()),
            0 => self.countdown_text = Some(START_MARKER.to_string()),
            _ => {
                self.countdown = None;
                self.countdown_text = None;
                self.overlay_enabled = false;
                self.enter_running();
            }
        }
    }

    fn enter_running(&mut self) {
        self.phase = Phase::Running;
        self.frames.clear();
        self.recording = None;
        self.run_cancel = CancelFlag::new();
        self.started_at = Some(Local::now());
        self.show_step_from(0, self.clock_ms);
    }

    /// Display a step and schedule the next deadline from `base_ms`, so
    /// deadlines stay aligned to step durations even when a single large
    /// clock advance fires several of them.
    fn show_step_from(&mut self, index: usize, base_ms: u64) {
        if index >= self.routine.len() {
            self.finish();
            return;
        }
        self.step_index = Some(index);
        self.next_step = Some(ScheduledTask::new(
            base_ms + self.routine.steps[index].duration_ms,
            self.run_cancel.clone(),
            index + 1,
        ));
    }

    fn finish(&mut self) {
        self.run_cancel.cancel();
        self.next_step = None;
        self.step_index = None;
        self.phase = Phase::Scoring;
        self.recording = Some(std::mem::take(&mut self.frames));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::INSIDE_FRAMES;
    use crate::steps::Step;

    fn two_step_routine() -> Routine {
        Routine {
            name: "test".into(),
            steps: vec![
                Step {
                    id: "A".into(),
                    name: "A".into(),
                    duration_ms: 1000,
                },
                Step {
                    id: "B".into(),
                    name: "B".into(),
                    duration_ms: 1000,
                },
            ],
        }
    }

    fn inside() -> LandmarkFrame {
        LandmarkFrame::uniform(0.5, 0.5, 0.9)
    }

    fn outside() -> LandmarkFrame {
        LandmarkFrame::uniform(0.01, 0.5, 0.9)
    }

    fn feed_until_counting(seq: &mut Sequencer) {
        for _ in 0..=INSIDE_FRAMES {
            seq.on_frame(inside());
        }
        assert_eq!(seq.phase(), Phase::Counting);
    }

    fn run_full_countdown(seq: &mut Sequencer) {
        feed_until_counting(seq);
        for _ in 0..4 {
            seq.advance_ms(COUNTDOWN_TICK_MS);
        }
        assert_eq!(seq.phase(), Phase::Running);
    }

    #[test]
    fn waiting_needs_unbroken_streak() {
        let mut seq = Sequencer::new(two_step_routine());

        for _ in 0..INSIDE_FRAMES {
            seq.on_frame(inside());
        }
        assert_eq!(seq.phase(), Phase::Waiting);

        seq.on_frame(outside());
        assert_eq!(seq.inside_streak(), 0);

        for _ in 0..INSIDE_FRAMES {
            seq.on_frame(inside());
        }
        assert_eq!(seq.phase(), Phase::Waiting);
        seq.on_frame(inside());
        assert_eq!(seq.phase(), Phase::Counting);
        assert_eq!(seq.countdown_text(), Some("3"));
    }

    #[test]
    fn countdown_counts_down_then_runs() {
        let mut seq = Sequencer::new(two_step_routine());
        feed_until_counting(&mut seq);

        seq.advance_ms(COUNTDOWN_TICK_MS);
        assert_eq!(seq.countdown_text(), Some("2"));
        seq.advance_ms(COUNTDOWN_TICK_MS);
        assert_eq!(seq.countdown_text(), Some("1"));
        seq.advance_ms(COUNTDOWN_TICK_MS);
        assert_eq!(seq.countdown_text(), Some(START_MARKER));
        assert_eq!(seq.phase(), Phase::Counting);

        seq.advance_ms(COUNTDOWN_TICK_MS);
        assert_eq!(seq.phase(), Phase::Running);
        assert_eq!(seq.countdown_text(), None);
        assert!(!seq.overlay_enabled());
        assert_eq!(seq.step_index(), Some(0));
    }

    #[test]
    fn countdown_aborts_when_position_lost() {
        let mut seq = Sequencer::new(two_step_routine());
        feed_until_counting(&mut seq);

        seq.advance_ms(COUNTDOWN_TICK_MS);
        assert_eq!(seq.countdown_text(), Some("2"));

        seq.on_frame(outside());
        seq.advance_ms(COUNTDOWN_TICK_MS);

        assert_eq!(seq.phase(), Phase::Waiting);
        assert_eq!(seq.countdown_text(), None);
        assert_eq!(seq.inside_streak(), 0);
        // the overlay stays enabled; a fresh streak can start another countdown
        assert!(seq.overlay_enabled());
    }

    #[test]
    fn steps_advance_on_schedule_and_finish_in_scoring() {
        let mut seq = Sequencer::new(two_step_routine());
        run_full_countdown(&mut seq);

        assert_eq!(seq.current_step().unwrap().id, "A");

        seq.advance_ms(999);
        assert_eq!(seq.current_step().unwrap().id, "A");

        seq.advance_ms(1);
        assert_eq!(seq.current_step().unwrap().id, "B");

        seq.advance_ms(1000);
        assert_eq!(seq.phase(), Phase::Scoring);
        assert_eq!(seq.step_index(), None);
    }

    #[test]
    fn frames_collected_only_while_running() {
        let mut seq = Sequencer::new(two_step_routine());

        seq.on_frame(inside());
        assert_eq!(seq.frames_collected(), 0);

        run_full_countdown(&mut seq);
        assert_eq!(seq.frames_collected(), 0);

        seq.on_frame(inside());
        seq.on_frame(outside());
        assert_eq!(seq.frames_collected(), 2);

        seq.advance_ms(2000);
        assert_eq!(seq.phase(), Phase::Scoring);
        assert_eq!(seq.frames_collected(), 0);

        let recording = seq.take_recording().unwrap();
        assert_eq!(recording.len(), 2);
        // flushed exactly once
        assert!(seq.take_recording().is_none());
    }

    #[test]
    fn manual_stop_discards_pending_steps() {
        let mut seq = Sequencer::new(two_step_routine());
        run_full_countdown(&mut seq);
        seq.on_frame(inside());

        seq.advance_ms(300);
        seq.stop();

        assert_eq!(seq.phase(), Phase::Scoring);
        assert_eq!(seq.step_index(), None);
        assert_eq!(seq.take_recording().unwrap().len(), 1);

        // the cancelled step task must not resurface later
        seq.advance_ms(5000);
        assert_eq!(seq.phase(), Phase::Scoring);
        assert_eq!(seq.step_index(), None);
    }

    #[test]
    fn running_is_never_reentered_after_scoring() {
        let mut seq = Sequencer::new(two_step_routine());
        run_full_countdown(&mut seq);
        seq.advance_ms(2000);
        assert_eq!(seq.phase(), Phase::Scoring);

        for _ in 0..(INSIDE_FRAMES * 2) {
            seq.on_frame(inside());
        }
        seq.advance_ms(10_000);
        assert_eq!(seq.phase(), Phase::Scoring);
        assert_eq!(seq.frames_collected(), 0);
    }

    #[test]
    fn end_to_end_timing_matches_step_durations() {
        let mut seq = Sequencer::new(two_step_routine());
        run_full_countdown(&mut seq);
        let t0 = 0u64;

        // at t=0: A displayed
        assert_eq!(seq.current_step().unwrap().id, "A");

        // tick forward in 100ms increments like the real loop
        let mut now = t0;
        let mut b_shown_at = None;
        let mut scoring_at = None;
        while now < 3000 {
            seq.advance_ms(100);
            now += 100;
            if b_shown_at.is_none() && seq.current_step().map(|s| s.id.as_str()) == Some("B") {
                b_shown_at = Some(now);
            }
            if scoring_at.is_none() && seq.phase() == Phase::Scoring {
                scoring_at = Some(now);
            }
        }

        assert_eq!(b_shown_at, Some(1000));
        assert_eq!(scoring_at, Some(2000));
    }

    #[test]
    fn countdown_only_starts_from_waiting() {
        let mut seq = Sequencer::new(two_step_routine());
        run_full_countdown(&mut seq);

        // frames during running must not restart a gate streak
        for _ in 0..(INSIDE_FRAMES * 2) {
            seq.on_frame(inside());
        }
        assert_eq!(seq.phase(), Phase::Running);
        assert_eq!(seq.inside_streak(), 0);
    }
}
