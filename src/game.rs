use rand::Rng;

use crate::landmark::LandmarkFrame;

/// Virtual canvas the balloons fall through. Hand coordinates from the
/// detector are projected onto it.
pub const GAME_WIDTH: f64 = 640.0;
pub const GAME_HEIGHT: f64 = 480.0;

pub const GAME_DURATION_SECS: u64 = 30;
pub const START_MARKER: &str = "START!";

const SPAWN_CHANCE: f64 = 0.03;
const BALLOON_RADIUS: f64 = 25.0;
const CATCH_DISTANCE: f64 = 50.0;
const SPAWN_MARGIN: f64 = 20.0;
const MIN_SPEED: f64 = 2.0;
const MAX_SPEED: f64 = 5.0;
const COUNTDOWN_START: i32 = 3;
const COUNTDOWN_TICK_MS: u64 = 1000;

/// Detector points averaged into the hand centroid: wrist, index base,
/// pinky base.
const HAND_POINTS: [usize; 3] = [0, 5, 17];

#[derive(Debug, Clone, PartialEq)]
pub struct Balloon {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub radius: f64,
    caught: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Countdown,
    Playing,
    Over,
}

/// The balloon-catch mini-game: balloons fall from the top of the canvas,
/// the mirrored hand centroid catches any balloon within reach, and a
/// 30-second clock ends the round. Ticks drive everything; the widget
/// only draws the current state.
#[derive(Debug)]
pub struct BalloonCatch<R: Rng> {
    rng: R,
    phase: GamePhase,
    balloons: Vec<Balloon>,
    score: u32,
    hand: Option<(f64, f64)>,
    clock_ms: u64,
    countdown: i32,
    countdown_due_ms: u64,
    play_started_ms: u64,
}

impl<R: Rng> BalloonCatch<R> {
    pub fn new(rng: R) -> Self {
        BalloonCatch {
            rng,
            phase: GamePhase::Countdown,
            balloons: Vec::new(),
            score: 0,
            hand: None,
            clock_ms: 0,
            countdown: COUNTDOWN_START,
            countdown_due_ms: COUNTDOWN_TICK_MS,
            play_started_ms: 0,
        }
    }

    /// Project the hand centroid onto the canvas, mirrored horizontally so
    /// the display matches what the player sees.
    pub fn observe_hand(&mut self, frame: &LandmarkFrame) {
        let (mut x, mut y) = (0.0, 0.0);
        for &i in &HAND_POINTS {
            let Some(point) = frame.points.get(i) else {
                return;
            };
            x += point.x;
            y += point.y;
        }
        let n = HAND_POINTS.len() as f64;
        self.hand = Some((GAME_WIDTH - (x / n) * GAME_WIDTH, (y / n) * GAME_HEIGHT));
    }

    pub fn advance_ms(&mut self, dt_ms: u64) {
        self.clock_ms += dt_ms;
        match self.phase {
            GamePhase::Countdown => {
                while self.phase == GamePhase::Countdown && self.clock_ms >= self.countdown_due_ms {
                    self.countdown_due_ms += COUNTDOWN_TICK_MS;
                    self.countdown -= 1;
                    if self.countdown < 0 {
                        self.start_play();
                    }
                }
            }
            GamePhase::Playing => self.step_play(),
            GamePhase::Over => {}
        }
    }

    fn start_play(&mut self) {
        self.phase = GamePhase::Playing;
        self.score = 0;
        self.balloons.clear();
        self.play_started_ms = self.clock_ms;
    }

    fn step_play(&mut self) {
        if self.remaining_secs() == 0 {
            self.phase = GamePhase::Over;
            return;
        }

        if self.rng.gen::<f64>() < SPAWN_CHANCE {
            let x = self.rng.gen::<f64>() * (GAME_WIDTH - 2.0 * SPAWN_MARGIN) + SPAWN_MARGIN;
            let speed = self.rng.gen_range(MIN_SPEED..MAX_SPEED);
            self.balloons.push(Balloon {
                x,
                y: 0.0,
                speed,
                radius: BALLOON_RADIUS,
                caught: false,
            });
        }

        for balloon in &mut self.balloons {
            balloon.y += balloon.speed;
        }

        if let Some((hx, hy)) = self.hand {
            for balloon in &mut self.balloons {
                if !balloon.caught && is_catch(balloon.x, balloon.y, hx, hy) {
                    balloon.caught = true;
                    self.score += 1;
                }
            }
        }

        self.balloons
            .retain(|b| !b.caught && b.y < GAME_HEIGHT + b.radius);
    }

    /// Back to the countdown, as the retry button does.
    pub fn retry(&mut self) {
        self.phase = GamePhase::Countdown;
        self.balloons.clear();
        self.score = 0;
        self.countdown = COUNTDOWN_START;
        self.countdown_due_ms = self.clock_ms + COUNTDOWN_TICK_MS;
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn balloons(&self) -> &[Balloon] {
        &self.balloons
    }

    pub fn hand(&self) -> Option<(f64, f64)> {
        self.hand
    }

    pub fn countdown_text(&self) -> Option<String> {
        match self.phase {
            GamePhase::Countdown if self.countdown > 0 => Some(self.countdown.to_string()),
            GamePhase::Countdown => Some(START_MARKER.to_string()),
            _ => None,
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        if self.phase == GamePhase::Countdown {
            return GAME_DURATION_SECS;
        }
        let elapsed = (self.clock_ms - self.play_started_ms) / 1000;
        GAME_DURATION_SECS.saturating_sub(elapsed)
    }
}

fn is_catch(obj_x: f64, obj_y: f64, hand_x: f64, hand_y: f64) -> bool {
    let (dx, dy) = (obj_x - hand_x, obj_y - hand_y);
    (dx * dx + dy * dy).sqrt() < CATCH_DISTANCE
}
