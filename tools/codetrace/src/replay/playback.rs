//! Playback state machine for the replay scrubber.
//!
//! `Idle -> Playing -> Idle | Finished`. A play cycle owns exactly one timer
//! handle; any handle from an earlier cycle is stale and its ticks are
//! dropped.

use crate::errors::CodetraceError;
use crate::logging::append_run_log;
use crate::replay::replayer::{clamp_progress, step_back, step_forward, TimelineReplayer};
use crate::runtime::Clock;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_TICK_STEP: f64 = 1.0;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Finished,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone)]
pub struct Playback {
    state: PlaybackState,
    progress: f64,
    tick_step: f64,
    next_timer: u64,
    active_timer: Option<TimerHandle>,
}

impl Playback {
    pub fn new(tick_step: f64) -> Self {
        Self {
            state: PlaybackState::Idle,
            progress: 0.0,
            tick_step,
            next_timer: 1,
            active_timer: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn active_timer(&self) -> Option<TimerHandle> {
        self.active_timer
    }

    /// Play when idle or finished, pause when playing. Returns the timer
    /// handle of a newly started cycle.
    pub fn toggle_play(&mut self) -> Option<TimerHandle> {
        match self.state {
            PlaybackState::Playing => {
                self.transition(PlaybackState::Idle);
                self.active_timer = None;
                None
            }
            PlaybackState::Idle | PlaybackState::Finished => {
                if self.progress <= 0.0 || self.progress >= 100.0 {
                    self.progress = 0.0;
                }
                let handle = TimerHandle(self.next_timer);
                self.next_timer += 1;
                self.active_timer = Some(handle);
                self.transition(PlaybackState::Playing);
                Some(handle)
            }
        }
    }

    /// Advance one step. Ticks from anything but the active timer are ignored.
    /// Returns the new progress when the tick was applied.
    pub fn tick(&mut self, handle: TimerHandle) -> Option<f64> {
        if self.state != PlaybackState::Playing || self.active_timer != Some(handle) {
            return None;
        }
        self.progress = clamp_progress(self.progress + self.tick_step);
        if self.progress >= 100.0 {
            self.active_timer = None;
            self.transition(PlaybackState::Finished);
        }
        Some(self.progress)
    }

    pub fn step_back(&mut self, step: f64) -> f64 {
        self.progress = step_back(self.progress, step);
        self.progress
    }

    pub fn step_forward(&mut self, step: f64) -> f64 {
        self.progress = step_forward(self.progress, step);
        self.progress
    }

    pub fn seek(&mut self, progress_percent: f64) -> f64 {
        self.progress = clamp_progress(progress_percent);
        self.progress
    }

    /// Teardown: drop the timer and go idle.
    pub fn stop(&mut self) {
        self.active_timer = None;
        if self.state == PlaybackState::Playing {
            self.transition(PlaybackState::Idle);
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        append_run_log(
            "debug",
            "playback.transition",
            json!({
                "from": self.state.as_str(),
                "to": next.as_str(),
                "progress": self.progress,
            }),
        );
        self.state = next;
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_STEP)
    }
}

/// Runs one play cycle on an injected clock, handing each frame to a
/// callback. The callback returns `false` to stop early.
pub struct PlaybackDriver<'c> {
    clock: &'c dyn Clock,
    interval: Duration,
}

impl<'c> PlaybackDriver<'c> {
    pub fn new(clock: &'c dyn Clock, interval_ms: u64) -> Self {
        Self {
            clock,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub fn run(
        &self,
        playback: &mut Playback,
        replayer: &TimelineReplayer<'_>,
        on_frame: &mut dyn FnMut(f64, &str) -> Result<bool, CodetraceError>,
    ) -> Result<PlaybackState, CodetraceError> {
        let handle = match playback.active_timer() {
            Some(handle) if playback.state() == PlaybackState::Playing => handle,
            _ => match playback.toggle_play() {
                Some(handle) => handle,
                None => return Ok(playback.state()),
            },
        };
        append_run_log(
            "info",
            "playback.cycle.started",
            json!({
                "progress": playback.progress(),
                "interval_ms": self.interval.as_millis() as u64,
            }),
        );

        let mut deadline = self.clock.now();
        while playback.state() == PlaybackState::Playing {
            deadline += self.interval;
            self.clock.sleep_until(deadline)?;
            let Some(progress) = playback.tick(handle) else {
                break;
            };
            let keep_going = on_frame(progress, replayer.code_at_progress(progress));
            match keep_going {
                Ok(true) => {}
                Ok(false) => {
                    playback.stop();
                    break;
                }
                Err(e) => {
                    playback.stop();
                    return Err(e);
                }
            }
        }

        append_run_log(
            "info",
            "playback.cycle.ended",
            json!({
                "state": playback.state().as_str(),
                "progress": playback.progress(),
            }),
        );
        Ok(playback.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeClock;
    use crate::session::{Event, EventKind, DEFAULT_TEMPLATE};

    #[test]
    fn stale_timer_handles_are_ignored() {
        let mut playback = Playback::new(10.0);
        let first = playback.toggle_play().expect("start");
        assert_eq!(playback.tick(first), Some(10.0));
        assert_eq!(playback.toggle_play(), None);
        let second = playback.toggle_play().expect("restart");
        assert_ne!(first, second);
        assert_eq!(playback.tick(first), None);
        assert_eq!(playback.tick(second), Some(20.0));
    }

    #[test]
    fn reaching_the_end_finishes_and_clears_the_timer() {
        let mut playback = Playback::new(60.0);
        let handle = playback.toggle_play().expect("start");
        playback.tick(handle);
        assert_eq!(playback.tick(handle), Some(100.0));
        assert_eq!(playback.state(), PlaybackState::Finished);
        assert_eq!(playback.active_timer(), None);
        assert_eq!(playback.tick(handle), None);

        playback.toggle_play().expect("replay from start");
        assert_eq!(playback.progress(), 0.0);
        assert_eq!(playback.state(), PlaybackState::Playing);
    }

    #[test]
    fn resuming_mid_timeline_keeps_progress() {
        let mut playback = Playback::default();
        playback.seek(40.0);
        playback.toggle_play().expect("start");
        assert_eq!(playback.progress(), 40.0);
        playback.stop();
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert_eq!(playback.active_timer(), None);
    }

    #[test]
    fn steps_do_not_change_play_state() {
        let mut playback = Playback::default();
        let handle = playback.toggle_play().expect("start");
        assert_eq!(playback.step_forward(10.0), 10.0);
        assert_eq!(playback.step_back(25.0), 0.0);
        assert_eq!(playback.state(), PlaybackState::Playing);
        assert_eq!(playback.tick(handle), Some(1.0));
    }

    #[test]
    fn driver_plays_to_the_end_on_the_injected_clock() {
        let events = vec![
            Event {
                timestamp: 0,
                kind: EventKind::Keystroke,
                description: "Added 1 character".to_string(),
                buffer_snapshot: "a".to_string(),
                detail: None,
            },
            Event {
                timestamp: 1000,
                kind: EventKind::Run,
                description: "Executed code".to_string(),
                buffer_snapshot: "ab".to_string(),
                detail: None,
            },
        ];
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        let clock = FakeClock::default();
        let driver = PlaybackDriver::new(&clock, 300);
        let mut playback = Playback::new(25.0);
        let mut frames = Vec::new();

        let end = driver
            .run(&mut playback, &replayer, &mut |progress, code| {
                frames.push((progress, code.to_string()));
                Ok(true)
            })
            .expect("run");

        assert_eq!(end, PlaybackState::Finished);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], (100.0, "ab".to_string()));
        assert_eq!(frames[0], (25.0, "a".to_string()));
        assert_eq!(clock.sleeps().len(), 4);
        assert_eq!(clock.now_unix_ms(), 1200);
    }

    #[test]
    fn driver_stops_when_the_frame_callback_declines() {
        let replayer = TimelineReplayer::new(&[], DEFAULT_TEMPLATE);
        let clock = FakeClock::default();
        let driver = PlaybackDriver::new(&clock, 10);
        let mut playback = Playback::default();
        let mut seen = 0;
        let end = driver
            .run(&mut playback, &replayer, &mut |_, code| {
                assert_eq!(code, DEFAULT_TEMPLATE);
                seen += 1;
                Ok(seen < 3)
            })
            .expect("run");
        assert_eq!(end, PlaybackState::Idle);
        assert_eq!(seen, 3);
        assert_eq!(playback.active_timer(), None);
    }
}
