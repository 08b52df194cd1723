use std::time::{Duration, Instant};

use bitflags::bitflags;
use glam::Vec3;

use crate::message::{INPUT_SLOTS, PlayerInputMessage};

bitflags! {
    /// Discrete controls carried by a [`PlayerInputMessage`], one bit per slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputKeys: u8 {
        const FORWARD = 1 << 0;
        const BACK = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const FIRE_PRIMARY = 1 << 4;
        const FIRE_SECONDARY = 1 << 5;
        const WEAPON_NEXT = 1 << 6;
        const WEAPON_PREV = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSlot {
    Forward,
    Back,
    Left,
    Right,
    FirePrimary,
    FireSecondary,
    WeaponNext,
    WeaponPrev,
}

impl InputSlot {
    pub const ALL: [InputSlot; INPUT_SLOTS] = [
        InputSlot::Forward,
        InputSlot::Back,
        InputSlot::Left,
        InputSlot::Right,
        InputSlot::FirePrimary,
        InputSlot::FireSecondary,
        InputSlot::WeaponNext,
        InputSlot::WeaponPrev,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn key(self) -> InputKeys {
        InputKeys::from_bits_truncate(1 << self.index())
    }
}

/// Where the sampler reads local controls from: keyboard, gamepad or a bot.
pub trait InputSource {
    fn is_triggered(&self, slot: InputSlot) -> bool;

    fn aim_target(&self) -> Vec3;
}

/// Rolling trigger history of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    history: u8,
    triggered: bool,
}

impl InputState {
    /// Called every render frame; a trigger anywhere between two sends counts.
    pub fn update(&mut self, triggered: bool) {
        self.triggered |= triggered;
    }

    /// Shifts the accumulated trigger into the history and returns the new byte.
    pub fn flush(&mut self) -> u8 {
        self.history = (self.history << 1) | u8::from(self.triggered);
        self.triggered = false;
        self.history
    }

    pub fn history(&self) -> u8 {
        self.history
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }
}

/// Samples local input every frame and produces input messages at a fixed rate.
#[derive(Debug, Clone)]
pub struct InputSampler {
    states: [InputState; INPUT_SLOTS],
    aim: Vec3,
    frame: u32,
    interval: Duration,
    last_send: Option<Instant>,
}

impl InputSampler {
    pub fn new(frequency: u32) -> Self {
        assert!(frequency > 0, "input frequency must be positive");
        Self {
            states: [InputState::default(); INPUT_SLOTS],
            aim: Vec3::ZERO,
            frame: 0,
            interval: Duration::from_millis(1000 / u64::from(frequency)),
            last_send: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frame number of the last message produced; 0 before the first.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn sample(&mut self, source: &impl InputSource) {
        for slot in InputSlot::ALL {
            self.states[slot.index()].update(source.is_triggered(slot));
        }
        self.aim = source.aim_target();
    }

    /// The next input message once the send interval has passed since the last one.
    pub fn poll(&mut self, now: Instant) -> Option<PlayerInputMessage> {
        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_send = Some(now);
        self.frame = self.frame.wrapping_add(1).max(1);

        let mut history = [0u8; INPUT_SLOTS];
        for (byte, state) in history.iter_mut().zip(self.states.iter_mut()) {
            *byte = state.flush();
        }
        Some(PlayerInputMessage::new(self.frame, history, self.aim))
    }
}

const FRAME_WRAP_THRESHOLD: u32 = u32::MAX / 2;

/// Whether input frame `f1` was produced after `f2`, allowing for the counter wrapping.
#[inline]
pub fn frame_greater_than(f1: u32, f2: u32) -> bool {
    ((f1 > f2) && (f1 - f2 <= FRAME_WRAP_THRESHOLD))
        || ((f1 < f2) && (f2 - f1 > FRAME_WRAP_THRESHOLD))
}

/// Slots triggered in the most recent sample of `input`.
pub fn keys_down(input: &PlayerInputMessage) -> InputKeys {
    InputSlot::ALL
        .into_iter()
        .filter(|slot| input.is_down(slot.index()))
        .fold(InputKeys::empty(), |keys, slot| keys | slot.key())
}

/// Slots triggered at any point within the last `samples` sends.
pub fn keys_pressed_within(input: &PlayerInputMessage, samples: u32) -> InputKeys {
    let mask = match samples {
        0 => 0,
        1..=7 => (1u8 << samples) - 1,
        _ => u8::MAX,
    };
    InputSlot::ALL
        .into_iter()
        .filter(|slot| input.history[slot.index()] & mask != 0)
        .fold(InputKeys::empty(), |keys, slot| keys | slot.key())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct Scripted {
        held: Cell<InputKeys>,
        aim: Vec3,
    }

    impl InputSource for Scripted {
        fn is_triggered(&self, slot: InputSlot) -> bool {
            self.held.get().contains(slot.key())
        }

        fn aim_target(&self) -> Vec3 {
            self.aim
        }
    }

    #[test]
    fn history_keeps_samples_in_order() {
        let samples = [true, false, true, true, false];
        let mut state = InputState::default();
        for &sample in &samples {
            state.update(sample);
            state.flush();
        }
        assert_eq!(state.history(), 0b10110);
    }

    #[test]
    fn short_press_between_sends_is_kept() {
        let mut state = InputState::default();
        state.update(false);
        state.update(true);
        state.update(false);
        assert!(state.is_triggered());
        assert_eq!(state.flush(), 1);
        assert_eq!(state.flush(), 0b10);
    }

    #[test]
    fn sends_are_rate_limited_independent_of_frames() {
        let start = Instant::now();
        let mut sampler = InputSampler::new(30);
        let source = Scripted::default();

        let mut sent = Vec::new();
        // 240 fps for one second.
        for frame in 0..240u64 {
            let now = start + Duration::from_micros(frame * 1_000_000 / 240);
            sampler.sample(&source);
            if let Some(message) = sampler.poll(now) {
                sent.push(message.frame);
            }
        }
        assert_eq!(sent.len(), 30);
        assert_eq!(sent, (1..=30).collect::<Vec<_>>());
    }

    #[test]
    fn frames_stay_ordered_across_wrap() {
        let start = Instant::now();
        let mut sampler = InputSampler::new(10);
        sampler.frame = u32::MAX;
        let next = sampler.poll(start).unwrap();
        assert_eq!(next.frame, 1);

        assert!(frame_greater_than(next.frame, u32::MAX));
        assert!(!frame_greater_than(u32::MAX, next.frame));
        assert!(frame_greater_than(5, 4));
        assert!(!frame_greater_than(4, 4));
        assert!(!frame_greater_than(3, 4));
    }

    #[test]
    fn history_does_not_depend_on_frame_rate() {
        let start = Instant::now();
        // Fire is tapped from 20 to 40 ms into every other 100 ms send interval.
        let histories = |fps: u64| {
            let mut sampler = InputSampler::new(10);
            let source = Scripted::default();
            let mut sent = Vec::new();
            for frame in 0..fps {
                let elapsed = Duration::from_micros(frame * 1_000_000 / fps);
                let ms = elapsed.as_millis();
                let held = (ms / 100) % 2 == 1 && (20..40).contains(&(ms % 100));
                source.held.set(if held {
                    InputKeys::FIRE_PRIMARY
                } else {
                    InputKeys::empty()
                });
                sampler.sample(&source);
                if let Some(message) = sampler.poll(start + elapsed) {
                    sent.push(message.history);
                }
            }
            sent
        };

        let slow = histories(60);
        let fast = histories(240);
        assert_eq!(slow.len(), 10);
        let fire = InputSlot::FirePrimary.index();
        assert_eq!(slow[4][fire], 0b0101);
        assert_eq!(slow, fast);
    }

    #[test]
    fn sampled_keys_reach_the_message() {
        let start = Instant::now();
        let mut sampler = InputSampler::new(10);
        let source = Scripted {
            held: Cell::new(InputKeys::FORWARD | InputKeys::FIRE_PRIMARY),
            aim: Vec3::new(1.0, 0.0, -4.0),
        };

        sampler.sample(&source);
        let first = sampler.poll(start).unwrap();
        assert_eq!(keys_down(&first), InputKeys::FORWARD | InputKeys::FIRE_PRIMARY);
        assert_eq!(first.aim, Vec3::new(1.0, 0.0, -4.0));

        source.held.set(InputKeys::empty());
        sampler.sample(&source);
        assert!(sampler.poll(start + Duration::from_millis(50)).is_none());
        let second = sampler.poll(start + Duration::from_millis(100)).unwrap();
        assert_eq!(second.frame, 2);
        assert_eq!(keys_down(&second), InputKeys::empty());
        assert_eq!(
            keys_pressed_within(&second, 2),
            InputKeys::FORWARD | InputKeys::FIRE_PRIMARY
        );
    }
}
