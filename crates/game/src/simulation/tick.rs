use std::time::Duration;

/// Longest frame time fed into the accumulator; a stall beyond this is not caught up.
const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

pub struct FixedTimestep {
    tick_rate: u32,
    dt: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");
        Self {
            tick_rate,
            dt: Duration::from_secs(1) / tick_rate,
            accumulator: Duration::ZERO,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_FRAME_TIME);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Time until the next tick is due.
    pub fn until_next_tick(&self) -> Duration {
        self.dt.saturating_sub(self.accumulator)
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.dt.as_secs_f32()
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

/// Runs `tick_fn` once per elapsed fixed step, counting ticks.
pub struct SimulationLoop<F> {
    timestep: FixedTimestep,
    tick: u64,
    tick_fn: F,
}

impl<F> SimulationLoop<F>
where
    F: FnMut(u64, Duration),
{
    pub fn new(tick_rate: u32, tick_fn: F) -> Self {
        Self {
            timestep: FixedTimestep::new(tick_rate),
            tick: 0,
            tick_fn,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn timestep(&self) -> &FixedTimestep {
        &self.timestep
    }

    /// Advances by `delta` of wall time and returns how many ticks ran.
    pub fn update(&mut self, delta: Duration) -> u32 {
        self.timestep.accumulate(delta);

        let mut ticks_run = 0;
        while self.timestep.consume_tick() {
            self.tick += 1;
            (self.tick_fn)(self.tick, self.timestep.dt());
            ticks_run += 1;
        }

        ticks_run
    }

    pub fn interpolation_alpha(&self) -> f32 {
        self.timestep.alpha()
    }
}
