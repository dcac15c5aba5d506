use std::time::Instant;

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or virtual time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    /// Creates a new time sample.
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
///
/// The live view runs on this source; `start_offset` lets a session resume
/// at a requested virtual timestamp.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    start_offset: f32,
    frame: u64,
}

impl SystemTimeSource {
    /// Creates a system time source starting at zero seconds.
    pub fn new() -> Self {
        Self::with_offset(0.0)
    }

    /// Creates a system time source whose first sample reads `offset`.
    pub fn with_offset(offset: f32) -> Self {
        Self {
            origin: Instant::now(),
            start_offset: offset,
            frame: 0,
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let elapsed = self.origin.elapsed();
        let sample = TimeSample::new(self.start_offset + elapsed.as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that always reports a fixed timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f32,
}

impl FixedTimeSource {
    /// Constructs a fixed time source that always returns the provided time.
    pub fn new(time: f32) -> Self {
        Self { time }
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {}

    fn sample(&mut self) -> TimeSample {
        TimeSample::new(self.time, 0)
    }
}

/// Deterministic capture clock: the nth sample is exactly
/// `offset + n / framerate`, independent of wall time.
///
/// Two captures with the same offset and framerate therefore sample an
/// identical virtual-time sequence regardless of host scheduling.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    offset: f32,
    framerate: u32,
    frame: u64,
}

impl SteppedTimeSource {
    /// Creates a stepped source; a zero framerate is clamped to one step/s.
    pub fn new(offset: f32, framerate: u32) -> Self {
        Self {
            offset,
            framerate: framerate.max(1),
            frame: 0,
        }
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let seconds = self.offset + self.frame as f32 / self.framerate as f32;
        let sample = TimeSample::new(seconds, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource + Send>;
