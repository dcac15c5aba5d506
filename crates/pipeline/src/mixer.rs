/// A capability producing a scalar audio-reactive reading per frame.
///
/// Readings must be non-blocking and return `0.0` while the source is not
/// currently producing sound.
pub trait SignalSource {
    fn reading(&mut self) -> f32;
}

/// Combines the active signal sources into the per-frame renderer input.
///
/// Readings are *summed*, not averaged: two simultaneous sources are meant
/// to be louder than either alone. A total of exactly zero is reported as
/// `None` so the renderer's own idle behaviour is preserved instead of
/// being forced to a reset.
#[derive(Default)]
pub struct SignalMixer {
    sources: Vec<Box<dyn SignalSource>>,
}

impl SignalMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: Box<dyn SignalSource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Sums all source readings for this frame.
    ///
    /// Runs at the live renderer's native frame rate, so it must never
    /// block; misbehaving readings (negative or non-finite) count as
    /// silence.
    pub fn sample(&mut self) -> Option<f32> {
        let total: f32 = self
            .sources
            .iter_mut()
            .map(|source| {
                let reading = source.reading();
                if reading.is_finite() && reading > 0.0 {
                    reading
                } else {
                    0.0
                }
            })
            .sum();
        if total > 0.0 {
            Some(total)
        } else {
            None
        }
    }
}
