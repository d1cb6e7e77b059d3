use crate::core::ring_buffer::SampleRing;

/// One [`SampleRing`] per channel, all sharing a cursor position.
#[derive(Debug, Clone)]
pub struct ChannelRings {
    rings: Vec<SampleRing>,
}

/// Per-channel input history. Offset 0 is the next sample to be written;
/// negative offsets reach back into history.
pub type InputHistory = ChannelRings;

/// Per-channel overlap-add accumulator. Offset 0 is the next sample to be
/// read.
pub type OutputAccumulator = ChannelRings;

impl ChannelRings {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            rings: (0..channels).map(|_| SampleRing::with_capacity(capacity)).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.rings.len()
    }

    pub fn capacity(&self) -> usize {
        self.rings.first().map_or(0, SampleRing::capacity)
    }

    #[inline]
    pub fn get(&self, channel: usize, offset: isize) -> f32 {
        self.rings[channel].get(offset)
    }

    pub fn read(&self, channel: usize, offset: isize, out: &mut [f32]) {
        self.rings[channel].read(offset, out);
    }

    pub fn write(&mut self, channel: usize, offset: isize, samples: &[f32]) {
        self.rings[channel].write(offset, samples);
    }

    pub fn add(&mut self, channel: usize, offset: isize, samples: &[f32]) {
        self.rings[channel].add(offset, samples);
    }

    #[inline]
    pub fn scale(&mut self, channel: usize, offset: isize, gain: f32) {
        let ring = &mut self.rings[channel];
        let value = ring.get(offset);
        ring.write(offset, &[value * gain]);
    }

    /// Advances every channel, optionally zeroing the samples passed over.
    pub fn advance(&mut self, samples: usize, clear: bool) {
        for ring in &mut self.rings {
            ring.advance(samples, clear);
        }
    }

    /// Copies contents and cursors without reallocating.
    pub fn copy_from(&mut self, other: &ChannelRings) {
        for (dst, src) in self.rings.iter_mut().zip(other.rings.iter()) {
            dst.copy_from(src);
        }
    }

    pub fn clear(&mut self) {
        for ring in &mut self.rings {
            ring.clear();
        }
    }
}
