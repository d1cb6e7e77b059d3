//! Fixed-capacity, offset-addressed ring buffer for real-time audio paths.

/// Circular sample buffer addressed relative to a moving cursor.
///
/// Offsets may be negative (history behind the cursor) or positive (space
/// ahead of it) and wrap modulo the capacity. The buffer never allocates after
/// construction and never shifts memory; callers keep every access within one
/// capacity of the cursor.
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: Vec<f32>,
    pos: usize,
}

impl SampleRing {
    /// Creates a zero-filled ring buffer with fixed capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: vec![0.0; cap.max(1)],
            pos: 0,
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Zeroes the contents and rewinds the cursor.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.pos = 0;
    }

    #[inline]
    fn index(&self, offset: isize) -> usize {
        let cap = self.data.len() as isize;
        (self.pos as isize + offset).rem_euclid(cap) as usize
    }

    /// Splits `len` samples starting at `offset` into the (up to) two
    /// contiguous spans they occupy.
    #[inline]
    fn spans(&self, offset: isize, len: usize) -> (usize, usize, usize) {
        debug_assert!(len <= self.capacity(), "ring access of {len} exceeds capacity");
        let start = self.index(offset);
        let first = len.min(self.capacity() - start);
        (start, first, len - first)
    }

    /// Returns the sample at `offset` from the cursor.
    #[inline]
    pub fn get(&self, offset: isize) -> f32 {
        self.data[self.index(offset)]
    }

    /// Overwrites samples starting at `offset`.
    pub fn write(&mut self, offset: isize, input: &[f32]) {
        let (start, first, second) = self.spans(offset, input.len());
        self.data[start..start + first].copy_from_slice(&input[..first]);
        self.data[..second].copy_from_slice(&input[first..]);
    }

    /// Adds samples into the buffer starting at `offset`.
    pub fn add(&mut self, offset: isize, input: &[f32]) {
        let (start, first, second) = self.spans(offset, input.len());
        for (d, &s) in self.data[start..start + first].iter_mut().zip(&input[..first]) {
            *d += s;
        }
        for (d, &s) in self.data[..second].iter_mut().zip(&input[first..]) {
            *d += s;
        }
    }

    /// Copies samples starting at `offset` into `out`.
    pub fn read(&self, offset: isize, out: &mut [f32]) {
        let (start, first, second) = self.spans(offset, out.len());
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..].copy_from_slice(&self.data[..second]);
    }

    /// Zeroes `len` samples starting at `offset`.
    pub fn zero(&mut self, offset: isize, len: usize) {
        let (start, first, second) = self.spans(offset, len);
        self.data[start..start + first].fill(0.0);
        self.data[..second].fill(0.0);
    }

    /// Moves the cursor forward by `n` samples, optionally zeroing the
    /// samples it passes over.
    pub fn advance(&mut self, n: usize, clear: bool) {
        if clear {
            self.zero(0, n.min(self.capacity()));
        }
        self.pos = (self.pos + n % self.capacity()) % self.capacity();
    }

    /// Copies contents and cursor from a buffer of the same capacity.
    pub fn copy_from(&mut self, other: &SampleRing) {
        debug_assert_eq!(self.capacity(), other.capacity());
        self.data.copy_from_slice(&other.data);
        self.pos = other.pos;
    }
}

#[cfg(test)]
mod tests {
    use super::SampleRing;

    #[test]
    fn write_read_wrap() {
        let mut rb = SampleRing::with_capacity(4);
        rb.write(0, &[1.0, 2.0, 3.0]);
        rb.advance(3, false);
        rb.write(0, &[4.0, 5.0]);
        let mut out = [0.0; 4];
        rb.read(-2, &mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
        assert_eq!(rb.get(-1), 3.0);
    }

    #[test]
    fn add_accumulates() {
        let mut rb = SampleRing::with_capacity(5);
        rb.advance(3, false);
        rb.add(0, &[1.0, 1.0, 1.0]);
        rb.add(1, &[0.5, 0.5]);
        let mut out = [0.0; 3];
        rb.read(0, &mut out);
        assert_eq!(out, [1.0, 1.5, 1.5]);
    }

    #[test]
    fn advance_clears_passed_samples() {
        let mut rb = SampleRing::with_capacity(4);
        rb.write(0, &[1.0, 2.0, 3.0, 4.0]);
        rb.advance(2, true);
        let mut out = [0.0; 4];
        rb.read(-2, &mut out);
        assert_eq!(out, [0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn copy_from_matches_source() {
        let mut a = SampleRing::with_capacity(3);
        a.write(0, &[7.0, 8.0, 9.0]);
        a.advance(1, false);
        let mut b = SampleRing::with_capacity(3);
        b.copy_from(&a);
        assert_eq!(b.get(0), 8.0);
        assert_eq!(b.get(-1), 7.0);
    }
}
