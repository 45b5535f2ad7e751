use std::io::{self, Write};

/// A lossy sink that keeps only the first and the last `capacity` bytes written to it.
///
/// `BoundedOutput` is meant for building error messages from the diagnostic output of a
/// command whose output may be arbitrarily large: memory use stays below `2 * capacity`
/// bytes no matter how much is written. [`bytes`](Self::bytes) reconstructs the retained
/// data, with a marker telling how many bytes were dropped from the middle.
///
/// Writing never fails and always reports the whole buffer as consumed.
#[derive(Debug, Clone)]
pub struct BoundedOutput {
    capacity: usize,
    prefix: Vec<u8>,
    // ring buffer once suffix.len() == capacity
    suffix: Vec<u8>,
    suffix_off: usize,
    skipped: u64,
}

impl BoundedOutput {
    /// Create a buffer retaining at most `capacity` leading and `capacity` trailing bytes.
    pub fn new(capacity: usize) -> BoundedOutput {
        BoundedOutput {
            capacity,
            prefix: Vec::new(),
            suffix: Vec::new(),
            suffix_off: 0,
            skipped: 0,
        }
    }

    /// The maximum size of each of the retained head and tail.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes written but not retained.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Returns the retained data.
    ///
    /// If nothing was dropped, this is exactly the data written. Otherwise it is the
    /// head, a line saying how many bytes were omitted, and the tail in the order it was
    /// written.
    pub fn bytes(&self) -> Vec<u8> {
        if self.skipped == 0 {
            let mut out = Vec::with_capacity(self.prefix.len() + self.suffix.len());
            out.extend_from_slice(&self.prefix);
            out.extend_from_slice(&self.suffix);
            return out;
        }
        let marker = format!("\n... omitting {} bytes ...\n", self.skipped);
        let mut out = Vec::with_capacity(self.prefix.len() + marker.len() + self.suffix.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(marker.as_bytes());
        out.extend_from_slice(&self.suffix[self.suffix_off..]);
        out.extend_from_slice(&self.suffix[..self.suffix_off]);
        out
    }

    /// Appends as much of `data` to `dst` as fits under the capacity and returns the rest.
    fn fill<'a>(capacity: usize, dst: &mut Vec<u8>, data: &'a [u8]) -> &'a [u8] {
        let room = capacity.saturating_sub(dst.len());
        let take = room.min(data.len());
        dst.extend_from_slice(&data[..take]);
        &data[take..]
    }
}

impl Write for BoundedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = Self::fill(self.capacity, &mut self.prefix, buf);

        // Only the last `capacity` bytes can end up in the suffix.
        if data.len() > self.capacity {
            let overage = data.len() - self.capacity;
            data = &data[overage..];
            self.skipped += overage as u64;
        }
        data = Self::fill(self.capacity, &mut self.suffix, data);

        // The suffix is full if anything is left; overwrite it in a circle.
        while !data.is_empty() {
            let n = (self.capacity - self.suffix_off).min(data.len());
            self.suffix[self.suffix_off..self.suffix_off + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            self.skipped += n as u64;
            self.suffix_off += n;
            if self.suffix_off == self.capacity {
                self.suffix_off = 0;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
