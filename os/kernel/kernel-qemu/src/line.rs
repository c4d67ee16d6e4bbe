use core::fmt;

/// Fixed-capacity line buffer; output beyond the capacity is cut and the
/// line ends in `...`.
pub struct LineBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    /// Terminates the line and returns its bytes.
    pub fn finish(&mut self) -> &[u8] {
        const ELLIPSIS: &[u8] = b"...\n";
        if self.truncated {
            let start = N.saturating_sub(ELLIPSIS.len()).min(self.len);
            let end = (start + ELLIPSIS.len()).min(N);
            self.buf[start..end].copy_from_slice(&ELLIPSIS[..end - start]);
            self.len = end;
        } else if self.len < N {
            self.buf[self.len] = b'\n';
            self.len += 1;
        }
        &self.buf[..self.len]
    }
}

impl<const N: usize> fmt::Write for LineBuffer<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // Keep one byte for the newline.
        let room = N.saturating_sub(1).saturating_sub(self.len);
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}
