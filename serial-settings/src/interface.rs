use embedded_io::{ErrorType, Read, ReadReady, Write, WriteReady};

/// A serial interface that never blocks on output.
///
/// # Note
/// Output is discarded while the host is not reading. The number of discarded bytes is counted.
pub struct BestEffortInterface<T> {
    inner: T,
    discarded: u32,
}

impl<T: Write + WriteReady + Read + ReadReady> BestEffortInterface<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            discarded: 0,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Bytes of output discarded since construction.
    pub fn discarded(&self) -> u32 {
        self.discarded
    }
}

impl<T: ErrorType> ErrorType for BestEffortInterface<T> {
    type Error = T::Error;
}

impl<T: Write + WriteReady> Write for BestEffortInterface<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let written = match self.inner.write_ready() {
            Ok(true) => self.inner.write(buf).unwrap_or(0),
            _ => 0,
        };
        self.discarded = self
            .discarded
            .wrapping_add((buf.len() - written.min(buf.len())) as u32);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush()
    }
}

impl<T: Read> Read for BestEffortInterface<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.inner.read(buf)
    }
}

impl<T: ReadReady> ReadReady for BestEffortInterface<T> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.inner.read_ready()
    }
}
