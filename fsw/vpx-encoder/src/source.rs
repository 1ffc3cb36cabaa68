use frame_shm::{ShmBuffer, Timestamp};
use tracing::warn;

/// The shared pixel buffer as seen by its single consumer.
pub trait SharedBuffer {
    /// `false` once the producer has torn the buffer down.
    fn valid(&self) -> bool;

    /// Blocks until the producer announces a frame or tears the buffer down.
    fn wait(&self) -> Result<(), frame_shm::Error>;

    fn lock(&self) -> Result<(), frame_shm::Error>;

    fn unlock(&self) -> Result<(), frame_shm::Error>;

    /// Capture time the producer attached to the current frame.
    fn timestamp(&self) -> Option<Timestamp>;

    /// Raw I420 bytes. Only stable while the lock is held.
    fn data(&self) -> &[u8];
}

impl SharedBuffer for ShmBuffer {
    fn valid(&self) -> bool {
        ShmBuffer::valid(self)
    }

    fn wait(&self) -> Result<(), frame_shm::Error> {
        ShmBuffer::wait(self).map(|_| ())
    }

    fn lock(&self) -> Result<(), frame_shm::Error> {
        ShmBuffer::lock(self)
    }

    fn unlock(&self) -> Result<(), frame_shm::Error> {
        ShmBuffer::unlock(self)
    }

    fn timestamp(&self) -> Option<Timestamp> {
        ShmBuffer::timestamp(self)
    }

    fn data(&self) -> &[u8] {
        ShmBuffer::data(self)
    }
}

/// Consumer side of the frame handoff.
pub struct FrameSource<B> {
    buffer: B,
}

impl<B: SharedBuffer> FrameSource<B> {
    pub fn new(buffer: B) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn valid(&self) -> bool {
        self.buffer.valid()
    }

    /// Blocks until the next frame arrives and returns the time the wait ended.
    /// Returns `None` once the buffer is no longer valid.
    pub fn wait_for_frame(&self) -> Result<Option<Timestamp>, frame_shm::Error> {
        if !self.buffer.valid() {
            return Ok(None);
        }
        self.buffer.wait()?;
        let received = Timestamp::now();
        if !self.buffer.valid() {
            return Ok(None);
        }
        Ok(Some(received))
    }

    /// Runs `f` over the frame bytes and its capture time while holding the buffer
    /// lock. The lock is released however `f` exits, panics included.
    ///
    /// The capture time is the producer's timestamp, or `received` when the
    /// producer did not attach one.
    pub fn with_lock<R>(
        &self,
        received: Timestamp,
        f: impl FnOnce(&[u8], Timestamp) -> R,
    ) -> Result<R, frame_shm::Error> {
        self.buffer.lock()?;
        let _guard = LockGuard {
            buffer: &self.buffer,
        };
        let sample_time = self.buffer.timestamp().unwrap_or(received);
        Ok(f(self.buffer.data(), sample_time))
    }
}

struct LockGuard<'a, B: SharedBuffer> {
    buffer: &'a B,
}

impl<B: SharedBuffer> Drop for LockGuard<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.buffer.unlock() {
            warn!(?err, "failed to unlock shared memory");
        }
    }
}
