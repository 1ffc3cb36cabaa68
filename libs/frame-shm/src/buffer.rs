use std::{
    cell::UnsafeCell,
    fs::{self, OpenOptions},
    io,
    mem::MaybeUninit,
    path::{Path, PathBuf},
    slice,
    sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
};

use memmap2::MmapRaw;
use tracing::{debug, warn};

use crate::{Error, Timestamp};

const MAGIC: u64 = u64::from_le_bytes(*b"FRAMESHM");
const VERSION: u32 = 1;

/// Offset of the frame data region from the start of the segment.
pub const DATA_OFFSET: usize = size_of::<Header>().next_multiple_of(64);

/// Directory that backs POSIX shared memory objects on Linux.
pub const SHM_DIR: &str = "/dev/shm";

#[repr(C)]
struct Header {
    magic: AtomicU64,
    version: AtomicU32,
    closed: AtomicU32,
    data_len: AtomicU64,
    seq: AtomicU64,
    timestamp: AtomicI64,
    has_timestamp: AtomicU32,
    _reserved: u32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

/// Result of [`ShmBuffer::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The producer published a new frame.
    Frame,
    /// The producer closed the segment.
    Closed,
}

/// A mapped shared-memory frame segment.
///
/// The handle that created the segment owns it: dropping that handle closes the
/// segment, waking every waiter, and unlinks the backing file.
pub struct ShmBuffer {
    map: MmapRaw,
    path: PathBuf,
    owner: bool,
    /// Data region length, checked against the mapping when it was made.
    data_len: usize,
}

/// Resolves a shared memory name like `video0` or `/video0` to its backing file.
pub fn shm_path(name: &str) -> Result<PathBuf, Error> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(Path::new(SHM_DIR).join(trimmed))
}

impl ShmBuffer {
    /// Attaches to an existing named segment.
    pub fn attach(name: &str) -> Result<Self, Error> {
        Self::attach_at(shm_path(name)?)
    }

    /// Creates a segment at `path` with room for `data_len` bytes of frame data.
    pub fn create_at(path: impl AsRef<Path>, data_len: usize) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len((DATA_OFFSET + data_len) as u64)?;
        let map = MmapRaw::map_raw(&file)?;
        let buffer = Self {
            map,
            path,
            owner: true,
            data_len,
        };

        // the file is zero filled, so the header is a valid value before init
        let header = buffer.header();
        header.data_len.store(data_len as u64, Ordering::Relaxed);
        header.version.store(VERSION, Ordering::Relaxed);
        unsafe { init_sync(header)? };
        // magic goes last so attachers never observe a half initialized header
        header.magic.store(MAGIC, Ordering::Release);

        debug!(path = ?buffer.path, data_len, "created shared memory segment");
        Ok(buffer)
    }

    pub fn attach_at(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len < DATA_OFFSET as u64 {
            return Err(Error::TooSmall { len });
        }
        let map = MmapRaw::map_raw(&file)?;
        let mut buffer = Self {
            map,
            path,
            owner: false,
            data_len: 0,
        };

        let header = buffer.header();
        if header.magic.load(Ordering::Acquire) != MAGIC {
            return Err(Error::BadMagic);
        }
        let version = header.version.load(Ordering::Relaxed);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let data_len = header.data_len.load(Ordering::Relaxed);
        if (DATA_OFFSET as u64).saturating_add(data_len) > len {
            return Err(Error::TooSmall { len });
        }
        buffer.data_len = data_len as usize;

        debug!(path = ?buffer.path, data_len, "attached shared memory segment");
        Ok(buffer)
    }

    fn header(&self) -> &Header {
        let ptr = self.map.as_mut_ptr();
        unsafe { &*(ptr as *const Header) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the frame data region in bytes.
    pub fn len(&self) -> usize {
        self.data_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `false` once the producer has closed the segment.
    pub fn valid(&self) -> bool {
        self.header().closed.load(Ordering::Acquire) == 0
    }

    /// Number of frames the producer has announced so far.
    pub fn sequence(&self) -> u64 {
        self.header().seq.load(Ordering::Acquire)
    }

    pub fn lock(&self) -> Result<(), Error> {
        let rc = unsafe { libc::pthread_mutex_lock(self.header().mutex.get()) };
        check("pthread_mutex_lock", rc)
    }

    pub fn unlock(&self) -> Result<(), Error> {
        let rc = unsafe { libc::pthread_mutex_unlock(self.header().mutex.get()) };
        check("pthread_mutex_unlock", rc)
    }

    /// Blocks until the producer announces a new frame or closes the segment.
    ///
    /// Must not be called while holding the lock.
    pub fn wait(&self) -> Result<Wake, Error> {
        let header = self.header();
        self.lock()?;
        let seen = header.seq.load(Ordering::Acquire);
        let mut rc = 0;
        while rc == 0
            && header.seq.load(Ordering::Acquire) == seen
            && header.closed.load(Ordering::Acquire) == 0
        {
            rc = unsafe { libc::pthread_cond_wait(header.cond.get(), header.mutex.get()) };
        }
        let closed = header.closed.load(Ordering::Acquire) != 0;
        self.unlock()?;
        check("pthread_cond_wait", rc)?;
        Ok(if closed { Wake::Closed } else { Wake::Frame })
    }

    /// Capture timestamp attached by the producer to the current frame, if any.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let header = self.header();
        if header.has_timestamp.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(Timestamp(header.timestamp.load(Ordering::Acquire)))
    }

    /// Sets the capture timestamp of the current frame. The caller holds the lock.
    pub fn set_timestamp(&self, timestamp: Option<Timestamp>) {
        let header = self.header();
        match timestamp {
            Some(ts) => {
                header.timestamp.store(ts.0, Ordering::Release);
                header.has_timestamp.store(1, Ordering::Release);
            }
            None => header.has_timestamp.store(0, Ordering::Release),
        }
    }

    /// The frame data region. Contents are only stable while holding the lock.
    pub fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.map.as_mut_ptr().add(DATA_OFFSET), self.len()) }
    }

    /// Copies `frame` into the segment under the lock, stamps it, and wakes waiters.
    pub fn write_frame(&self, frame: &[u8], timestamp: Option<Timestamp>) -> Result<(), Error> {
        let capacity = self.len();
        if frame.len() > capacity {
            return Err(Error::FrameTooLarge {
                len: frame.len(),
                capacity,
            });
        }
        self.lock()?;
        unsafe {
            let dst = self.map.as_mut_ptr().add(DATA_OFFSET);
            std::ptr::copy_nonoverlapping(frame.as_ptr(), dst, frame.len());
        }
        self.set_timestamp(timestamp);
        self.header().seq.fetch_add(1, Ordering::AcqRel);
        let rc = unsafe { libc::pthread_cond_broadcast(self.header().cond.get()) };
        self.unlock()?;
        check("pthread_cond_broadcast", rc)
    }

    /// Marks the segment closed and wakes every waiter.
    pub fn close(&self) -> Result<(), Error> {
        self.lock()?;
        self.header().closed.store(1, Ordering::Release);
        let rc = unsafe { libc::pthread_cond_broadcast(self.header().cond.get()) };
        self.unlock()?;
        check("pthread_cond_broadcast", rc)
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if let Err(err) = self.close() {
            warn!(?err, "failed to close shared memory segment");
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(?err, path = ?self.path, "failed to unlink shared memory segment");
        }
    }
}

unsafe fn init_sync(header: &Header) -> Result<(), Error> {
    unsafe {
        let mut mutex_attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(
            "pthread_mutexattr_init",
            libc::pthread_mutexattr_init(mutex_attr.as_mut_ptr()),
        )?;
        let rc = libc::pthread_mutexattr_setpshared(
            mutex_attr.as_mut_ptr(),
            libc::PTHREAD_PROCESS_SHARED,
        );
        let rc = if rc == 0 {
            libc::pthread_mutex_init(header.mutex.get(), mutex_attr.as_ptr())
        } else {
            rc
        };
        libc::pthread_mutexattr_destroy(mutex_attr.as_mut_ptr());
        check("pthread_mutex_init", rc)?;

        let mut cond_attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        check(
            "pthread_condattr_init",
            libc::pthread_condattr_init(cond_attr.as_mut_ptr()),
        )?;
        let rc =
            libc::pthread_condattr_setpshared(cond_attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        let rc = if rc == 0 {
            libc::pthread_cond_init(header.cond.get(), cond_attr.as_ptr())
        } else {
            rc
        };
        libc::pthread_condattr_destroy(cond_attr.as_mut_ptr());
        check("pthread_cond_init", rc)
    }
}

fn check(op: &'static str, rc: libc::c_int) -> Result<(), Error> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Sync {
            op,
            source: io::Error::from_raw_os_error(rc),
        })
    }
}
