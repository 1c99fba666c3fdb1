//! POSIX named semaphores.
//!
//! Every `unsafe` block of the crate lives here. The simulator creates
//! the two per-tick semaphores; the client creates only the loading
//! semaphore it hands to a freshly launched process.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::time::{Duration, Instant};

/// An open handle onto a named semaphore.
pub struct NamedSemaphore {
    name: String,
    sem: *mut libc::sem_t,
}

// SAFETY: a `sem_t` handle returned by `sem_open` may be used from any
// thread; the semaphore operations are themselves thread-safe.
unsafe impl Send for NamedSemaphore {}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in semaphore name"))
}

impl NamedSemaphore {
    /// Create a new semaphore with value 0, failing if the name exists.
    pub fn create_exclusive(name: &str) -> io::Result<Self> {
        let c = c_name(name)?;
        // SAFETY: `c` is a valid NUL-terminated string; with O_CREAT the
        // variadic arguments are the mode and the initial value.
        let sem = unsafe {
            libc::sem_open(
                c.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        Self::from_raw(name, sem)
    }

    /// Open an existing semaphore.
    pub fn open(name: &str) -> io::Result<Self> {
        let c = c_name(name)?;
        // SAFETY: `c` is a valid NUL-terminated string; without O_CREAT
        // no variadic arguments are read.
        let sem = unsafe { libc::sem_open(c.as_ptr(), 0) };
        Self::from_raw(name, sem)
    }

    fn from_raw(name: &str, sem: *mut libc::sem_t) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            name: name.to_string(),
            sem,
        })
    }

    /// Semaphore name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the semaphore.
    pub fn post(&self) -> io::Result<()> {
        // SAFETY: `self.sem` is a live handle until drop.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Decrement the semaphore, blocking up to `timeout`.
    ///
    /// Returns `Ok(false)` if the deadline expired.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        match timeout {
            None => loop {
                // SAFETY: `self.sem` is a live handle until drop.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            },
            Some(timeout) => self.timed_wait(timeout),
        }
    }

    #[cfg(target_os = "linux")]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `now` is a valid out-pointer.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let total_ns = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let deadline = libc::timespec {
            tv_sec: now.tv_sec
                + timeout.as_secs() as libc::time_t
                + (total_ns / 1_000_000_000) as libc::time_t,
            tv_nsec: (total_ns % 1_000_000_000) as libc::c_long,
        };
        loop {
            // SAFETY: `self.sem` is live and `deadline` is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Decrement without blocking. `Ok(false)` if the value was zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: `self.sem` is a live handle until drop.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    /// Wait in `slice`-sized steps until acquired, `deadline` passes, or
    /// `abort` returns `true`.
    pub fn wait_until(
        &self,
        deadline: Instant,
        slice: Duration,
        mut abort: impl FnMut() -> bool,
    ) -> io::Result<bool> {
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if self.wait(Some(left.min(slice)))? {
                return Ok(true);
            }
            if left <= slice || abort() {
                return Ok(false);
            }
        }
    }

    /// Remove `name` from the system. A missing name is not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c = c_name(name)?;
        // SAFETY: `c` is a valid NUL-terminated string.
        if unsafe { libc::sem_unlink(c.as_ptr()) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: `self.sem` came from a successful `sem_open` and is
        // closed exactly once.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}
