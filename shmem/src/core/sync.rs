use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "linux"))]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

#[inline]
pub(crate) fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// A condition variable plus its dedicated mutex, both usable by every
/// process that maps the segment.
#[repr(C)]
pub struct Condvar {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

impl Condvar {
    /// Initializes both primitives in place as process-shared.
    ///
    /// # Safety
    /// Must run exactly once, before any other process uses this memory.
    pub unsafe fn init(&self) -> io::Result<()> {
        let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(mattr.as_mut_ptr()))?;
        let rc = libc::pthread_mutexattr_setpshared(mattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        let rc = if rc == 0 {
            libc::pthread_mutex_init(self.mutex.get(), mattr.as_ptr())
        } else {
            rc
        };
        libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());
        check(rc)?;

        let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        check(libc::pthread_condattr_init(cattr.as_mut_ptr()))?;
        let mut rc = libc::pthread_condattr_setpshared(cattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        #[cfg(target_os = "linux")]
        if rc == 0 {
            rc = libc::pthread_condattr_setclock(cattr.as_mut_ptr(), WAIT_CLOCK);
        }
        if rc == 0 {
            rc = libc::pthread_cond_init(self.cond.get(), cattr.as_ptr());
        }
        libc::pthread_condattr_destroy(cattr.as_mut_ptr());
        check(rc)
    }

    /// # Safety
    /// No process may use the primitives afterwards.
    pub unsafe fn destroy(&self) -> io::Result<()> {
        let rc = libc::pthread_cond_destroy(self.cond.get());
        let rc2 = libc::pthread_mutex_destroy(self.mutex.get());
        check(rc)?;
        check(rc2)
    }

    pub fn lock(&self) -> io::Result<CondGuard<'_>> {
        // SAFETY: the mutex was initialized by `init` before the segment was handed out.
        check(unsafe { libc::pthread_mutex_lock(self.mutex.get()) })?;
        Ok(CondGuard { condvar: self })
    }

    /// Wakes every waiter. Callers hold the guard so a waiter that has
    /// checked its predicate cannot miss the wakeup.
    pub fn broadcast(&self, _guard: &CondGuard<'_>) -> io::Result<()> {
        check(unsafe { libc::pthread_cond_broadcast(self.cond.get()) })
    }
}

pub struct CondGuard<'a> {
    condvar: &'a Condvar,
}

impl CondGuard<'_> {
    /// Blocks for at most `timeout`. Returns `false` once the time is up;
    /// `true` may also be a spurious wakeup.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = abs_deadline(timeout)?;
        let rc = unsafe {
            libc::pthread_cond_timedwait(self.condvar.cond.get(), self.condvar.mutex.get(), &deadline)
        };
        match rc {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

impl Drop for CondGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.condvar.mutex.get());
        }
    }
}

fn abs_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    let mut now = MaybeUninit::<libc::timespec>::uninit();
    if unsafe { libc::clock_gettime(WAIT_CLOCK, now.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let now = unsafe { now.assume_init() };
    let mut sec = (now.tv_sec as i64).saturating_add(timeout.as_secs().min(i64::MAX as u64) as i64);
    let mut nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    if nsec >= 1_000_000_000 {
        sec = sec.saturating_add(1);
        nsec -= 1_000_000_000;
    }
    Ok(libc::timespec {
        tv_sec: sec.min(libc::time_t::MAX as i64) as libc::time_t,
        tv_nsec: nsec as _,
    })
}

/// Wall-clock budget shared by every wait of one retrieval.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        let now = Instant::now();
        Deadline(now.checked_add(timeout).unwrap_or(now + Duration::from_secs(u32::MAX as u64)))
    }

    /// `None` once the budget is spent.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }
}
