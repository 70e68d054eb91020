//! Absolute-deadline frame pacing.
//!
//! Each iteration advances the deadline by exactly one frame interval in
//! integer nanoseconds and sleeps until that absolute time. Processing time
//! spent between sleeps never accumulates into drift.

use std::time::Duration;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds between frames at `rate` frames per second.
pub fn frame_interval_ns(rate: u32) -> i64 {
    NANOS_PER_SEC / i64::from(rate.max(1))
}

/// A point on the monotonic clock, split like a `timespec`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    secs: i64,
    nanos: i64,
}

impl Deadline {
    pub fn new(secs: i64, nanos: i64) -> Self {
        let mut deadline = Self { secs, nanos: 0 };
        deadline.advance(nanos);
        deadline
    }

    /// Current monotonic time.
    pub fn now() -> Self {
        let (secs, nanos) = monotonic_now();
        Self { secs, nanos }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_nanos(&self) -> i128 {
        i128::from(self.secs) * i128::from(NANOS_PER_SEC) + i128::from(self.nanos)
    }

    /// Move the deadline forward by `interval_ns`, carrying whole seconds.
    pub fn advance(&mut self, interval_ns: i64) {
        let total = self.nanos + interval_ns;
        self.secs += total.div_euclid(NANOS_PER_SEC);
        self.nanos = total.rem_euclid(NANOS_PER_SEC);
    }

    /// Block the calling thread until the deadline has passed.
    pub fn sleep_until(&self) {
        sleep_until(self.secs, self.nanos);
    }
}

/// Paces a loop at a fixed rate from the moment it was created.
pub struct Pacer {
    deadline: Deadline,
    interval_ns: i64,
}

impl Pacer {
    pub fn new(rate: u32) -> Self {
        Self {
            deadline: Deadline::now(),
            interval_ns: frame_interval_ns(rate),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns as u64)
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Advance to the next frame slot and sleep until it arrives.
    pub fn wait_next(&mut self) {
        self.deadline.advance(self.interval_ns);
        self.deadline.sleep_until();
    }
}

#[cfg(target_os = "linux")]
fn monotonic_now() -> (i64, i64) {
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as i64, ts.tv_nsec as i64)
}

#[cfg(target_os = "linux")]
fn sleep_until(secs: i64, nanos: i64) {
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    ts.tv_sec = secs as libc::time_t;
    ts.tv_nsec = nanos as _;
    loop {
        // SAFETY: `ts` is a valid timespec; the remainder pointer may be null
        // for absolute sleeps.
        let rc = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut(),
            )
        };
        if rc != libc::EINTR {
            break;
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn origin() -> std::time::Instant {
    static ORIGIN: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    *ORIGIN.get_or_init(std::time::Instant::now)
}

#[cfg(not(target_os = "linux"))]
fn monotonic_now() -> (i64, i64) {
    let elapsed = origin().elapsed();
    (elapsed.as_secs() as i64, i64::from(elapsed.subsec_nanos()))
}

#[cfg(not(target_os = "linux"))]
fn sleep_until(secs: i64, nanos: i64) {
    let target = origin() + Duration::new(secs.max(0) as u64, nanos as u32);
    let wait = target.saturating_duration_since(std::time::Instant::now());
    if !wait.is_zero() {
        std::thread::sleep(wait);
    }
}
