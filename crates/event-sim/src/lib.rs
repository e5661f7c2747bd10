//! Discrete-Event Simulation Kernel
//!
//! A single-threaded event scheduler over virtual time. Events are boxed
//! closures over a caller-owned state value; `run` dispatches them in
//! timestamp order, FIFO among equal timestamps. Virtual time only moves
//! when an event fires, so a callback observes `now()` equal to its own
//! scheduled time.
//!
//! The kernel makes no assumptions about the state type beyond `run`
//! receiving `&mut S`; callbacks receive the scheduler too and may enqueue
//! further events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

// ============================================================================
// Virtual time
// ============================================================================

/// Virtual time, also used for durations. Integer nanoseconds, so ordering
/// is total and arithmetic is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Time(nanos)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Time(secs * 1_000_000_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Time(millis * 1_000_000)
    }

    /// Lossy conversion from fractional seconds; negative values clamp to 0.
    pub fn from_secs_f64(secs: f64) -> Self {
        Time((secs.max(0.0) * 1e9).round() as u64)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.0 += rhs.0;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        Time(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Boxed event callback: receives the simulation state and the scheduler.
pub type EventFn<S> = Box<dyn FnOnce(&mut S, &mut Simulator<S>)>;

struct Entry<S> {
    at: Time,
    seq: u64,
    context: Option<u32>,
    callback: EventFn<S>,
}

impl<S> PartialEq for Entry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<S> Eq for Entry<S> {}

impl<S> PartialOrd for Entry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for Entry<S> {
    // Reversed so the std max-heap pops the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded discrete-event scheduler.
///
/// `S` is the simulation state threaded through every callback. Dispatch is
/// strictly serial: no two callbacks overlap, and `now()` is monotonically
/// non-decreasing across them.
pub struct Simulator<S> {
    now: Time,
    seq: u64,
    stop_at: Option<Time>,
    queue: BinaryHeap<Entry<S>>,
}

impl<S> Default for Simulator<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Simulator<S> {
    pub fn new() -> Self {
        Self {
            now: Time::ZERO,
            seq: 0,
            stop_at: None,
            queue: BinaryHeap::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Time {
        self.now
    }

    /// Number of events still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Schedule `callback` to fire at `now + delay`.
    pub fn schedule<F>(&mut self, delay: Time, callback: F)
    where
        F: FnOnce(&mut S, &mut Simulator<S>) + 'static,
    {
        self.push(delay, None, Box::new(callback));
    }

    /// Schedule with a node-id context attached, for dispatch tracing.
    pub fn schedule_with_context<F>(&mut self, context: u32, delay: Time, callback: F)
    where
        F: FnOnce(&mut S, &mut Simulator<S>) + 'static,
    {
        self.push(delay, Some(context), Box::new(callback));
    }

    fn push(&mut self, delay: Time, context: Option<u32>, callback: EventFn<S>) {
        let entry = Entry {
            at: self.now + delay,
            seq: self.seq,
            context,
            callback,
        };
        self.seq += 1;
        self.queue.push(entry);
    }

    /// Halt `run` once virtual time passes `at`. Events scheduled later than
    /// the stop time stay queued but are not dispatched.
    pub fn stop(&mut self, at: Time) {
        self.stop_at = Some(at);
    }

    /// Dispatch events in order until the queue drains or the stop time is
    /// reached. May be called again after a stop to resume.
    pub fn run(&mut self, state: &mut S) {
        while let Some(entry) = self.queue.pop() {
            if let Some(stop) = self.stop_at {
                if entry.at > stop {
                    self.queue.push(entry);
                    self.now = stop;
                    return;
                }
            }
            self.now = entry.at;
            match entry.context {
                Some(ctx) => tracing::trace!(at = %self.now, context = ctx, "dispatch"),
                None => tracing::trace!(at = %self.now, "dispatch"),
            }
            (entry.callback)(state, self);
        }
    }
}
