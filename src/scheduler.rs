//! One-shot deferred events keyed by a generation counter.
//!
//! Every event is stamped with the generation that was current when it was scheduled.
//! Superseding the current activity bumps the generation; events of older generations
//! are then dropped when they come due instead of firing. Time is passed in explicitly,
//! so the table works with any clock (and with a fake one in tests).

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Scheduled<E> {
    due: Instant,
    generation: u64,
    /// Insertion order, keeps events that are due at the same instant in order.
    sequence: u64,
    event: E,
}

#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    pending: Vec<Scheduled<E>>,
    generation: u64,
    sequence: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Scheduler { pending: Vec::new(), generation: 0, sequence: 0 }
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate everything scheduled so far. Returns the new generation.
    pub fn supersede(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Schedule `event` to fire `delay` after `now`, under the current generation.
    pub fn schedule(&mut self, now: Instant, delay: Duration, event: E) {
        self.sequence += 1;
        self.pending.push(Scheduled {
            due: now + delay,
            generation: self.generation,
            sequence: self.sequence,
            event,
        });
    }

    /// Events of the current generation, not yet due.
    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|s| s.generation == self.generation).count()
    }

    /// Earliest instant something is due, stale events included.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|s| s.due).min()
    }

    /// Removes every event due at `now` and returns those still current, in due order.
    /// Each event is returned at most once.
    pub fn due(&mut self, now: Instant) -> Vec<E> {
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|s| s.due <= now);
        self.pending = waiting;
        ready.sort_by_key(|s| (s.due, s.sequence));
        let current = self.generation;
        ready
            .into_iter()
            .filter(|s| {
                if s.generation != current {
                    tracing::debug!("dropping stale event of generation {} (now {})", s.generation, current);
                }
                s.generation == current
            })
            .map(|s| s.event)
            .collect()
    }
}
