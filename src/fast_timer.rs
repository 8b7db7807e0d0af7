//! Microsecond deadline multiplexer for the motor engines.
//!
//! One hardware alarm is all the engines get, so every channel that needs
//! periodic service owns an *entry* here and the runner sleeps until
//! [`next_deadline`](FastTimer::next_deadline). Entries are identified by
//! index; each engine assigns its entry ids at compile time.
//!
//! [`set_period`](FastTimer::set_period) is measured from the entry's last
//! firing, so calling it while servicing that entry reschedules the *next*
//! firing — the rearm-from-callback pattern the servo engine's two-phase
//! pulse machine relies on. Calling it on an armed entry from outside its own
//! service window shifts the pending deadline and should be avoided; stop and
//! restart the entry instead.

use heapless::Vec;

#[derive(Clone, Copy, Debug)]
struct Entry {
    period_us: u32,
    deadline_us: u64,
    last_fire_us: u64,
    armed: bool,
    repeat: bool,
}

const IDLE: Entry = Entry {
    period_us: 0,
    deadline_us: 0,
    last_fire_us: 0,
    armed: false,
    repeat: false,
};

/// Fixed-capacity table of one-shot or repeating timer entries sharing a
/// single deadline source.
#[derive(Clone, Debug)]
pub struct FastTimer<const N: usize> {
    entries: [Entry; N],
}

impl<const N: usize> FastTimer<N> {
    /// All entries idle.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: [IDLE; N] }
    }

    /// Arm `id` to fire `period_us` after `now_us`. Restarting an armed entry
    /// reprograms it; the old deadline is discarded.
    pub fn start(&mut self, id: usize, now_us: u64, period_us: u32, repeat: bool) {
        let entry = &mut self.entries[id];
        entry.period_us = period_us;
        entry.last_fire_us = now_us;
        entry.deadline_us = now_us + u64::from(period_us);
        entry.repeat = repeat;
        entry.armed = true;
    }

    /// Disarm `id`; it will not fire again until restarted.
    pub fn stop(&mut self, id: usize) {
        self.entries[id].armed = false;
    }

    /// Change the period of `id`. On an armed entry the new period is applied
    /// relative to the last firing, so the current service window's rearm
    /// picks it up.
    pub fn set_period(&mut self, id: usize, period_us: u32) {
        let entry = &mut self.entries[id];
        entry.period_us = period_us;
        if entry.armed {
            entry.deadline_us = entry.last_fire_us + u64::from(period_us);
        }
    }

    /// Whether `id` is currently armed.
    #[must_use]
    pub fn is_armed(&self, id: usize) -> bool {
        self.entries[id].armed
    }

    /// Earliest pending deadline, if any entry is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|entry| entry.armed)
            .map(|entry| entry.deadline_us)
            .min()
    }

    /// Fire every entry whose deadline has passed, in id order. Repeating
    /// entries rearm one period after the deadline they just met (drift-free);
    /// one-shot entries disarm. Each entry fires at most once per call.
    pub fn advance(&mut self, now_us: u64) -> Vec<usize, N> {
        let mut fired = Vec::new();
        for (id, entry) in self.entries.iter_mut().enumerate() {
            if entry.armed && entry.deadline_us <= now_us {
                entry.last_fire_us = entry.deadline_us;
                if entry.repeat {
                    entry.deadline_us = entry.last_fire_us + u64::from(entry.period_us);
                } else {
                    entry.armed = false;
                }
                // capacity N always suffices: one slot per entry
                let _ = fired.push(id);
            }
        }
        fired
    }
}

impl<const N: usize> Default for FastTimer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::FastTimer;

    #[test]
    fn one_shot_fires_once() {
        let mut timer = FastTimer::<2>::new();
        timer.start(0, 0, 100, false);
        assert_eq!(timer.next_deadline(), Some(100));
        assert!(timer.advance(99).is_empty());
        assert_eq!(timer.advance(100).as_slice(), &[0]);
        assert!(!timer.is_armed(0));
        assert!(timer.advance(500).is_empty());
    }

    #[test]
    fn repeating_entry_rearms_without_drift() {
        let mut timer = FastTimer::<1>::new();
        timer.start(0, 0, 100, true);
        assert_eq!(timer.advance(105).as_slice(), &[0]);
        // next deadline counts from the scheduled firing, not from `now`
        assert_eq!(timer.next_deadline(), Some(200));
    }

    #[test]
    fn set_period_during_service_window_applies_to_next_firing() {
        let mut timer = FastTimer::<1>::new();
        timer.start(0, 0, 2000, true);
        assert_eq!(timer.advance(2000).as_slice(), &[0]);
        timer.set_period(0, 1500); // what a callback would do
        assert_eq!(timer.next_deadline(), Some(3500));
    }

    #[test]
    fn next_deadline_is_the_earliest_armed_entry() {
        let mut timer = FastTimer::<3>::new();
        timer.start(0, 0, 300, false);
        timer.start(1, 0, 100, false);
        timer.start(2, 0, 200, false);
        assert_eq!(timer.next_deadline(), Some(100));
        assert_eq!(timer.advance(100).as_slice(), &[1]);
        assert_eq!(timer.next_deadline(), Some(200));
    }

    #[test]
    fn stop_prevents_further_firings() {
        let mut timer = FastTimer::<1>::new();
        timer.start(0, 0, 100, true);
        timer.stop(0);
        assert_eq!(timer.next_deadline(), None);
        assert!(timer.advance(1000).is_empty());
    }

    #[test]
    fn restart_reprograms_an_armed_entry() {
        let mut timer = FastTimer::<1>::new();
        timer.start(0, 0, 1000, false);
        timer.start(0, 50, 100, false);
        assert_eq!(timer.next_deadline(), Some(150));
    }
}
