//! Sorted-expiry timer list untuk idle eviction
//!
//! Satu tick periodik untuk semua koneksi, bukan satu timer per koneksi.
//!
//! Layout:
//! - Arena slot dengan index stabil, di-reuse setelah delete
//! - `BTreeMap<(expiry, seq), slot>` sebagai urutan ascending
//!
//! The sequence number breaks ties so timers sharing an expiry keep their
//! insertion order; a renewed timer is placed after every timer that
//! already carries the same expiry.

use std::collections::BTreeMap;
use std::time::Instant;

/// Stable handle ke timer di dalam [`TimerList`]
///
/// The generation makes a handle to a deleted timer inert even after its
/// slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    slot: usize,
    generation: u64,
}

struct Timer<T> {
    expire: Instant,
    seq: u64,
    data: T,
}

struct Slot<T> {
    generation: u64,
    timer: Option<Timer<T>>,
}

/// Ascending-by-expiry list of per-connection timers
pub struct TimerList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    order: BTreeMap<(Instant, u64), usize>,
    next_seq: u64,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Insert timer baru, urutan ascending tetap terjaga
    pub fn add_timer(&mut self, expire: Instant, data: T) -> TimerId {
        let seq = self.bump_seq();
        let timer = Timer { expire, seq, data };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot].timer = Some(timer);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    timer: Some(timer),
                });
                self.slots.len() - 1
            }
        };

        self.order.insert((expire, seq), slot);
        TimerId {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    fn live(&self, id: TimerId) -> Option<&Timer<T>> {
        self.slots
            .get(id.slot)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.timer.as_ref())
    }

    /// Push the expiry of `id` to `expire`.
    ///
    /// Renewal only moves a timer later; an earlier `expire` is clamped to
    /// the current one. Returns `false` for a stale handle.
    pub fn adjust_timer(&mut self, id: TimerId, expire: Instant) -> bool {
        let (old_key, new_expire) = match self.live(id) {
            Some(timer) => ((timer.expire, timer.seq), expire.max(timer.expire)),
            None => return false,
        };

        let seq = self.bump_seq();
        self.order.remove(&old_key);
        self.order.insert((new_expire, seq), id.slot);

        if let Some(timer) = self.slots[id.slot].timer.as_mut() {
            timer.expire = new_expire;
            timer.seq = seq;
        }
        true
    }

    /// O(log n) unlink. Returns the timer's payload, never touches anything
    /// the payload refers to.
    pub fn del_timer(&mut self, id: TimerId) -> Option<T> {
        self.live(id)?;
        let slot = &mut self.slots[id.slot];
        let timer = slot.timer.take()?;
        slot.generation += 1;
        self.free.push(id.slot);
        self.order.remove(&(timer.expire, timer.seq));
        Some(timer.data)
    }

    /// Jalankan callback untuk setiap timer dengan expiry <= `now`
    ///
    /// Timers are removed before their callback runs, in expiry order, so
    /// each callback fires at most once. Stops at the first live timer.
    pub fn tick<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(TimerId, T),
    {
        let mut fired = 0;
        loop {
            let (expire, slot) = match self.order.first_key_value() {
                Some((&(expire, _), &slot)) => (expire, slot),
                None => break,
            };
            if expire > now {
                break;
            }
            let id = TimerId {
                slot,
                generation: self.slots[slot].generation,
            };
            if let Some(data) = self.del_timer(id) {
                on_expire(id, data);
                fired += 1;
            }
        }
        fired
    }

    pub fn expire_of(&self, id: TimerId) -> Option<Instant> {
        self.live(id).map(|timer| timer.expire)
    }

    pub fn get(&self, id: TimerId) -> Option<&T> {
        self.live(id).map(|timer| &timer.data)
    }

    /// Earliest pending expiry
    pub fn next_expiry(&self) -> Option<Instant> {
        self.order.keys().next().map(|&(expire, _)| expire)
    }

    /// Payloads in expiry order
    pub fn iter(&self) -> impl Iterator<Item = (Instant, &T)> + '_ {
        self.order.iter().filter_map(move |(&(expire, _), &slot)| {
            self.slots[slot].timer.as_ref().map(|timer| (expire, &timer.data))
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
