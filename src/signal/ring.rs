//! Fixed-capacity notification ring
//!
//! Multi-producer, single-consumer, and allocation-free on the producer side.
//! A push is a bounded number of atomic operations with no locks, so it may
//! run inside a signal handler. Each slot carries a sequence number (the
//! bounded-queue scheme from Dmitry Vyukov) and the notification packed into
//! one `u64`, so a slot is published with a single release store.
//!
//! Every push takes an arrival ticket. Entries that miss the main ring (the
//! coalesced Resize marker and control kinds spilled to the overflow log)
//! are merged back by ticket on drain, so overflow never reorders.
//!
//! Packing: bits 0..8 kind, 8..32 arrival ticket, 32..48 columns,
//! 48..64 rows.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::event::{Dimensions, Notification};

/// Number of slots in the ring
pub const RING_CAPACITY: usize = 64;

/// Slots Resize entries may never occupy
pub const RESERVED_CONTROL_SLOTS: usize = 8;

/// Control notifications held once the ring is full
const OVERFLOW_CAPACITY: usize = 256;

const RESIZE_BUDGET: usize = RING_CAPACITY - RESERVED_CONTROL_SLOTS;

const KIND_RESIZE: u64 = 1;
const KIND_INTERRUPT: u64 = 2;
const KIND_HANGUP: u64 = 3;
const KIND_EOF: u64 = 4;

const TICKET_BITS: u32 = 24;
const TICKET_MASK: u32 = (1 << TICKET_BITS) - 1;

/// Last-resort order for controls that found the overflow log full too
const SPILLED_KINDS: [u64; 3] = [KIND_INTERRUPT, KIND_HANGUP, KIND_EOF];

/// What happened to a pushed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored in its own ring slot
    Queued,
    /// Resize folded into the overflow marker (latest dimensions win)
    Coalesced,
    /// Ring full; held in the overflow log at its arrival position
    Deferred,
}

struct Slot {
    sequence: AtomicUsize,
    payload: AtomicU64,
}

/// Bounded MPSC queue of packed entries; `N` is a power of two
struct SlotQueue<const N: usize> {
    slots: [Slot; N],
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

impl<const N: usize> SlotQueue<N> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|i| Slot {
                sequence: AtomicUsize::new(i),
                payload: AtomicU64::new(0),
            }),
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    fn try_enqueue(&self, packed: u64) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & (N - 1)];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = (sequence as isize).wrapping_sub(pos as isize);
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        slot.payload.store(packed, Ordering::Relaxed);
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    },
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return false;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    fn pop(&self) -> Option<u64> {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let slot = &self.slots[pos & (N - 1)];
        let sequence = slot.sequence.load(Ordering::Acquire);
        let diff = (sequence as isize).wrapping_sub(pos.wrapping_add(1) as isize);
        if diff != 0 {
            return None;
        }
        let packed = slot.payload.load(Ordering::Relaxed);
        slot.sequence.store(pos.wrapping_add(N), Ordering::Release);
        self.dequeue_pos.store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(packed)
    }

    fn len(&self) -> usize {
        let head = self.enqueue_pos.load(Ordering::Acquire);
        let tail = self.dequeue_pos.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(N)
    }
}

pub(crate) struct NotificationRing {
    ring: SlotQueue<RING_CAPACITY>,
    overflow: SlotQueue<OVERFLOW_CAPACITY>,
    resizes_queued: AtomicUsize,
    arrivals: AtomicU32,
    /// Overflow marker: the newest coalesced Resize, 0 when empty
    coalesced_resize: AtomicU64,
    /// Per-kind counts once both the ring and the overflow log are full
    spilled: [AtomicU32; 3],
}

impl NotificationRing {
    pub(crate) fn new() -> Self {
        Self {
            ring: SlotQueue::new(),
            overflow: SlotQueue::new(),
            resizes_queued: AtomicUsize::new(0),
            arrivals: AtomicU32::new(0),
            coalesced_resize: AtomicU64::new(0),
            spilled: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Append a notification. Async-signal-safe.
    pub(crate) fn push(&self, notification: Notification) -> PushOutcome {
        let ticket = self.arrivals.fetch_add(1, Ordering::AcqRel) & TICKET_MASK;
        match notification {
            Notification::Resize(size) => {
                let packed = pack_resize(size, ticket);
                if self.resizes_queued.fetch_add(1, Ordering::AcqRel) < RESIZE_BUDGET
                    && self.ring.try_enqueue(packed)
                {
                    return PushOutcome::Queued;
                }
                self.resizes_queued.fetch_sub(1, Ordering::AcqRel);
                self.park_resize(packed);
                PushOutcome::Coalesced
            },
            control => {
                let kind = kind_code(control);
                let packed = kind | (u64::from(ticket) << 8);
                if self.ring.try_enqueue(packed) {
                    return PushOutcome::Queued;
                }
                if !self.overflow.try_enqueue(packed) {
                    if let Some(index) = SPILLED_KINDS.iter().position(|k| *k == kind) {
                        self.spilled[index].fetch_add(1, Ordering::AcqRel);
                    }
                }
                PushOutcome::Deferred
            },
        }
    }

    /// Remove everything queued, in arrival order. Single consumer only.
    ///
    /// The run of Resize entries that meets the overflow marker collapses to
    /// its newest member; other Resize entries are delivered as queued.
    pub(crate) fn drain(&self) -> Vec<Notification> {
        let mut entries: Vec<(u64, bool)> = Vec::new();
        while let Some(packed) = self.ring.pop() {
            if packed & 0xff == KIND_RESIZE {
                self.resizes_queued.fetch_sub(1, Ordering::AcqRel);
            }
            entries.push((packed, false));
        }
        while let Some(packed) = self.overflow.pop() {
            entries.push((packed, false));
        }
        let parked = self.coalesced_resize.swap(0, Ordering::AcqRel);
        if parked != 0 {
            entries.push((parked, true));
        }

        // Oldest first; ages are measured back from the newest ticket issued
        let newest = self.arrivals.load(Ordering::Acquire);
        entries.sort_by_key(|(packed, _)| {
            std::cmp::Reverse(newest.wrapping_sub(ticket_of(*packed)) & TICKET_MASK)
        });

        let mut out = collapse(entries);
        for (index, kind) in SPILLED_KINDS.iter().enumerate() {
            let count = self.spilled[index].swap(0, Ordering::AcqRel);
            out.extend(std::iter::repeat(*kind).take(count as usize).filter_map(unpack));
        }
        out
    }

    /// Approximate number of pending entries, overflow log included
    pub(crate) fn len(&self) -> usize {
        self.ring.len() + self.overflow.len()
    }

    fn park_resize(&self, packed: u64) {
        let mut current = self.coalesced_resize.load(Ordering::Acquire);
        loop {
            if current != 0 && !is_newer(ticket_of(packed), ticket_of(current)) {
                return;
            }
            match self.coalesced_resize.compare_exchange_weak(
                current,
                packed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for NotificationRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRing")
            .field("len", &self.len())
            .field("capacity", &RING_CAPACITY)
            .finish()
    }
}

fn kind_code(notification: Notification) -> u64 {
    match notification {
        Notification::Resize(_) => KIND_RESIZE,
        Notification::Interrupt => KIND_INTERRUPT,
        Notification::HangUp => KIND_HANGUP,
        Notification::Eof => KIND_EOF,
    }
}

fn pack_resize(size: Dimensions, ticket: u32) -> u64 {
    KIND_RESIZE
        | (u64::from(ticket & TICKET_MASK) << 8)
        | (u64::from(size.columns) << 32)
        | (u64::from(size.rows) << 48)
}

fn ticket_of(packed: u64) -> u32 {
    ((packed >> 8) as u32) & TICKET_MASK
}

/// Wrapping comparison on the 24-bit ticket counter
fn is_newer(candidate: u32, current: u32) -> bool {
    let distance = candidate.wrapping_sub(current) & TICKET_MASK;
    distance != 0 && distance < (1 << (TICKET_BITS - 1))
}

fn unpack(packed: u64) -> Option<Notification> {
    match packed & 0xff {
        KIND_RESIZE => Some(Notification::Resize(Dimensions::new(
            (packed >> 32) as u16,
            (packed >> 48) as u16,
        ))),
        KIND_INTERRUPT => Some(Notification::Interrupt),
        KIND_HANGUP => Some(Notification::HangUp),
        KIND_EOF => Some(Notification::Eof),
        _ => None,
    }
}

/// Entries arrive sorted; `true` flags the overflow marker
fn collapse(entries: Vec<(u64, bool)>) -> Vec<Notification> {
    let mut out = Vec::with_capacity(entries.len());
    let mut run: Vec<u64> = Vec::new();
    let mut overflowed = false;
    for (packed, marker) in entries {
        if packed & 0xff == KIND_RESIZE {
            run.push(packed);
            overflowed |= marker;
            continue;
        }
        flush_resizes(&mut run, overflowed, &mut out);
        overflowed = false;
        out.extend(unpack(packed));
    }
    flush_resizes(&mut run, overflowed, &mut out);
    out
}

fn flush_resizes(run: &mut Vec<u64>, overflowed: bool, out: &mut Vec<Notification>) {
    if overflowed {
        out.extend(run.last().copied().and_then(unpack));
    } else {
        out.extend(run.iter().copied().filter_map(unpack));
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resize(columns: u16, rows: u16) -> Notification {
        Notification::Resize(Dimensions::new(columns, rows))
    }

    fn is_resize(n: &Notification) -> bool {
        matches!(n, Notification::Resize(_))
    }

    #[test]
    fn test_empty_drain() {
        let ring = NotificationRing::new();
        assert!(ring.drain().is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let ring = NotificationRing::new();
        ring.push(Notification::Interrupt);
        ring.push(resize(100, 40));
        ring.push(Notification::HangUp);
        ring.push(Notification::Eof);
        assert_eq!(ring.len(), 4);
        assert_eq!(
            ring.drain(),
            vec![
                Notification::Interrupt,
                resize(100, 40),
                Notification::HangUp,
                Notification::Eof
            ]
        );
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_queued_resizes_not_merged() {
        let ring = NotificationRing::new();
        ring.push(resize(80, 24));
        ring.push(resize(100, 30));
        assert_eq!(ring.drain(), vec![resize(80, 24), resize(100, 30)]);
    }

    #[test]
    fn test_resize_overflow_coalesces_to_latest() {
        let ring = NotificationRing::new();
        let mut outcomes = Vec::new();
        for i in 0..(RING_CAPACITY as u16 * 3) {
            outcomes.push(ring.push(resize(10 + i, 5 + i)));
        }
        assert!(outcomes.contains(&PushOutcome::Coalesced));
        let last = RING_CAPACITY as u16 * 3 - 1;
        assert_eq!(ring.drain(), vec![resize(10 + last, 5 + last)]);
    }

    #[test]
    fn test_coalesced_resize_keeps_its_place() {
        let ring = NotificationRing::new();
        for i in 0..100u16 {
            ring.push(resize(i, i));
        }
        ring.push(Notification::Interrupt);
        assert_eq!(ring.drain(), vec![resize(99, 99), Notification::Interrupt]);
    }

    #[test]
    fn test_control_uses_reserved_slots() {
        let ring = NotificationRing::new();
        for i in 0..200u16 {
            ring.push(resize(i, i));
        }
        for _ in 0..RESERVED_CONTROL_SLOTS {
            assert_eq!(ring.push(Notification::Interrupt), PushOutcome::Queued);
        }
        assert_eq!(ring.push(Notification::HangUp), PushOutcome::Deferred);

        let mut expected = vec![resize(199, 199)];
        expected.extend(std::iter::repeat(Notification::Interrupt).take(RESERVED_CONTROL_SLOTS));
        expected.push(Notification::HangUp);
        assert_eq!(ring.drain(), expected);
    }

    #[test]
    fn test_full_ring_defers_control_in_order() {
        let ring = NotificationRing::new();
        for _ in 0..RING_CAPACITY {
            assert_eq!(ring.push(Notification::Interrupt), PushOutcome::Queued);
        }
        assert_eq!(ring.push(Notification::Eof), PushOutcome::Deferred);
        assert_eq!(ring.push(Notification::HangUp), PushOutcome::Deferred);
        assert_eq!(ring.len(), RING_CAPACITY + 2);

        let drained = ring.drain();
        assert_eq!(drained.len(), RING_CAPACITY + 2);
        assert_eq!(
            &drained[RING_CAPACITY..],
            &[Notification::Eof, Notification::HangUp]
        );
    }

    #[test]
    fn test_resize_after_deferred_control_stays_behind_it() {
        let ring = NotificationRing::new();
        for _ in 0..RING_CAPACITY {
            ring.push(Notification::HangUp);
        }
        ring.push(Notification::Interrupt);
        assert_eq!(ring.push(resize(7, 7)), PushOutcome::Coalesced);

        let drained = ring.drain();
        assert_eq!(
            &drained[RING_CAPACITY..],
            &[Notification::Interrupt, resize(7, 7)]
        );
    }

    #[test]
    fn test_ring_reusable_after_drain() {
        let ring = NotificationRing::new();
        for round in 0..10u16 {
            for _ in 0..RING_CAPACITY + 3 {
                ring.push(Notification::HangUp);
            }
            assert_eq!(ring.drain().len(), RING_CAPACITY + 3);
            ring.push(resize(round, round));
            assert_eq!(ring.drain(), vec![resize(round, round)]);
        }
    }

    #[test]
    fn test_ticket_wraps() {
        assert!(is_newer(1, 0));
        assert!(!is_newer(0, 1));
        assert!(!is_newer(7, 7));
        assert!(is_newer(0, TICKET_MASK));
    }

    #[test]
    fn test_concurrent_producers() {
        use std::sync::Arc;
        let ring = Arc::new(NotificationRing::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    for _ in 0..30 {
                        ring.push(Notification::Interrupt);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ring.drain().len(), 120);
    }

    fn arb_notification() -> impl Strategy<Value = Notification> {
        prop_oneof![
            (1u16..500, 1u16..200).prop_map(|(c, r)| resize(c, r)),
            Just(Notification::Interrupt),
            Just(Notification::HangUp),
            Just(Notification::Eof),
        ]
    }

    /// Resize dimensions encode the push index so each one is traceable
    fn arb_indexed(max_len: usize) -> impl Strategy<Value = Vec<Notification>> {
        prop::collection::vec(arb_notification(), 0..max_len).prop_map(|seq| {
            seq.into_iter()
                .enumerate()
                .map(|(i, n)| match n {
                    Notification::Resize(_) => resize(i as u16, i as u16),
                    other => other,
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_control_never_lost(seq in prop::collection::vec(arb_notification(), 0..300)) {
            let ring = NotificationRing::new();
            for n in &seq {
                ring.push(*n);
            }
            let drained = ring.drain();
            for kind in [Notification::Interrupt, Notification::HangUp, Notification::Eof] {
                let pushed = seq.iter().filter(|n| **n == kind).count();
                let got = drained.iter().filter(|n| **n == kind).count();
                prop_assert_eq!(pushed, got);
            }
        }

        #[test]
        fn prop_latest_resize_delivered_last(seq in prop::collection::vec(arb_notification(), 1..300)) {
            let ring = NotificationRing::new();
            for n in &seq {
                ring.push(*n);
            }
            let drained = ring.drain();
            let last_pushed = seq.iter().rev().find(|n| is_resize(n));
            let last_drained = drained.iter().rev().find(|n| is_resize(n));
            prop_assert_eq!(last_pushed, last_drained);
        }

        #[test]
        fn prop_exact_without_overflow(
            seq in prop::collection::vec(arb_notification(), 0..RESIZE_BUDGET)
        ) {
            let ring = NotificationRing::new();
            for n in &seq {
                prop_assert_eq!(ring.push(*n), PushOutcome::Queued);
            }
            prop_assert_eq!(ring.drain(), seq);
        }

        #[test]
        fn prop_control_order_kept(seq in prop::collection::vec(arb_notification(), 0..300)) {
            let ring = NotificationRing::new();
            for n in &seq {
                ring.push(*n);
            }
            let controls: Vec<_> = seq.iter().filter(|n| !is_resize(n)).copied().collect();
            let drained: Vec<_> = ring.drain().into_iter().filter(|n| !is_resize(n)).collect();
            prop_assert_eq!(drained, controls);
        }

        #[test]
        fn prop_resize_keeps_position_among_controls(seq in arb_indexed(300)) {
            let ring = NotificationRing::new();
            for n in &seq {
                ring.push(*n);
            }
            let drained = ring.drain();

            let mut last_index = None;
            for (at, n) in drained.iter().enumerate() {
                if let Notification::Resize(size) = n {
                    let index = size.columns as usize;
                    prop_assert!(last_index.map_or(true, |prev| prev < index));
                    last_index = Some(index);
                    let before_push = seq[..index].iter().filter(|n| !is_resize(n)).count();
                    let before_drain = drained[..at].iter().filter(|n| !is_resize(n)).count();
                    prop_assert_eq!(before_push, before_drain);
                }
            }
        }
    }
}
