//! Fixed-capacity table of client connections owned by the dispatcher.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::time::{Duration, Instant};

use crate::ipc::CorrelationId;

/// A connection whose descriptor has been handed to a worker.
///
/// Only the descriptor is kept, so the dispatcher has no way to read from
/// or write to it any more. It keeps the number from being reused until the
/// worker reports back.
#[derive(Debug)]
pub struct Parked {
    fd: OwnedFd,
    since: Instant,
}

impl Parked {
    pub fn id(&self) -> CorrelationId {
        CorrelationId::of(self.fd.as_fd())
    }
}

#[derive(Debug)]
pub enum Slot<T> {
    Empty,
    /// Accepted, waiting for the request to arrive.
    Pending(T),
    /// Handed off, waiting for the completion notification.
    Parked(Parked),
}

impl<T> Slot<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

/// Slots plus the hand-offs that outlived the hand-off timeout.
///
/// An expired hand-off frees its slot, but its descriptor is kept open in
/// `lingering` until the late completion arrives or the client hangs up.
/// Until then no `accept` can be given the same number, so a late
/// completion can never free somebody else's slot.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    lingering: Vec<Parked>,
}

impl<T> SlotTable<T>
where
    T: AsFd + Into<OwnedFd>,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            lingering: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| !s.is_empty())
    }

    /// Stores `conn` in the first free slot. Gives it back when the table is
    /// full.
    pub fn insert(&mut self, conn: T) -> Result<usize, T> {
        match self.slots.iter().position(Slot::is_empty) {
            Some(index) => {
                self.slots[index] = Slot::Pending(conn);
                Ok(index)
            }
            None => Err(conn),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index)
    }

    /// Pending connections with their slot index, in table order.
    pub fn pending(&self) -> impl Iterator<Item = (usize, BorrowedFd<'_>)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Pending(conn) => Some((i, conn.as_fd())),
            _ => None,
        })
    }

    /// Turns a pending slot into a parked one and returns its correlation id.
    pub fn park(&mut self, index: usize, now: Instant) -> Option<CorrelationId> {
        let slot = self.slots.get_mut(index)?;
        match std::mem::replace(slot, Slot::Empty) {
            Slot::Pending(conn) => {
                let parked = Parked {
                    fd: conn.into(),
                    since: now,
                };
                let id = parked.id();
                *slot = Slot::Parked(parked);
                Some(id)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Empties a slot, closing whatever it held.
    pub fn close(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::Empty;
        }
    }

    /// Frees the parked slot whose descriptor number is `id`.
    ///
    /// Pending slots never match: their number has not been handed out yet.
    pub fn release(&mut self, id: CorrelationId) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Parked(p) if p.id() == id))?;
        self.slots[index] = Slot::Empty;
        Some(index)
    }

    /// Frees every slot parked for longer than `timeout`. Returns the
    /// correlation ids that were given up on.
    ///
    /// The descriptors move to the lingering list instead of being closed.
    pub fn reclaim_expired(&mut self, now: Instant, timeout: Duration) -> Vec<CorrelationId> {
        let mut reclaimed = Vec::new();
        for slot in &mut self.slots {
            let expired = matches!(
                slot,
                Slot::Parked(p) if now.saturating_duration_since(p.since) >= timeout
            );
            if !expired {
                continue;
            }
            if let Slot::Parked(p) = std::mem::replace(slot, Slot::Empty) {
                reclaimed.push(p.id());
                self.lingering.push(p);
            }
        }
        reclaimed
    }

    /// Descriptors of reclaimed hand-offs that are still held open.
    pub fn lingering(&self) -> impl Iterator<Item = (CorrelationId, BorrowedFd<'_>)> {
        self.lingering.iter().map(|p| (p.id(), p.fd.as_fd()))
    }

    /// Closes the lingering descriptor numbered `id`. Returns whether there
    /// was one.
    pub fn forget(&mut self, id: CorrelationId) -> bool {
        match self.lingering.iter().position(|p| p.id() == id) {
            Some(index) => {
                self.lingering.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn conn() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    #[test]
    fn fills_first_free_slot() {
        let mut table = SlotTable::new(3);
        let (a, _pa) = conn();
        let (b, _pb) = conn();
        let (c, _pc) = conn();

        assert_eq!(table.insert(a).unwrap(), 0);
        assert_eq!(table.insert(b).unwrap(), 1);
        table.close(0);
        assert_eq!(table.insert(c).unwrap(), 0);
        assert_eq!(table.occupied(), 2);
    }

    #[test]
    fn full_table_returns_connection() {
        let mut table = SlotTable::new(1);
        let (a, _pa) = conn();
        let (b, _pb) = conn();

        table.insert(a).unwrap();

        assert!(table.is_full());
        assert!(table.insert(b).is_err());
    }

    #[test]
    fn parked_slot_is_released_by_id() {
        let mut table = SlotTable::new(2);
        let (a, _pa) = conn();
        let index = table.insert(a).unwrap();

        let id = table.park(index, Instant::now()).unwrap();
        assert_eq!(table.pending().count(), 0);
        assert!(matches!(table.get(index), Some(Slot::Parked(_))));

        assert_eq!(table.release(id), Some(index));
        assert!(table.get(index).unwrap().is_empty());
    }

    #[test]
    fn release_ignores_pending_and_unknown() {
        let mut table = SlotTable::new(2);
        let (a, _pa) = conn();
        let index = table.insert(a).unwrap();
        let (_, fd) = table.pending().next().unwrap();
        let id = CorrelationId::of(fd);

        assert_eq!(table.release(id), None);
        assert_eq!(table.release(CorrelationId::from_raw(-1)), None);
        assert!(matches!(table.get(index), Some(Slot::Pending(_))));
    }

    #[test]
    fn park_twice_is_a_no_op() {
        let mut table = SlotTable::new(1);
        let (a, _pa) = conn();
        let index = table.insert(a).unwrap();

        assert!(table.park(index, Instant::now()).is_some());
        assert!(table.park(index, Instant::now()).is_none());
        assert!(table.park(5, Instant::now()).is_none());
    }

    #[test]
    fn expired_parked_slots_are_reclaimed() {
        let mut table = SlotTable::new(2);
        let (a, _pa) = conn();
        let (b, _pb) = conn();
        let start = Instant::now();

        let old = table.insert(a).unwrap();
        let old_id = table.park(old, start).unwrap();
        let fresh = table.insert(b).unwrap();
        table.park(fresh, start + Duration::from_secs(5)).unwrap();

        let reclaimed =
            table.reclaim_expired(start + Duration::from_secs(10), Duration::from_secs(8));

        assert_eq!(reclaimed, vec![old_id]);
        assert!(table.get(old).unwrap().is_empty());
        assert!(!table.get(fresh).unwrap().is_empty());
    }

    #[test]
    fn reclaimed_descriptor_lingers_until_forgotten() {
        use std::io::Read;

        let mut table = SlotTable::new(1);
        let (a, mut peer) = conn();
        let start = Instant::now();
        let index = table.insert(a).unwrap();
        let id = table.park(index, start).unwrap();

        assert_eq!(table.reclaim_expired(start, Duration::ZERO), vec![id]);
        assert!(table.get(index).unwrap().is_empty());
        assert_eq!(table.lingering().map(|(id, _)| id).collect::<Vec<_>>(), vec![id]);

        // still open: a fresh descriptor cannot get the same number
        let (b, _pb) = conn();
        assert_ne!(CorrelationId::of(b.as_fd()), id);
        assert_eq!(table.release(id), None);

        assert!(table.forget(id));
        assert!(!table.forget(id));
        assert_eq!(table.lingering().count(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn closing_drops_the_descriptor() {
        use std::io::Read;

        let mut table = SlotTable::new(1);
        let (a, mut peer) = conn();
        let index = table.insert(a).unwrap();

        table.close(index);

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}
