//! Bookkeeping for permuters registered with this host's evaluator pool:
//! handle assignment, client ownership, and fair-share dispatch of queued
//! work requests across whichever permuters currently have any.
//!
//! `Add`/`Remove` are deliberately asymmetric. Registering the same
//! `(client, client_permuter)` pair twice is a protocol violation from a
//! session that's either buggy or racing itself, so it's rejected.
//! Removing a permuter that was never added (or already removed, e.g. a
//! `Remove` racing a `ClientDisconnected` cleanup) is routine and silently
//! ignored rather than raised.

use std::collections::{HashMap, VecDeque};

use pah_core::seed::SeedTuple;

use crate::activity::{ClientToken, PermHandle};

/// Errors from registering a permuter with the scheduler.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("permuter {client_permuter} is already registered for this client")]
    AlreadyRegistered { client_permuter: usize },
}

struct Registration {
    client: ClientToken,
    client_permuter: usize,
}

/// Tracks every permuter currently registered with this host and fairly
/// interleaves queued work across them.
#[derive(Default)]
pub struct Scheduler {
    next_handle: u64,
    registrations: HashMap<PermHandle, Registration>,
    by_client: HashMap<(ClientToken, usize), PermHandle>,
    /// Round-robin order of handles that currently have queued work.
    round_robin: VecDeque<PermHandle>,
    pending: HashMap<PermHandle, VecDeque<SeedTuple>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new permuter for `client`. Fails if this client already
    /// has a permuter registered under `client_permuter`.
    pub fn register(
        &mut self,
        client: ClientToken,
        client_permuter: usize,
    ) -> Result<PermHandle, SchedulerError> {
        if self.by_client.contains_key(&(client, client_permuter)) {
            return Err(SchedulerError::AlreadyRegistered { client_permuter });
        }
        let handle = PermHandle(self.next_handle);
        self.next_handle += 1;
        self.registrations.insert(handle, Registration { client, client_permuter });
        self.by_client.insert((client, client_permuter), handle);
        self.pending.insert(handle, VecDeque::new());
        Ok(handle)
    }

    /// Unregister a permuter. Returns the handle if one was found; does
    /// nothing and returns `None` if this client never registered
    /// `client_permuter` (or already removed it).
    pub fn unregister(&mut self, client: ClientToken, client_permuter: usize) -> Option<PermHandle> {
        let handle = self.by_client.remove(&(client, client_permuter))?;
        self.registrations.remove(&handle);
        self.pending.remove(&handle);
        self.round_robin.retain(|h| *h != handle);
        Some(handle)
    }

    /// Drop every permuter belonging to `client` (on disconnect), returning
    /// their handles.
    pub fn remove_client(&mut self, client: ClientToken) -> Vec<PermHandle> {
        let doomed: Vec<usize> = self
            .by_client
            .keys()
            .filter(|(c, _)| *c == client)
            .map(|(_, p)| *p)
            .collect();
        doomed
            .into_iter()
            .filter_map(|client_permuter| self.unregister(client, client_permuter))
            .collect()
    }

    /// Queue a seed for evaluation against an already-registered permuter.
    /// Returns `false` if `handle` isn't currently registered (e.g. the
    /// client raced a `Remove` against this `Work` request).
    pub fn enqueue(&mut self, handle: PermHandle, seed: SeedTuple) -> bool {
        let Some(queue) = self.pending.get_mut(&handle) else { return false };
        let was_empty = queue.is_empty();
        queue.push_back(seed);
        if was_empty {
            self.round_robin.push_back(handle);
        }
        true
    }

    /// Pop the next `(handle, seed)` pair to hand an idle evaluator, cycling
    /// fairly across every permuter that currently has queued work.
    pub fn next_work(&mut self) -> Option<(PermHandle, SeedTuple)> {
        let handle = self.round_robin.pop_front()?;
        let queue = self.pending.get_mut(&handle)?;
        let seed = queue.pop_front()?;
        if !queue.is_empty() {
            self.round_robin.push_back(handle);
        }
        Some((handle, seed))
    }

    /// The `(client, client_permuter)` that owns `handle`, if it's still
    /// registered.
    pub fn owner(&self, handle: PermHandle) -> Option<(ClientToken, usize)> {
        self.registrations.get(&handle).map(|r| (r.client, r.client_permuter))
    }

    /// The handle registered for `(client, client_permuter)`, if any.
    pub fn find(&self, client: ClientToken, client_permuter: usize) -> Option<PermHandle> {
        self.by_client.get(&(client, client_permuter)).copied()
    }

    /// Every client currently registered with this scheduler, deduplicated.
    /// Used to nudge clients for more work when this scheduler's evaluator
    /// runs out of queued seeds.
    pub fn registered_clients(&self) -> Vec<ClientToken> {
        let mut seen: std::collections::HashSet<ClientToken> = std::collections::HashSet::new();
        self.registrations.values().map(|r| r.client).filter(|c| seen.insert(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_add_is_rejected_but_duplicate_remove_is_ignored() {
        let mut sched = Scheduler::new();
        let client = ClientToken(1);
        sched.register(client, 0).unwrap();

        let err = sched.register(client, 0).unwrap_err();
        assert_eq!(err, SchedulerError::AlreadyRegistered { client_permuter: 0 });

        assert!(sched.unregister(client, 0).is_some());
        assert!(sched.unregister(client, 0).is_none());
        assert!(sched.unregister(ClientToken(2), 7).is_none());
    }

    #[test]
    fn dispatch_cycles_fairly_across_permuters() {
        let mut sched = Scheduler::new();
        let a = sched.register(ClientToken(1), 0).unwrap();
        let b = sched.register(ClientToken(2), 0).unwrap();

        sched.enqueue(a, SeedTuple::fresh(1));
        sched.enqueue(a, SeedTuple::fresh(2));
        sched.enqueue(b, SeedTuple::fresh(3));

        let (first, _) = sched.next_work().unwrap();
        let (second, _) = sched.next_work().unwrap();
        let (third, _) = sched.next_work().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert_eq!(third, a);
        assert!(sched.next_work().is_none());
    }

    #[test]
    fn removing_a_client_drains_its_queued_work() {
        let mut sched = Scheduler::new();
        let client = ClientToken(5);
        let handle = sched.register(client, 0).unwrap();
        sched.enqueue(handle, SeedTuple::fresh(1));

        let removed = sched.remove_client(client);
        assert_eq!(removed, vec![handle]);
        assert!(sched.next_work().is_none());
        assert!(sched.owner(handle).is_none());
    }

    #[test]
    fn enqueue_against_unknown_handle_is_rejected() {
        let mut sched = Scheduler::new();
        assert!(!sched.enqueue(PermHandle(999), SeedTuple::fresh(1)));
    }
}
