use std::sync::Arc;

use dashmap::DashMap;
use grid_types::Address;

/// Allows one in-flight command per identity.
#[derive(Clone, Debug, Default)]
pub struct InFlightGate {
    held: Arc<DashMap<Address, ()>>,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for `identity`, or `None` if a command already holds it.
    /// The claim is released when the guard drops, including during unwinding.
    pub fn try_enter(&self, identity: Address) -> Option<GateGuard> {
        match self.held.entry(identity) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(GateGuard {
                    held: self.held.clone(),
                    identity,
                })
            }
        }
    }

    pub fn is_held(&self, identity: &Address) -> bool {
        self.held.contains_key(identity)
    }
}

#[derive(Debug)]
pub struct GateGuard {
    held: Arc<DashMap<Address, ()>>,
    identity: Address,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.held.remove(&self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let gate = InFlightGate::new();
        let id = Address::new([1u8; 32]);
        let guard = gate.try_enter(id).unwrap();
        assert!(gate.try_enter(id).is_none());
        assert!(gate.try_enter(Address::new([2u8; 32])).is_some());
        drop(guard);
        assert!(gate.try_enter(id).is_some());
    }

    #[test]
    fn released_on_panic() {
        let gate = InFlightGate::new();
        let id = Address::new([1u8; 32]);
        let inner = gate.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_enter(id).unwrap();
            panic!("command blew up");
        }));
        assert!(result.is_err());
        assert!(!gate.is_held(&id));
    }
}
