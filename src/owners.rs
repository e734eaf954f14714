use crate::txo::Address;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// The wallet's tracked addresses. Append-only while a sync is active
/// (spec.md §5 "shared-resource policy"): `add` may be called freely,
/// nothing ever removes an address out from under a running sync.
#[derive(Clone, Default)]
pub struct OwnerSet {
    inner: Arc<RwLock<HashSet<Address>>>,
}

impl OwnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(addrs: impl IntoIterator<Item = Address>) -> Self {
        let set = OwnerSet::new();
        for a in addrs {
            set.add(a);
        }
        set
    }

    pub fn add(&self, addr: Address) {
        self.inner.write().insert(addr);
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.inner.read().contains(addr)
    }

    pub fn snapshot(&self) -> Vec<Address> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains() {
        let owners = OwnerSet::new();
        let a = Address("abc".into());
        assert!(!owners.contains(&a));
        owners.add(a.clone());
        assert!(owners.contains(&a));
    }
}
