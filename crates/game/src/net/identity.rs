use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned handle of a networked entity or player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(u16);

impl NetworkId {
    /// "No entity", e.g. the parent of a root entity.
    pub const NONE: NetworkId = NetworkId(u16::MAX);

    /// Number of identities that can be live at once; `NONE` is never handed out.
    pub const SPACE: usize = u16::MAX as usize;

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u16::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }

    pub fn into_option(self) -> Option<NetworkId> {
        if self.is_none() { None } else { Some(self) }
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "#none")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Bounded pool of network identities.
///
/// Exhaustion and double frees are caller bugs and panic. Freed identities go onto a
/// stack, so the most recently freed one is reused first.
#[derive(Debug)]
pub struct IdentityAllocator {
    capacity: usize,
    next_unused: usize,
    free: Vec<u16>,
    allocated: Vec<bool>,
    live: usize,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self::with_capacity(NetworkId::SPACE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity <= NetworkId::SPACE,
            "identity capacity {capacity} exceeds the identity space of {}",
            NetworkId::SPACE
        );
        Self {
            capacity,
            next_unused: 0,
            free: Vec::new(),
            allocated: vec![false; capacity],
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn available(&self) -> usize {
        self.capacity - self.live
    }

    pub fn is_allocated(&self, id: NetworkId) -> bool {
        self.allocated
            .get(id.raw() as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn try_allocate(&mut self) -> Option<NetworkId> {
        let raw = match self.free.pop() {
            Some(raw) => raw,
            None if self.next_unused < self.capacity => {
                let raw = self.next_unused as u16;
                self.next_unused += 1;
                raw
            }
            None => return None,
        };

        debug_assert!(!self.allocated[raw as usize]);
        self.allocated[raw as usize] = true;
        self.live += 1;
        Some(NetworkId(raw))
    }

    pub fn allocate(&mut self) -> NetworkId {
        match self.try_allocate() {
            Some(id) => id,
            None => {
                log::error!("network identity pool exhausted ({} live)", self.live);
                panic!("network identity pool exhausted ({} live)", self.live);
            }
        }
    }

    pub fn free(&mut self, id: NetworkId) {
        if !self.is_allocated(id) {
            log::error!("freeing network identity {} that is not allocated", id);
            panic!("freeing network identity {id} that is not allocated");
        }
        self.allocated[id.raw() as usize] = false;
        self.free.push(id.raw());
        self.live -= 1;
    }

    /// Releases every identity. Only valid once nothing refers to them anymore.
    pub fn clear(&mut self) {
        self.next_unused = 0;
        self.free.clear();
        self.allocated.fill(false);
        self.live = 0;
    }
}
