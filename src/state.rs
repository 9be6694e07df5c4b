use crate::types::{Address, TrackedToken};
use std::collections::{BTreeSet, HashMap};

/// In-memory store for every tracked token
///
/// Sole owner of mutable token state. Constructed at startup (optionally
/// hydrated from persistence) and passed by reference to the detector and
/// classifier. Mutations go through [`get_mut`](Self::get_mut) or
/// [`insert_new`](Self::insert_new), both of which mark the token dirty so the
/// next flush writes it through.
#[derive(Debug, Default)]
pub struct TokenStateStore {
    tokens: HashMap<Address, TrackedToken>,
    dirty: BTreeSet<Address>,
}

impl TokenStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load previously persisted tokens; returns how many were added
    ///
    /// Hydrated tokens start clean. Addresses already present are left alone.
    pub fn hydrate(&mut self, tokens: Vec<TrackedToken>) -> usize {
        let mut added = 0;
        for token in tokens {
            if !self.tokens.contains_key(&token.address) {
                self.tokens.insert(token.address.clone(), token);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.tokens.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&TrackedToken> {
        self.tokens.get(address)
    }

    /// Mutable access; the token is marked dirty
    pub fn get_mut(&mut self, address: &Address) -> Option<&mut TrackedToken> {
        let token = self.tokens.get_mut(address)?;
        self.dirty.insert(address.clone());
        Some(token)
    }

    /// Insert a newly detected token
    ///
    /// Returns false (and keeps the existing record) when the address is
    /// already tracked: a token is never re-created within a process lifetime.
    pub fn insert_new(&mut self, token: TrackedToken) -> bool {
        if self.tokens.contains_key(&token.address) {
            return false;
        }
        self.dirty.insert(token.address.clone());
        self.tokens.insert(token.address.clone(), token);
        true
    }

    pub fn is_dirty(&self, address: &Address) -> bool {
        self.dirty.contains(address)
    }

    /// Drain the dirty set, returning snapshots of those tokens
    pub fn take_dirty(&mut self) -> Vec<TrackedToken> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|address| self.tokens.get(&address).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
