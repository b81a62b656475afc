//! In-memory backend that models redirection without touching executable memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Backend, Fault};
use crate::registry::Resolver;

const TRAMPOLINE_BASE: usize = 0x7000_0000;

#[derive(Default)]
struct State {
    // target -> (detour, trampoline)
    created: BTreeMap<usize, (usize, usize)>,
    queued: BTreeMap<usize, bool>,
    enabled: BTreeMap<usize, bool>,
    next_trampoline: usize,
    creates_seen: usize,
    fail_create_at: Option<usize>,
    fail_apply_after: Option<usize>,
    refused: HashSet<usize>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBackend(Arc<Mutex<State>>);

impl FakeBackend {
    /// Where a call to `target` ends up.
    pub fn route(&self, target: usize) -> usize {
        let state = self.0.lock();

        match state.created.get(&target) {
            Some((detour, _)) if state.enabled.get(&target) == Some(&true) => *detour,
            _ => target,
        }
    }

    /// The function a trampoline leads back to.
    pub fn original_behind(&self, trampoline: usize) -> Option<usize> {
        self.0
            .lock()
            .created
            .iter()
            .find(|(_, (_, t))| *t == trampoline)
            .map(|(target, _)| *target)
    }

    pub fn created_count(&self) -> usize {
        self.0.lock().created.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.0.lock().enabled.values().filter(|on| **on).count()
    }

    /// Makes the `index`th (zero-based) `create` call from now on fail.
    pub fn fail_create_at(&self, index: usize) {
        let mut state = self.0.lock();
        state.fail_create_at = Some(state.creates_seen + index);
    }

    /// Makes `target` look like an entry point that cannot be patched.
    pub fn refuse(&self, target: usize) {
        self.0.lock().refused.insert(target);
    }

    /// Makes the next `apply_queued` fail after writing `count` changes.
    pub fn fail_apply_after(&self, count: usize) {
        self.0.lock().fail_apply_after = Some(count);
    }
}

impl Backend for FakeBackend {
    unsafe fn create(&mut self, target: usize, detour: usize) -> Result<usize, Fault> {
        let mut state = self.0.lock();
        let index = state.creates_seen;
        state.creates_seen += 1;

        if state.fail_create_at == Some(index) {
            return Err(Fault::backend(9, "unable to allocate trampoline memory"));
        }

        if state.refused.contains(&target) {
            return Err(Fault::unhookable(8, "target cannot be hooked"));
        }

        if state.created.contains_key(&target) {
            return Err(Fault::backend(3, "already created"));
        }

        state.next_trampoline += 0x100;
        let trampoline = TRAMPOLINE_BASE + state.next_trampoline;
        state.created.insert(target, (detour, trampoline));

        Ok(trampoline)
    }

    unsafe fn remove(&mut self, target: usize) -> Result<(), Fault> {
        let mut state = self.0.lock();

        if state.created.remove(&target).is_none() {
            return Err(Fault::backend(4, "not created"));
        }

        state.queued.remove(&target);
        state.enabled.remove(&target);
        Ok(())
    }

    unsafe fn queue(&mut self, target: usize, enable: bool) -> Result<(), Fault> {
        let mut state = self.0.lock();

        if !state.created.contains_key(&target) {
            return Err(Fault::backend(4, "not created"));
        }

        state.queued.insert(target, enable);
        Ok(())
    }

    unsafe fn apply_queued(&mut self) -> Result<(), Fault> {
        let mut state = self.0.lock();
        let limit = state.fail_apply_after.take();

        let pending: Vec<(usize, bool)> = state
            .queued
            .iter()
            .filter(|(target, enable)| {
                state.enabled.get(*target).copied().unwrap_or(false) != **enable
            })
            .map(|(target, enable)| (*target, *enable))
            .collect();

        for (written, (target, enable)) in pending.into_iter().enumerate() {
            if limit == Some(written) {
                return Err(Fault::backend(10, "memory protection failure"));
            }

            state.enabled.insert(target, enable);
        }

        Ok(())
    }
}

/// Resolves symbols from a fixed table.
#[derive(Default)]
pub(crate) struct FakeResolver {
    symbols: HashMap<(String, String), usize>,
}

impl FakeResolver {
    pub fn with(mut self, module: &str, symbol: &str, address: usize) -> FakeResolver {
        self.symbols
            .insert((module.to_string(), symbol.to_string()), address);
        self
    }
}

impl Resolver for FakeResolver {
    fn resolve(&self, module: &str, symbol: &str) -> Option<usize> {
        self.symbols
            .get(&(module.to_string(), symbol.to_string()))
            .copied()
    }
}
