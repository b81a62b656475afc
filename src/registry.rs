//! Tracks the set of hooked functions and installs or removes them as one group.

use std::sync::atomic::{AtomicUsize, Ordering};

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::hook::{Backend, Engine, HookError};

/// Every function this library hooks. The variant name is the exported symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter, IntoStaticStr)]
pub enum HookId {
    CreateFontIndirectA,
    CreateFileA,
    CreateWindowExA,
    CreateWindowExW,
}

impl HookId {
    pub fn module(self) -> &'static str {
        match self {
            HookId::CreateFontIndirectA => "gdi32.dll",
            HookId::CreateFileA => "kernel32.dll",
            HookId::CreateWindowExA | HookId::CreateWindowExW => "user32.dll",
        }
    }

    pub fn symbol(self) -> &'static str {
        self.into()
    }
}

/// Looks up the entry point of an exported function.
pub trait Resolver {
    fn resolve(&self, module: &str, symbol: &str) -> Option<usize>;
}

/// A function to hook and the handler that replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    pub id: HookId,
    pub replacement: usize,
}

impl HookSpec {
    pub fn new(id: HookId, replacement: usize) -> HookSpec {
        HookSpec { id, replacement }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptedFunction {
    pub id: HookId,
    pub original: usize,
    pub replacement: usize,
    pub trampoline: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninstalled,
    Installed,
}

/// Trampolines to the original implementations, readable from any thread without locking.
///
/// The resolved entry points are kept as well. A trampoline slot is only cleared once the jump
/// over its entry point is gone, so a handler that finds no trampoline can call the entry point
/// directly.
pub struct Originals {
    trampolines: [AtomicUsize; HookId::COUNT],
    entries: [AtomicUsize; HookId::COUNT],
}

impl Originals {
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Originals {
        const EMPTY: AtomicUsize = AtomicUsize::new(0);

        Originals {
            trampolines: [EMPTY; HookId::COUNT],
            entries: [EMPTY; HookId::COUNT],
        }
    }

    /// The trampoline, while `id` is hooked.
    pub fn get(&self, id: HookId) -> Option<usize> {
        load(&self.trampolines[id as usize])
    }

    /// The unpatched entry point, once `id` has been resolved.
    pub fn entry(&self, id: HookId) -> Option<usize> {
        load(&self.entries[id as usize])
    }

    /// Where a call that is not transformed should go.
    pub fn callable(&self, id: HookId) -> Option<usize> {
        self.get(id).or_else(|| self.entry(id))
    }

    fn publish(&self, id: HookId, trampoline: usize, entry: usize) {
        self.entries[id as usize].store(entry, Ordering::Release);
        self.trampolines[id as usize].store(trampoline, Ordering::Release);
    }

    fn clear_all(&self) {
        for slot in &self.trampolines {
            slot.store(0, Ordering::Release);
        }
    }
}

fn load(slot: &AtomicUsize) -> Option<usize> {
    match slot.load(Ordering::Acquire) {
        0 => None,
        address => Some(address),
    }
}

impl Default for Originals {
    fn default() -> Originals {
        Originals::new()
    }
}

/// The trampolines used by the live handlers.
pub static ORIGINALS: Originals = Originals::new();

pub struct Registry<B> {
    engine: Engine<B>,
    hooks: Vec<InterceptedFunction>,
    originals: &'static Originals,
}

impl<B: Backend> Registry<B> {
    pub fn new(engine: Engine<B>, originals: &'static Originals) -> Registry<B> {
        Registry {
            engine,
            hooks: vec![],
            originals,
        }
    }

    pub fn state(&self) -> State {
        if self.hooks.is_empty() {
            State::Uninstalled
        } else {
            State::Installed
        }
    }

    pub fn hooks(&self) -> &[InterceptedFunction] {
        &self.hooks
    }

    /// Resolves every function in `specs` and hooks all of them in one transaction. Nothing is
    /// patched unless every function resolves.
    pub fn install_all(
        &mut self,
        specs: &[HookSpec],
        resolver: &dyn Resolver,
    ) -> Result<(), HookError> {
        if self.state() == State::Installed {
            log::warn!("Hooks are already installed.");
            return Ok(());
        }

        let mut resolved = Vec::with_capacity(specs.len());
        let mut missing = vec![];

        for spec in specs {
            match resolver.resolve(spec.id.module(), spec.id.symbol()) {
                Some(address) if address != 0 => resolved.push((*spec, address)),
                _ => missing.push(format!("{}!{}", spec.id.module(), spec.id.symbol())),
            }
        }

        if !missing.is_empty() {
            return Err(HookError::Resolution(missing));
        }

        let originals = self.originals;
        let mut transaction = self.engine.transaction();

        for (spec, address) in &resolved {
            transaction.attach(spec.id.symbol(), *address, spec.replacement);
        }

        let result = unsafe {
            transaction.commit_with(|staged| {
                for ((spec, entry), hook) in resolved.iter().zip(staged) {
                    originals.publish(spec.id, hook.trampoline, *entry);
                }
            })
        };

        if let Err(err) = result {
            originals.clear_all();
            return Err(err);
        }

        self.hooks = resolved
            .into_iter()
            .map(|(spec, original)| InterceptedFunction {
                id: spec.id,
                original,
                replacement: spec.replacement,
                trampoline: self.engine.trampoline(original).unwrap_or_default(),
            })
            .collect();

        Ok(())
    }

    /// Unhooks everything `install_all` hooked, in one transaction.
    pub fn remove_all(&mut self) -> Result<(), HookError> {
        if self.state() == State::Uninstalled {
            return Err(HookError::NotInstalled);
        }

        let mut transaction = self.engine.transaction();

        for hook in &self.hooks {
            transaction.detach(hook.id.symbol(), hook.original, hook.replacement);
        }

        unsafe { transaction.commit() }?;

        self.hooks.clear();
        self.originals.clear_all();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::testing::{FakeBackend, FakeResolver};
    use strum::IntoEnumIterator;

    fn leaked_originals() -> &'static Originals {
        Box::leak(Box::new(Originals::new()))
    }

    fn address_of(id: HookId) -> usize {
        0x1000 * (id as usize + 1)
    }

    fn replacement_of(id: HookId) -> usize {
        0xf000 + 0x10 * id as usize
    }

    fn full_resolver() -> FakeResolver {
        HookId::iter().fold(FakeResolver::default(), |resolver, id| {
            resolver.with(id.module(), id.symbol(), address_of(id))
        })
    }

    fn specs() -> Vec<HookSpec> {
        HookId::iter()
            .map(|id| HookSpec::new(id, replacement_of(id)))
            .collect()
    }

    #[test]
    fn install_routes_every_function_through_its_handler() {
        let backend = FakeBackend::default();
        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        registry.install_all(&specs(), &full_resolver()).unwrap();

        assert_eq!(registry.state(), State::Installed);
        assert_eq!(registry.hooks().len(), HookId::COUNT);

        for id in HookId::iter() {
            assert_eq!(backend.route(address_of(id)), replacement_of(id));

            let trampoline = originals.get(id).unwrap();
            assert_eq!(backend.original_behind(trampoline), Some(address_of(id)));
        }
    }

    #[test]
    fn missing_symbol_prevents_any_patching() {
        let backend = FakeBackend::default();
        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        let resolver = HookId::iter()
            .filter(|id| *id != HookId::CreateWindowExW)
            .fold(FakeResolver::default(), |resolver, id| {
                resolver.with(id.module(), id.symbol(), address_of(id))
            });

        let err = registry.install_all(&specs(), &resolver).unwrap_err();

        match err {
            HookError::Resolution(missing) => {
                assert_eq!(missing, vec!["user32.dll!CreateWindowExW".to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(backend.created_count(), 0);
        assert_eq!(registry.state(), State::Uninstalled);
        assert!(HookId::iter().all(|id| originals.get(id).is_none()));
    }

    #[test]
    fn attach_failure_leaves_no_function_hooked() {
        let backend = FakeBackend::default();
        backend.fail_create_at(2);

        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        assert!(matches!(
            registry.install_all(&specs(), &full_resolver()),
            Err(HookError::Attach { .. })
        ));

        assert_eq!(registry.state(), State::Uninstalled);
        assert_eq!(backend.created_count(), 0);

        for id in HookId::iter() {
            assert_eq!(backend.route(address_of(id)), address_of(id));
            assert!(originals.get(id).is_none());
        }
    }

    #[test]
    fn apply_failure_leaves_no_function_hooked() {
        let backend = FakeBackend::default();
        backend.fail_apply_after(3);

        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        assert!(registry.install_all(&specs(), &full_resolver()).is_err());
        assert_eq!(backend.enabled_count(), 0);
        assert!(HookId::iter().all(|id| originals.get(id).is_none()));
    }

    #[test]
    fn remove_restores_direct_calls() {
        let backend = FakeBackend::default();
        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        registry.install_all(&specs(), &full_resolver()).unwrap();
        registry.remove_all().unwrap();

        assert_eq!(registry.state(), State::Uninstalled);
        assert_eq!(backend.created_count(), 0);

        for id in HookId::iter() {
            assert_eq!(backend.route(address_of(id)), address_of(id));
            assert!(originals.get(id).is_none());
        }
    }

    #[test]
    fn calls_in_flight_during_removal_reach_the_entry_point() {
        let backend = FakeBackend::default();
        let originals = leaked_originals();
        let mut registry = Registry::new(Engine::new(backend.clone()), originals);

        assert!(HookId::iter().all(|id| originals.callable(id).is_none()));

        registry.install_all(&specs(), &full_resolver()).unwrap();

        for id in HookId::iter() {
            assert_eq!(originals.callable(id), originals.get(id));
            assert_eq!(originals.entry(id), Some(address_of(id)));
        }

        registry.remove_all().unwrap();

        // A handler entered before the jump was removed still has somewhere to send the call,
        // and that address is no longer redirected.
        for id in HookId::iter() {
            let target = originals.callable(id).unwrap();

            assert_eq!(target, address_of(id));
            assert_eq!(backend.route(target), target);
        }
    }

    #[test]
    fn remove_without_install_is_refused_safely() {
        let backend = FakeBackend::default();
        let mut registry = Registry::new(Engine::new(backend.clone()), leaked_originals());

        assert!(matches!(
            registry.remove_all(),
            Err(HookError::NotInstalled)
        ));

        // The registry is still usable afterwards.
        registry.install_all(&specs(), &full_resolver()).unwrap();
        assert_eq!(backend.enabled_count(), HookId::COUNT);
    }

    #[test]
    fn second_install_does_not_patch_again() {
        let backend = FakeBackend::default();
        let mut registry = Registry::new(Engine::new(backend.clone()), leaked_originals());

        registry.install_all(&specs(), &full_resolver()).unwrap();
        registry.install_all(&specs(), &full_resolver()).unwrap();

        assert_eq!(backend.created_count(), HookId::COUNT);
        registry.remove_all().unwrap();
        assert!(registry.remove_all().is_err());
    }

    #[test]
    fn symbols_match_exports() {
        let names: Vec<&str> = HookId::iter().map(HookId::symbol).collect();

        assert_eq!(
            names,
            vec![
                "CreateFontIndirectA",
                "CreateFileA",
                "CreateWindowExA",
                "CreateWindowExW"
            ]
        );
    }
}
