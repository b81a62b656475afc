//! The interception engine. Redirects a function's entry point to a replacement while keeping
//! the original implementation callable through a trampoline.
//!
//! Patching is grouped into transactions. A transaction either takes effect for every function
//! it names or leaves all of them exactly as they were before the commit.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use thiserror::Error;

#[cfg(windows)]
mod minhook;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(windows)]
pub use minhook::MinHook;

/// A low-level failure reported by the engine or its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// The backend's status code, if the fault came from the backend.
    pub code: Option<i32>,
    pub reason: &'static str,

    /// The entry point is not something that can be patched at all.
    pub unhookable: bool,
}

impl Fault {
    pub const ALREADY_ATTACHED: Fault = Fault::engine("function is already attached");
    pub const NOT_ATTACHED: Fault = Fault::engine("function was never attached");
    pub const DETOUR_MISMATCH: Fault = Fault::engine("function is attached to a different detour");
    pub const DUPLICATE: Fault = Fault::engine("function appears twice in one transaction");

    const fn engine(reason: &'static str) -> Fault {
        Fault {
            code: None,
            reason,
            unhookable: false,
        }
    }

    pub const fn backend(code: i32, reason: &'static str) -> Fault {
        Fault {
            code: Some(code),
            reason,
            unhookable: false,
        }
    }

    /// A backend refusal caused by the target itself rather than by the patching.
    pub const fn unhookable(code: i32, reason: &'static str) -> Fault {
        Fault {
            code: Some(code),
            reason,
            unhookable: true,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (status {})", self.reason, code),
            None => f.write_str(self.reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("unable to resolve {}", .0.iter().join(", "))]
    Resolution(Vec<String>),

    #[error("failed to attach {name}: {fault}")]
    Attach { name: String, fault: Fault },

    #[error("failed to detach {name}: {fault}")]
    Detach { name: String, fault: Fault },

    #[error("hooks are not installed")]
    NotInstalled,
}

/// The patching primitive the engine drives.
///
/// `create` builds a trampoline for `target` and prepares a jump to `detour` without enabling
/// it. `queue` marks a created hook to be enabled or disabled by the next `apply_queued`, which
/// must write every queued change while no other thread of the process is running.
pub trait Backend {
    unsafe fn create(&mut self, target: usize, detour: usize) -> Result<usize, Fault>;
    unsafe fn remove(&mut self, target: usize) -> Result<(), Fault>;
    unsafe fn queue(&mut self, target: usize, enable: bool) -> Result<(), Fault>;
    unsafe fn apply_queued(&mut self) -> Result<(), Fault>;
}

impl Backend for Box<dyn Backend + Send> {
    unsafe fn create(&mut self, target: usize, detour: usize) -> Result<usize, Fault> {
        (**self).create(target, detour)
    }

    unsafe fn remove(&mut self, target: usize) -> Result<(), Fault> {
        (**self).remove(target)
    }

    unsafe fn queue(&mut self, target: usize, enable: bool) -> Result<(), Fault> {
        (**self).queue(target, enable)
    }

    unsafe fn apply_queued(&mut self) -> Result<(), Fault> {
        (**self).apply_queued()
    }
}

/// An applied redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub detour: usize,
    pub trampoline: usize,
}

/// A hook whose trampoline exists but which has not been enabled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staged {
    pub name: &'static str,
    pub target: usize,
    pub trampoline: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Attach,
    Detach,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    action: Action,
    name: &'static str,
    target: usize,
    detour: usize,
}

impl Op {
    fn error(&self, fault: Fault) -> HookError {
        let name = self.name.to_string();

        if fault.unhookable {
            return HookError::Resolution(vec![format!("{} ({})", name, fault)]);
        }

        match self.action {
            Action::Attach => HookError::Attach { name, fault },
            Action::Detach => HookError::Detach { name, fault },
        }
    }
}

pub struct Engine<B> {
    backend: B,
    patches: HashMap<usize, Patch>,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B) -> Engine<B> {
        Engine {
            backend,
            patches: HashMap::new(),
        }
    }

    pub fn transaction(&mut self) -> Transaction<'_, B> {
        Transaction {
            engine: self,
            ops: vec![],
        }
    }

    /// Redirects `target` to `detour` in a transaction of its own and returns the trampoline.
    pub unsafe fn attach(&mut self, target: usize, detour: usize) -> Result<usize, HookError> {
        let mut transaction = self.transaction();
        transaction.attach("function", target, detour);
        transaction.commit()?;

        Ok(self.patches[&target].trampoline)
    }

    /// Reverses a previous `attach` in a transaction of its own.
    pub unsafe fn detach(&mut self, target: usize, detour: usize) -> Result<(), HookError> {
        let mut transaction = self.transaction();
        transaction.detach("function", target, detour);
        transaction.commit()
    }

    pub fn trampoline(&self, target: usize) -> Option<usize> {
        self.patches.get(&target).map(|patch| patch.trampoline)
    }

    pub fn is_attached(&self, target: usize) -> bool {
        self.patches.contains_key(&target)
    }

    fn validate(&self, ops: &[Op]) -> Result<(), HookError> {
        let unresolved: Vec<String> = ops
            .iter()
            .filter(|op| op.target == 0)
            .map(|op| op.name.to_string())
            .collect();

        if !unresolved.is_empty() {
            return Err(HookError::Resolution(unresolved));
        }

        if let Some(op) = ops.iter().duplicates_by(|op| op.target).next() {
            return Err(op.error(Fault::DUPLICATE));
        }

        for op in ops {
            match (op.action, self.patches.get(&op.target)) {
                (Action::Attach, Some(_)) => return Err(op.error(Fault::ALREADY_ATTACHED)),
                (Action::Detach, None) => return Err(op.error(Fault::NOT_ATTACHED)),
                (Action::Detach, Some(patch)) if patch.detour != op.detour => {
                    return Err(op.error(Fault::DETOUR_MISMATCH))
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Frees trampolines that were created for a transaction that is being abandoned.
    unsafe fn discard(&mut self, staged: &[Staged]) {
        for hook in staged.iter().rev() {
            if let Err(fault) = self.backend.remove(hook.target) {
                log::warn!("Unable to discard staged hook for {}: {}", hook.name, fault);
            }
        }
    }

    /// Reverts the queued state of every op so that the next apply restores the old state.
    unsafe fn unqueue(&mut self, ops: &[Op]) {
        for op in ops {
            if let Err(fault) = self.backend.queue(op.target, op.action == Action::Detach) {
                log::warn!("Unable to unqueue {}: {}", op.name, fault);
            }
        }
    }
}

/// A group of attach and detach operations that are applied together.
pub struct Transaction<'e, B: Backend> {
    engine: &'e mut Engine<B>,
    ops: Vec<Op>,
}

impl<'e, B: Backend> Transaction<'e, B> {
    pub fn attach(&mut self, name: &'static str, target: usize, detour: usize) -> &mut Self {
        self.ops.push(Op {
            action: Action::Attach,
            name,
            target,
            detour,
        });

        self
    }

    pub fn detach(&mut self, name: &'static str, target: usize, detour: usize) -> &mut Self {
        self.ops.push(Op {
            action: Action::Detach,
            name,
            target,
            detour,
        });

        self
    }

    pub unsafe fn commit(self) -> Result<(), HookError> {
        self.commit_with(|_| {})
    }

    /// Applies the transaction. `publish` receives the trampolines of every attached function
    /// after they have been built and before any of them can be reached through a redirected
    /// entry point.
    pub unsafe fn commit_with<F>(self, publish: F) -> Result<(), HookError>
    where
        F: FnOnce(&[Staged]),
    {
        let Transaction { engine, ops } = self;

        engine.validate(&ops)?;

        if ops.is_empty() {
            return Ok(());
        }

        let mut staged = vec![];

        for op in ops.iter().filter(|op| op.action == Action::Attach) {
            match engine.backend.create(op.target, op.detour) {
                Ok(trampoline) => staged.push(Staged {
                    name: op.name,
                    target: op.target,
                    trampoline,
                }),

                Err(fault) => {
                    engine.discard(&staged);
                    return Err(op.error(fault));
                }
            }
        }

        publish(&staged);

        for (index, op) in ops.iter().enumerate() {
            if let Err(fault) = engine.backend.queue(op.target, op.action == Action::Attach) {
                engine.unqueue(&ops[..index]);
                engine.discard(&staged);
                return Err(op.error(fault));
            }
        }

        if let Err(fault) = engine.backend.apply_queued() {
            // Part of the batch may have been written before the failure.
            engine.unqueue(&ops);

            if let Err(fault) = engine.backend.apply_queued() {
                log::error!("Unable to roll back partially applied transaction: {}", fault);
            }

            engine.discard(&staged);

            let first = ops.iter().find(|op| op.action == Action::Attach).unwrap_or(&ops[0]);
            let name = ops.iter().map(|op| op.name).join(", ");

            return Err(match first.action {
                Action::Attach => HookError::Attach { name, fault },
                Action::Detach => HookError::Detach { name, fault },
            });
        }

        for op in ops.iter().filter(|op| op.action == Action::Detach) {
            // The jump is already gone at this point, so a failure only leaks the trampoline.
            if let Err(fault) = engine.backend.remove(op.target) {
                log::warn!("Unable to free trampoline for {}: {}", op.name, fault);
            }

            engine.patches.remove(&op.target);
        }

        for hook in staged {
            let detour = ops
                .iter()
                .find(|op| op.target == hook.target)
                .map_or(0, |op| op.detour);

            engine.patches.insert(
                hook.target,
                Patch {
                    detour,
                    trampoline: hook.trampoline,
                },
            );
        }

        Ok(())
    }
}
