//! Call-graph registry and the host callbacks consumed by the passes.
//!
//! The registry is an external service addressed by instruction identity:
//! whenever a pass deletes a call instruction it must also deregister the
//! callsite here, so the surrounding inliner never sees a dangling entry.
//! The registry is shared across methods and may be hit from a per-method
//! parallel driver, hence the concurrent map.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::insn::{InsnId, MethodHandle};
use crate::method::Method;

/// Identity of a method in the call graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// The key for `method` as declared by `owner`.
    pub fn of(owner: &str, method: &Method) -> Self {
        Self::new(owner, method.name.clone(), method.desc.clone())
    }
}

/// A registered call instruction inside some method.
#[derive(Debug, Clone)]
pub struct Callsite {
    pub insn: InsnId,
    pub callee: MethodRef,
}

/// A registered `invokedynamic` closure instantiation.
#[derive(Debug, Clone)]
pub struct ClosureInstantiation {
    pub insn: InsnId,
    pub impl_method: MethodHandle,
}

/// Thread-safe registry of callsites and closure instantiations, keyed by
/// enclosing method and instruction identity.
#[derive(Debug, Default)]
pub struct CallGraph {
    callsites: DashMap<MethodRef, HashMap<InsnId, Callsite>>,
    closures: DashMap<MethodRef, HashMap<InsnId, ClosureInstantiation>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callsite(&self, method: &MethodRef, callsite: Callsite) {
        self.callsites
            .entry(method.clone())
            .or_default()
            .insert(callsite.insn, callsite);
    }

    /// All callsites registered for `method`, unordered.
    pub fn callsites(&self, method: &MethodRef) -> Vec<Callsite> {
        self.callsites
            .get(method)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn callsite(&self, method: &MethodRef, insn: InsnId) -> Option<Callsite> {
        self.callsites.get(method).and_then(|m| m.get(&insn).cloned())
    }

    /// Deregister the callsite at `insn`. Must be called for every removed
    /// call instruction.
    pub fn remove_callsite(&self, insn: InsnId, method: &MethodRef) -> Option<Callsite> {
        self.callsites.get_mut(method).and_then(|mut m| m.remove(&insn))
    }

    pub fn add_closure_instantiation(&self, method: &MethodRef, closure: ClosureInstantiation) {
        self.closures
            .entry(method.clone())
            .or_default()
            .insert(closure.insn, closure);
    }

    /// Deregister the closure instantiation at `insn`.
    pub fn remove_closure_instantiation(
        &self,
        insn: InsnId,
        method: &MethodRef,
    ) -> Option<ClosureInstantiation> {
        self.closures.get_mut(method).and_then(|mut m| m.remove(&insn))
    }
}

/// The canonical inlining order for a batch of callsites: list order of the
/// call instructions within their method.
pub fn callsite_ordering(method: &Method, callsites: &mut [Callsite]) {
    let positions = method.insns.positions();
    callsites.sort_by_key(|cs| positions.get(&cs.insn).copied().unwrap_or(usize::MAX));
}

/// Hooks into the surrounding optimizer.
///
/// `inline_callsite` hands an exposed callsite to the external inliner; it
/// reports whether the inline actually happened (the inliner applies its own
/// heuristics and logs its own failures). `remove_indy_lambda_impl_method`
/// drops the synthetic lambda body backing a deleted closure instantiation,
/// provided nothing else references it.
pub trait OptimizerHost {
    fn inline_callsite(
        &self,
        method: &mut Method,
        callsite: &Callsite,
        update_call_graph: bool,
    ) -> bool;

    fn remove_indy_lambda_impl_method(&self, impl_method: &MethodHandle);
}

/// A host that inlines nothing and removes nothing; useful when running the
/// local passes stand-alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl OptimizerHost for NoopHost {
    fn inline_callsite(&self, _: &mut Method, _: &Callsite, _: bool) -> bool {
        false
    }

    fn remove_indy_lambda_impl_method(&self, _: &MethodHandle) {}
}
