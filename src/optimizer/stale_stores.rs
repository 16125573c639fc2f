//! Stale-store elimination and intrinsic rewriting.
//!
//! A store whose value is never consumed is replaced by a pop. Reference
//! stores need care: dropping one can extend the previous referent's
//! lifetime in the eyes of the GC, so a stale `astore` is only dropped when
//! the stored value is provably non-leakable (the receiver, or an
//! uninitialized slot's default). Otherwise the slot is *null-poisoned*:
//! the store stays but the stored value becomes the null constant. Stores
//! in the trailing straight-line run before a return, and stores to slots
//! with no live reference use, are downgraded to plain pops.
//!
//! The same walk rewrites `ClassTag(classOf[X]).newArray(n)` to a direct
//! `anewarray X` and queues any exposed `ScalaRunTime.array_apply/update`
//! callsites for the external inliner: their type dispatch collapses once
//! the element type is static.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::analysis::prodcons::{ProdConsAnalysis, Producer};
use crate::callgraph::{callsite_ordering, CallGraph, Callsite, MethodRef, OptimizerHost};
use crate::config::OptConfig;
use crate::insn::{Insn, InsnId};
use crate::intrinsics;
use crate::method::Method;
use crate::opcodes::Opcode;

use super::types::StaleStoresChange;

#[derive(Debug, Clone, Copy, PartialEq)]
enum StorePlan {
    /// Replace the store with a pop of the stored width.
    Pop,
    /// Keep the store but make the stored value null. `already_null` means
    /// the source is the null constant and no edit is needed.
    NullPoison { already_null: bool },
}

#[derive(Debug)]
struct StaleStore {
    id: InsnId,
    var: u16,
    width: u8,
    plan: StorePlan,
}

pub(crate) fn eliminate_stale_stores(
    method: &mut Method,
    owner: &str,
    config: &OptConfig,
    call_graph: &CallGraph,
    host: &dyn OptimizerHost,
) -> StaleStoresChange {
    let mut result = StaleStoresChange::default();
    let Some(pc) = ProdConsAnalysis::build(method, config) else {
        return result;
    };
    let params_size = method.params_size();

    let mut stale: Vec<StaleStore> = Vec::new();
    let mut iinc_removals: Vec<InsnId> = Vec::new();
    // (newArray call, receiver producer, element class)
    let mut rewrites: Vec<(InsnId, InsnId, String)> = Vec::new();
    let mut to_inline: HashSet<InsnId> = HashSet::new();
    let mut live_ref_slots: HashSet<u16> = HashSet::new();

    let has_no_consumer = |id: InsnId, var: u16| -> bool {
        match method.insns.next(id) {
            Some(next) => pc.consumers_of_value_at(next, var as usize).is_empty(),
            None => true,
        }
    };

    for (id, insn) in method.insns.iter() {
        match insn {
            Insn::Var { op, var } if op.is_load() => {
                if *op == Opcode::Aload {
                    live_ref_slots.insert(*var);
                }
            }
            Insn::Var { op, var } if op.is_store() => {
                if has_no_consumer(id, *var) {
                    let plan = if *op != Opcode::Astore {
                        StorePlan::Pop
                    } else {
                        let initial = pc.initial_producers_for_inputs_of(id);
                        let non_leakable = initial.len() == 1
                            && match initial[0] {
                                Producer::Parameter(0) => !method.is_static,
                                Producer::UninitializedLocal(_) => true,
                                _ => false,
                            };
                        if non_leakable {
                            StorePlan::Pop
                        } else {
                            let already_null = !initial.is_empty()
                                && initial.iter().all(|p| match p {
                                    Producer::Insn(src) => matches!(
                                        method.insns.get(*src),
                                        Some(Insn::Simple(Opcode::AconstNull))
                                    ),
                                    _ => false,
                                });
                            StorePlan::NullPoison { already_null }
                        }
                    };
                    stale.push(StaleStore {
                        id,
                        var: *var,
                        width: op.var_width(),
                        plan,
                    });
                } else if *op == Opcode::Astore {
                    // A live reference store keeps its slot live unless it
                    // only ever stores the null constant.
                    let live = *var < params_size
                        || pc
                            .initial_producers_for_inputs_of(id)
                            .iter()
                            .any(|p| match p {
                                Producer::Insn(src) => !matches!(
                                    method.insns.get(*src),
                                    Some(Insn::Simple(Opcode::AconstNull))
                                ),
                                _ => true,
                            });
                    if live {
                        live_ref_slots.insert(*var);
                    }
                }
            }
            Insn::Iinc { var, .. } => {
                if has_no_consumer(id, *var) {
                    iinc_removals.push(id);
                }
            }
            Insn::MethodCall { .. } => {
                if let Some((tag_producer, elem)) =
                    intrinsics::class_tag_new_array_arg(&method.insns, &pc, id)
                {
                    for consumer in pc.ultimate_consumers_of_outputs_from(id) {
                        if method
                            .insns
                            .get(consumer)
                            .map(intrinsics::is_runtime_array_load_or_update)
                            .unwrap_or(false)
                        {
                            to_inline.insert(consumer);
                        }
                    }
                    rewrites.push((id, tag_producer, elem));
                }
            }
            _ => {}
        }
    }

    // Reference stores in the trailing run before a return cannot extend any
    // referent's lifetime; downgrade their poisoning to a pop.
    let mut trailing: HashSet<InsnId> = HashSet::new();
    for (id, insn) in method.insns.iter() {
        if !insn.opcode().map(Opcode::is_return).unwrap_or(false) {
            continue;
        }
        let mut cur = method.insns.prev(id);
        while let Some(t) = cur {
            let Some(tinsn) = method.insns.get(t) else {
                break;
            };
            if !tinsn.is_trailing() {
                break;
            }
            trailing.insert(t);
            cur = method.insns.prev(t);
        }
    }
    for store in stale.iter_mut() {
        if matches!(store.plan, StorePlan::NullPoison { .. })
            && (trailing.contains(&store.id) || !live_ref_slots.contains(&store.var))
        {
            store.plan = StorePlan::Pop;
        }
    }

    // Analysis done; apply the planned mutations.
    for store in &stale {
        match store.plan {
            StorePlan::Pop => {
                trace!(id = %store.id, var = store.var, "stale store replaced by pop");
                let pop = method.insns.alloc(Insn::pop_of_size(store.width));
                method.insns.insert_before(store.id, pop);
                method.insns.remove(store.id);
                result.store_removed = true;
            }
            StorePlan::NullPoison { already_null: true } => {
                trace!(id = %store.id, var = store.var, "stale store already stores null");
            }
            StorePlan::NullPoison { already_null: false } => {
                trace!(id = %store.id, var = store.var, "stale store null-poisoned");
                let pop = method.insns.alloc(Insn::pop_of_size(store.width));
                let null = method.insns.alloc(Insn::Simple(Opcode::AconstNull));
                method.insns.insert_before(store.id, pop);
                method.insns.insert_before(store.id, null);
                result.store_removed = true;
            }
        }
    }
    for id in iinc_removals {
        trace!(%id, "unused increment removed");
        method.insns.remove(id);
        result.store_removed = true;
    }

    let key = MethodRef::of(owner, method);
    for (call, tag_producer, elem) in rewrites {
        trace!(%call, elem = %elem, "class-tag newArray rewritten to anewarray");
        let anewarray = method.insns.alloc(Insn::Type {
            op: Opcode::Anewarray,
            class: elem,
        });
        method.insns.insert_before(call, anewarray);
        method.insns.remove(call);
        call_graph.remove_callsite(call, &key);
        // The tag producer may have side effects; keep it, discard its value.
        let pop = method.insns.alloc(Insn::Simple(Opcode::Pop));
        method.insns.insert_after(tag_producer, pop);
        result.intrinsic_rewritten = true;
    }

    // Hand the exposed array accessors to the inliner, in canonical order.
    // The call graph is refreshed only by the last inline of the batch.
    if !to_inline.is_empty() {
        let mut sites: Vec<Callsite> = to_inline
            .iter()
            .filter_map(|id| call_graph.callsite(&key, *id))
            .collect();
        callsite_ordering(method, &mut sites);
        let last = sites.len().saturating_sub(1);
        for (i, site) in sites.iter().enumerate() {
            if host.inline_callsite(method, site, i == last) {
                result.call_inlined = true;
            }
        }
    }

    if result.changed() {
        debug!(
            method = %method.name,
            owner,
            stores = result.store_removed,
            intrinsics = result.intrinsic_rewritten,
            inlined = result.call_inlined,
            "stale store elimination changed method"
        );
    }
    result
}
