//! Store/load pair elimination over straight-line runs.
//!
//! A single forward walk with a small stack of open pair-starts removes
//! adjacent `store s; load s` pairs (a stack no-op when the slot is
//! otherwise dead) and adjacent `aconst_null; astore s` pairs for dead
//! reference slots, without building a dataflow analysis. Labels seen while
//! a pair is open are recorded as dependencies: if such a label turns out
//! to be a jump target, control can enter between the store and its load
//! and the pair must stay. Pairs nest; an elided inner pair elides every
//! pair depending on it, iterated to a fixpoint.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::insn::{Insn, InsnId};
use crate::method::Method;
use crate::opcodes::Opcode;

#[derive(Debug, Clone, Copy)]
enum Dep {
    /// The pair is invalid if this label is a jump target.
    Label(InsnId),
    /// The pair is invalid if the referenced pair was elided.
    Pair(usize),
}

#[derive(Debug)]
struct Open {
    insn: InsnId,
    deps: Vec<Dep>,
}

#[derive(Debug)]
struct RemovePair {
    store: InsnId,
    closer: InsnId,
    var: u16,
    deps: Vec<Dep>,
    elided: bool,
}

struct Walk {
    stack: Vec<Open>,
    pairs: Vec<RemovePair>,
    live_vars: HashSet<u16>,
    live_labels: HashSet<InsnId>,
}

impl Walk {
    /// Record the liveness effects of an instruction that takes part in no
    /// pair: slot uses become live, jump targets become live labels.
    fn register(&mut self, insn: &Insn) {
        match insn {
            Insn::Var { var, .. } | Insn::Iinc { var, .. } => {
                self.live_vars.insert(*var);
            }
            Insn::Jump { target, .. } => {
                self.live_labels.insert(*target);
            }
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => {
                self.live_labels.insert(*default);
                self.live_labels.extend(targets.iter().copied());
            }
            _ => {}
        }
    }

    fn give_up(&mut self, insn: &Insn, insns: &crate::insn::InsnList) {
        self.register(insn);
        for open in std::mem::take(&mut self.stack) {
            if let Some(i) = insns.get(open.insn) {
                // Clone keeps the borrow checker out of the way; open pair
                // instructions are just vars or aconst_null.
                let i = i.clone();
                self.register(&i);
            }
        }
    }

    /// Close the top of the pair stack with `closer` if possible. Fuses
    /// `aconst_null; astore` pairs on the way and retries, so a load can
    /// close a store across a fully nested null-store pair.
    fn try_to_pair(&mut self, id: InsnId, insn: &Insn, insns: &crate::insn::InsnList) {
        loop {
            let Some(top) = self.stack.last() else {
                self.register(insn);
                return;
            };
            let top_insn = insns.get(top.insn).cloned();

            // store s; load s
            if let (
                Some(Insn::Var {
                    op: store_op,
                    var: store_var,
                }),
                Insn::Var {
                    op: load_op,
                    var: load_var,
                },
            ) = (&top_insn, insn)
            {
                if store_op.is_store()
                    && store_op.is_store_load_pair(*load_op)
                    && store_var == load_var
                {
                    let open = self.stack.pop().unwrap_or_else(|| unreachable!());
                    let idx = self.pairs.len();
                    self.pairs.push(RemovePair {
                        store: open.insn,
                        closer: id,
                        var: *store_var,
                        deps: open.deps,
                        elided: false,
                    });
                    if let Some(below) = self.stack.last_mut() {
                        below.deps.push(Dep::Pair(idx));
                    }
                    return;
                }
            }

            // aconst_null; astore s closing from inside a larger pair.
            let fusable = matches!(
                top_insn,
                Some(Insn::Var {
                    op: Opcode::Astore,
                    ..
                })
            ) && self.stack.len() >= 2
                && matches!(
                    insns.get(self.stack[self.stack.len() - 2].insn),
                    Some(Insn::Simple(Opcode::AconstNull))
                );
            if fusable {
                let store = self.stack.pop().unwrap_or_else(|| unreachable!());
                let null = self.stack.pop().unwrap_or_else(|| unreachable!());
                let var = insns.get(store.insn).and_then(Insn::var).unwrap_or(0);
                let mut deps = null.deps;
                deps.extend(store.deps.iter().copied());
                let idx = self.pairs.len();
                self.pairs.push(RemovePair {
                    store: null.insn,
                    closer: store.insn,
                    var,
                    deps,
                    elided: false,
                });
                if let Some(below) = self.stack.last_mut() {
                    below.deps.push(Dep::Pair(idx));
                    // Labels inside the fused pair also lie inside the
                    // enclosing one.
                    below.deps.extend(store.deps.iter().copied());
                }
                continue;
            }

            self.give_up(insn, insns);
            return;
        }
    }
}

pub(crate) fn eliminate_store_load(method: &mut Method) -> bool {
    let mut walk = Walk {
        stack: Vec::new(),
        pairs: Vec::new(),
        live_vars: HashSet::new(),
        live_labels: HashSet::new(),
    };

    for id in method.insns.ids() {
        let Some(insn) = method.insns.get(id) else {
            continue;
        };
        let insn = insn.clone();
        match &insn {
            Insn::Simple(Opcode::AconstNull) => walk.stack.push(Open {
                insn: id,
                deps: Vec::new(),
            }),
            Insn::Var { op, .. } if op.is_store() => walk.stack.push(Open {
                insn: id,
                deps: Vec::new(),
            }),
            Insn::Label => {
                if let Some(top) = walk.stack.last_mut() {
                    top.deps.push(Dep::Label(id));
                }
            }
            _ => walk.try_to_pair(id, &insn, &method.insns),
        }
    }

    // Elision fixpoint: a pair touching a live slot, a live label, or an
    // elided pair is itself elided, and eliding it makes its slot live.
    loop {
        let mut changed = false;
        for i in 0..walk.pairs.len() {
            if walk.pairs[i].elided {
                continue;
            }
            let elide = walk.live_vars.contains(&walk.pairs[i].var)
                || walk.pairs[i].deps.iter().any(|dep| match dep {
                    Dep::Label(l) => walk.live_labels.contains(l),
                    Dep::Pair(j) => walk.pairs[*j].elided,
                });
            if elide {
                walk.pairs[i].elided = true;
                let var = walk.pairs[i].var;
                walk.live_vars.insert(var);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut changed = false;
    let mut removed = 0usize;
    for pair in walk.pairs.iter().filter(|p| !p.elided) {
        trace!(store = %pair.store, closer = %pair.closer, var = pair.var, "store/load pair removed");
        method.insns.remove(pair.store);
        method.insns.remove(pair.closer);
        changed = true;
        removed += 1;
    }
    if changed {
        debug!(method = %method.name, pairs = removed, "store/load elimination changed method");
    }
    changed
}
