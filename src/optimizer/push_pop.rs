//! Push/pop elimination: backward reachability from explicit pops, cutting
//! away pure producers and their inputs.
//!
//! Starting from every `pop`/`pop2` whose value has a single producer with
//! no other consumer, producers are enqueued and dispatched by opcode: pure
//! ones are removed (recursing into their own inputs), impure ones keep
//! executing but get their now-unused result popped right after. Unboxing
//! calls are special-cased so their observable exceptions survive: a
//! Scala-style unbox becomes a checkcast, a Java-style unbox becomes an
//! explicit null check. Finally, objects that are constructed, initialized
//! by a side-effect-free constructor and never used are removed together
//! with their allocation.
//!
//! All work is planned against the analysis first and committed afterwards;
//! the commit cancels an "insert pop after X" against a directly following
//! pop already scheduled for removal, the only point where a removal is
//! revoked.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::analysis::prodcons::{ProdConsAnalysis, Producer};
use crate::callgraph::{CallGraph, MethodRef, OptimizerHost};
use crate::config::OptConfig;
use crate::descriptor;
use crate::insn::{Insn, InsnId, InsnList};
use crate::intrinsics;
use crate::method::Method;
use crate::opcodes::Opcode;

use super::types::PushPopChange;

#[derive(Debug, Clone, PartialEq)]
enum Replacement {
    /// `checkcast <boxed>; pop`: preserves the ClassCastException of a
    /// Scala-style unbox.
    CastPop(String),
    /// `ifnonnull L; aconst_null; athrow; L:`: preserves the NPE of a
    /// Java-style unbox.
    NullCheck,
}

struct Planner<'a> {
    pc: &'a ProdConsAnalysis,
    insns: &'a InsnList,
    config: &'a OptConfig,
    call_graph: &'a CallGraph,
    host: &'a dyn OptimizerHost,
    key: MethodRef,
    method_name: &'a str,

    queue: VecDeque<(InsnId, u8)>,
    to_remove: HashSet<InsnId>,
    to_replace: HashMap<InsnId, Replacement>,
    /// Pop widths to insert before an instruction, topmost input first.
    insert_before: HashMap<InsnId, SmallVec<[u8; 2]>>,
    /// Pop width to insert after an instruction.
    insert_after: HashMap<InsnId, u8>,
    needed_stack: u16,
    cast_added: bool,
    null_check_added: bool,
}

impl<'a> Planner<'a> {
    fn is_dup_like(&self, id: InsnId) -> bool {
        match self.insns.get(id) {
            Some(Insn::Simple(Opcode::Dup)) => true,
            Some(Insn::Simple(Opcode::Dup2)) => self
                .pc
                .frame_at(id)
                .map(|f| f.stack_size() > 0 && f.peek_width(0) == 2)
                .unwrap_or(false),
            _ => false,
        }
    }

    fn producer_has_single_output(&self, id: InsnId) -> bool {
        if self.is_dup_like(id) {
            return true;
        }
        self.pc.produced_value_count(id) == 1
    }

    /// The producers of the value consumed by `cons` at `slot`, if every one
    /// of them has a single output whose only (value) consumer is `cons`;
    /// empty otherwise. Exception values and multi-output producers make
    /// the result empty, keeping them out of the elimination.
    fn producers_if_single_consumer(&self, cons: InsnId, slot: usize) -> SmallVec<[InsnId; 2]> {
        let mut out: SmallVec<[InsnId; 2]> = SmallVec::new();
        let producers = self.pc.producers_for_value_at(cons, slot);
        if producers.is_empty() {
            return out;
        }
        for p in &producers {
            match p {
                Producer::Insn(id) if self.producer_has_single_output(*id) => out.push(*id),
                _ => return SmallVec::new(),
            }
        }
        let consumers = self.pc.consumers_of_value_at(cons, slot);
        if consumers.len() != 1 || !consumers.contains(&cons) {
            return SmallVec::new();
        }
        out
    }

    /// Process the inputs of a producer scheduled for removal: enqueue the
    /// single-consumer producers, pop everything else before `prod`.
    fn handle_inputs(&mut self, prod: InsnId, num_inputs: usize) {
        if num_inputs == 0 {
            return;
        }
        let Some(frame) = self.pc.frame_at(prod) else {
            return;
        };
        if frame.stack_size() < num_inputs {
            return;
        }
        let top = frame.stack_top();
        let mut pops: SmallVec<[u8; 2]> = SmallVec::new();
        for offset in 0..num_inputs {
            let width = frame.peek_width(offset);
            let producers = self.producers_if_single_consumer(prod, top - offset);
            if producers.is_empty() {
                pops.push(width);
            } else {
                for p in producers {
                    self.queue.push_back((p, width));
                }
            }
        }
        if !pops.is_empty() {
            self.insert_before.entry(prod).or_default().extend(pops);
        }
    }

    fn pop_after(&mut self, prod: InsnId, width: u8) {
        self.insert_after.insert(prod, width);
    }

    fn run_queue(&mut self) {
        while let Some((prod, size)) = self.queue.pop_front() {
            let Some(insn) = self.insns.get(prod) else {
                continue;
            };
            if self.to_remove.contains(&prod) {
                // A dup reaching the queue a second time means both of its
                // values are dead: its input dies too.
                if self.is_dup_like(prod) {
                    self.handle_inputs(prod, 1);
                }
                continue;
            }
            if self.to_replace.contains_key(&prod) || self.insert_after.contains_key(&prod) {
                continue;
            }

            match insn {
                Insn::Simple(op) if op.is_simple_const_push() => {
                    self.to_remove.insert(prod);
                }
                Insn::Int {
                    op: Opcode::Bipush | Opcode::Sipush,
                    ..
                } => {
                    self.to_remove.insert(prod);
                }
                Insn::Var { op, .. } if op.is_load() => {
                    self.to_remove.insert(prod);
                }
                Insn::Simple(Opcode::Dup | Opcode::Dup2) if self.is_dup_like(prod) => {
                    self.to_remove.insert(prod);
                }
                Insn::Simple(
                    Opcode::Dup2
                    | Opcode::DupX1
                    | Opcode::DupX2
                    | Opcode::Dup2X1
                    | Opcode::Dup2X2
                    | Opcode::Swap,
                ) => {
                    // Excluded by producers_if_single_consumer; reaching here
                    // is a bug.
                    unreachable!(
                        "stack shuffle {} reached the push/pop queue in {}",
                        insn, self.method_name
                    );
                }
                Insn::Simple(op) if op.is_int_div_or_rem() => {
                    // Division by zero is observable; keep the instruction
                    // and discard its result.
                    self.pop_after(prod, size);
                }
                Insn::Simple(op) if op.pure_value_operands().is_some() => {
                    let n = op.pure_value_operands().unwrap_or(0);
                    self.to_remove.insert(prod);
                    self.handle_inputs(prod, n);
                }
                Insn::Field { op, .. } => {
                    let removable = *op == Opcode::Getstatic
                        && (intrinsics::is_boxed_unit(insn)
                            || intrinsics::module_load(insn).map_or(false, |m| {
                                self.config.modules_allow_skip_initialization.contains(m)
                            }));
                    if removable {
                        self.to_remove.insert(prod);
                    } else {
                        self.pop_after(prod, size);
                    }
                }
                Insn::MethodCall { op, desc, .. } => {
                    let args = descriptor::argument_count(desc);
                    let receiver = usize::from(*op != Opcode::Invokestatic);
                    if intrinsics::is_side_effect_free_call(insn) {
                        self.to_remove.insert(prod);
                        self.call_graph.remove_callsite(prod, &self.key);
                        self.handle_inputs(prod, args + receiver);
                    } else if let Some(boxed) = intrinsics::scala_unbox_boxed_class(insn) {
                        self.to_replace
                            .insert(prod, Replacement::CastPop(boxed.to_string()));
                        self.call_graph.remove_callsite(prod, &self.key);
                        self.cast_added = true;
                    } else if intrinsics::is_java_unbox(insn) {
                        self.to_replace.insert(prod, Replacement::NullCheck);
                        self.call_graph.remove_callsite(prod, &self.key);
                        if let Some(frame) = self.pc.frame_at(prod) {
                            self.needed_stack =
                                self.needed_stack.max(frame.stack_words() as u16 + 1);
                        }
                        self.null_check_added = true;
                    } else {
                        self.pop_after(prod, size);
                    }
                }
                Insn::InvokeDynamic { desc, .. } => {
                    if let Some(handle) = intrinsics::lambda_meta_factory_call(insn) {
                        self.to_remove.insert(prod);
                        self.call_graph.remove_closure_instantiation(prod, &self.key);
                        self.host.remove_indy_lambda_impl_method(handle);
                        self.handle_inputs(prod, descriptor::argument_count(desc));
                    } else {
                        self.pop_after(prod, size);
                    }
                }
                Insn::Type { op: Opcode::New, .. } => {
                    if intrinsics::is_new_for_side_effect_free_constructor(insn) {
                        self.to_remove.insert(prod);
                    } else {
                        self.pop_after(prod, size);
                    }
                }
                Insn::Ldc(c) => {
                    if c.is_numeric_or_string() || self.config.opt_allow_skip_class_loading {
                        self.to_remove.insert(prod);
                    } else {
                        self.pop_after(prod, size);
                    }
                }
                Insn::MultiANewArray { dims, .. } => {
                    let dims = *dims as usize;
                    self.to_remove.insert(prod);
                    self.handle_inputs(prod, dims);
                }
                _ => {
                    // Anything else may have side effects: keep it, pop the
                    // result.
                    self.pop_after(prod, size);
                }
            }
        }
    }

    /// One round of unused-pure-constructor elimination. Returns true if a
    /// constructor call was scheduled for removal (new queue work exists).
    fn eliminate_unused_constructors(&mut self, ctor_calls: &[InsnId]) -> bool {
        let mut changed = false;
        for &call in ctor_calls {
            if self.to_remove.contains(&call) || self.to_replace.contains_key(&call) {
                continue;
            }
            let Some(Insn::MethodCall { desc, .. }) = self.insns.get(call) else {
                continue;
            };
            let num_args = descriptor::argument_count(desc);
            let Some(frame) = self.pc.frame_at(call) else {
                continue;
            };
            if frame.stack_size() < num_args + 1 {
                continue;
            }
            let receiver_slot = frame.stack_top() - num_args;
            let receiver_producers = self.producers_if_single_consumer(call, receiver_slot);
            let [producer] = receiver_producers.as_slice() else {
                continue;
            };
            match self.insns.get(*producer) {
                // `new T; <args>; invokespecial T.<init>`: the object is
                // initialized and never used.
                Some(Insn::Type { op: Opcode::New, .. }) => {
                    trace!(%call, "unused side-effect-free constructor removed");
                    self.to_remove.insert(call);
                    self.call_graph.remove_callsite(call, &self.key);
                    self.handle_inputs(call, num_args + 1);
                    changed = true;
                }
                // `new T; dup; <args>; invokespecial T.<init>` where the dup
                // is already dead: the allocation dies through the dup's
                // input.
                Some(Insn::Simple(Opcode::Dup)) if self.to_remove.contains(producer) => {
                    trace!(%call, "unused constructor with dead dup removed");
                    self.to_remove.insert(call);
                    self.call_graph.remove_callsite(call, &self.key);
                    self.handle_inputs(call, num_args);
                    self.handle_inputs(*producer, 1);
                    changed = true;
                }
                _ => {}
            }
        }
        changed
    }
}

pub(crate) fn eliminate_push_pop(
    method: &mut Method,
    owner: &str,
    config: &OptConfig,
    call_graph: &CallGraph,
    host: &dyn OptimizerHost,
) -> PushPopChange {
    let mut change = PushPopChange::default();
    let Some(pc) = ProdConsAnalysis::build(method, config) else {
        return change;
    };

    let (to_remove, to_replace, insert_before, insert_after, needed_stack, cast, null_check) = {
        let mut planner = Planner {
            pc: &pc,
            insns: &method.insns,
            config,
            call_graph,
            host,
            key: MethodRef::of(owner, method),
            method_name: &method.name,
            queue: VecDeque::new(),
            to_remove: HashSet::new(),
            to_replace: HashMap::new(),
            insert_before: HashMap::new(),
            insert_after: HashMap::new(),
            needed_stack: 0,
            cast_added: false,
            null_check_added: false,
        };

        let mut ctor_calls: Vec<InsnId> = Vec::new();
        for (id, insn) in method.insns.iter() {
            match insn {
                Insn::Simple(op @ (Opcode::Pop | Opcode::Pop2)) => {
                    let size = if *op == Opcode::Pop { 1 } else { 2 };
                    let Some(frame) = planner.pc.frame_at(id) else {
                        continue;
                    };
                    if frame.stack_size() == 0 || frame.peek_width(0) != size {
                        // A pop2 over two 1-word values is left alone.
                        continue;
                    }
                    let producers = planner.producers_if_single_consumer(id, frame.stack_top());
                    if !producers.is_empty() {
                        planner.to_remove.insert(id);
                        for p in producers {
                            planner.queue.push_back((p, size));
                        }
                    }
                }
                _ if intrinsics::is_side_effect_free_constructor_call(insn) => {
                    ctor_calls.push(id);
                }
                _ => {}
            }
        }

        planner.run_queue();
        while planner.eliminate_unused_constructors(&ctor_calls) {
            planner.run_queue();
        }

        (
            planner.to_remove,
            planner.to_replace,
            planner.insert_before,
            planner.insert_after,
            planner.needed_stack,
            planner.cast_added,
            planner.null_check_added,
        )
    };

    // Commit phase. Pops inserted after a kept producer cancel against a
    // directly following pop scheduled for removal: inserting and removing
    // would oscillate between driver runs and misreport "changed".
    let mut to_remove = to_remove;
    let mut changed = false;
    for (id, width) in insert_after {
        let pop = Insn::pop_of_size(width);
        let next = method.insns.next_executable(id);
        let cancels = next
            .map(|n| to_remove.contains(&n) && method.insns.get(n) == Some(&pop))
            .unwrap_or(false);
        if cancels {
            if let Some(n) = next {
                to_remove.remove(&n);
            }
        } else {
            let pid = method.insns.alloc(pop);
            method.insns.insert_after(id, pid);
            changed = true;
        }
    }

    for (id, widths) in insert_before {
        if !method.insns.is_linked(id) {
            continue;
        }
        for width in widths {
            let pid = method.insns.alloc(Insn::pop_of_size(width));
            method.insns.insert_before(id, pid);
        }
        changed = true;
    }

    for (id, replacement) in to_replace {
        match replacement {
            Replacement::CastPop(class) => {
                let cast = method.insns.alloc(Insn::Type {
                    op: Opcode::Checkcast,
                    class,
                });
                let pop = method.insns.alloc(Insn::Simple(Opcode::Pop));
                method.insns.insert_before(id, cast);
                method.insns.insert_before(id, pop);
            }
            Replacement::NullCheck => {
                let label = method.insns.alloc(Insn::Label);
                let branch = method.insns.alloc(Insn::Jump {
                    op: Opcode::Ifnonnull,
                    target: label,
                });
                let null = method.insns.alloc(Insn::Simple(Opcode::AconstNull));
                let throw = method.insns.alloc(Insn::Simple(Opcode::Athrow));
                method.insns.insert_before(id, branch);
                method.insns.insert_before(id, null);
                method.insns.insert_before(id, throw);
                method.insns.insert_before(id, label);
            }
        }
        method.insns.remove(id);
        changed = true;
    }

    for id in to_remove {
        trace!(%id, "push/pop elimination removed instruction");
        method.insns.remove(id);
        changed = true;
    }

    if null_check {
        method.max_stack = method.max_stack.max(needed_stack);
    }

    change.changed = changed;
    change.cast_added = cast;
    change.null_check_added = null_check;
    if changed {
        debug!(
            method = %method.name,
            owner,
            cast_added = cast,
            null_check_added = null_check,
            "push/pop elimination changed method"
        );
    }
    change
}
