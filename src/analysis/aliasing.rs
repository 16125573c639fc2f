//! Aliasing analysis: which local and stack slots hold the same runtime
//! value at each instruction.
//!
//! Frames carry an equivalence-class label per slot. Copying instructions
//! (loads, stores, the dup family, swap) propagate labels; everything else
//! produces a fresh singleton class. Merging two frames is the partition
//! meet: two slots stay aliased only if they are aliased on both paths.
//! Labels are compared up to renaming, so the fixpoint terminates even
//! though merging mints fresh labels.

use std::collections::HashMap;

use tracing::debug;

use super::{successors, AnalysisError, HandlerMap};
use crate::config::OptConfig;
use crate::descriptor;
use crate::insn::{Insn, InsnId};
use crate::method::Method;
use crate::opcodes::Opcode;

type Label = u32;

#[derive(Debug, Clone, PartialEq)]
struct AliasFrame {
    /// Class label per local slot.
    locals: Vec<Label>,
    /// Width of the value starting at each local slot: 1, 2, or 0 for the
    /// second word of a size-2 value (and for destroyed slots).
    local_width: Vec<u8>,
    /// One entry per stack value: (label, width).
    stack: Vec<(Label, u8)>,
}

impl AliasFrame {
    fn canonical(&self) -> Vec<u32> {
        let mut renaming: HashMap<Label, u32> = HashMap::new();
        let mut out = Vec::with_capacity(self.locals.len() + self.stack.len());
        for &label in self.locals.iter().chain(self.stack.iter().map(|(l, _)| l)) {
            let next = renaming.len() as u32;
            out.push(*renaming.entry(label).or_insert(next));
        }
        out
    }
}

/// The aliasing analysis of one method. Frames are indexed by instruction
/// identity and describe the state *before* the instruction executes.
pub struct AliasingAnalysis {
    frames: Vec<Option<AliasFrame>>,
    max_locals: usize,
}

impl AliasingAnalysis {
    /// Build the analysis, or `None` when the method is over the size limit
    /// or cannot be analyzed (legacy opcodes, malformed frames).
    pub fn build(method: &Method, config: &OptConfig) -> Option<AliasingAnalysis> {
        if !super::size_ok_for_aliasing(method, config) {
            debug!(
                method = %method.name,
                insns = method.insns.len(),
                "aliasing analysis skipped: method too large"
            );
            return None;
        }
        match Builder::new(method).run() {
            Ok(analysis) => Some(analysis),
            Err(err) => {
                debug!(method = %method.name, %err, "aliasing analysis unavailable");
                None
            }
        }
    }

    /// All local/stack slot indices holding a value equal to the one in
    /// `slot` in the frame just before `at`. Stack values are numbered from
    /// `max_locals` upward; the queried slot is included. Empty when `at`
    /// has no frame.
    pub fn aliases_of(&self, at: InsnId, slot: usize) -> Vec<usize> {
        let Some(Some(frame)) = self.frames.get(at.index()) else {
            return Vec::new();
        };
        let label = if slot < self.max_locals {
            if frame.local_width[slot] == 0 {
                return vec![slot];
            }
            frame.locals[slot]
        } else {
            match frame.stack.get(slot - self.max_locals) {
                Some(&(l, _)) => l,
                None => return vec![slot],
            }
        };
        let mut out = Vec::new();
        for (i, &l) in frame.locals.iter().enumerate() {
            if l == label && frame.local_width[i] != 0 {
                out.push(i);
            }
        }
        for (i, &(l, _)) in frame.stack.iter().enumerate() {
            if l == label {
                out.push(self.max_locals + i);
            }
        }
        out
    }
}

struct Builder<'m> {
    method: &'m Method,
    frames: Vec<Option<AliasFrame>>,
    next_label: Label,
    exc_labels: HashMap<InsnId, Label>,
}

impl<'m> Builder<'m> {
    fn new(method: &'m Method) -> Self {
        Self {
            method,
            frames: vec![None; method.insns.id_bound()],
            next_label: 0,
            exc_labels: HashMap::new(),
        }
    }

    fn fresh(&mut self) -> Label {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    fn entry_frame(&mut self) -> AliasFrame {
        let n = self.method.max_locals as usize;
        let mut locals = Vec::with_capacity(n);
        let mut local_width = Vec::with_capacity(n);
        for _ in 0..n {
            locals.push(0);
            local_width.push(1);
        }
        for l in locals.iter_mut() {
            *l = self.fresh();
        }
        let mut slot = 0usize;
        if !self.method.is_static {
            slot += 1;
        }
        for w in descriptor::argument_widths(&self.method.desc) {
            if w == 2 && slot + 1 < n {
                local_width[slot] = 2;
                local_width[slot + 1] = 0;
                slot += 2;
            } else {
                slot += 1;
            }
        }
        AliasFrame {
            locals,
            local_width,
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> Result<AliasingAnalysis, AnalysisError> {
        let entry = self.method.insns.first().ok_or(AnalysisError::EmptyMethod)?;
        let handlers = HandlerMap::new(self.method);
        let entry_frame = self.entry_frame();
        self.frames[entry.index()] = Some(entry_frame);
        let mut worklist = vec![entry];

        while let Some(id) = worklist.pop() {
            let before = self.frames[id.index()].clone().unwrap_or_else(|| {
                panic!("worklist instruction {id} has no frame");
            });

            for &handler in handlers.handlers_for(id) {
                let mut hframe = before.clone();
                hframe.stack.clear();
                let label = match self.exc_labels.get(&handler) {
                    Some(&l) => l,
                    None => {
                        let l = self.fresh();
                        self.exc_labels.insert(handler, l);
                        l
                    }
                };
                hframe.stack.push((label, 1));
                if self.merge_into(handler, hframe)? {
                    worklist.push(handler);
                }
            }

            let insn = match self.method.insns.get(id) {
                Some(i) => i.clone(),
                None => continue,
            };
            let mut after = before;
            self.execute(id, &insn, &mut after)?;
            for succ in successors(&self.method.insns, id) {
                if self.merge_into(succ, after.clone())? {
                    worklist.push(succ);
                }
            }
        }

        Ok(AliasingAnalysis {
            frames: self.frames,
            max_locals: self.method.max_locals as usize,
        })
    }

    fn merge_into(&mut self, at: InsnId, frame: AliasFrame) -> Result<bool, AnalysisError> {
        if self.frames[at.index()].is_none() {
            self.frames[at.index()] = Some(frame);
            return Ok(true);
        }
        let Some(existing) = self.frames[at.index()].as_ref() else {
            return Ok(false);
        };
        if existing.stack.len() != frame.stack.len() {
            return Err(AnalysisError::DepthMismatch {
                at,
                a: existing.stack.len(),
                b: frame.stack.len(),
            });
        }
        let old_canonical = existing.canonical();
        let mut merged = existing.clone();
        let mut memo: HashMap<(Label, Label), Label> = HashMap::new();
        let mut base = self.next_label;
        let mut meet = |a: Label, b: Label, base: &mut Label| -> Label {
            *memo.entry((a, b)).or_insert_with(|| {
                let l = *base;
                *base += 1;
                l
            })
        };
        for i in 0..merged.locals.len() {
            merged.locals[i] = meet(merged.locals[i], frame.locals[i], &mut base);
            if merged.local_width[i] != frame.local_width[i] {
                merged.local_width[i] = 1;
            }
        }
        for i in 0..merged.stack.len() {
            let (a, w) = merged.stack[i];
            let (b, _) = frame.stack[i];
            merged.stack[i] = (meet(a, b, &mut base), w);
        }
        self.next_label = base;
        let changed = merged.canonical() != old_canonical;
        if changed {
            self.frames[at.index()] = Some(merged);
        }
        Ok(changed)
    }

    fn pop(&self, at: InsnId, frame: &mut AliasFrame) -> Result<(Label, u8), AnalysisError> {
        frame.stack.pop().ok_or(AnalysisError::StackUnderflow { at })
    }

    fn pop_n(&self, at: InsnId, frame: &mut AliasFrame, n: usize) -> Result<(), AnalysisError> {
        for _ in 0..n {
            self.pop(at, frame)?;
        }
        Ok(())
    }

    /// Pop whole values until exactly `words` words are removed; top first.
    fn pop_words(
        &self,
        at: InsnId,
        frame: &mut AliasFrame,
        words: u8,
    ) -> Result<Vec<(Label, u8)>, AnalysisError> {
        let mut out = Vec::new();
        let mut left = words;
        while left > 0 {
            let v = self.pop(at, frame)?;
            left = left.saturating_sub(v.1);
            out.push(v);
        }
        Ok(out)
    }

    fn push_fresh(&mut self, frame: &mut AliasFrame, width: u8) {
        let l = self.fresh();
        frame.stack.push((l, width));
    }

    fn store_local(&mut self, frame: &mut AliasFrame, var: usize, label: Label, width: u8) {
        // A store destroys any size-2 value whose words overlap the target.
        if var > 0 && frame.local_width[var - 1] == 2 {
            frame.locals[var - 1] = self.fresh();
            frame.local_width[var - 1] = 1;
        }
        if width == 2 {
            if var + 1 < frame.locals.len() && frame.local_width[var + 1] == 2 {
                // The overwritten slot began another size-2 value; its
                // orphaned second word becomes garbage.
                if var + 2 < frame.locals.len() {
                    frame.locals[var + 2] = self.fresh();
                    frame.local_width[var + 2] = 0;
                }
            }
            frame.locals[var] = label;
            frame.local_width[var] = 2;
            if var + 1 < frame.locals.len() {
                frame.locals[var + 1] = self.fresh();
                frame.local_width[var + 1] = 0;
            }
        } else {
            frame.locals[var] = label;
            frame.local_width[var] = 1;
        }
    }

    fn execute(
        &mut self,
        at: InsnId,
        insn: &Insn,
        frame: &mut AliasFrame,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        match insn {
            Insn::Label | Insn::Simple(Nop) => {}
            Insn::Var { op, var } if op.is_load() => {
                let var = *var as usize;
                frame.stack.push((frame.locals[var], op.var_width()));
            }
            Insn::Var { op, var } if op.is_store() => {
                let (label, _) = self.pop(at, frame)?;
                self.store_local(frame, *var as usize, label, op.var_width());
            }
            Insn::Var { op, .. } => return Err(AnalysisError::UnsupportedOpcode(*op)),
            Insn::Iinc { var, .. } => {
                let var = *var as usize;
                frame.locals[var] = self.fresh();
                frame.local_width[var] = 1;
            }
            Insn::Int { op: Newarray, .. } => {
                self.pop(at, frame)?;
                self.push_fresh(frame, 1);
            }
            Insn::Int { .. } => self.push_fresh(frame, 1),
            Insn::Ldc(c) => self.push_fresh(frame, c.width()),
            Insn::Type { op: New, .. } => self.push_fresh(frame, 1),
            Insn::Type { .. } => {
                self.pop(at, frame)?;
                self.push_fresh(frame, 1);
            }
            Insn::Field { op, desc, .. } => {
                let w = descriptor::field_width(desc);
                match op {
                    Getstatic => self.push_fresh(frame, w),
                    Putstatic => {
                        self.pop(at, frame)?;
                    }
                    Getfield => {
                        self.pop(at, frame)?;
                        self.push_fresh(frame, w);
                    }
                    _ => self.pop_n(at, frame, 2)?,
                }
            }
            Insn::MethodCall { op, desc, .. } => {
                let receiver = usize::from(*op != Invokestatic);
                self.pop_n(at, frame, descriptor::argument_count(desc) + receiver)?;
                let ret = descriptor::return_width(desc);
                if ret > 0 {
                    self.push_fresh(frame, ret);
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                self.pop_n(at, frame, descriptor::argument_count(desc))?;
                let ret = descriptor::return_width(desc);
                if ret > 0 {
                    self.push_fresh(frame, ret);
                }
            }
            Insn::Jump { op, .. } => self.pop_n(at, frame, op.jump_popped_values())?,
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop(at, frame)?;
            }
            Insn::MultiANewArray { dims, .. } => {
                self.pop_n(at, frame, *dims as usize)?;
                self.push_fresh(frame, 1);
            }
            Insn::Simple(op) => match op {
                _ if op.is_simple_const_push() => {
                    self.push_fresh(frame, op.const_push_width());
                }
                Pop => {
                    self.pop(at, frame)?;
                }
                Pop2 => {
                    let (_, w) = self.pop(at, frame)?;
                    if w == 1 {
                        self.pop(at, frame)?;
                    }
                }
                Dup => {
                    let top = *frame.stack.last().ok_or(AnalysisError::StackUnderflow { at })?;
                    frame.stack.push(top);
                }
                Dup2 => {
                    let top = *frame.stack.last().ok_or(AnalysisError::StackUnderflow { at })?;
                    if top.1 == 2 {
                        frame.stack.push(top);
                    } else {
                        let n = frame.stack.len();
                        if n < 2 {
                            return Err(AnalysisError::StackUnderflow { at });
                        }
                        let a = frame.stack[n - 2];
                        let b = frame.stack[n - 1];
                        frame.stack.push(a);
                        frame.stack.push(b);
                    }
                }
                DupX1 | DupX2 | Dup2X1 | Dup2X2 => {
                    let (dup_words, skip_words) = match op {
                        DupX1 => (1, 1),
                        DupX2 => (1, 2),
                        Dup2X1 => (2, 1),
                        _ => (2, 2),
                    };
                    let top = self.pop_words(at, frame, dup_words)?;
                    let below = self.pop_words(at, frame, skip_words)?;
                    for v in top.iter().rev() {
                        frame.stack.push(*v);
                    }
                    for v in below.iter().rev() {
                        frame.stack.push(*v);
                    }
                    for v in top.iter().rev() {
                        frame.stack.push(*v);
                    }
                }
                Swap => {
                    let b = self.pop(at, frame)?;
                    let a = self.pop(at, frame)?;
                    frame.stack.push(b);
                    frame.stack.push(a);
                }
                Iaload | Faload | Aaload | Baload | Caload | Saload => {
                    self.pop_n(at, frame, 2)?;
                    self.push_fresh(frame, 1);
                }
                Laload | Daload => {
                    self.pop_n(at, frame, 2)?;
                    self.push_fresh(frame, 2);
                }
                Iastore | Lastore | Fastore | Dastore | Aastore | Bastore | Castore
                | Sastore => self.pop_n(at, frame, 3)?,
                Arraylength => {
                    self.pop(at, frame)?;
                    self.push_fresh(frame, 1);
                }
                Athrow | Monitorenter | Monitorexit => {
                    self.pop(at, frame)?;
                }
                _ if op.is_return() => {
                    if !matches!(op, Return) {
                        self.pop(at, frame)?;
                    }
                }
                Jsr | Ret => return Err(AnalysisError::UnsupportedOpcode(*op)),
                _ => {
                    // Arithmetic, logic, comparisons, conversions: pop the
                    // operands, push a fresh result.
                    match op.pure_value_operands() {
                        Some(n) => {
                            self.pop_n(at, frame, n)?;
                            self.push_fresh(frame, op.value_result_width());
                        }
                        None if op.is_int_div_or_rem() => {
                            self.pop_n(at, frame, 2)?;
                            self.push_fresh(frame, op.value_result_width());
                        }
                        None => return Err(AnalysisError::UnsupportedOpcode(*op)),
                    }
                }
            },
        }
        Ok(())
    }
}
