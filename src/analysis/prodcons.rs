//! Producer/consumer analysis: for every value, the instructions that create
//! it and the instructions that consume it.
//!
//! Every produced value gets a unique id at its creation point; frame slots
//! hold *sets* of ids because control-flow joins merge values. The two
//! values a `dup` pushes are distinct ids with the same producer, which is
//! what lets a pass observe that only one of the copies is consumed.
//!
//! Copy operations (local loads and stores, `dup`, `dup2` of a size-2
//! value) produce fresh ids flagged as copies; the `initial_*` queries look
//! through them backward to the original producers, and
//! [`ProdConsAnalysis::ultimate_consumers_of_outputs_from`] looks through
//! them forward. The exotic shuffles (`dup_x1` .. `swap`, `dup2` over two
//! 1-word values) are barriers: they consume their inputs and produce fresh
//! multi-output values, which keeps them conservatively out of reach of the
//! push/pop elimination.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use tracing::debug;

use super::{successors, AnalysisError, HandlerMap};
use crate::config::OptConfig;
use crate::descriptor;
use crate::insn::{Insn, InsnId};
use crate::method::Method;
use crate::opcodes::Opcode;

type ValueId = u32;
type IdSet = SmallVec<[ValueId; 2]>;

fn set_insert(set: &mut IdSet, v: ValueId) -> bool {
    match set.binary_search(&v) {
        Ok(_) => false,
        Err(pos) => {
            set.insert(pos, v);
            true
        }
    }
}

fn set_union(dst: &mut IdSet, src: &IdSet) -> bool {
    let mut changed = false;
    for &v in src {
        changed |= set_insert(dst, v);
    }
    changed
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Producer {
    /// Pushed by an instruction.
    Insn(InsnId),
    /// The initial value of a parameter slot on method entry.
    Parameter(u16),
    /// The default value of a non-parameter slot before any store.
    UninitializedLocal(u16),
    /// The caught exception on a handler's stack.
    Exception(InsnId),
}

#[derive(Debug, Clone)]
struct ValueInfo {
    producer: Producer,
    width: u8,
    /// True for values pushed by copy operations (loads, stores, dup).
    copy: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct PcFrame {
    locals: Vec<IdSet>,
    stack: Vec<IdSet>,
}

/// View of the frame just before an instruction.
pub struct FrameView<'a> {
    frame: &'a PcFrame,
    values: &'a [ValueInfo],
    max_locals: usize,
}

impl FrameView<'_> {
    /// Number of values on the stack.
    pub fn stack_size(&self) -> usize {
        self.frame.stack.len()
    }

    /// Absolute slot index of the topmost stack value (`max_locals` plus
    /// its position). Panics on an empty stack.
    pub fn stack_top(&self) -> usize {
        self.max_locals + self.frame.stack.len() - 1
    }

    /// Word width of the stack value `offset` entries below the top.
    pub fn peek_width(&self, offset: usize) -> u8 {
        let idx = self.frame.stack.len() - 1 - offset;
        self.frame.stack[idx]
            .first()
            .map(|&v| self.values[v as usize].width)
            .unwrap_or(1)
    }

    /// Stack depth in words.
    pub fn stack_words(&self) -> usize {
        self.frame
            .stack
            .iter()
            .map(|set| {
                set.first()
                    .map(|&v| self.values[v as usize].width as usize)
                    .unwrap_or(1)
            })
            .sum()
    }
}

/// The producer/consumer analysis of one method. All queries address the
/// frame *before* the given instruction; slots are locals `0..max_locals`
/// then stack values from `max_locals` upward.
pub struct ProdConsAnalysis {
    frames: Vec<Option<PcFrame>>,
    values: Vec<ValueInfo>,
    consumers: Vec<SmallVec<[InsnId; 2]>>,
    /// Values produced per instruction, by output index.
    made: HashMap<(InsnId, u8), ValueId>,
    produced_counts: HashMap<InsnId, u8>,
    consumed_counts: HashMap<InsnId, u8>,
    copy_kinds: HashMap<InsnId, CopySource>,
    max_locals: usize,
}

impl ProdConsAnalysis {
    /// Build the analysis, or `None` when the method is over the size limit
    /// or cannot be analyzed.
    pub fn build(method: &Method, config: &OptConfig) -> Option<ProdConsAnalysis> {
        if !super::size_ok_for_source_value(method, config) {
            debug!(
                method = %method.name,
                insns = method.insns.len(),
                "producer/consumer analysis skipped: method too large"
            );
            return None;
        }
        match Builder::new(method).run() {
            Ok(analysis) => Some(analysis),
            Err(err) => {
                debug!(method = %method.name, %err, "producer/consumer analysis unavailable");
                None
            }
        }
    }

    pub fn frame_at(&self, at: InsnId) -> Option<FrameView<'_>> {
        self.frames.get(at.index())?.as_ref().map(|frame| FrameView {
            frame,
            values: &self.values,
            max_locals: self.max_locals,
        })
    }

    fn ids_at(&self, at: InsnId, slot: usize) -> &[ValueId] {
        let Some(Some(frame)) = self.frames.get(at.index()) else {
            return &[];
        };
        if slot < self.max_locals {
            frame.locals.get(slot).map(|s| s.as_slice()).unwrap_or(&[])
        } else {
            frame
                .stack
                .get(slot - self.max_locals)
                .map(|s| s.as_slice())
                .unwrap_or(&[])
        }
    }

    /// Direct producers of the value in `slot` just before `at`.
    pub fn producers_for_value_at(&self, at: InsnId, slot: usize) -> Vec<Producer> {
        let mut out: Vec<Producer> = self
            .ids_at(at, slot)
            .iter()
            .map(|&v| self.values[v as usize].producer)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Instructions consuming the value in `slot` just before `at`.
    pub fn consumers_of_value_at(&self, at: InsnId, slot: usize) -> HashSet<InsnId> {
        let mut out = HashSet::new();
        for &v in self.ids_at(at, slot) {
            out.extend(self.consumers[v as usize].iter().copied());
        }
        out
    }

    /// Producers of the value in `slot` before `at`, looking through copy
    /// operations back to the original producers.
    pub fn initial_producers_for_value_at(&self, at: InsnId, slot: usize) -> Vec<Producer> {
        let mut out = Vec::new();
        let mut visited: HashSet<ValueId> = HashSet::new();
        let mut work: Vec<ValueId> = self.ids_at(at, slot).to_vec();
        while let Some(v) = work.pop() {
            if !visited.insert(v) {
                continue;
            }
            let info = &self.values[v as usize];
            match info.producer {
                Producer::Insn(c) if info.copy => {
                    work.extend_from_slice(self.copy_sources(c));
                }
                p => out.push(p),
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Initial producers of all values consumed by `insn`.
    pub fn initial_producers_for_inputs_of(&self, insn: InsnId) -> Vec<Producer> {
        let n = self.consumed_value_count(insn);
        let Some(frame) = self.frame_at(insn) else {
            return Vec::new();
        };
        let top = self.max_locals + frame.stack_size();
        let mut out = Vec::new();
        for offset in 0..n {
            out.extend(self.initial_producers_for_value_at(insn, top - 1 - offset));
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Consumers of the values `insn` produces, looking through copy
    /// operations forward to the instructions that ultimately use them.
    pub fn ultimate_consumers_of_outputs_from(&self, insn: InsnId) -> HashSet<InsnId> {
        let mut out = HashSet::new();
        let mut visited_insns: HashSet<InsnId> = HashSet::new();
        let mut work: Vec<InsnId> = vec![insn];
        while let Some(p) = work.pop() {
            if !visited_insns.insert(p) {
                continue;
            }
            for idx in 0..self.produced_value_count(p) {
                if let Some(&v) = self.made.get(&(p, idx as u8)) {
                    for &c in &self.consumers[v as usize] {
                        if self.is_copy_insn(c) {
                            work.push(c);
                        } else {
                            out.insert(c);
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of values `insn` produces (0 if never executed).
    pub fn produced_value_count(&self, insn: InsnId) -> usize {
        self.produced_counts.get(&insn).copied().unwrap_or(0) as usize
    }

    /// Number of values `insn` consumes (0 if never executed).
    pub fn consumed_value_count(&self, insn: InsnId) -> usize {
        self.consumed_counts.get(&insn).copied().unwrap_or(0) as usize
    }

    fn is_copy_insn(&self, insn: InsnId) -> bool {
        self.made
            .get(&(insn, 0))
            .map(|&v| self.values[v as usize].copy)
            .unwrap_or(false)
    }

    /// Source ids of a copy instruction: the local slot a load reads, or the
    /// stack top a store/dup copies.
    fn copy_sources(&self, copy: InsnId) -> &[ValueId] {
        let Some(Some(frame)) = self.frames.get(copy.index()) else {
            return &[];
        };
        match self.made.get(&(copy, 0)) {
            Some(&v) if self.values[v as usize].copy => {}
            _ => return &[],
        }
        // Identify the source from the frame shape: loads carry their slot,
        // everything else copies the stack top.
        match self.copy_source_slot(copy) {
            CopySource::Local(var) => frame.locals.get(var).map(|s| s.as_slice()).unwrap_or(&[]),
            CopySource::StackTop => frame.stack.last().map(|s| s.as_slice()).unwrap_or(&[]),
            CopySource::None => &[],
        }
    }

    fn copy_source_slot(&self, copy: InsnId) -> CopySource {
        self.copy_kinds.get(&copy).copied().unwrap_or(CopySource::None)
    }
}

#[derive(Debug, Clone, Copy)]
enum CopySource {
    Local(usize),
    StackTop,
    None,
}

struct Builder<'m> {
    method: &'m Method,
    frames: Vec<Option<PcFrame>>,
    values: Vec<ValueInfo>,
    consumers: Vec<SmallVec<[InsnId; 2]>>,
    made: HashMap<(InsnId, u8), ValueId>,
    produced_counts: HashMap<InsnId, u8>,
    consumed_counts: HashMap<InsnId, u8>,
    copy_kinds: HashMap<InsnId, CopySource>,
    param_vals: HashMap<u16, ValueId>,
    uninit_vals: HashMap<u16, ValueId>,
    exc_vals: HashMap<InsnId, ValueId>,
}

impl<'m> Builder<'m> {
    fn new(method: &'m Method) -> Self {
        Self {
            method,
            frames: vec![None; method.insns.id_bound()],
            values: Vec::new(),
            consumers: Vec::new(),
            made: HashMap::new(),
            produced_counts: HashMap::new(),
            consumed_counts: HashMap::new(),
            copy_kinds: HashMap::new(),
            param_vals: HashMap::new(),
            uninit_vals: HashMap::new(),
            exc_vals: HashMap::new(),
        }
    }

    fn new_value(&mut self, producer: Producer, width: u8, copy: bool) -> ValueId {
        let id = self.values.len() as ValueId;
        self.values.push(ValueInfo {
            producer,
            width,
            copy,
        });
        self.consumers.push(SmallVec::new());
        id
    }

    /// Value produced by `insn` at output `idx`; allocated once, stable
    /// across re-executions during the fixpoint.
    fn make(&mut self, insn: InsnId, idx: u8, width: u8, copy: bool) -> ValueId {
        if let Some(&v) = self.made.get(&(insn, idx)) {
            return v;
        }
        let v = self.new_value(Producer::Insn(insn), width, copy);
        self.made.insert((insn, idx), v);
        v
    }

    fn consume_set(&mut self, insn: InsnId, set: &IdSet) {
        for &v in set {
            let list = &mut self.consumers[v as usize];
            if !list.contains(&insn) {
                list.push(insn);
            }
        }
    }

    fn width_of(&self, set: &IdSet) -> u8 {
        set.first()
            .map(|&v| self.values[v as usize].width)
            .unwrap_or(1)
    }

    fn entry_frame(&mut self) -> PcFrame {
        let n = self.method.max_locals as usize;
        let mut locals: Vec<IdSet> = vec![IdSet::new(); n];
        let mut slot: u16 = 0;
        let mut widths: SmallVec<[u8; 8]> = SmallVec::new();
        if !self.method.is_static {
            widths.push(1);
        }
        widths.extend(descriptor::argument_widths(&self.method.desc));
        for w in widths {
            if (slot as usize) < n {
                let v = match self.param_vals.get(&slot) {
                    Some(&v) => v,
                    None => {
                        let v = self.new_value(Producer::Parameter(slot), w, false);
                        self.param_vals.insert(slot, v);
                        v
                    }
                };
                locals[slot as usize].push(v);
            }
            slot += w as u16;
        }
        for s in 0..n as u16 {
            if locals[s as usize].is_empty() {
                let v = match self.uninit_vals.get(&s) {
                    Some(&v) => v,
                    None => {
                        let v = self.new_value(Producer::UninitializedLocal(s), 1, false);
                        self.uninit_vals.insert(s, v);
                        v
                    }
                };
                locals[s as usize].push(v);
            }
        }
        PcFrame {
            locals,
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> Result<ProdConsAnalysis, AnalysisError> {
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
                let exc = match self.exc_vals.get(&handler) {
                    Some(&v) => v,
                    None => {
                        let v = self.new_value(Producer::Exception(handler), 1, false);
                        self.exc_vals.insert(handler, v);
                        v
                    }
                };
                let mut hframe = before.clone();
                hframe.stack.clear();
                let mut set = IdSet::new();
                set.push(exc);
                hframe.stack.push(set);
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

        Ok(ProdConsAnalysis {
            frames: self.frames,
            values: self.values,
            consumers: self.consumers,
            made: self.made,
            produced_counts: self.produced_counts,
            consumed_counts: self.consumed_counts,
            max_locals: self.method.max_locals as usize,
            copy_kinds: self.copy_kinds,
        })
    }

    fn merge_into(&mut self, at: InsnId, frame: PcFrame) -> Result<bool, AnalysisError> {
        if self.frames[at.index()].is_none() {
            self.frames[at.index()] = Some(frame);
            return Ok(true);
        }
        let Some(existing) = self.frames[at.index()].as_mut() else {
            return Ok(false);
        };
        if existing.stack.len() != frame.stack.len() {
            return Err(AnalysisError::DepthMismatch {
                at,
                a: existing.stack.len(),
                b: frame.stack.len(),
            });
        }
        let mut changed = false;
        for (dst, src) in existing.locals.iter_mut().zip(frame.locals.iter()) {
            changed |= set_union(dst, src);
        }
        for (dst, src) in existing.stack.iter_mut().zip(frame.stack.iter()) {
            changed |= set_union(dst, src);
        }
        Ok(changed)
    }

    fn pop(&self, at: InsnId, frame: &mut PcFrame) -> Result<IdSet, AnalysisError> {
        frame.stack.pop().ok_or(AnalysisError::StackUnderflow { at })
    }

    fn pop_consumed(
        &mut self,
        at: InsnId,
        frame: &mut PcFrame,
        n: usize,
        count: &mut u8,
    ) -> Result<(), AnalysisError> {
        for _ in 0..n {
            let set = self.pop(at, frame)?;
            self.consume_set(at, &set);
            *count += 1;
        }
        Ok(())
    }

    /// Pop whole values until `words` words are removed, consuming them.
    fn pop_words_consumed(
        &mut self,
        at: InsnId,
        frame: &mut PcFrame,
        words: u8,
        count: &mut u8,
    ) -> Result<Vec<u8>, AnalysisError> {
        let mut widths = Vec::new();
        let mut left = words;
        while left > 0 {
            let set = self.pop(at, frame)?;
            let w = self.width_of(&set);
            self.consume_set(at, &set);
            *count += 1;
            left = left.saturating_sub(w);
            widths.push(w);
        }
        Ok(widths)
    }

    fn push_made(
        &mut self,
        frame: &mut PcFrame,
        at: InsnId,
        idx: &mut u8,
        width: u8,
        copy: bool,
    ) {
        let v = self.make(at, *idx, width, copy);
        *idx += 1;
        let mut set = IdSet::new();
        set.push(v);
        frame.stack.push(set);
    }

    fn execute(
        &mut self,
        at: InsnId,
        insn: &Insn,
        frame: &mut PcFrame,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        let mut consumed: u8 = 0;
        let mut out_idx: u8 = 0;
        match insn {
            Insn::Label | Insn::Simple(Nop) => {}
            Insn::Var { op, var } if op.is_load() => {
                let var = *var as usize;
                let set = frame.locals[var].clone();
                self.consume_set(at, &set);
                consumed += 1;
                self.copy_kinds.insert(at, CopySource::Local(var));
                self.push_made(frame, at, &mut out_idx, op.var_width(), true);
            }
            Insn::Var { op, var } if op.is_store() => {
                let var = *var as usize;
                let set = self.pop(at, frame)?;
                self.consume_set(at, &set);
                consumed += 1;
                self.copy_kinds.insert(at, CopySource::StackTop);
                let w = op.var_width();
                let v = self.make(at, out_idx, w, true);
                out_idx += 1;
                // A store destroys any size-2 value overlapping the target.
                if var > 0 && self.width_of(&frame.locals[var - 1]) == 2 {
                    frame.locals[var - 1] = IdSet::new();
                }
                let mut set = IdSet::new();
                set.push(v);
                frame.locals[var] = set;
                if w == 2 && var + 1 < frame.locals.len() {
                    frame.locals[var + 1] = IdSet::new();
                }
            }
            Insn::Var { op, .. } => return Err(AnalysisError::UnsupportedOpcode(*op)),
            Insn::Iinc { var, .. } => {
                let var = *var as usize;
                let old = frame.locals[var].clone();
                self.consume_set(at, &old);
                consumed += 1;
                let v = self.make(at, out_idx, 1, false);
                out_idx += 1;
                let mut set = IdSet::new();
                set.push(v);
                frame.locals[var] = set;
            }
            Insn::Int { op: Newarray, .. } => {
                self.pop_consumed(at, frame, 1, &mut consumed)?;
                self.push_made(frame, at, &mut out_idx, 1, false);
            }
            Insn::Int { .. } => {
                self.push_made(frame, at, &mut out_idx, 1, false);
            }
            Insn::Ldc(c) => {
                self.push_made(frame, at, &mut out_idx, c.width(), false);
            }
            Insn::Type { op: New, .. } => {
                self.push_made(frame, at, &mut out_idx, 1, false);
            }
            Insn::Type { .. } => {
                self.pop_consumed(at, frame, 1, &mut consumed)?;
                self.push_made(frame, at, &mut out_idx, 1, false);
            }
            Insn::Field { op, desc, .. } => {
                let w = descriptor::field_width(desc);
                match op {
                    Getstatic => self.push_made(frame, at, &mut out_idx, w, false),
                    Putstatic => self.pop_consumed(at, frame, 1, &mut consumed)?,
                    Getfield => {
                        self.pop_consumed(at, frame, 1, &mut consumed)?;
                        self.push_made(frame, at, &mut out_idx, w, false);
                    }
                    _ => self.pop_consumed(at, frame, 2, &mut consumed)?,
                }
            }
            Insn::MethodCall { op, desc, .. } => {
                let receiver = usize::from(*op != Invokestatic);
                let n = descriptor::argument_count(desc) + receiver;
                self.pop_consumed(at, frame, n, &mut consumed)?;
                let ret = descriptor::return_width(desc);
                if ret > 0 {
                    self.push_made(frame, at, &mut out_idx, ret, false);
                }
            }
            Insn::InvokeDynamic { desc, .. } => {
                self.pop_consumed(at, frame, descriptor::argument_count(desc), &mut consumed)?;
                let ret = descriptor::return_width(desc);
                if ret > 0 {
                    self.push_made(frame, at, &mut out_idx, ret, false);
                }
            }
            Insn::Jump { op, .. } => {
                self.pop_consumed(at, frame, op.jump_popped_values(), &mut consumed)?;
            }
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                self.pop_consumed(at, frame, 1, &mut consumed)?;
            }
            Insn::MultiANewArray { dims, .. } => {
                self.pop_consumed(at, frame, *dims as usize, &mut consumed)?;
                self.push_made(frame, at, &mut out_idx, 1, false);
            }
            Insn::Simple(op) => match op {
                _ if op.is_simple_const_push() => {
                    self.push_made(frame, at, &mut out_idx, op.const_push_width(), false);
                }
                Pop => self.pop_consumed(at, frame, 1, &mut consumed)?,
                Pop2 => {
                    let set = self.pop(at, frame)?;
                    let w = self.width_of(&set);
                    self.consume_set(at, &set);
                    consumed += 1;
                    if w == 1 {
                        self.pop_consumed(at, frame, 1, &mut consumed)?;
                    }
                }
                Dup => {
                    let set = self.pop(at, frame)?;
                    self.consume_set(at, &set);
                    consumed += 1;
                    self.copy_kinds.insert(at, CopySource::StackTop);
                    // The popped set is still what copy_sources reads: the
                    // frame before this instruction has it on top.
                    self.push_made(frame, at, &mut out_idx, 1, true);
                    self.push_made(frame, at, &mut out_idx, 1, true);
                }
                Dup2 => {
                    let top_width = frame
                        .stack
                        .last()
                        .map(|s| self.width_of(s))
                        .ok_or(AnalysisError::StackUnderflow { at })?;
                    if top_width == 2 {
                        let set = self.pop(at, frame)?;
                        self.consume_set(at, &set);
                        consumed += 1;
                        self.copy_kinds.insert(at, CopySource::StackTop);
                        self.push_made(frame, at, &mut out_idx, 2, true);
                        self.push_made(frame, at, &mut out_idx, 2, true);
                    } else {
                        // Two 1-word values: a barrier with four fresh outputs.
                        self.pop_consumed(at, frame, 2, &mut consumed)?;
                        for _ in 0..4 {
                            self.push_made(frame, at, &mut out_idx, 1, false);
                        }
                    }
                }
                DupX1 | DupX2 | Dup2X1 | Dup2X2 => {
                    let (dup_words, skip_words) = match op {
                        DupX1 => (1, 1),
                        DupX2 => (1, 2),
                        Dup2X1 => (2, 1),
                        _ => (2, 2),
                    };
                    let top = self.pop_words_consumed(at, frame, dup_words, &mut consumed)?;
                    let below = self.pop_words_consumed(at, frame, skip_words, &mut consumed)?;
                    for &w in top.iter().rev() {
                        self.push_made(frame, at, &mut out_idx, w, false);
                    }
                    for &w in below.iter().rev() {
                        self.push_made(frame, at, &mut out_idx, w, false);
                    }
                    for &w in top.iter().rev() {
                        self.push_made(frame, at, &mut out_idx, w, false);
                    }
                }
                Swap => {
                    self.pop_consumed(at, frame, 2, &mut consumed)?;
                    self.push_made(frame, at, &mut out_idx, 1, false);
                    self.push_made(frame, at, &mut out_idx, 1, false);
                }
                Iaload | Faload | Aaload | Baload | Caload | Saload => {
                    self.pop_consumed(at, frame, 2, &mut consumed)?;
                    self.push_made(frame, at, &mut out_idx, 1, false);
                }
                Laload | Daload => {
                    self.pop_consumed(at, frame, 2, &mut consumed)?;
                    self.push_made(frame, at, &mut out_idx, 2, false);
                }
                Iastore | Lastore | Fastore | Dastore | Aastore | Bastore | Castore
                | Sastore => {
                    self.pop_consumed(at, frame, 3, &mut consumed)?;
                }
                Arraylength => {
                    self.pop_consumed(at, frame, 1, &mut consumed)?;
                    self.push_made(frame, at, &mut out_idx, 1, false);
                }
                Athrow | Monitorenter | Monitorexit => {
                    self.pop_consumed(at, frame, 1, &mut consumed)?;
                }
                _ if op.is_return() => {
                    if !matches!(op, Return) {
                        self.pop_consumed(at, frame, 1, &mut consumed)?;
                    }
                }
                Jsr | Ret => return Err(AnalysisError::UnsupportedOpcode(*op)),
                _ => match op.pure_value_operands() {
                    Some(n) => {
                        self.pop_consumed(at, frame, n, &mut consumed)?;
                        self.push_made(frame, at, &mut out_idx, op.value_result_width(), false);
                    }
                    None if op.is_int_div_or_rem() => {
                        self.pop_consumed(at, frame, 2, &mut consumed)?;
                        self.push_made(frame, at, &mut out_idx, op.value_result_width(), false);
                    }
                    None => return Err(AnalysisError::UnsupportedOpcode(*op)),
                },
            },
        }
        self.consumed_counts.insert(at, consumed);
        self.produced_counts.insert(at, out_idx);
        Ok(())
    }
}
