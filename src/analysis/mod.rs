//! Dataflow analyses over method bodies.
//!
//! Two analyses back the optimization passes: the aliasing analysis
//! ([`aliasing::AliasingAnalysis`]) partitions local and stack slots into
//! equivalence classes of equal runtime values, and the producer/consumer
//! analysis ([`prodcons::ProdConsAnalysis`]) relates every value to the
//! instructions that create and consume it.
//!
//! Both are built per pass, consulted while the pass plans its mutations,
//! and discarded before the instruction list is edited. Construction is
//! gated on method size; an oversized (or legacy-`jsr`) method is simply
//! not analyzed and the pass reports "no change".

pub mod aliasing;
pub mod prodcons;

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use crate::config::OptConfig;
use crate::descriptor;
use crate::insn::{Insn, InsnId, InsnList};
use crate::method::Method;
use crate::opcodes::Opcode;

/// Why an analysis could not be computed or a stack-shape check failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// The method uses an opcode the analyses do not model (`jsr`/`ret`).
    UnsupportedOpcode(Opcode),
    /// A value was popped off an empty abstract stack.
    StackUnderflow { at: InsnId },
    /// Two paths reach the same instruction with different stack depths.
    DepthMismatch { at: InsnId, a: usize, b: usize },
    /// The abstract stack exceeded the method's declared `max_stack`.
    StackOverflow { at: InsnId, depth: usize },
    /// The method has no instructions.
    EmptyMethod,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedOpcode(op) => write!(f, "unsupported opcode: {op}"),
            Self::StackUnderflow { at } => write!(f, "stack underflow at {at}"),
            Self::DepthMismatch { at, a, b } => {
                write!(f, "inconsistent stack depth at {at}: {a} vs {b}")
            }
            Self::StackOverflow { at, depth } => {
                write!(f, "stack depth {depth} exceeds max_stack at {at}")
            }
            Self::EmptyMethod => write!(f, "method has no instructions"),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Size gate for the aliasing analysis.
pub fn size_ok_for_aliasing(method: &Method, config: &OptConfig) -> bool {
    analysis_size(method) <= config.max_aliasing_analysis_size
}

/// Size gate for the producer/consumer analysis.
pub fn size_ok_for_source_value(method: &Method, config: &OptConfig) -> bool {
    analysis_size(method) <= config.max_source_value_analysis_size
}

fn analysis_size(method: &Method) -> usize {
    method.insns.len() * (method.max_locals as usize + method.max_stack as usize)
}

/// Control-flow successors of one instruction.
pub(crate) fn successors(insns: &InsnList, id: InsnId) -> SmallVec<[InsnId; 4]> {
    let mut out = SmallVec::new();
    let Some(insn) = insns.get(id) else {
        return out;
    };
    match insn {
        Insn::Jump {
            op: Opcode::Goto,
            target,
        } => out.push(*target),
        Insn::Jump { target, .. } => {
            out.push(*target);
            if let Some(next) = insns.next(id) {
                out.push(next);
            }
        }
        Insn::TableSwitch {
            default, targets, ..
        }
        | Insn::LookupSwitch {
            default, targets, ..
        } => {
            out.push(*default);
            out.extend(targets.iter().copied());
        }
        Insn::Simple(op) if op.is_return() || *op == Opcode::Athrow => {}
        _ => {
            if let Some(next) = insns.next(id) {
                out.push(next);
            }
        }
    }
    out
}

/// For each instruction inside a protected range, the handlers covering it.
pub(crate) struct HandlerMap {
    covered: HashMap<InsnId, SmallVec<[InsnId; 1]>>,
}

impl HandlerMap {
    pub(crate) fn new(method: &Method) -> Self {
        let mut covered: HashMap<InsnId, SmallVec<[InsnId; 1]>> = HashMap::new();
        for block in &method.try_catch {
            let mut cur = Some(block.start);
            while let Some(id) = cur {
                if id == block.end {
                    break;
                }
                covered.entry(id).or_default().push(block.handler);
                cur = method.insns.next(id);
            }
        }
        Self { covered }
    }

    pub(crate) fn handlers_for(&self, id: InsnId) -> &[InsnId] {
        self.covered.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Net word effect of an instruction: `(popped, pushed)`.
fn word_effect(insn: &Insn) -> Result<(usize, usize), AnalysisError> {
    use Opcode::*;
    let r = match insn {
        Insn::Label => (0, 0),
        Insn::Var { op, .. } => {
            let w = op.var_width() as usize;
            if op.is_load() {
                (0, w)
            } else {
                (w, 0)
            }
        }
        Insn::Iinc { .. } => (0, 0),
        Insn::Int { op: Newarray, .. } => (1, 1),
        Insn::Int { .. } => (0, 1),
        Insn::Ldc(c) => (0, c.width() as usize),
        Insn::Type { op: New, .. } => (0, 1),
        Insn::Type { .. } => (1, 1),
        Insn::Field { op, desc, .. } => {
            let w = descriptor::field_width(desc) as usize;
            match op {
                Getstatic => (0, w),
                Putstatic => (w, 0),
                Getfield => (1, w),
                _ => (1 + w, 0),
            }
        }
        Insn::MethodCall { op, desc, .. } => {
            let args: usize = descriptor::argument_widths(desc)
                .iter()
                .map(|w| *w as usize)
                .sum();
            let receiver = usize::from(*op != Invokestatic);
            (args + receiver, descriptor::return_width(desc) as usize)
        }
        Insn::InvokeDynamic { desc, .. } => {
            let args: usize = descriptor::argument_widths(desc)
                .iter()
                .map(|w| *w as usize)
                .sum();
            (args, descriptor::return_width(desc) as usize)
        }
        Insn::Jump { op, .. } => (op.jump_popped_values(), 0),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::MultiANewArray { dims, .. } => (*dims as usize, 1),
        Insn::Simple(op) => match op {
            Nop => (0, 0),
            _ if op.is_simple_const_push() => (0, op.const_push_width() as usize),
            Iaload | Faload | Aaload | Baload | Caload | Saload => (2, 1),
            Laload | Daload => (2, 2),
            Iastore | Fastore | Aastore | Bastore | Castore | Sastore => (3, 0),
            Lastore | Dastore => (4, 0),
            Pop => (1, 0),
            Pop2 => (2, 0),
            Dup => (1, 2),
            DupX1 => (2, 3),
            DupX2 => (3, 4),
            Dup2 => (2, 4),
            Dup2X1 => (3, 5),
            Dup2X2 => (4, 6),
            Swap => (2, 2),
            Iadd | Isub | Imul | Idiv | Irem | Fadd | Fsub | Fmul | Fdiv | Frem => (2, 1),
            Ladd | Lsub | Lmul | Ldiv | Lrem | Dadd | Dsub | Dmul | Ddiv | Drem => (4, 2),
            Ineg | Fneg => (1, 1),
            Lneg | Dneg => (2, 2),
            Ishl | Ishr | Iushr => (2, 1),
            Lshl | Lshr | Lushr => (3, 2),
            Iand | Ior | Ixor => (2, 1),
            Land | Lor | Lxor => (4, 2),
            I2l | I2d => (1, 2),
            I2f | I2b | I2c | I2s => (1, 1),
            L2i | L2f => (2, 1),
            L2d => (2, 2),
            F2i => (1, 1),
            F2l | F2d => (1, 2),
            D2i | D2f => (2, 1),
            D2l => (2, 2),
            Lcmp | Dcmpl | Dcmpg => (4, 1),
            Fcmpl | Fcmpg => (2, 1),
            Ireturn | Freturn | Areturn => (1, 0),
            Lreturn | Dreturn => (2, 0),
            Return => (0, 0),
            Athrow => (1, 0),
            Arraylength => (1, 1),
            Monitorenter | Monitorexit => (1, 0),
            Jsr | Ret => return Err(AnalysisError::UnsupportedOpcode(*op)),
            other => return Err(AnalysisError::UnsupportedOpcode(*other)),
        },
    };
    Ok(r)
}

/// Check that stack depths are consistent: every instruction is reached with
/// one depth, nothing underflows, and `max_stack` is respected. Exception
/// handlers are entered with depth 1.
///
/// This is a word-level shadow of the bytecode verifier, used by the test
/// suite to assert that a pass left the method well-formed.
pub fn check_stack_shape(method: &Method) -> Result<(), AnalysisError> {
    let entry = method.insns.first().ok_or(AnalysisError::EmptyMethod)?;
    let handlers = HandlerMap::new(method);
    let mut depth_at: HashMap<InsnId, usize> = HashMap::new();
    let mut worklist = vec![(entry, 0usize)];

    while let Some((id, depth)) = worklist.pop() {
        match depth_at.get(&id) {
            Some(&d) if d == depth => continue,
            Some(&d) => {
                return Err(AnalysisError::DepthMismatch {
                    at: id,
                    a: d,
                    b: depth,
                })
            }
            None => {
                depth_at.insert(id, depth);
            }
        }
        let insn = match method.insns.get(id) {
            Some(i) => i,
            None => continue,
        };
        let (popped, pushed) = word_effect(insn)?;
        if depth < popped {
            return Err(AnalysisError::StackUnderflow { at: id });
        }
        let after = depth - popped + pushed;
        if after > method.max_stack as usize {
            return Err(AnalysisError::StackOverflow { at: id, depth: after });
        }
        for succ in successors(&method.insns, id) {
            worklist.push((succ, after));
        }
        for &handler in handlers.handlers_for(id) {
            worklist.push((handler, 1));
        }
    }
    Ok(())
}
