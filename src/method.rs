//! Method representation and a builder for assembling instruction lists.

use std::fmt::Write as _;

use crate::descriptor;
use crate::insn::{Insn, InsnId, InsnList, LdcConst, MethodHandle};
use crate::opcodes::Opcode;

/// A try/catch region. `start`/`end` and `handler` are label instructions;
/// the protected range is `[start, end)` in list order.
#[derive(Debug, Clone)]
pub struct TryCatchBlock {
    pub start: InsnId,
    pub end: InsnId,
    pub handler: InsnId,
    /// Internal name of the caught class; `None` for catch-all.
    pub catch_type: Option<String>,
}

/// One method body, mutated in place by the optimization passes.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub desc: String,
    pub is_static: bool,
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: InsnList,
    pub try_catch: Vec<TryCatchBlock>,
}

impl Method {
    /// Number of local slots holding parameters (including the receiver).
    pub fn params_size(&self) -> u16 {
        descriptor::params_size(self.is_static, &self.desc)
    }

    /// Human-readable listing, for diagnostics and assertion messages.
    pub fn textify(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}{}:", self.name, self.desc);
        for (id, insn) in self.insns.iter() {
            if matches!(insn, Insn::Label) {
                let _ = writeln!(out, " L{}:", id.0);
            } else {
                let _ = writeln!(out, "   {insn}");
            }
        }
        out
    }
}

/// Fluent builder for method bodies, used by tests and benches.
///
/// Labels are created up front with [`MethodBuilder::new_label`] so branches
/// can name their target before it is placed.
#[derive(Debug)]
pub struct MethodBuilder {
    name: String,
    desc: String,
    is_static: bool,
    max_stack: u16,
    max_locals: u16,
    insns: InsnList,
    try_catch: Vec<TryCatchBlock>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            is_static: false,
            max_stack: 8,
            max_locals: 8,
            insns: InsnList::new(),
            try_catch: Vec::new(),
        }
    }

    pub fn is_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn max_stack(mut self, n: u16) -> Self {
        self.max_stack = n;
        self
    }

    pub fn max_locals(mut self, n: u16) -> Self {
        self.max_locals = n;
        self
    }

    /// Append a plain opcode.
    pub fn op(mut self, op: Opcode) -> Self {
        self.insns.push_back(Insn::Simple(op));
        self
    }

    /// Append a local load/store.
    pub fn var(mut self, op: Opcode, var: u16) -> Self {
        self.insns.push_back(Insn::Var { op, var });
        self
    }

    pub fn iinc(mut self, var: u16, delta: i16) -> Self {
        self.insns.push_back(Insn::Iinc { var, delta });
        self
    }

    pub fn int(mut self, op: Opcode, operand: i32) -> Self {
        self.insns.push_back(Insn::Int { op, operand });
        self
    }

    pub fn ldc(mut self, c: LdcConst) -> Self {
        self.insns.push_back(Insn::Ldc(c));
        self
    }

    pub fn type_insn(mut self, op: Opcode, class: impl Into<String>) -> Self {
        self.insns.push_back(Insn::Type {
            op,
            class: class.into(),
        });
        self
    }

    pub fn field(
        mut self,
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        self.insns.push_back(Insn::Field {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        });
        self
    }

    pub fn invoke(
        mut self,
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        self.insns.push_back(Insn::MethodCall {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf: op == Opcode::Invokeinterface,
        });
        self
    }

    pub fn invokedynamic(
        mut self,
        name: impl Into<String>,
        desc: impl Into<String>,
        bsm: MethodHandle,
        bsm_args: Vec<LdcConst>,
    ) -> Self {
        self.insns.push_back(Insn::InvokeDynamic {
            name: name.into(),
            desc: desc.into(),
            bsm,
            bsm_args,
        });
        self
    }

    pub fn multianewarray(mut self, desc: impl Into<String>, dims: u8) -> Self {
        self.insns.push_back(Insn::MultiANewArray {
            desc: desc.into(),
            dims,
        });
        self
    }

    /// Allocate a label that can be targeted before it is placed.
    pub fn new_label(&mut self) -> InsnId {
        self.insns.alloc(Insn::Label)
    }

    /// Place a previously allocated label at the current end.
    pub fn label(mut self, l: InsnId) -> Self {
        self.insns.link_back(l);
        self
    }

    /// Append a branch to a label.
    pub fn jump(mut self, op: Opcode, target: InsnId) -> Self {
        self.insns.push_back(Insn::Jump { op, target });
        self
    }

    pub fn table_switch(mut self, min: i32, max: i32, default: InsnId, targets: Vec<InsnId>) -> Self {
        self.insns.push_back(Insn::TableSwitch {
            min,
            max,
            default,
            targets,
        });
        self
    }

    pub fn lookup_switch(mut self, default: InsnId, keys: Vec<i32>, targets: Vec<InsnId>) -> Self {
        self.insns.push_back(Insn::LookupSwitch {
            default,
            keys,
            targets,
        });
        self
    }

    /// Register a try/catch region over previously placed labels.
    pub fn try_catch(
        mut self,
        start: InsnId,
        end: InsnId,
        handler: InsnId,
        catch_type: Option<String>,
    ) -> Self {
        self.try_catch.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type,
        });
        self
    }

    pub fn build(self) -> Method {
        Method {
            name: self.name,
            desc: self.desc,
            is_static: self.is_static,
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            insns: self.insns,
            try_catch: self.try_catch,
        }
    }
}
