//! Copy propagation over local slots.
//!
//! Every load of a non-parameter slot is rewritten to the preferred alias of
//! its equivalence class: a slot that earlier loads in this pass already
//! used if one exists, otherwise the smallest-numbered alias. Coalescing
//! onto an already-used slot keeps fewer copies live; the minimum is the
//! canonical fallback. Loads of parameter slots are left alone: a
//! parameter's initial value stays live for its whole frame anyway, and
//! there is no upstream store a rewrite could expose for elimination.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::analysis::aliasing::AliasingAnalysis;
use crate::config::OptConfig;
use crate::insn::Insn;
use crate::method::Method;

pub(crate) fn copy_propagation(method: &mut Method, owner: &str, config: &OptConfig) -> bool {
    let params_size = method.params_size();
    let max_locals = method.max_locals as usize;

    // The analysis is built lazily: a method without an eligible load never
    // pays for it.
    let mut analysis: Option<AliasingAnalysis> = None;
    let mut analysis_built = false;

    let mut known_used: HashSet<u16> = HashSet::new();
    let mut changed = false;
    let mut rewritten = 0usize;

    for id in method.insns.ids() {
        let Some(insn) = method.insns.get(id) else {
            continue;
        };
        if !insn.is_load() {
            continue;
        }
        let var = insn.var().unwrap_or(0);

        let mut operand = var;
        if var >= params_size {
            if !analysis_built {
                analysis = AliasingAnalysis::build(method, config);
                analysis_built = true;
                if analysis.is_none() {
                    return false;
                }
            }
            if let Some(aa) = &analysis {
                let aliases: Vec<u16> = aa
                    .aliases_of(id, var as usize)
                    .into_iter()
                    .filter(|&slot| slot < max_locals)
                    .map(|slot| slot as u16)
                    .collect();
                let preferred = aliases
                    .iter()
                    .copied()
                    .filter(|slot| known_used.contains(slot))
                    .min()
                    .or_else(|| aliases.iter().copied().min());
                if let Some(target) = preferred {
                    operand = target;
                }
            }
        }

        if operand != var {
            if let Some(Insn::Var { var: v, .. }) = method.insns.get_mut(id) {
                trace!(%id, from = var, to = operand, "copy propagation: load rewritten");
                *v = operand;
                changed = true;
                rewritten += 1;
            }
        }
        known_used.insert(operand);
    }

    if changed {
        debug!(method = %method.name, owner, rewritten, "copy propagation changed method");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::Opcode;

    use crate::method::MethodBuilder;

    fn run(method: &mut Method) -> bool {
        copy_propagation(method, "C", &OptConfig::default())
    }

    #[test]
    fn test_load_rewritten_to_min_alias() {
        // iload 1; istore 3; iload 3; pop; pop; return
        let mut m = MethodBuilder::new("f", "(I)V")
            .is_static(true)
            .max_locals(4)
            .var(Opcode::Iload, 1)
            .var(Opcode::Istore, 3)
            .var(Opcode::Iload, 3)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        assert!(run(&mut m));
        let ids = m.insns.ids();
        assert_eq!(
            m.insns.get(ids[2]),
            Some(&Insn::Var {
                op: Opcode::Iload,
                var: 1
            })
        );
    }

    #[test]
    fn test_parameter_loads_not_rewritten() {
        // aload 0 is the receiver: never rewritten, but marks slot 0 used.
        let mut m = MethodBuilder::new("f", "()V")
            .max_locals(3)
            .var(Opcode::Aload, 0)
            .var(Opcode::Astore, 2)
            .var(Opcode::Aload, 2)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        assert!(run(&mut m));
        let ids = m.insns.ids();
        assert_eq!(
            m.insns.get(ids[0]),
            Some(&Insn::Var {
                op: Opcode::Aload,
                var: 0
            })
        );
        // The second load coalesces onto the used slot 0.
        assert_eq!(
            m.insns.get(ids[2]),
            Some(&Insn::Var {
                op: Opcode::Aload,
                var: 0
            })
        );
    }

    #[test]
    fn test_prefers_known_used_alias_over_minimum() {
        // Slots 2 and 3 both alias slot 1's value. A first load of slot 3
        // marks it used only after the rewrite, so the known-used preference
        // is observable on the second load: both end up on the same slot.
        let mut m = MethodBuilder::new("f", "(I)V")
            .is_static(true)
            .max_locals(5)
            .var(Opcode::Iload, 0)
            .var(Opcode::Istore, 2)
            .var(Opcode::Iload, 2)
            .var(Opcode::Istore, 3)
            .var(Opcode::Iload, 3)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        assert!(run(&mut m));
        let ids = m.insns.ids();
        // Every load of a non-parameter slot lands on slot 0 (the minimum
        // alias, and from then on the known-used one).
        for idx in [2, 4] {
            assert_eq!(
                m.insns.get(ids[idx]),
                Some(&Insn::Var {
                    op: Opcode::Iload,
                    var: 0
                }),
                "load at position {idx}"
            );
        }
    }

    #[test]
    fn test_no_change_reports_false() {
        let mut m = MethodBuilder::new("f", "(I)I")
            .is_static(true)
            .max_locals(1)
            .var(Opcode::Iload, 0)
            .op(Opcode::Ireturn)
            .build();
        assert!(!run(&mut m));
    }

    #[test]
    fn test_declined_analysis_is_no_change() {
        let mut config = OptConfig::default();
        config.max_aliasing_analysis_size = 0;
        let mut m = MethodBuilder::new("f", "(I)V")
            .is_static(true)
            .max_locals(4)
            .var(Opcode::Iload, 1)
            .var(Opcode::Istore, 3)
            .var(Opcode::Iload, 3)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        let before = m.insns.ids().len();
        assert!(!copy_propagation(&mut m, "C", &config));
        assert_eq!(m.insns.ids().len(), before);
    }
}
