//! Cross-pass scenario tests for the method-local optimizer.

#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use std::sync::Mutex;

    use crate::analysis::check_stack_shape;
    use crate::callgraph::{CallGraph, Callsite, MethodRef, NoopHost, OptimizerHost};
    use crate::config::OptConfig;
    use crate::insn::{HandleKind, Insn, InsnId, LdcConst, MethodHandle};
    use crate::method::{Method, MethodBuilder};
    use crate::opcodes::Opcode;
    use crate::optimizer::LocalOptimizer;

    const OWNER: &str = "p/C";

    /// Host that records inliner interactions.
    #[derive(Default)]
    struct RecordingHost {
        inline_result: bool,
        inlined: Mutex<Vec<InsnId>>,
        removed_impls: Mutex<Vec<String>>,
    }

    impl OptimizerHost for RecordingHost {
        fn inline_callsite(&self, _: &mut Method, callsite: &Callsite, _: bool) -> bool {
            self.inlined.lock().unwrap().push(callsite.insn);
            self.inline_result
        }

        fn remove_indy_lambda_impl_method(&self, impl_method: &MethodHandle) {
            self.removed_impls
                .lock()
                .unwrap()
                .push(impl_method.name.clone());
        }
    }

    fn opcodes(m: &Method) -> Vec<Insn> {
        m.insns.iter().map(|(_, i)| i.clone()).collect()
    }

    #[test]
    fn test_alias_canonicalization_pipeline() {
        // iload 5; istore 7; iload 7; pop; return: the second load picks
        // the already-used alias, the store goes stale, and the push/pop
        // pass cleans up the rest.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "(IIIIII)V")
            .is_static(true)
            .max_locals(9)
            .var(Opcode::Iload, 5)
            .var(Opcode::Istore, 7)
            .var(Opcode::Iload, 7)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        assert!(opt.copy_propagation(&mut m, OWNER));
        assert_eq!(check_stack_shape(&m), Ok(()));
        let loads: Vec<u16> = m
            .insns
            .iter()
            .filter(|(_, i)| i.is_load())
            .filter_map(|(_, i)| i.var())
            .collect();
        assert_eq!(loads, vec![5, 5]);

        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.store_removed);
        assert_eq!(check_stack_shape(&m), Ok(()));
        assert!(m.insns.iter().all(|(_, i)| !i.is_store()));

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(check_stack_shape(&m), Ok(()));
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);

        // Idempotence: a second round changes nothing.
        assert!(!opt.copy_propagation(&mut m, OWNER));
        assert!(!opt.eliminate_stale_stores(&mut m, OWNER).changed());
        assert!(!opt.eliminate_push_pop(&mut m, OWNER).changed);
    }

    #[test]
    fn test_reference_store_of_receiver_removed_outright() {
        // aload 0; astore 3; return in an instance method: the stored value
        // is the receiver, reachable anyway, so no null-poisoning is needed.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .max_locals(4)
            .var(Opcode::Aload, 0)
            .var(Opcode::Astore, 3)
            .op(Opcode::Return)
            .build();

        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.store_removed);
        assert_eq!(
            opcodes(&m),
            vec![
                Insn::Var {
                    op: Opcode::Aload,
                    var: 0
                },
                Insn::Simple(Opcode::Pop),
                Insn::Simple(Opcode::Return),
            ]
        );
        assert_eq!(check_stack_shape(&m), Ok(()));

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_division_is_preserved() {
        // iconst_5; iload 1; idiv; pop: the division can trap, so it must
        // stay; planning a pop after it cancels against the existing pop.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "(II)V")
            .is_static(true)
            .op(Opcode::Iconst5)
            .var(Opcode::Iload, 1)
            .op(Opcode::Idiv)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        let before = opcodes(&m);

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(!pp.changed, "cancellation must not report a change");
        assert_eq!(opcodes(&m), before);
        assert_eq!(check_stack_shape(&m), Ok(()));
    }

    #[test]
    fn test_unused_pure_constructor_removed() {
        // new Integer; dup; iconst_1; invokespecial Integer.<init>(I)V; pop
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .type_insn(Opcode::New, "java/lang/Integer")
            .op(Opcode::Dup)
            .op(Opcode::Iconst1)
            .invoke(Opcode::Invokespecial, "java/lang/Integer", "<init>", "(I)V")
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
        assert_eq!(check_stack_shape(&m), Ok(()));

        assert!(!opt.eliminate_push_pop(&mut m, OWNER).changed);
    }

    #[test]
    fn test_unused_pure_constructor_without_dup() {
        // new Object; invokespecial Object.<init>()V: no dup, the object
        // is initialized and dropped.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .type_insn(Opcode::New, "java/lang/Object")
            .invoke(Opcode::Invokespecial, "java/lang/Object", "<init>", "()V")
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    fn class_tag_new_array_method() -> Method {
        MethodBuilder::new("f", "()V")
            .is_static(true)
            .max_locals(2)
            .max_stack(4)
            .field(
                Opcode::Getstatic,
                "scala/reflect/ClassTag$",
                "MODULE$",
                "Lscala/reflect/ClassTag$;",
            )
            .ldc(LdcConst::Class("java/lang/String".into()))
            .invoke(
                Opcode::Invokevirtual,
                "scala/reflect/ClassTag$",
                "apply",
                "(Ljava/lang/Class;)Lscala/reflect/ClassTag;",
            )
            .op(Opcode::Iconst3)
            .invoke(
                Opcode::Invokevirtual,
                "scala/reflect/ClassTag",
                "newArray",
                "(I)Ljava/lang/Object;",
            )
            .var(Opcode::Astore, 1)
            .var(Opcode::Aload, 1)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build()
    }

    #[test]
    fn test_class_tag_new_array_rewritten() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = class_tag_new_array_method();
        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.intrinsic_rewritten);
        assert_eq!(check_stack_shape(&m), Ok(()));

        let insns = opcodes(&m);
        // The tag producer stays (it may have side effects) but its value is
        // popped; the newArray call became a direct allocation.
        assert!(insns.iter().any(|i| matches!(
            i,
            Insn::Type { op: Opcode::Anewarray, class } if class == "java/lang/String"
        )));
        assert!(!insns.iter().any(|i| matches!(
            i,
            Insn::MethodCall { name, .. } if name == "newArray"
        )));
        let apply_pos = insns
            .iter()
            .position(|i| matches!(i, Insn::MethodCall { name, .. } if name == "apply"))
            .expect("apply call kept");
        assert_eq!(insns[apply_pos + 1], Insn::Simple(Opcode::Pop));

        // Idempotence.
        assert!(!opt.eliminate_stale_stores(&mut m, OWNER).changed());
    }

    #[test]
    fn test_exposed_array_accessor_handed_to_inliner() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = RecordingHost {
            inline_result: true,
            ..RecordingHost::default()
        };
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let b = MethodBuilder::new("f", "()V")
            .is_static(true)
            .max_locals(2)
            .max_stack(4)
            .field(
                Opcode::Getstatic,
                "scala/reflect/ClassTag$",
                "MODULE$",
                "Lscala/reflect/ClassTag$;",
            )
            .ldc(LdcConst::Class("java/lang/String".into()))
            .invoke(
                Opcode::Invokevirtual,
                "scala/reflect/ClassTag$",
                "apply",
                "(Ljava/lang/Class;)Lscala/reflect/ClassTag;",
            )
            .op(Opcode::Iconst3)
            .invoke(
                Opcode::Invokevirtual,
                "scala/reflect/ClassTag",
                "newArray",
                "(I)Ljava/lang/Object;",
            )
            .var(Opcode::Astore, 1)
            .field(
                Opcode::Getstatic,
                "scala/runtime/ScalaRunTime$",
                "MODULE$",
                "Lscala/runtime/ScalaRunTime$;",
            )
            .var(Opcode::Aload, 1)
            .op(Opcode::Iconst0)
            .invoke(
                Opcode::Invokevirtual,
                "scala/runtime/ScalaRunTime$",
                "array_apply",
                "(Ljava/lang/Object;I)Ljava/lang/Object;",
            )
            .op(Opcode::Pop)
            .op(Opcode::Return);
        let m = b.build();
        let array_apply = m
            .insns
            .iter()
            .find(|(_, i)| matches!(i, Insn::MethodCall { name, .. } if name == "array_apply"))
            .map(|(id, _)| id)
            .unwrap();
        let key = MethodRef::new(OWNER, "f", "()V");
        cg.add_callsite(
            &key,
            Callsite {
                insn: array_apply,
                callee: MethodRef::new("scala/runtime/ScalaRunTime$", "array_apply", ""),
            },
        );

        let mut m = m;
        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.intrinsic_rewritten);
        assert!(stale.call_inlined);
        assert_eq!(host.inlined.lock().unwrap().as_slice(), &[array_apply]);
    }

    #[test]
    fn test_stale_reference_store_is_null_poisoned() {
        // One branch stores a field value into slot 1 and returns through a
        // call; the other branch's store is read. The first store is stale
        // but the slot is live, so it gets null-poisoned instead of popped.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut b = MethodBuilder::new("f", "(I)V").is_static(true).max_locals(2);
        let else_branch = b.new_label();
        let mut m = b
            .var(Opcode::Iload, 0)
            .jump(Opcode::Ifeq, else_branch)
            .field(Opcode::Getstatic, "p/A", "f", "Ljava/lang/Object;")
            .var(Opcode::Astore, 1)
            .invoke(Opcode::Invokestatic, "p/A", "g", "()V")
            .op(Opcode::Return)
            .label(else_branch)
            .field(Opcode::Getstatic, "p/A", "f", "Ljava/lang/Object;")
            .var(Opcode::Astore, 1)
            .var(Opcode::Aload, 1)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.store_removed);
        assert_eq!(check_stack_shape(&m), Ok(()));

        let insns = opcodes(&m);
        // The stale store is preceded by pop; aconst_null now.
        let first_store = insns
            .iter()
            .position(|i| i.is_store())
            .expect("store kept in place");
        assert_eq!(insns[first_store - 1], Insn::Simple(Opcode::AconstNull));
        assert_eq!(insns[first_store - 2], Insn::Simple(Opcode::Pop));
        // Both stores survive.
        assert_eq!(insns.iter().filter(|i| i.is_store()).count(), 2);
    }

    #[test]
    fn test_trailing_reference_store_downgraded_to_pop() {
        // The stale store sits in the trailing run before the return: the
        // method is about to pop its frame, so no poisoning is needed even
        // though the slot is live elsewhere.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut b = MethodBuilder::new("f", "(I)V").is_static(true).max_locals(2);
        let else_branch = b.new_label();
        let mut m = b
            .var(Opcode::Iload, 0)
            .jump(Opcode::Ifeq, else_branch)
            .field(Opcode::Getstatic, "p/A", "f", "Ljava/lang/Object;")
            .var(Opcode::Astore, 1)
            .op(Opcode::Return)
            .label(else_branch)
            .field(Opcode::Getstatic, "p/A", "f", "Ljava/lang/Object;")
            .var(Opcode::Astore, 1)
            .var(Opcode::Aload, 1)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.store_removed);
        assert_eq!(check_stack_shape(&m), Ok(()));
        let insns = opcodes(&m);
        // Only the consumed store survives; the stale one became a pop.
        assert_eq!(insns.iter().filter(|i| i.is_store()).count(), 1);
        assert!(!insns.contains(&Insn::Simple(Opcode::AconstNull)));
    }

    #[test]
    fn test_unused_increment_removed() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "(I)V")
            .is_static(true)
            .max_locals(2)
            .iinc(1, 1)
            .op(Opcode::Return)
            .build();
        let stale = opt.eliminate_stale_stores(&mut m, OWNER);
        assert!(stale.store_removed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_scala_unbox_becomes_checkcast() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "(Ljava/lang/Object;)V")
            .is_static(true)
            .var(Opcode::Aload, 0)
            .invoke(
                Opcode::Invokestatic,
                "scala/runtime/BoxesRunTime",
                "unboxToInt",
                "(Ljava/lang/Object;)I",
            )
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert!(pp.cast_added);
        assert!(!pp.null_check_added);
        assert_eq!(
            opcodes(&m),
            vec![
                Insn::Var {
                    op: Opcode::Aload,
                    var: 0
                },
                Insn::Type {
                    op: Opcode::Checkcast,
                    class: "java/lang/Integer".into()
                },
                Insn::Simple(Opcode::Pop),
                Insn::Simple(Opcode::Return),
            ]
        );
        assert_eq!(check_stack_shape(&m), Ok(()));
    }

    #[test]
    fn test_java_unbox_becomes_null_check() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "(Ljava/lang/Integer;)V")
            .is_static(true)
            .var(Opcode::Aload, 0)
            .invoke(Opcode::Invokevirtual, "java/lang/Integer", "intValue", "()I")
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert!(pp.null_check_added);
        assert_eq!(check_stack_shape(&m), Ok(()));

        let insns = opcodes(&m);
        assert!(matches!(
            insns[1],
            Insn::Jump {
                op: Opcode::Ifnonnull,
                ..
            }
        ));
        assert_eq!(insns[2], Insn::Simple(Opcode::AconstNull));
        assert_eq!(insns[3], Insn::Simple(Opcode::Athrow));
        assert_eq!(insns[4], Insn::Label);
        assert_eq!(insns[5], Insn::Simple(Opcode::Return));
    }

    #[test]
    fn test_lambda_instantiation_removed_with_impl_method() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = RecordingHost::default();
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let bsm = MethodHandle {
            kind: HandleKind::InvokeStatic,
            owner: "java/lang/invoke/LambdaMetafactory".into(),
            name: "metafactory".into(),
            desc: "(Ljava/lang/invoke/MethodHandles$Lookup;)Ljava/lang/invoke/CallSite;".into(),
            itf: false,
        };
        let impl_handle = MethodHandle {
            kind: HandleKind::InvokeStatic,
            owner: OWNER.into(),
            name: "$anonfun$f$1".into(),
            desc: "(I)I".into(),
            itf: false,
        };
        let mut m = MethodBuilder::new("f", "(I)V")
            .is_static(true)
            .var(Opcode::Iload, 0)
            .invokedynamic(
                "apply",
                "(I)Lscala/Function1;",
                bsm,
                vec![
                    LdcConst::MethodType("(Ljava/lang/Object;)Ljava/lang/Object;".into()),
                    LdcConst::MethodHandle(impl_handle),
                    LdcConst::MethodType("(I)I".into()),
                ],
            )
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
        assert_eq!(
            host.removed_impls.lock().unwrap().as_slice(),
            &["$anonfun$f$1".to_string()]
        );
    }

    #[test]
    fn test_boxed_unit_load_removed() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .field(
                Opcode::Getstatic,
                "scala/runtime/BoxedUnit",
                "UNIT",
                "Lscala/runtime/BoxedUnit;",
            )
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();

        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_module_load_gated_by_allow_list() {
        let cg = CallGraph::new();
        let host = NoopHost;

        let build = || {
            MethodBuilder::new("f", "()V")
                .is_static(true)
                .field(
                    Opcode::Getstatic,
                    "scala/Predef$",
                    "MODULE$",
                    "Lscala/Predef$;",
                )
                .op(Opcode::Pop)
                .op(Opcode::Return)
                .build()
        };

        // Not allow-listed: initialization could be observable, no change.
        let config = OptConfig::default();
        let opt = LocalOptimizer::new(&config, &cg, &host);
        let mut m = build();
        assert!(!opt.eliminate_push_pop(&mut m, OWNER).changed);
        assert_eq!(m.insns.len(), 3);

        // Allow-listed: the read disappears.
        let mut config = OptConfig::default();
        config
            .modules_allow_skip_initialization
            .insert("scala/Predef$".into());
        let opt = LocalOptimizer::new(&config, &cg, &host);
        let mut m = build();
        assert!(opt.eliminate_push_pop(&mut m, OWNER).changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_class_constant_gated_by_config() {
        let cg = CallGraph::new();
        let host = NoopHost;

        let build = || {
            MethodBuilder::new("f", "()V")
                .is_static(true)
                .ldc(LdcConst::Class("p/A".into()))
                .op(Opcode::Pop)
                .op(Opcode::Return)
                .build()
        };

        let config = OptConfig::default();
        let opt = LocalOptimizer::new(&config, &cg, &host);
        let mut m = build();
        assert!(!opt.eliminate_push_pop(&mut m, OWNER).changed);

        let config = OptConfig::permissive();
        let opt = LocalOptimizer::new(&config, &cg, &host);
        let mut m = build();
        assert!(opt.eliminate_push_pop(&mut m, OWNER).changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_numeric_ldc_removed_without_config() {
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .ldc(LdcConst::Long(42))
            .op(Opcode::Pop2)
            .op(Opcode::Return)
            .build();
        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
    }

    #[test]
    fn test_pure_arithmetic_chain_removed() {
        // (1 + 2) * 3 popped: the whole tree goes.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .op(Opcode::Iconst1)
            .op(Opcode::Iconst2)
            .op(Opcode::Iadd)
            .op(Opcode::Iconst3)
            .op(Opcode::Imul)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
        assert_eq!(check_stack_shape(&m), Ok(()));
    }

    #[test]
    fn test_impure_call_result_popped_in_place() {
        // The call stays; its unused result is popped right after it. With
        // the original pop directly after the call the two cancel.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .invoke(Opcode::Invokestatic, "p/A", "g", "()I")
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        let before = opcodes(&m);
        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(!pp.changed);
        assert_eq!(opcodes(&m), before);
    }

    #[test]
    fn test_nested_null_store_pair_scenario() {
        // iconst_0; istore 1; aconst_null; astore 2; iload 1: both pairs
        // disappear in a single store/load pass.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()I")
            .is_static(true)
            .max_locals(3)
            .op(Opcode::Iconst0)
            .var(Opcode::Istore, 1)
            .op(Opcode::AconstNull)
            .var(Opcode::Astore, 2)
            .var(Opcode::Iload, 1)
            .op(Opcode::Ireturn)
            .build();

        assert!(opt.eliminate_store_load(&mut m));
        assert_eq!(
            opcodes(&m),
            vec![Insn::Simple(Opcode::Iconst0), Insn::Simple(Opcode::Ireturn)]
        );
        assert_eq!(check_stack_shape(&m), Ok(()));
        assert!(!opt.eliminate_store_load(&mut m));
    }

    #[test]
    fn test_oversized_method_is_left_alone() {
        let mut config = OptConfig::default();
        config.max_source_value_analysis_size = 0;
        config.max_aliasing_analysis_size = 0;
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .op(Opcode::Iconst1)
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        assert!(!opt.eliminate_push_pop(&mut m, OWNER).changed);
        assert!(!opt.eliminate_stale_stores(&mut m, OWNER).changed());
        assert_eq!(m.insns.len(), 3);
    }

    #[test]
    fn test_callsite_deregistered_when_call_removed() {
        // A side-effect-free call removed by the push/pop pass must leave
        // the call graph.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let m = MethodBuilder::new("f", "()V")
            .is_static(true)
            .op(Opcode::Iconst1)
            .invoke(
                Opcode::Invokestatic,
                "scala/runtime/BoxesRunTime",
                "boxToInteger",
                "(I)Ljava/lang/Integer;",
            )
            .op(Opcode::Pop)
            .op(Opcode::Return)
            .build();
        let call = m
            .insns
            .iter()
            .find(|(_, i)| matches!(i, Insn::MethodCall { .. }))
            .map(|(id, _)| id)
            .unwrap();
        let key = MethodRef::new(OWNER, "f", "()V");
        cg.add_callsite(
            &key,
            Callsite {
                insn: call,
                callee: MethodRef::new("scala/runtime/BoxesRunTime", "boxToInteger", ""),
            },
        );

        let mut m = m;
        let pp = opt.eliminate_push_pop(&mut m, OWNER);
        assert!(pp.changed);
        assert_eq!(opcodes(&m), vec![Insn::Simple(Opcode::Return)]);
        assert!(cg.callsites(&key).is_empty());
    }

    #[test]
    fn test_instruction_count_monotone_modulo_inserted_pops() {
        // Every pass may only shrink the method, except for the bounded
        // pops/casts/null-checks it inserts itself.
        let config = OptConfig::default();
        let cg = CallGraph::new();
        let host = NoopHost;
        let opt = LocalOptimizer::new(&config, &cg, &host);

        let mut m = class_tag_new_array_method();
        let before = m.insns.len();
        opt.eliminate_stale_stores(&mut m, OWNER);
        // The rewrite replaces one call and adds one pop.
        assert!(m.insns.len() <= before + 1);
    }
}
