//! Recognizers for library intrinsics and the side-effect oracles.
//!
//! The side-effect-free sets are closed-world knowledge about the platform
//! library: calls and constructors here neither throw, nor perform I/O, nor
//! mutate reachable state (beyond their arguments), so an unused result
//! makes the whole call removable.

use crate::analysis::prodcons::{ProdConsAnalysis, Producer};
use crate::insn::{Insn, InsnId, InsnList, LdcConst, MethodHandle};
use crate::opcodes::Opcode;

const BOXES_RUN_TIME: &str = "scala/runtime/BoxesRunTime";
const CLASS_TAG: &str = "scala/reflect/ClassTag";
const CLASS_TAG_MODULE: &str = "scala/reflect/ClassTag$";
const SCALA_RUN_TIME_MODULE: &str = "scala/runtime/ScalaRunTime$";
const BOXED_UNIT: &str = "scala/runtime/BoxedUnit";
const LAMBDA_META_FACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// True for calls known to be free of observable effects (boxing helpers,
/// `valueOf` caches, `ClassTag.apply`).
pub fn is_side_effect_free_call(insn: &Insn) -> bool {
    let Insn::MethodCall {
        owner, name, desc, ..
    } = insn
    else {
        return false;
    };
    match (owner.as_str(), name.as_str()) {
        (BOXES_RUN_TIME, "boxToBoolean") => desc == "(Z)Ljava/lang/Boolean;",
        (BOXES_RUN_TIME, "boxToCharacter") => desc == "(C)Ljava/lang/Character;",
        (BOXES_RUN_TIME, "boxToByte") => desc == "(B)Ljava/lang/Byte;",
        (BOXES_RUN_TIME, "boxToShort") => desc == "(S)Ljava/lang/Short;",
        (BOXES_RUN_TIME, "boxToInteger") => desc == "(I)Ljava/lang/Integer;",
        (BOXES_RUN_TIME, "boxToLong") => desc == "(J)Ljava/lang/Long;",
        (BOXES_RUN_TIME, "boxToFloat") => desc == "(F)Ljava/lang/Float;",
        (BOXES_RUN_TIME, "boxToDouble") => desc == "(D)Ljava/lang/Double;",
        ("java/lang/Boolean", "valueOf") => desc == "(Z)Ljava/lang/Boolean;",
        ("java/lang/Character", "valueOf") => desc == "(C)Ljava/lang/Character;",
        ("java/lang/Byte", "valueOf") => desc == "(B)Ljava/lang/Byte;",
        ("java/lang/Short", "valueOf") => desc == "(S)Ljava/lang/Short;",
        ("java/lang/Integer", "valueOf") => desc == "(I)Ljava/lang/Integer;",
        ("java/lang/Long", "valueOf") => desc == "(J)Ljava/lang/Long;",
        ("java/lang/Float", "valueOf") => desc == "(F)Ljava/lang/Float;",
        ("java/lang/Double", "valueOf") => desc == "(D)Ljava/lang/Double;",
        (CLASS_TAG | CLASS_TAG_MODULE, "apply") => {
            desc == "(Ljava/lang/Class;)Lscala/reflect/ClassTag;"
        }
        _ => false,
    }
}

fn has_side_effect_free_constructor(class: &str, desc: &str) -> bool {
    match class {
        "java/lang/Object" => desc == "()V",
        "java/lang/Boolean" => desc == "(Z)V",
        "java/lang/Character" => desc == "(C)V",
        "java/lang/Byte" => desc == "(B)V",
        "java/lang/Short" => desc == "(S)V",
        "java/lang/Integer" => desc == "(I)V",
        "java/lang/Long" => desc == "(J)V",
        "java/lang/Float" => desc == "(F)V",
        "java/lang/Double" => desc == "(D)V",
        "java/lang/String" | "java/lang/StringBuilder" | "java/lang/StringBuffer" => {
            matches!(desc, "()V" | "(Ljava/lang/String;)V")
        }
        _ => false,
    }
}

/// True for `invokespecial <init>` calls of constructors on the
/// side-effect-free list.
pub fn is_side_effect_free_constructor_call(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::MethodCall {
            op: Opcode::Invokespecial,
            owner,
            name,
            desc,
            ..
        } if name == "<init>" && has_side_effect_free_constructor(owner, desc)
    )
}

/// True for a `new T` whose class has a constructor on the side-effect-free
/// list, so the allocation may go once its constructor call goes.
pub fn is_new_for_side_effect_free_constructor(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Type {
            op: Opcode::New,
            class,
        } if matches!(
            class.as_str(),
            "java/lang/Object"
                | "java/lang/Boolean"
                | "java/lang/Character"
                | "java/lang/Byte"
                | "java/lang/Short"
                | "java/lang/Integer"
                | "java/lang/Long"
                | "java/lang/Float"
                | "java/lang/Double"
                | "java/lang/String"
                | "java/lang/StringBuilder"
                | "java/lang/StringBuffer"
        )
    )
}

/// If `insn` is a `BoxesRunTime.unboxToX` call, the internal name of the
/// boxed class, for the checkcast that replaces it.
pub fn scala_unbox_boxed_class(insn: &Insn) -> Option<&'static str> {
    let Insn::MethodCall {
        op: Opcode::Invokestatic,
        owner,
        name,
        ..
    } = insn
    else {
        return None;
    };
    if owner != BOXES_RUN_TIME {
        return None;
    }
    match name.as_str() {
        "unboxToBoolean" => Some("java/lang/Boolean"),
        "unboxToChar" => Some("java/lang/Character"),
        "unboxToByte" => Some("java/lang/Byte"),
        "unboxToShort" => Some("java/lang/Short"),
        "unboxToInt" => Some("java/lang/Integer"),
        "unboxToLong" => Some("java/lang/Long"),
        "unboxToFloat" => Some("java/lang/Float"),
        "unboxToDouble" => Some("java/lang/Double"),
        _ => None,
    }
}

/// True for the `xxxValue()` unboxing calls on the platform box classes.
/// They throw nothing but NPE on a null receiver, which the replacement
/// null-check preserves.
pub fn is_java_unbox(insn: &Insn) -> bool {
    let Insn::MethodCall {
        op: Opcode::Invokevirtual,
        owner,
        name,
        desc,
        ..
    } = insn
    else {
        return false;
    };
    matches!(
        (owner.as_str(), name.as_str(), desc.as_str()),
        ("java/lang/Boolean", "booleanValue", "()Z")
            | ("java/lang/Character", "charValue", "()C")
            | ("java/lang/Byte", "byteValue", "()B")
            | ("java/lang/Short", "shortValue", "()S")
            | ("java/lang/Integer", "intValue", "()I")
            | ("java/lang/Long", "longValue", "()J")
            | ("java/lang/Float", "floatValue", "()F")
            | ("java/lang/Double", "doubleValue", "()D")
    )
}

/// True for the `BoxedUnit.UNIT` field read, which is a pure constant.
pub fn is_boxed_unit(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Field {
            op: Opcode::Getstatic,
            owner,
            name,
            desc,
        } if owner == BOXED_UNIT && name == "UNIT" && desc == "Lscala/runtime/BoxedUnit;"
    )
}

/// If `insn` reads a module's `MODULE$` field, the module's internal name.
/// Removing such a read may skip the module's initializer, so the caller
/// checks the configured allow-list.
pub fn module_load(insn: &Insn) -> Option<&str> {
    let Insn::Field {
        op: Opcode::Getstatic,
        owner,
        name,
        desc,
    } = insn
    else {
        return None;
    };
    if name == "MODULE$"
        && desc.len() == owner.len() + 2
        && desc.starts_with('L')
        && desc.ends_with(';')
        && &desc[1..desc.len() - 1] == owner
    {
        Some(owner)
    } else {
        None
    }
}

/// True for `ScalaRunTime.array_apply` / `array_update`: the generic array
/// accessors whose type dispatch collapses once the array's element type is
/// statically known, making them profitable to inline after the class-tag
/// `newArray` rewrite.
pub fn is_runtime_array_load_or_update(insn: &Insn) -> bool {
    let Insn::MethodCall {
        owner, name, desc, ..
    } = insn
    else {
        return false;
    };
    owner == SCALA_RUN_TIME_MODULE
        && matches!(
            (name.as_str(), desc.as_str()),
            ("array_apply", "(Ljava/lang/Object;I)Ljava/lang/Object;")
                | (
                    "array_update",
                    "(Ljava/lang/Object;ILjava/lang/Object;)V"
                )
        )
}

/// If `insn` is a `LambdaMetafactory` invokedynamic, the implementation
/// method handle from its bootstrap arguments.
pub fn lambda_meta_factory_call(insn: &Insn) -> Option<&MethodHandle> {
    let Insn::InvokeDynamic { bsm, bsm_args, .. } = insn else {
        return None;
    };
    if bsm.owner != LAMBDA_META_FACTORY
        || !matches!(bsm.name.as_str(), "metafactory" | "altMetafactory")
    {
        return None;
    }
    match bsm_args.get(1) {
        Some(LdcConst::MethodHandle(h)) => Some(h),
        _ => None,
    }
}

/// Matches `ClassTag(classOf[X]).newArray(n)`: an `invokevirtual
/// ClassTag.newArray` whose receiver is produced directly by a
/// `ClassTag.apply` of a class literal. Returns the receiver-producing
/// instruction and the element class.
///
/// The receiver must reach the call untouched (its direct producer is its
/// initial producer) and the call must be the receiver's only consumer;
/// otherwise popping the tag right after its producer would disturb other
/// uses, and the rewrite is skipped.
pub fn class_tag_new_array_arg(
    insns: &InsnList,
    prodcons: &ProdConsAnalysis,
    call: InsnId,
) -> Option<(InsnId, String)> {
    match insns.get(call)? {
        Insn::MethodCall {
            op: Opcode::Invokevirtual,
            owner,
            name,
            desc,
            ..
        } if owner == CLASS_TAG && name == "newArray" && desc == "(I)Ljava/lang/Object;" => {}
        _ => return None,
    }

    let frame = prodcons.frame_at(call)?;
    if frame.stack_size() < 2 {
        return None;
    }
    // Stack at the call: [tag, length]; the receiver sits below the one
    // argument.
    let receiver_slot = frame.stack_top().checked_sub(1)?;

    let direct = prodcons.producers_for_value_at(call, receiver_slot);
    let [Producer::Insn(tag_producer)] = direct.as_slice() else {
        return None;
    };
    let tag_producer = *tag_producer;
    let initial = prodcons.initial_producers_for_value_at(call, receiver_slot);
    if initial.as_slice() != direct.as_slice() {
        return None;
    }
    let consumers = prodcons.consumers_of_value_at(call, receiver_slot);
    if consumers.len() != 1 || !consumers.contains(&call) {
        return None;
    }

    // The receiver producer must be ClassTag.apply of a class literal.
    match insns.get(tag_producer)? {
        Insn::MethodCall {
            op: Opcode::Invokestatic | Opcode::Invokevirtual,
            owner,
            name,
            desc,
            ..
        } if (owner == CLASS_TAG || owner == CLASS_TAG_MODULE)
            && name == "apply"
            && desc == "(Ljava/lang/Class;)Lscala/reflect/ClassTag;" => {}
        _ => return None,
    }

    let apply_frame = prodcons.frame_at(tag_producer)?;
    if apply_frame.stack_size() == 0 {
        return None;
    }
    let class_arg_slot = apply_frame.stack_top();
    let arg_producers = prodcons.initial_producers_for_value_at(tag_producer, class_arg_slot);
    let [Producer::Insn(ldc)] = arg_producers.as_slice() else {
        return None;
    };
    match insns.get(*ldc)? {
        Insn::Ldc(LdcConst::Class(c)) => Some((tag_producer, c.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(op: Opcode, owner: &str, name: &str, desc: &str) -> Insn {
        Insn::MethodCall {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf: false,
        }
    }

    #[test]
    fn test_side_effect_free_calls() {
        assert!(is_side_effect_free_call(&call(
            Opcode::Invokestatic,
            "scala/runtime/BoxesRunTime",
            "boxToInteger",
            "(I)Ljava/lang/Integer;"
        )));
        assert!(is_side_effect_free_call(&call(
            Opcode::Invokestatic,
            "java/lang/Long",
            "valueOf",
            "(J)Ljava/lang/Long;"
        )));
        assert!(!is_side_effect_free_call(&call(
            Opcode::Invokevirtual,
            "java/io/PrintStream",
            "println",
            "(I)V"
        )));
    }

    #[test]
    fn test_constructor_oracle() {
        let ctor = call(
            Opcode::Invokespecial,
            "java/lang/Integer",
            "<init>",
            "(I)V",
        );
        assert!(is_side_effect_free_constructor_call(&ctor));
        let arbitrary = call(Opcode::Invokespecial, "java/io/File", "<init>", "(Ljava/lang/String;)V");
        assert!(!is_side_effect_free_constructor_call(&arbitrary));
        assert!(is_new_for_side_effect_free_constructor(&Insn::Type {
            op: Opcode::New,
            class: "java/lang/StringBuilder".into(),
        }));
    }

    #[test]
    fn test_unbox_recognizers() {
        let scala = call(
            Opcode::Invokestatic,
            "scala/runtime/BoxesRunTime",
            "unboxToInt",
            "(Ljava/lang/Object;)I",
        );
        assert_eq!(scala_unbox_boxed_class(&scala), Some("java/lang/Integer"));
        let java = call(Opcode::Invokevirtual, "java/lang/Integer", "intValue", "()I");
        assert!(is_java_unbox(&java));
        assert!(!is_java_unbox(&scala));
    }

    #[test]
    fn test_module_load() {
        let m = Insn::Field {
            op: Opcode::Getstatic,
            owner: "scala/Predef$".into(),
            name: "MODULE$".into(),
            desc: "Lscala/Predef$;".into(),
        };
        assert_eq!(module_load(&m), Some("scala/Predef$"));
        let not_module = Insn::Field {
            op: Opcode::Getstatic,
            owner: "A".into(),
            name: "x".into(),
            desc: "I".into(),
        };
        assert_eq!(module_load(&not_module), None);
    }

    #[test]
    fn test_boxed_unit() {
        let unit = Insn::Field {
            op: Opcode::Getstatic,
            owner: "scala/runtime/BoxedUnit".into(),
            name: "UNIT".into(),
            desc: "Lscala/runtime/BoxedUnit;".into(),
        };
        assert!(is_boxed_unit(&unit));
    }

    #[test]
    fn test_lambda_meta_factory_match() {
        let bsm = MethodHandle {
            kind: crate::insn::HandleKind::InvokeStatic,
            owner: "java/lang/invoke/LambdaMetafactory".into(),
            name: "metafactory".into(),
            desc: "(...)Ljava/lang/invoke/CallSite;".into(),
            itf: false,
        };
        let impl_handle = MethodHandle {
            kind: crate::insn::HandleKind::InvokeStatic,
            owner: "A".into(),
            name: "lambda$1".into(),
            desc: "(I)I".into(),
            itf: false,
        };
        let indy = Insn::InvokeDynamic {
            name: "apply".into(),
            desc: "()Lscala/Function1;".into(),
            bsm,
            bsm_args: vec![
                LdcConst::MethodType("(Ljava/lang/Object;)Ljava/lang/Object;".into()),
                LdcConst::MethodHandle(impl_handle),
                LdcConst::MethodType("(I)I".into()),
            ],
        };
        let h = lambda_meta_factory_call(&indy).expect("should match");
        assert_eq!(h.name, "lambda$1");
    }
}
