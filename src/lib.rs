//! Method-local peephole optimization passes for JVM bytecode.
//!
//! This crate implements four cooperating optimization passes over the
//! instruction list of a single method in a stack-based virtual machine
//! with typed local slots, wide-vs-narrow opcodes for 32- and 64-bit
//! values, and structured exception-handler regions:
//!
//! 1. **Copy propagation**: every load of a non-parameter slot is
//!    rewritten to the preferred alias of its equivalence class.
//! 2. **Stale-store elimination**: stores whose value is never consumed
//!    become pops (reference stores are null-poisoned where GC liveness
//!    demands it), and the class-tag `newArray` intrinsic is rewritten to
//!    a direct array allocation.
//! 3. **Push/pop elimination**: "value unused" propagates backward from
//!    explicit pops through single-consumer producers, deleting pure
//!    producers and side-effect-free object constructions.
//! 4. **Store/load pair elimination**: adjacent `store s; load s` and
//!    dead `aconst_null; astore s` pairs are removed across straight-line
//!    runs.
//!
//! # Architecture
//!
//! - [`insn`] / [`opcodes`] / [`method`]: the instruction model: a tagged
//!   instruction variant, an arena-backed doubly-linked instruction list
//!   with stable identities, and the method container.
//! - [`analysis`]: the aliasing and producer/consumer dataflow analyses
//!   the passes plan against. Construction is size-gated; an oversized
//!   method is simply not optimized.
//! - [`optimizer`]: the four passes behind [`optimizer::LocalOptimizer`].
//! - [`callgraph`]: the shared callsite registry and the
//!   [`callgraph::OptimizerHost`] trait through which the passes reach the
//!   external inliner.
//! - [`intrinsics`]: recognizers for the platform intrinsics and the
//!   side-effect-free oracles.
//!
//! The passes mutate the method in place and return compact change records
//! so a driver can iterate them to a fixpoint. They hold no shared mutable
//! state besides the call graph, which is thread-safe; a driver may
//! process distinct methods in parallel.
//!
//! # Example
//!
//! ```
//! use localopt::callgraph::{CallGraph, NoopHost};
//! use localopt::config::OptConfig;
//! use localopt::method::MethodBuilder;
//! use localopt::opcodes::Opcode;
//! use localopt::optimizer::LocalOptimizer;
//!
//! // static void f() { push 1; pop; return; }
//! let mut method = MethodBuilder::new("f", "()V")
//!     .is_static(true)
//!     .op(Opcode::Iconst1)
//!     .op(Opcode::Pop)
//!     .op(Opcode::Return)
//!     .build();
//!
//! let config = OptConfig::default();
//! let call_graph = CallGraph::new();
//! let host = NoopHost;
//! let opt = LocalOptimizer::new(&config, &call_graph, &host);
//!
//! let change = opt.eliminate_push_pop(&mut method, "p/C");
//! assert!(change.changed);
//! assert_eq!(method.insns.len(), 1); // only the return remains
//! ```

pub mod analysis;
pub mod callgraph;
pub mod config;
pub mod descriptor;
pub mod insn;
pub mod intrinsics;
pub mod method;
pub mod opcodes;
pub mod optimizer;

pub use config::OptConfig;
pub use method::{Method, MethodBuilder};
pub use optimizer::LocalOptimizer;
