//! Optimizer configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Flags and limits consulted by the optimization passes.
///
/// The analysis size limits bound `instruction count × (max_locals +
/// max_stack)`; a method over the limit is simply not analyzed and the
/// passes report "no change" for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptConfig {
    /// Allow removing loads of class/method-type/method-handle constants
    /// even though dropping them may skip class loading or resolution.
    pub opt_allow_skip_class_loading: bool,

    /// Module objects (internal names) whose initializer is known to be
    /// side-effect free, so an unused `MODULE$` read may be removed even
    /// though it would have triggered class initialization.
    pub modules_allow_skip_initialization: HashSet<String>,

    /// Size limit for the aliasing analysis.
    pub max_aliasing_analysis_size: usize,

    /// Size limit for the producer/consumer analysis.
    pub max_source_value_analysis_size: usize,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            opt_allow_skip_class_loading: false,
            modules_allow_skip_initialization: HashSet::new(),
            max_aliasing_analysis_size: 1 << 21,
            max_source_value_analysis_size: 1 << 22,
        }
    }
}

impl OptConfig {
    /// A configuration with every optional rewrite enabled, for tests.
    pub fn permissive() -> Self {
        Self {
            opt_allow_skip_class_loading: true,
            ..Self::default()
        }
    }
}
