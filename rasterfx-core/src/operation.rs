//! # Filter Operations
//!
//! The fixed catalogue of effects and the pass plan each one expands to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;

/// One of the built-in filter effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperation {
    Blur,
    Invert,
    Threshold,
    Erode,
    Gray,
    Dilate,
    Posterize,
    Opaque,
}

impl FilterOperation {
    pub const ALL: [FilterOperation; 8] = [
        FilterOperation::Blur,
        FilterOperation::Invert,
        FilterOperation::Threshold,
        FilterOperation::Erode,
        FilterOperation::Gray,
        FilterOperation::Dilate,
        FilterOperation::Posterize,
        FilterOperation::Opaque,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterOperation::Blur => "blur",
            FilterOperation::Invert => "invert",
            FilterOperation::Threshold => "threshold",
            FilterOperation::Erode => "erode",
            FilterOperation::Gray => "gray",
            FilterOperation::Dilate => "dilate",
            FilterOperation::Posterize => "posterize",
            FilterOperation::Opaque => "opaque",
        }
    }

    /// Parameter used when the caller does not pick one
    pub fn default_parameter(&self) -> f32 {
        match self {
            FilterOperation::Blur => 4.0,
            FilterOperation::Threshold => 0.5,
            FilterOperation::Posterize => 4.0,
            _ => 1.0,
        }
    }

    /// Separable operations run as a horizontal then a vertical pass
    pub fn is_separable(&self) -> bool {
        matches!(self, FilterOperation::Blur)
    }
}

impl fmt::Display for FilterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterOperation {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FilterOperation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| FilterError::UnsupportedOperation(s.to_string()))
    }
}

// ============================================================================
// Pass Plan
// ============================================================================

pub const HORIZONTAL: [f32; 2] = [1.0, 0.0];
pub const VERTICAL: [f32; 2] = [0.0, 1.0];

/// Per-pass overrides applied on top of the standard uniform set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassDescriptor {
    /// Sampling direction for separable passes; left untouched when `None`
    pub direction: Option<[f32; 2]>,
}

/// Ordered passes for one `apply_filter` call
#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan {
    passes: Vec<PassDescriptor>,
}

impl PassPlan {
    /// Build the plan for an operation. A custom program always runs once,
    /// even when it replaces a separable operation.
    pub fn for_operation(operation: Option<FilterOperation>, custom: bool) -> Self {
        let separable = !custom && operation.map_or(false, |op| op.is_separable());

        let passes = if separable {
            vec![
                PassDescriptor { direction: Some(HORIZONTAL) },
                PassDescriptor { direction: Some(VERTICAL) },
            ]
        } else {
            vec![PassDescriptor { direction: None }]
        };

        Self { passes }
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}
