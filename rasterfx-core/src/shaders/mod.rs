//! # Shader Catalogue
//!
//! One vertex stage shared by every operation and one fragment stage per
//! [`FilterOperation`]. Fragment stages are written against the prelude,
//! which declares the uniform block, `tex0` and a couple of helpers.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::operation::FilterOperation;

pub const VERTEX_SHADER: &str = include_str!("default.vert.wgsl");

/// Uniform block, texture bindings and helpers available to fragment stages
pub const FRAGMENT_PRELUDE: &str = include_str!("prelude.wgsl");

pub const VERTEX_ENTRY_POINT: &str = "vs_main";
pub const FRAGMENT_ENTRY_POINT: &str = "fs_main";

const BLUR_FRAG: &str = include_str!("blur.frag.wgsl");
const INVERT_FRAG: &str = include_str!("invert.frag.wgsl");
const THRESHOLD_FRAG: &str = include_str!("threshold.frag.wgsl");
const ERODE_FRAG: &str = include_str!("erode.frag.wgsl");
const GRAY_FRAG: &str = include_str!("gray.frag.wgsl");
const DILATE_FRAG: &str = include_str!("dilate.frag.wgsl");
const POSTERIZE_FRAG: &str = include_str!("posterize.frag.wgsl");
const OPAQUE_FRAG: &str = include_str!("opaque.frag.wgsl");

/// Source pair a program is compiled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: Cow<'static, str>,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl ProgramSource {
    /// Complete fragment module from a body written against the prelude
    pub fn with_prelude(label: impl Into<Cow<'static, str>>, fragment_body: &str) -> Self {
        Self {
            label: label.into(),
            vertex: Cow::Borrowed(VERTEX_SHADER),
            fragment: Cow::Owned(format!("{}\n{}", FRAGMENT_PRELUDE, fragment_body)),
        }
    }

    /// Fragment module used as-is; it must declare its own bindings
    pub fn standalone(label: impl Into<Cow<'static, str>>, fragment: impl Into<Cow<'static, str>>) -> Self {
        Self {
            label: label.into(),
            vertex: Cow::Borrowed(VERTEX_SHADER),
            fragment: fragment.into(),
        }
    }
}

fn fragment_body(operation: FilterOperation) -> &'static str {
    match operation {
        FilterOperation::Blur => BLUR_FRAG,
        FilterOperation::Invert => INVERT_FRAG,
        FilterOperation::Threshold => THRESHOLD_FRAG,
        FilterOperation::Erode => ERODE_FRAG,
        FilterOperation::Gray => GRAY_FRAG,
        FilterOperation::Dilate => DILATE_FRAG,
        FilterOperation::Posterize => POSTERIZE_FRAG,
        FilterOperation::Opaque => OPAQUE_FRAG,
    }
}

/// Registered source pairs, keyed by operation
#[derive(Debug, Clone)]
pub struct ShaderCatalogue {
    sources: BTreeMap<FilterOperation, ProgramSource>,
}

impl ShaderCatalogue {
    /// All eight bundled operations
    pub fn builtin() -> Self {
        let sources = FilterOperation::ALL
            .iter()
            .map(|&op| (op, ProgramSource::with_prelude(op.name(), fragment_body(op))))
            .collect();
        Self { sources }
    }

    pub fn empty() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Drop one operation from the catalogue
    pub fn without(mut self, operation: FilterOperation) -> Self {
        self.sources.remove(&operation);
        self
    }

    pub fn get(&self, operation: FilterOperation) -> Option<&ProgramSource> {
        self.sources.get(&operation)
    }

    pub fn contains(&self, operation: FilterOperation) -> bool {
        self.sources.contains_key(&operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = FilterOperation> + '_ {
        self.sources.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for ShaderCatalogue {
    fn default() -> Self {
        Self::builtin()
    }
}
