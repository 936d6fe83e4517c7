//! # Program Cache
//!
//! Compiles each catalogue program the first time its operation is asked
//! for and hands out the same handle afterwards. Caller-supplied programs
//! pass straight through and never enter the cache.

use std::collections::HashMap;

use crate::backend::RenderBackend;
use crate::error::{FilterError, FilterResult};
use crate::operation::FilterOperation;
use crate::shaders::ShaderCatalogue;

/// Which program a filter should run
#[derive(Debug, Clone)]
pub enum ProgramChoice<P> {
    Catalogue(FilterOperation),
    /// Caller-owned program, used as-is
    Custom(P),
}

pub struct ProgramCache<P> {
    programs: HashMap<FilterOperation, P>,
    compilations: usize,
}

impl<P: Clone> ProgramCache<P> {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            compilations: 0,
        }
    }

    /// Resolve a choice to a program handle, compiling on first use
    pub fn resolve<B>(
        &mut self,
        backend: &mut B,
        catalogue: &ShaderCatalogue,
        choice: &ProgramChoice<P>,
    ) -> FilterResult<P>
    where
        B: RenderBackend<Program = P>,
    {
        let operation = match choice {
            ProgramChoice::Custom(program) => return Ok(program.clone()),
            ProgramChoice::Catalogue(operation) => *operation,
        };

        if let Some(program) = self.programs.get(&operation) {
            tracing::debug!(%operation, "Program cache hit");
            return Ok(program.clone());
        }

        let Some(source) = catalogue.get(operation) else {
            let err = FilterError::UnsupportedOperation(operation.to_string());
            tracing::error!("{}", err);
            return Err(err);
        };

        let program = backend.compile_program(source).inspect_err(|e| {
            tracing::error!(%operation, "{}", e);
        })?;
        self.compilations += 1;
        self.programs.insert(operation, program.clone());
        tracing::debug!(%operation, backend = backend.name(), "Program compiled and cached");

        Ok(program)
    }

    pub fn contains(&self, operation: FilterOperation) -> bool {
        self.programs.contains_key(&operation)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Programs compiled since the cache was created
    pub fn compilations(&self) -> usize {
        self.compilations
    }
}

impl<P: Clone> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
