//! # RasterFX Core
//!
//! GPU filter engine for 2D raster surfaces: a fixed catalogue of effects
//! (blur, invert, threshold, erode, dilate, posterize, gray, opaque) plus
//! caller-supplied programs, rendered offscreen and composited back onto
//! the host surface.
//!
//! ```no_run
//! use rasterfx_core::{Canvas, EngineConfig, FilterEngine, FilterOperation};
//!
//! let mut canvas = Canvas::new(320, 240, 1.0);
//! let mut engine = FilterEngine::gpu(&EngineConfig::default(), &canvas);
//! if engine.set_operation(FilterOperation::Blur, 4.0, None).is_ok() {
//!     let _ = engine.apply_filter(&mut canvas);
//! }
//! ```

// ============================================================================
// Foundation
// ============================================================================
pub mod config;
pub mod error;
pub mod operation;
pub mod surface;

// ============================================================================
// Rendering
// ============================================================================
pub mod backend;
pub mod geometry;
pub mod shaders;

// ============================================================================
// Filter Pipeline
// ============================================================================
pub mod engine;
pub mod executor;
pub mod program_cache;
pub mod snapshot;

// ============================================================================
// Re-exports
// ============================================================================
pub use backend::software::{SoftwareBackend, SoftwareProgram};
pub use backend::wgpu_backend::{WgpuBackend, WgpuProgram};
pub use backend::{BoundProgram, RenderBackend, Uniform, UniformBlock};
pub use config::{EngineConfig, PowerPreference, SampleFilter, SamplerSettings};
pub use engine::{ApplyReport, EngineStats, FilterEngine, FilterState};
pub use error::{FilterError, FilterResult};
pub use operation::{FilterOperation, PassPlan};
pub use shaders::{ProgramSource, ShaderCatalogue};
pub use surface::{Canvas, HostSurface};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
