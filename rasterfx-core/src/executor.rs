//! # Pass Executor
//!
//! Runs one draw of the full-screen quad: bind the program, set the
//! standard uniforms plus any per-pass overrides, draw, unbind.

use crate::backend::{BoundProgram, RenderBackend, Uniform, IDENTITY};
use crate::error::{FilterError, FilterResult};
use crate::operation::PassDescriptor;
use crate::surface::HostSurface;

/// Host measurements the uniforms are derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
    /// Logical size
    pub width: u32,
    pub height: u32,
    pub pixel_density: f32,
    /// Size of the host's pixel store, which the offscreen target matches
    pub physical: (u32, u32),
}

impl FrameMetrics {
    pub fn of<H: HostSurface + ?Sized>(host: &H) -> Self {
        Self {
            width: host.width(),
            height: host.height(),
            pixel_density: host.pixel_density(),
            physical: host.pixels().dimensions(),
        }
    }

    /// Size of one physical pixel in texture coordinates
    pub fn texel_size(&self) -> [f32; 2] {
        [
            1.0 / self.physical.0 as f32,
            1.0 / self.physical.1 as f32,
        ]
    }

    pub fn canvas_size(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }

    /// Logical rectangle that covers every stored pixel. Differs from the
    /// logical size when the store is not a whole multiple of the density.
    pub fn composite_extent(&self) -> [f32; 2] {
        let density = if self.pixel_density.is_finite() && self.pixel_density > 0.0 {
            self.pixel_density
        } else {
            1.0
        };
        [
            self.physical.0 as f32 / density,
            self.physical.1 as f32 / density,
        ]
    }
}

/// The uniform set every pass receives
pub fn standard_uniforms(metrics: &FrameMetrics, parameter: f32) -> Vec<Uniform> {
    vec![
        Uniform::ModelView(IDENTITY),
        Uniform::Projection(IDENTITY),
        Uniform::TexelSize(metrics.texel_size()),
        Uniform::CanvasSize(metrics.canvas_size()),
        Uniform::Radius(parameter.max(1.0)),
        Uniform::FilterParameter(parameter),
    ]
}

pub struct PassExecutor;

impl PassExecutor {
    /// Draw one pass into the backend's offscreen target.
    ///
    /// With no program the draw is skipped and `ShaderUnresolved` returned.
    pub fn run<B: RenderBackend>(
        backend: &mut B,
        program: Option<&B::Program>,
        geometry: &B::Geometry,
        texture: &B::Texture,
        metrics: &FrameMetrics,
        parameter: f32,
        pass: &PassDescriptor,
    ) -> FilterResult<()> {
        let Some(program) = program else {
            let err = FilterError::ShaderUnresolved;
            tracing::error!("{}", err);
            return Err(err);
        };

        let mut bound = BoundProgram::bind(backend, program);
        bound.set_uniforms(&standard_uniforms(metrics, parameter));
        if let Some(direction) = pass.direction {
            bound.set_uniform(Uniform::Direction(direction));
        }
        bound.draw(geometry, texture)
    }
}
