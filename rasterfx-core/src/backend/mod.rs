//! # Render Backends
//!
//! The secondary rendering context the filter engine draws with.
//!
//! ```text
//! compile_program ─► bind_program ─► set_uniform* ─► draw_quad ─► unbind_program
//!                                                         │
//!                                             offscreen target ─► read_target
//! ```
//!
//! [`WgpuBackend`](wgpu_backend::WgpuBackend) renders on the GPU;
//! [`SoftwareBackend`](software::SoftwareBackend) rasterises the same
//! programs on the CPU and records every draw.

use image::RgbaImage;
use std::fmt;

use crate::error::FilterResult;
use crate::geometry::QuadGeometry;
use crate::shaders::ProgramSource;

pub mod reference;
pub mod software;
pub mod wgpu_backend;

// ============================================================================
// Uniforms
// ============================================================================

/// Column-major 4x4 matrix
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// A value a filter program reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    ModelView(Mat4),
    Projection(Mat4),
    /// Size of one physical pixel in texture space
    TexelSize([f32; 2]),
    /// Logical host size
    CanvasSize([f32; 2]),
    Direction([f32; 2]),
    /// Filter parameter clamped to at least one
    Radius(f32),
    /// Filter parameter as given
    FilterParameter(f32),
}

/// Per-program uniform storage. Layout matches `FilterUniforms` in the
/// WGSL prelude (160 bytes, no padding).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UniformBlock {
    pub model_view: Mat4,
    pub projection: Mat4,
    pub texel_size: [f32; 2],
    pub canvas_size: [f32; 2],
    pub direction: [f32; 2],
    pub radius: f32,
    pub filter_parameter: f32,
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            model_view: IDENTITY,
            projection: IDENTITY,
            texel_size: [0.0; 2],
            canvas_size: [0.0; 2],
            direction: [0.0; 2],
            radius: 1.0,
            filter_parameter: 1.0,
        }
    }
}

impl UniformBlock {
    pub fn apply(&mut self, uniform: Uniform) {
        match uniform {
            Uniform::ModelView(m) => self.model_view = m,
            Uniform::Projection(m) => self.projection = m,
            Uniform::TexelSize(v) => self.texel_size = v,
            Uniform::CanvasSize(v) => self.canvas_size = v,
            Uniform::Direction(v) => self.direction = v,
            Uniform::Radius(r) => self.radius = r,
            Uniform::FilterParameter(p) => self.filter_parameter = p,
        }
    }

    /// `projection * model_view * (x, y, 0, 1)`, returning clip-space x, y
    pub fn transform(&self, position: [f32; 2]) -> [f32; 2] {
        let v = [position[0], position[1], 0.0, 1.0];
        let mv = mul_vec(&self.model_view, v);
        let clip = mul_vec(&self.projection, mv);
        let w = if clip[3].abs() > f32::EPSILON { clip[3] } else { 1.0 };
        [clip[0] / w, clip[1] / w]
    }
}

fn mul_vec(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (col, &component) in m.iter().zip(v.iter()) {
        for row in 0..4 {
            out[row] += col[row] * component;
        }
    }
    out
}

// ============================================================================
// Backend Trait
// ============================================================================

pub trait RenderBackend {
    /// Compiled program handle; clones refer to the same program
    type Program: Clone + fmt::Debug;
    type Geometry;
    type Texture;

    fn name(&self) -> &'static str;

    fn compile_program(&mut self, source: &ProgramSource) -> FilterResult<Self::Program>;

    fn upload_geometry(&mut self, quad: &QuadGeometry) -> Self::Geometry;

    /// Sampleable texture holding a copy of `pixels` (RGBA8, row-major)
    fn create_texture(&mut self, pixels: &RgbaImage) -> Self::Texture;

    /// Make the offscreen target `width` x `height`, reallocating only when
    /// the size changes. Returns true when a new target was allocated.
    fn ensure_target(&mut self, width: u32, height: u32) -> bool;

    fn bind_program(&mut self, program: &Self::Program);

    /// Store a uniform on the bound program
    fn set_uniform(&mut self, uniform: Uniform);

    /// Draw the quad as a 4-vertex triangle strip into the offscreen target
    fn draw_quad(&mut self, geometry: &Self::Geometry, texture: &Self::Texture) -> FilterResult<()>;

    fn unbind_program(&mut self);

    fn read_target(&mut self) -> FilterResult<RgbaImage>;
}

/// A program bound for the lifetime of the guard. Holding `&mut` to the
/// backend rules out binding a second program; dropping unbinds.
pub struct BoundProgram<'a, B: RenderBackend> {
    backend: &'a mut B,
}

impl<'a, B: RenderBackend> BoundProgram<'a, B> {
    pub fn bind(backend: &'a mut B, program: &B::Program) -> Self {
        backend.bind_program(program);
        Self { backend }
    }

    pub fn set_uniform(&mut self, uniform: Uniform) {
        self.backend.set_uniform(uniform);
    }

    pub fn set_uniforms(&mut self, uniforms: &[Uniform]) {
        for uniform in uniforms {
            self.backend.set_uniform(*uniform);
        }
    }

    pub fn draw(&mut self, geometry: &B::Geometry, texture: &B::Texture) -> FilterResult<()> {
        self.backend.draw_quad(geometry, texture)
    }
}

impl<B: RenderBackend> Drop for BoundProgram<'_, B> {
    fn drop(&mut self) {
        self.backend.unbind_program();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::shaders::ShaderCatalogue;
    use crate::operation::FilterOperation;

    #[test]
    fn uniform_block_is_160_bytes() {
        assert_eq!(std::mem::size_of::<UniformBlock>(), 160);
        assert_eq!(bytemuck::bytes_of(&UniformBlock::default()).len(), 160);
    }

    #[test]
    fn apply_sets_the_named_field() {
        let mut block = UniformBlock::default();
        block.apply(Uniform::Direction([0.0, 1.0]));
        block.apply(Uniform::Radius(3.0));
        block.apply(Uniform::TexelSize([0.01, 0.02]));
        assert_eq!(block.direction, [0.0, 1.0]);
        assert_eq!(block.radius, 3.0);
        assert_eq!(block.texel_size, [0.01, 0.02]);
        assert_eq!(block.model_view, IDENTITY);
    }

    #[test]
    fn identity_transform_keeps_positions() {
        let block = UniformBlock::default();
        assert_eq!(block.transform([-1.0, 1.0]), [-1.0, 1.0]);
    }

    #[test]
    fn projection_scale_is_applied() {
        let mut block = UniformBlock::default();
        let mut half = IDENTITY;
        half[0][0] = 0.5;
        half[1][1] = 0.5;
        block.apply(Uniform::Projection(half));
        assert_eq!(block.transform([1.0, -1.0]), [0.5, -0.5]);
    }

    #[test]
    fn guard_unbinds_on_drop() {
        let mut backend = SoftwareBackend::default();
        let source = ShaderCatalogue::builtin().get(FilterOperation::Gray).unwrap().clone();
        let program = backend.compile_program(&source).unwrap();
        {
            let _bound = BoundProgram::bind(&mut backend, &program);
        }
        assert!(backend.bound_program().is_none());
    }
}
