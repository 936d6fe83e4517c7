//! Full-screen quad shared by every filter pass.

use crate::backend::RenderBackend;

/// Triangle-strip corners in clip space
pub const QUAD_POSITIONS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

/// Texture coordinates for [`QUAD_POSITIONS`]. V is flipped so that raster
/// row 0 (top of the host image) lands at the top of the clip-space quad.
pub const QUAD_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

pub const QUAD_VERTEX_COUNT: u32 = 4;

/// Vertex data for the quad, one buffer per attribute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadGeometry {
    pub positions: [[f32; 2]; 4],
    pub tex_coords: [[f32; 2]; 4],
}

impl QuadGeometry {
    pub const FULL_SCREEN: QuadGeometry = QuadGeometry {
        positions: QUAD_POSITIONS,
        tex_coords: QUAD_TEX_COORDS,
    };

    pub fn vertex_count(&self) -> u32 {
        QUAD_VERTEX_COUNT
    }
}

/// Owns the uploaded quad. Construct once, read from every pass.
pub struct GeometryProvider<G> {
    geometry: G,
    uploads: usize,
}

impl<G> GeometryProvider<G> {
    pub fn new<B: RenderBackend<Geometry = G>>(backend: &mut B) -> Self {
        let geometry = backend.upload_geometry(&QuadGeometry::FULL_SCREEN);
        tracing::debug!(backend = backend.name(), "Uploaded full-screen quad");
        Self { geometry, uploads: 1 }
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Number of uploads performed; stays at one for the provider's lifetime
    pub fn uploads(&self) -> usize {
        self.uploads
    }
}
