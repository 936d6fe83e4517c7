//! # Software Backend
//!
//! CPU rasteriser for the full-screen quad. Catalogue programs run the
//! reference kernels from [`super::reference`]; custom programs are Rust
//! closures. The most recent draws are kept as [`DrawRecord`]s, which is
//! what the engine tests are written against.

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{reference, RenderBackend, Uniform, UniformBlock};
use crate::config::{SampleFilter, SamplerSettings};
use crate::error::{FilterError, FilterResult};
use crate::geometry::QuadGeometry;
use crate::shaders::{ProgramSource, FRAGMENT_ENTRY_POINT};

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Draw records kept before the oldest is dropped
pub const DRAW_LOG_CAPACITY: usize = 64;

// ============================================================================
// Fragments & Kernels
// ============================================================================

/// Inputs available to a kernel for one output pixel
pub struct Fragment<'a> {
    pub tex_coord: [f32; 2],
    pub uniforms: &'a UniformBlock,
    texture: &'a SoftwareTexture,
    filter: SampleFilter,
}

impl Fragment<'_> {
    /// Sample `tex0` with clamp-to-edge wrapping, channels in 0..1
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        self.texture.sample(uv, self.filter)
    }
}

/// Per-pixel program body
pub trait FragmentKernel: Send + Sync {
    fn shade(&self, fragment: &Fragment<'_>) -> [f32; 4];
}

impl<F> FragmentKernel for F
where
    F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync,
{
    fn shade(&self, fragment: &Fragment<'_>) -> [f32; 4] {
        self(fragment)
    }
}

// ============================================================================
// Handles
// ============================================================================

struct ProgramState {
    id: u64,
    label: String,
    kernel: Arc<dyn FragmentKernel>,
    uniforms: Mutex<UniformBlock>,
}

#[derive(Clone)]
pub struct SoftwareProgram {
    inner: Arc<ProgramState>,
}

impl SoftwareProgram {
    fn new(label: impl Into<String>, kernel: Arc<dyn FragmentKernel>) -> Self {
        Self {
            inner: Arc::new(ProgramState {
                id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                kernel,
                uniforms: Mutex::new(UniformBlock::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current uniform values stored on the program
    pub fn uniforms(&self) -> UniformBlock {
        *self.inner.uniforms.lock()
    }
}

impl PartialEq for SoftwareProgram {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SoftwareProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareProgram")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

pub struct SoftwareGeometry {
    quad: QuadGeometry,
}

pub struct SoftwareTexture {
    image: RgbaImage,
}

impl SoftwareTexture {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let (w, h) = self.image.dimensions();
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        let p = self.image.get_pixel(x, y).0;
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }

    fn sample(&self, uv: [f32; 2], filter: SampleFilter) -> [f32; 4] {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 {
            return [0.0; 4];
        }

        match filter {
            SampleFilter::Nearest => {
                let x = (uv[0] * w as f32).floor() as i64;
                let y = (uv[1] * h as f32).floor() as i64;
                self.texel(x, y)
            }
            SampleFilter::Linear => {
                let x = uv[0] * w as f32 - 0.5;
                let y = uv[1] * h as f32 - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let a = self.texel(x0, y0);
                let b = self.texel(x0 + 1, y0);
                let c = self.texel(x0, y0 + 1);
                let d = self.texel(x0 + 1, y0 + 1);

                let mut out = [0.0f32; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * fx;
                    let bottom = c[i] + (d[i] - c[i]) * fx;
                    out[i] = top + (bottom - top) * fy;
                }
                out
            }
        }
    }
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: String,
    pub program_id: u64,
    pub uniforms: UniformBlock,
    pub vertex_count: u32,
    pub target_size: (u32, u32),
}

// ============================================================================
// Backend
// ============================================================================

pub struct SoftwareBackend {
    sampling: SamplerSettings,
    target: RgbaImage,
    bound: Option<SoftwareProgram>,
    draws: VecDeque<DrawRecord>,
    draw_count: usize,
    geometry_uploads: usize,
    compilations: usize,
    textures_created: usize,
    target_allocations: usize,
}

impl SoftwareBackend {
    pub fn new(sampling: SamplerSettings) -> Self {
        Self {
            sampling,
            target: RgbaImage::new(0, 0),
            bound: None,
            draws: VecDeque::with_capacity(DRAW_LOG_CAPACITY),
            draw_count: 0,
            geometry_uploads: 0,
            compilations: 0,
            textures_created: 0,
            target_allocations: 0,
        }
    }

    /// Caller-owned program running `kernel` for every pixel
    pub fn program_from_kernel<F>(&self, label: impl Into<String>, kernel: F) -> SoftwareProgram
    where
        F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        SoftwareProgram::new(label, Arc::new(kernel))
    }

    /// The last [`DRAW_LOG_CAPACITY`] draws, oldest first
    pub fn draws(&self) -> &VecDeque<DrawRecord> {
        &self.draws
    }

    /// Draws issued since creation, including ones no longer in the log
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn geometry_uploads(&self) -> usize {
        self.geometry_uploads
    }

    pub fn compilations(&self) -> usize {
        self.compilations
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn target_allocations(&self) -> usize {
        self.target_allocations
    }

    pub fn bound_program(&self) -> Option<&SoftwareProgram> {
        self.bound.as_ref()
    }

    fn filter_for(&self, texture: &SoftwareTexture) -> SampleFilter {
        let (tw, th) = texture.dimensions();
        let (w, h) = self.target.dimensions();
        if w >= tw && h >= th {
            self.sampling.mag_filter
        } else {
            self.sampling.min_filter
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(SamplerSettings::default())
    }
}

/// Screen-space bounds of the transformed quad and the tex coords at its
/// corners: bottom-left, bottom-right, top-left, top-right.
struct QuadFrame {
    min: [f32; 2],
    max: [f32; 2],
    corners: [[f32; 2]; 4],
}

impl QuadFrame {
    fn new(quad: &QuadGeometry, uniforms: &UniformBlock) -> Self {
        let clip: Vec<[f32; 2]> = quad.positions.iter().map(|&p| uniforms.transform(p)).collect();
        let mut min = [f32::MAX; 2];
        let mut max = [f32::MIN; 2];
        for p in &clip {
            min = [min[0].min(p[0]), min[1].min(p[1])];
            max = [max[0].max(p[0]), max[1].max(p[1])];
        }

        let mid = [(min[0] + max[0]) * 0.5, (min[1] + max[1]) * 0.5];
        let mut corners = [[0.0f32; 2]; 4];
        for (p, uv) in clip.iter().zip(quad.tex_coords.iter()) {
            let right = p[0] >= mid[0];
            let top = p[1] >= mid[1];
            let slot = (top as usize) * 2 + right as usize;
            corners[slot] = *uv;
        }

        Self { min, max, corners }
    }

    /// Interpolated tex coord at a clip-space point, or `None` outside the quad
    fn tex_coord(&self, clip: [f32; 2]) -> Option<[f32; 2]> {
        let span = [self.max[0] - self.min[0], self.max[1] - self.min[1]];
        if span[0] <= 0.0 || span[1] <= 0.0 {
            return None;
        }
        let s = (clip[0] - self.min[0]) / span[0];
        let t = (clip[1] - self.min[1]) / span[1];
        if !(0.0..=1.0).contains(&s) || !(0.0..=1.0).contains(&t) {
            return None;
        }

        let [bl, br, tl, tr] = self.corners;
        let mut uv = [0.0f32; 2];
        for i in 0..2 {
            let bottom = bl[i] + (br[i] - bl[i]) * s;
            let top = tl[i] + (tr[i] - tl[i]) * s;
            uv[i] = bottom + (top - bottom) * t;
        }
        Some(uv)
    }
}

fn to_rgba8(color: [f32; 4]) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for (o, c) in out.iter_mut().zip(color.iter()) {
        *o = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    Rgba(out)
}

impl RenderBackend for SoftwareBackend {
    type Program = SoftwareProgram;
    type Geometry = SoftwareGeometry;
    type Texture = SoftwareTexture;

    fn name(&self) -> &'static str {
        "software"
    }

    fn compile_program(&mut self, source: &ProgramSource) -> FilterResult<SoftwareProgram> {
        if !source.fragment.contains(FRAGMENT_ENTRY_POINT) {
            return Err(FilterError::compilation(
                &*source.label,
                format!("missing entry point `{}`", FRAGMENT_ENTRY_POINT),
            ));
        }
        let kernel = reference::kernel_for(&source.label).ok_or_else(|| {
            FilterError::compilation(&*source.label, "no reference kernel for this program")
        })?;

        self.compilations += 1;
        tracing::info!(label = %source.label, "Compiled software program");
        Ok(SoftwareProgram::new(source.label.to_string(), kernel))
    }

    fn upload_geometry(&mut self, quad: &QuadGeometry) -> SoftwareGeometry {
        self.geometry_uploads += 1;
        SoftwareGeometry { quad: *quad }
    }

    fn create_texture(&mut self, pixels: &RgbaImage) -> SoftwareTexture {
        self.textures_created += 1;
        SoftwareTexture {
            image: pixels.clone(),
        }
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> bool {
        if self.target.dimensions() == (width, height) {
            return false;
        }
        tracing::debug!(width, height, "Allocating software target");
        self.target = RgbaImage::new(width, height);
        self.target_allocations += 1;
        true
    }

    fn bind_program(&mut self, program: &SoftwareProgram) {
        if let Some(active) = &self.bound {
            tracing::warn!(active = active.label(), "Binding over an active program");
        }
        self.bound = Some(program.clone());
    }

    fn set_uniform(&mut self, uniform: Uniform) {
        match &self.bound {
            Some(program) => program.inner.uniforms.lock().apply(uniform),
            None => tracing::warn!(?uniform, "Uniform set with no program bound"),
        }
    }

    fn draw_quad(&mut self, geometry: &SoftwareGeometry, texture: &SoftwareTexture) -> FilterResult<()> {
        let program = self.bound.clone().ok_or(FilterError::ShaderUnresolved)?;
        let uniforms = program.uniforms();
        let filter = self.filter_for(texture);
        let frame = QuadFrame::new(&geometry.quad, &uniforms);
        let (w, h) = self.target.dimensions();

        for pixel in self.target.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }

        for y in 0..h {
            for x in 0..w {
                let clip = [
                    (x as f32 + 0.5) / w as f32 * 2.0 - 1.0,
                    1.0 - (y as f32 + 0.5) / h as f32 * 2.0,
                ];
                let Some(tex_coord) = frame.tex_coord(clip) else {
                    continue;
                };
                let fragment = Fragment {
                    tex_coord,
                    uniforms: &uniforms,
                    texture,
                    filter,
                };
                let color = program.inner.kernel.shade(&fragment);
                self.target.put_pixel(x, y, to_rgba8(color));
            }
        }

        if self.draws.len() == DRAW_LOG_CAPACITY {
            self.draws.pop_front();
        }
        self.draw_count += 1;
        self.draws.push_back(DrawRecord {
            program: program.label().to_string(),
            program_id: program.id(),
            uniforms,
            vertex_count: geometry.quad.vertex_count(),
            target_size: (w, h),
        });
        Ok(())
    }

    fn unbind_program(&mut self) {
        self.bound = None;
    }

    fn read_target(&mut self) -> FilterResult<RgbaImage> {
        if self.target.width() == 0 || self.target.height() == 0 {
            return Err(FilterError::readback("offscreen target is not allocated"));
        }
        Ok(self.target.clone())
    }
}
