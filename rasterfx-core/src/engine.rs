//! # Filter Engine
//!
//! Public controller for one host surface. Holds the backend, the program
//! cache and the quad, and turns `set_operation` + `apply_filter` into a
//! sequence of passes that are each composited back onto the host.
//!
//! ```text
//! Idle ──set_operation──► Configured ──apply_filter──► Applied
//!                              ▲                          │
//!                              └──────set_operation───────┘
//! ```
//!
//! Failures are logged where they are found and returned for inspection;
//! the host keeps its pixels.

use image::RgbaImage;
use serde::Serialize;

use crate::backend::software::SoftwareBackend;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::backend::RenderBackend;
use crate::config::EngineConfig;
use crate::error::{FilterError, FilterResult};
use crate::executor::{FrameMetrics, PassExecutor};
use crate::geometry::GeometryProvider;
use crate::operation::{FilterOperation, PassDescriptor, PassPlan};
use crate::program_cache::{ProgramCache, ProgramChoice};
use crate::shaders::ShaderCatalogue;
use crate::snapshot;
use crate::surface::HostSurface;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterState {
    /// No operation set yet
    Idle,
    /// Operation set and resolution attempted
    Configured,
    /// At least one pass sequence ran and was composited
    Applied,
}

/// Counters for everything the engine does to the backend and host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub compilations: usize,
    pub geometry_uploads: usize,
    pub passes: usize,
    pub composites: usize,
    pub textures_captured: usize,
    pub target_allocations: usize,
}

/// Outcome of a successful `apply_filter`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApplyReport {
    pub operation: Option<FilterOperation>,
    pub passes: usize,
    pub composites: usize,
    pub custom: bool,
}

struct FilterSettings<P> {
    operation: Option<FilterOperation>,
    parameter: f32,
    custom: Option<P>,
    resolved: Option<P>,
}

impl<P> Default for FilterSettings<P> {
    fn default() -> Self {
        Self {
            operation: None,
            parameter: 1.0,
            custom: None,
            resolved: None,
        }
    }
}

struct EngineCore<B: RenderBackend> {
    backend: B,
    catalogue: ShaderCatalogue,
    cache: ProgramCache<B::Program>,
    geometry: GeometryProvider<B::Geometry>,
    settings: FilterSettings<B::Program>,
    state: FilterState,
    passes: usize,
    composites: usize,
    textures_captured: usize,
    target_allocations: usize,
}

// ============================================================================
// Engine
// ============================================================================

pub struct FilterEngine<B: RenderBackend> {
    inner: Option<EngineCore<B>>,
}

impl<B: RenderBackend> FilterEngine<B> {
    /// Engine over a ready backend with the bundled catalogue
    pub fn new<H: HostSurface + ?Sized>(backend: B, host: &H) -> Self {
        Self::with_catalogue(backend, ShaderCatalogue::builtin(), host)
    }

    pub fn with_catalogue<H: HostSurface + ?Sized>(
        mut backend: B,
        catalogue: ShaderCatalogue,
        host: &H,
    ) -> Self {
        let geometry = GeometryProvider::new(&mut backend);

        let (width, height) = host.pixels().dimensions();
        let mut target_allocations = 0;
        if width > 0 && height > 0 && backend.ensure_target(width, height) {
            target_allocations += 1;
        }

        tracing::info!(
            backend = backend.name(),
            width,
            height,
            operations = catalogue.len(),
            "Filter engine created"
        );

        Self {
            inner: Some(EngineCore {
                backend,
                catalogue,
                cache: ProgramCache::new(),
                geometry,
                settings: FilterSettings::default(),
                state: FilterState::Idle,
                passes: 0,
                composites: 0,
                textures_captured: 0,
                target_allocations,
            }),
        }
    }

    /// Engine from a backend that may have failed to come up. A failed
    /// context is logged here once; afterwards every call is a no-op
    /// returning `UninitializedEngine`.
    pub fn from_backend<H: HostSurface + ?Sized>(backend: FilterResult<B>, host: &H) -> Self {
        match backend {
            Ok(backend) => Self::new(backend, host),
            Err(err) => {
                tracing::error!("{}", err);
                Self { inner: None }
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    fn core_mut(&mut self) -> FilterResult<&mut EngineCore<B>> {
        self.inner.as_mut().ok_or_else(|| {
            let err = FilterError::UninitializedEngine;
            tracing::error!("{}", err);
            err
        })
    }

    /// Select the operation for following `apply_filter` calls and resolve
    /// its program. A custom program replaces the catalogue entry and is
    /// never cached.
    pub fn set_operation(
        &mut self,
        operation: FilterOperation,
        parameter: f32,
        custom: Option<B::Program>,
    ) -> FilterResult<()> {
        self.configure(Some(operation), parameter, custom)
    }

    /// Like [`set_operation`](Self::set_operation) but takes an operation
    /// name. An unknown name clears the resolved program unless a custom
    /// program is given.
    pub fn set_operation_named(
        &mut self,
        name: &str,
        parameter: f32,
        custom: Option<B::Program>,
    ) -> FilterResult<()> {
        match name.parse::<FilterOperation>() {
            Ok(operation) => self.configure(Some(operation), parameter, custom),
            Err(_) if custom.is_some() => {
                tracing::debug!(name, "Unknown operation name, using custom program");
                self.configure(None, parameter, custom)
            }
            Err(err) => {
                let core = self.core_mut()?;
                tracing::error!("{}", err);
                core.settings = FilterSettings {
                    parameter,
                    ..FilterSettings::default()
                };
                core.state = FilterState::Configured;
                Err(err)
            }
        }
    }

    fn configure(
        &mut self,
        operation: Option<FilterOperation>,
        parameter: f32,
        custom: Option<B::Program>,
    ) -> FilterResult<()> {
        let core = self.core_mut()?;

        let choice = match (&custom, operation) {
            (Some(program), _) => ProgramChoice::Custom(program.clone()),
            (None, Some(operation)) => ProgramChoice::Catalogue(operation),
            (None, None) => {
                let err = FilterError::ShaderUnresolved;
                tracing::error!("{}", err);
                return Err(err);
            }
        };

        let resolved = core.cache.resolve(&mut core.backend, &core.catalogue, &choice);

        core.settings = FilterSettings {
            operation,
            parameter,
            custom,
            resolved: resolved.as_ref().ok().cloned(),
        };
        core.state = FilterState::Configured;

        tracing::debug!(
            operation = ?operation,
            parameter,
            custom = core.settings.custom.is_some(),
            resolved = core.settings.resolved.is_some(),
            "Filter configured"
        );
        resolved.map(|_| ())
    }

    /// Run the configured operation over `host`, overwriting its pixels
    pub fn apply_filter<H: HostSurface + ?Sized>(&mut self, host: &mut H) -> FilterResult<ApplyReport> {
        let core = self.core_mut()?;

        let Some(program) = core.settings.resolved.clone() else {
            let err = FilterError::ShaderUnresolved;
            tracing::error!("{}", err);
            return Err(err);
        };

        let metrics = FrameMetrics::of(&*host);
        let (width, height) = metrics.physical;
        if width == 0 || height == 0 {
            let err = FilterError::EmptySurface;
            tracing::error!("{}", err);
            return Err(err);
        }

        if core.backend.ensure_target(width, height) {
            core.target_allocations += 1;
        }

        let custom = core.settings.custom.is_some();
        let plan = PassPlan::for_operation(core.settings.operation, custom);
        let [extent_w, extent_h] = metrics.composite_extent();
        let mut report = ApplyReport {
            operation: core.settings.operation,
            passes: 0,
            composites: 0,
            custom,
        };

        // Later passes overwrite the host, so keep what to put back on failure
        let original = (plan.len() > 1).then(|| host.pixels().clone());

        for pass in plan.passes() {
            let rendered = match render_pass(core, &*host, &program, &metrics, pass) {
                Ok(rendered) => rendered,
                Err(err) => {
                    if let Some(original) = original.as_ref().filter(|_| report.composites > 0) {
                        host.clear();
                        host.draw_image(original, 0.0, 0.0, extent_w, extent_h);
                        tracing::warn!(composites = report.composites, "Host restored after failed pass");
                    }
                    return Err(err);
                }
            };
            report.passes += 1;

            host.clear();
            host.draw_image(&rendered, 0.0, 0.0, extent_w, extent_h);
            core.composites += 1;
            report.composites += 1;
        }

        core.state = FilterState::Applied;
        tracing::debug!(
            operation = ?report.operation,
            passes = report.passes,
            custom,
            "Filter applied"
        );
        Ok(report)
    }

    pub fn state(&self) -> Option<FilterState> {
        self.inner.as_ref().map(|core| core.state)
    }

    pub fn operation(&self) -> Option<FilterOperation> {
        self.inner.as_ref().and_then(|core| core.settings.operation)
    }

    pub fn parameter(&self) -> Option<f32> {
        self.inner.as_ref().map(|core| core.settings.parameter)
    }

    /// Program the next `apply_filter` will run
    pub fn resolved_program(&self) -> Option<&B::Program> {
        self.inner.as_ref().and_then(|core| core.settings.resolved.as_ref())
    }

    pub fn stats(&self) -> EngineStats {
        match &self.inner {
            Some(core) => EngineStats {
                compilations: core.cache.compilations(),
                geometry_uploads: core.geometry.uploads(),
                passes: core.passes,
                composites: core.composites,
                textures_captured: core.textures_captured,
                target_allocations: core.target_allocations,
            },
            None => EngineStats::default(),
        }
    }

    pub fn backend(&self) -> Option<&B> {
        self.inner.as_ref().map(|core| &core.backend)
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.inner.as_mut().map(|core| &mut core.backend)
    }
}

/// Capture the host, draw one pass and read the result back
fn render_pass<B, H>(
    core: &mut EngineCore<B>,
    host: &H,
    program: &B::Program,
    metrics: &FrameMetrics,
    pass: &PassDescriptor,
) -> FilterResult<RgbaImage>
where
    B: RenderBackend,
    H: HostSurface + ?Sized,
{
    // Re-captured every pass: the second blur pass reads the first one's output
    let texture = snapshot::capture(&mut core.backend, host);
    core.textures_captured += 1;

    PassExecutor::run(
        &mut core.backend,
        Some(program),
        core.geometry.geometry(),
        &texture,
        metrics,
        core.settings.parameter,
        pass,
    )
    .inspect_err(|e| tracing::error!("{}", e))?;
    core.passes += 1;

    core.backend
        .read_target()
        .inspect_err(|e| tracing::error!("{}", e))
}

impl FilterEngine<WgpuBackend> {
    /// GPU engine; a missing adapter yields an uninitialized engine
    pub fn gpu<H: HostSurface + ?Sized>(config: &EngineConfig, host: &H) -> Self {
        Self::from_backend(WgpuBackend::new(config), host)
    }
}

impl FilterEngine<SoftwareBackend> {
    pub fn software<H: HostSurface + ?Sized>(config: &EngineConfig, host: &H) -> Self {
        Self::new(SoftwareBackend::new(config.sampling), host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{
        SoftwareGeometry, SoftwareProgram, SoftwareTexture, DRAW_LOG_CAPACITY,
    };
    use crate::backend::Uniform;
    use crate::geometry::QuadGeometry;
    use crate::operation::{HORIZONTAL, VERTICAL};
    use crate::shaders::ProgramSource;
    use crate::surface::Canvas;
    use image::Rgba;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum SurfaceEvent {
        Clear,
        Draw,
    }

    /// Canvas that records every clear and draw the engine performs
    struct RecordingSurface {
        canvas: Canvas,
        events: Vec<SurfaceEvent>,
    }

    impl RecordingSurface {
        fn new(canvas: Canvas) -> Self {
            Self {
                canvas,
                events: Vec::new(),
            }
        }
    }

    impl HostSurface for RecordingSurface {
        fn width(&self) -> u32 {
            self.canvas.width()
        }
        fn height(&self) -> u32 {
            self.canvas.height()
        }
        fn pixel_density(&self) -> f32 {
            self.canvas.pixel_density()
        }
        fn pixels(&self) -> &RgbaImage {
            self.canvas.pixels()
        }
        fn clear(&mut self) {
            self.events.push(SurfaceEvent::Clear);
            self.canvas.clear();
        }
        fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, w: f32, h: f32) {
            self.events.push(SurfaceEvent::Draw);
            self.canvas.draw_image(image, x, y, w, h);
        }
    }

    fn colourful(width: u32, height: u32) -> Canvas {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, 180, 255])
        });
        Canvas::from_image(image, 1.0)
    }

    fn engine_for(host: &impl HostSurface) -> FilterEngine<SoftwareBackend> {
        FilterEngine::new(SoftwareBackend::default(), host)
    }

    /// Software backend whose readback starts failing after `reads_left` reads
    struct FailingReadback {
        inner: SoftwareBackend,
        reads_left: usize,
    }

    impl RenderBackend for FailingReadback {
        type Program = SoftwareProgram;
        type Geometry = SoftwareGeometry;
        type Texture = SoftwareTexture;

        fn name(&self) -> &'static str {
            "failing-readback"
        }
        fn compile_program(&mut self, source: &ProgramSource) -> FilterResult<SoftwareProgram> {
            self.inner.compile_program(source)
        }
        fn upload_geometry(&mut self, quad: &QuadGeometry) -> SoftwareGeometry {
            self.inner.upload_geometry(quad)
        }
        fn create_texture(&mut self, pixels: &RgbaImage) -> SoftwareTexture {
            self.inner.create_texture(pixels)
        }
        fn ensure_target(&mut self, width: u32, height: u32) -> bool {
            self.inner.ensure_target(width, height)
        }
        fn bind_program(&mut self, program: &SoftwareProgram) {
            self.inner.bind_program(program)
        }
        fn set_uniform(&mut self, uniform: Uniform) {
            self.inner.set_uniform(uniform)
        }
        fn draw_quad(&mut self, geometry: &SoftwareGeometry, texture: &SoftwareTexture) -> FilterResult<()> {
            self.inner.draw_quad(geometry, texture)
        }
        fn unbind_program(&mut self) {
            self.inner.unbind_program()
        }
        fn read_target(&mut self) -> FilterResult<RgbaImage> {
            if self.reads_left == 0 {
                return Err(FilterError::readback("device lost"));
            }
            self.reads_left -= 1;
            self.inner.read_target()
        }
    }

    #[test]
    fn gray_changes_pixels_in_one_pass() {
        let mut host = RecordingSurface::new(colourful(100, 100));
        let before = host.pixels().clone();
        let mut engine = engine_for(&host);

        engine.set_operation(FilterOperation::Gray, 1.0, None).unwrap();
        let report = engine.apply_filter(&mut host).unwrap();

        assert_eq!(report.passes, 1);
        assert_eq!(report.composites, 1);
        assert_ne!(host.pixels(), &before);
        let p = host.pixels().get_pixel(70, 20).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(engine.backend().unwrap().draws().len(), 1);
        assert_eq!(host.events, vec![SurfaceEvent::Clear, SurfaceEvent::Draw]);
        assert_eq!(engine.state(), Some(FilterState::Applied));
    }

    #[test]
    fn blur_runs_horizontal_then_vertical() {
        let mut host = RecordingSurface::new(colourful(40, 30));
        let mut engine = engine_for(&host);

        engine.set_operation(FilterOperation::Blur, 4.0, None).unwrap();
        let report = engine.apply_filter(&mut host).unwrap();

        assert_eq!(report.passes, 2);
        assert_eq!(report.composites, 2);
        let draws = engine.backend().unwrap().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].uniforms.direction, HORIZONTAL);
        assert_eq!(draws[1].uniforms.direction, VERTICAL);
        assert_eq!(draws[0].uniforms.radius, 4.0);
        assert_eq!(
            host.events,
            vec![SurfaceEvent::Clear, SurfaceEvent::Draw, SurfaceEvent::Clear, SurfaceEvent::Draw]
        );
        assert_eq!(engine.stats().textures_captured, 2);
    }

    #[test]
    fn every_other_operation_is_single_pass() {
        for op in FilterOperation::ALL.into_iter().filter(|op| *op != FilterOperation::Blur) {
            let mut host = colourful(8, 8);
            let mut engine = engine_for(&host);
            engine.set_operation(op, op.default_parameter(), None).unwrap();
            let report = engine.apply_filter(&mut host).unwrap();
            assert_eq!(report.passes, 1, "{op}");
            assert_eq!(engine.stats().composites, 1, "{op}");
        }
    }

    #[test]
    fn unknown_operation_leaves_host_untouched() {
        let mut host = RecordingSurface::new(colourful(16, 16));
        let before = host.pixels().clone();
        let mut engine = engine_for(&host);

        let err = engine.set_operation_named("nonexistent", 1.0, None).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedOperation(_)));

        let err = engine.apply_filter(&mut host).unwrap_err();
        assert!(matches!(err, FilterError::ShaderUnresolved));
        assert_eq!(host.pixels(), &before);
        assert!(host.events.is_empty());
        assert!(engine.backend().unwrap().draws().is_empty());
    }

    #[test]
    fn unknown_operation_after_success_clears_the_program() {
        let mut host = colourful(16, 16);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Invert, 1.0, None).unwrap();
        engine.apply_filter(&mut host).unwrap();
        let after_invert = host.image().clone();

        assert!(engine.set_operation_named("sepia", 1.0, None).is_err());
        assert!(engine.resolved_program().is_none());
        assert!(engine.apply_filter(&mut host).is_err());
        assert_eq!(host.image(), &after_invert);
    }

    #[test]
    fn apply_before_set_operation_is_unresolved() {
        let mut host = colourful(4, 4);
        let mut engine = engine_for(&host);
        assert_eq!(engine.state(), Some(FilterState::Idle));
        assert!(matches!(
            engine.apply_filter(&mut host),
            Err(FilterError::ShaderUnresolved)
        ));
    }

    #[test]
    fn operation_missing_from_catalogue_is_unsupported() {
        let mut host = colourful(4, 4);
        let before = host.image().clone();
        let catalogue = ShaderCatalogue::builtin().without(FilterOperation::Dilate);
        let mut engine = FilterEngine::with_catalogue(SoftwareBackend::default(), catalogue, &host);

        let err = engine.set_operation(FilterOperation::Dilate, 1.0, None).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedOperation(_)));
        assert!(engine.apply_filter(&mut host).is_err());
        assert_eq!(host.image(), &before);
    }

    #[test]
    fn compiles_once_per_operation_across_calls() {
        let mut host = colourful(8, 8);
        let mut engine = engine_for(&host);
        for _ in 0..3 {
            for op in [FilterOperation::Gray, FilterOperation::Invert, FilterOperation::Blur] {
                engine.set_operation(op, 2.0, None).unwrap();
                engine.apply_filter(&mut host).unwrap();
            }
        }
        assert_eq!(engine.stats().compilations, 3);
        assert_eq!(engine.backend().unwrap().compilations(), 3);
    }

    #[test]
    fn custom_program_overrides_blur_and_is_not_cached() {
        let mut host = colourful(8, 8);
        let mut engine = engine_for(&host);

        engine.set_operation(FilterOperation::Blur, 4.0, None).unwrap();
        let cached = engine.resolved_program().cloned().unwrap();

        let red = engine
            .backend()
            .unwrap()
            .program_from_kernel("red", |_| [1.0, 0.0, 0.0, 1.0]);
        engine.set_operation(FilterOperation::Blur, 4.0, Some(red.clone())).unwrap();
        let report = engine.apply_filter(&mut host).unwrap();

        assert!(report.custom);
        assert_eq!(report.passes, 1);
        assert_eq!(host.pixel(3, 3), [255, 0, 0, 255]);
        let draw = &engine.backend().unwrap().draws()[0];
        assert_eq!(draw.program, "red");
        assert_eq!(draw.uniforms.texel_size, [1.0 / 8.0, 1.0 / 8.0]);

        engine.set_operation(FilterOperation::Blur, 4.0, None).unwrap();
        assert_eq!(engine.resolved_program(), Some(&cached));
        assert_eq!(engine.stats().compilations, 1);
    }

    #[test]
    fn custom_program_accepts_unknown_name() {
        let mut host = colourful(4, 4);
        let mut engine = engine_for(&host);
        let keep = engine
            .backend()
            .unwrap()
            .program_from_kernel("keep", |f| f.sample(f.tex_coord));

        engine.set_operation_named("vignette", 1.0, Some(keep)).unwrap();
        let report = engine.apply_filter(&mut host).unwrap();
        assert_eq!(report.operation, None);
        assert_eq!(report.passes, 1);
        assert_eq!(engine.stats().compilations, 0);
    }

    #[test]
    fn geometry_is_uploaded_once() {
        let mut host = colourful(8, 8);
        let mut engine = engine_for(&host);
        for op in FilterOperation::ALL {
            engine.set_operation(op, op.default_parameter(), None).unwrap();
            engine.apply_filter(&mut host).unwrap();
        }
        assert_eq!(engine.stats().geometry_uploads, 1);
        assert_eq!(engine.backend().unwrap().geometry_uploads(), 1);
    }

    #[test]
    fn target_follows_host_size() {
        let mut host = colourful(8, 8);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Invert, 1.0, None).unwrap();

        engine.apply_filter(&mut host).unwrap();
        engine.apply_filter(&mut host).unwrap();
        assert_eq!(engine.stats().target_allocations, 1);

        host.resize(12, 6);
        engine.apply_filter(&mut host).unwrap();
        assert_eq!(engine.stats().target_allocations, 2);
        let draws = engine.backend().unwrap().draws();
        assert_eq!(draws.back().unwrap().target_size, (12, 6));
    }

    #[test]
    fn density_drives_target_and_texel_size() {
        let mut host = Canvas::new(10, 5, 2.0);
        host.fill([40, 80, 120, 255]);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Opaque, 1.0, None).unwrap();
        engine.apply_filter(&mut host).unwrap();

        let draw = &engine.backend().unwrap().draws()[0];
        assert_eq!(draw.target_size, (20, 10));
        assert_eq!(draw.uniforms.texel_size, [1.0 / 20.0, 1.0 / 10.0]);
        assert_eq!(draw.uniforms.canvas_size, [10.0, 5.0]);
        assert_eq!(host.pixel(7, 3), [40, 80, 120, 255]);
    }

    #[test]
    fn uneven_density_filters_every_stored_pixel() {
        let image = RgbaImage::from_pixel(100, 100, Rgba([200, 50, 50, 255]));
        let mut host = Canvas::from_image(image, 3.0);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Opaque, 1.0, None).unwrap();
        engine.apply_filter(&mut host).unwrap();

        assert_eq!(host.image().dimensions(), (100, 100));
        assert_eq!(host.pixel(50, 50), [200, 50, 50, 255]);
        assert_eq!(host.pixel(99, 99), [200, 50, 50, 255]);
        assert_eq!(host.pixel(0, 99), [200, 50, 50, 255]);
        let draw = &engine.backend().unwrap().draws()[0];
        assert_eq!(draw.target_size, (100, 100));
        assert_eq!(draw.uniforms.texel_size, [0.01, 0.01]);
    }

    #[test]
    fn failed_second_pass_restores_the_host() {
        let mut host = RecordingSurface::new(colourful(12, 12));
        let before = host.pixels().clone();
        let backend = FailingReadback {
            inner: SoftwareBackend::default(),
            reads_left: 1,
        };
        let mut engine = FilterEngine::new(backend, &host);
        engine.set_operation(FilterOperation::Blur, 3.0, None).unwrap();

        let err = engine.apply_filter(&mut host).unwrap_err();
        assert!(matches!(err, FilterError::Readback(_)));
        assert_eq!(host.pixels(), &before);
        assert_eq!(engine.stats().composites, 1);
        assert_eq!(engine.state(), Some(FilterState::Configured));
    }

    #[test]
    fn failed_single_pass_never_touches_the_host() {
        let mut host = RecordingSurface::new(colourful(6, 6));
        let backend = FailingReadback {
            inner: SoftwareBackend::default(),
            reads_left: 0,
        };
        let mut engine = FilterEngine::new(backend, &host);
        engine.set_operation(FilterOperation::Gray, 1.0, None).unwrap();

        assert!(engine.apply_filter(&mut host).is_err());
        assert!(host.events.is_empty());
    }

    #[test]
    fn repeated_frames_keep_the_draw_log_bounded() {
        let mut host = colourful(4, 4);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Invert, 1.0, None).unwrap();
        for _ in 0..500 {
            engine.apply_filter(&mut host).unwrap();
        }

        let backend = engine.backend().unwrap();
        assert_eq!(backend.draw_count(), 500);
        assert_eq!(backend.draws().len(), DRAW_LOG_CAPACITY);
        assert_eq!(engine.stats().passes, 500);
    }

    #[test]
    fn small_parameter_is_clamped_for_radius_only() {
        let mut host = colourful(8, 8);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Threshold, 0.3, None).unwrap();
        engine.apply_filter(&mut host).unwrap();

        let draw = &engine.backend().unwrap().draws()[0];
        assert_eq!(draw.uniforms.radius, 1.0);
        assert_eq!(draw.uniforms.filter_parameter, 0.3);
    }

    #[test]
    fn empty_surface_is_rejected() {
        let mut host = Canvas::new(0, 0, 1.0);
        let mut engine = engine_for(&host);
        engine.set_operation(FilterOperation::Gray, 1.0, None).unwrap();
        assert!(matches!(
            engine.apply_filter(&mut host),
            Err(FilterError::EmptySurface)
        ));
    }

    #[test]
    fn failed_context_makes_every_call_a_no_op() {
        let mut host = colourful(4, 4);
        let before = host.image().clone();
        let mut engine: FilterEngine<SoftwareBackend> = FilterEngine::from_backend(
            Err(FilterError::ContextUnavailable("no adapter".into())),
            &host,
        );

        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.set_operation(FilterOperation::Gray, 1.0, None),
            Err(FilterError::UninitializedEngine)
        ));
        assert!(matches!(
            engine.apply_filter(&mut host),
            Err(FilterError::UninitializedEngine)
        ));
        assert_eq!(host.image(), &before);
        assert_eq!(engine.stats(), EngineStats::default());
        assert_eq!(engine.state(), None);
    }
}
