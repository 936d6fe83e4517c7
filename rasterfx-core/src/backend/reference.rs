//! CPU versions of the catalogue fragment stages.
//!
//! Each kernel follows its `.wgsl` counterpart line for line so the
//! software backend produces what the GPU would.

use std::sync::Arc;

use super::software::{Fragment, FragmentKernel};
use crate::operation::FilterOperation;

const MAX_TAPS: i32 = 64;

pub fn luma(c: [f32; 4]) -> f32 {
    c[0] * 0.2126 + c[1] * 0.7152 + c[2] * 0.0722
}

/// Kernel for a catalogue program label
pub fn kernel_for(label: &str) -> Option<Arc<dyn FragmentKernel>> {
    let op: FilterOperation = label.parse().ok()?;
    let kernel: Arc<dyn FragmentKernel> = match op {
        FilterOperation::Blur => Arc::new(blur),
        FilterOperation::Invert => Arc::new(invert),
        FilterOperation::Threshold => Arc::new(threshold),
        FilterOperation::Erode => Arc::new(erode),
        FilterOperation::Gray => Arc::new(gray),
        FilterOperation::Dilate => Arc::new(dilate),
        FilterOperation::Posterize => Arc::new(posterize),
        FilterOperation::Opaque => Arc::new(opaque),
    };
    Some(kernel)
}

fn offset(uv: [f32; 2], delta: [f32; 2]) -> [f32; 2] {
    [uv[0] + delta[0], uv[1] + delta[1]]
}

fn blur(f: &Fragment<'_>) -> [f32; 4] {
    let u = f.uniforms;
    let radius = u.radius.max(1.0);
    let sigma = (radius * 0.5).max(0.5);
    let step = [u.direction[0] * u.texel_size[0], u.direction[1] * u.texel_size[1]];

    let mut sum = [0.0f32; 4];
    let mut total = 0.0f32;
    for i in -MAX_TAPS..=MAX_TAPS {
        let o = i as f32;
        if o.abs() > radius {
            continue;
        }
        let weight = (-(o * o) / (2.0 * sigma * sigma)).exp();
        let c = f.sample(offset(f.tex_coord, [step[0] * o, step[1] * o]));
        for (s, v) in sum.iter_mut().zip(c.iter()) {
            *s += v * weight;
        }
        total += weight;
    }
    sum.map(|s| s / total)
}

fn invert(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample(f.tex_coord);
    [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], c[3]]
}

fn threshold(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample(f.tex_coord);
    let level = f.uniforms.filter_parameter.clamp(0.0, 1.0);
    let v = if luma(c) >= level { 1.0 } else { 0.0 };
    [v, v, v, c[3]]
}

fn gray(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample(f.tex_coord);
    let l = luma(c);
    [l, l, l, c[3]]
}

fn posterize(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample(f.tex_coord);
    let levels = f.uniforms.filter_parameter.clamp(2.0, 255.0);
    let q = |v: f32| ((v * levels).floor() / (levels - 1.0)).clamp(0.0, 1.0);
    [q(c[0]), q(c[1]), q(c[2]), c[3]]
}

fn opaque(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.sample(f.tex_coord);
    [c[0], c[1], c[2], 1.0]
}

fn neighbourhood(f: &Fragment<'_>) -> [[f32; 4]; 5] {
    let t = f.uniforms.texel_size;
    let uv = f.tex_coord;
    [
        f.sample(uv),
        f.sample(offset(uv, [0.0, -t[1]])),
        f.sample(offset(uv, [-t[0], 0.0])),
        f.sample(offset(uv, [t[0], 0.0])),
        f.sample(offset(uv, [0.0, t[1]])),
    ]
}

fn erode(f: &Fragment<'_>) -> [f32; 4] {
    let samples = neighbourhood(f);
    let mut result = samples[0];
    for candidate in &samples[1..] {
        if luma(*candidate) < luma(result) {
            result = *candidate;
        }
    }
    result
}

fn dilate(f: &Fragment<'_>) -> [f32; 4] {
    let samples = neighbourhood(f);
    let mut result = samples[0];
    for candidate in &samples[1..] {
        if luma(*candidate) > luma(result) {
            result = *candidate;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{BoundProgram, RenderBackend, Uniform};
    use crate::geometry::QuadGeometry;
    use crate::shaders::ShaderCatalogue;
    use image::{Rgba, RgbaImage};

    /// Run one catalogue program over `input` with nearest sampling
    fn run(op: FilterOperation, input: &RgbaImage, uniforms: &[Uniform]) -> RgbaImage {
        let sampling = crate::config::SamplerSettings {
            min_filter: crate::config::SampleFilter::Nearest,
            mag_filter: crate::config::SampleFilter::Nearest,
        };
        let mut backend = SoftwareBackend::new(sampling);
        let geometry = backend.upload_geometry(&QuadGeometry::FULL_SCREEN);
        let program = backend
            .compile_program(ShaderCatalogue::builtin().get(op).unwrap())
            .unwrap();
        let texture = backend.create_texture(input);
        backend.ensure_target(input.width(), input.height());
        let texel = [1.0 / input.width() as f32, 1.0 / input.height() as f32];
        {
            let mut bound = BoundProgram::bind(&mut backend, &program);
            bound.set_uniform(Uniform::TexelSize(texel));
            bound.set_uniforms(uniforms);
            bound.draw(&geometry, &texture).unwrap();
        }
        backend.read_target().unwrap()
    }

    #[test]
    fn gray_desaturates() {
        let input = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 200]));
        let out = run(FilterOperation::Gray, &input, &[]);
        let p = out.get_pixel(0, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[0], 54); // 0.2126 * 255
        assert_eq!(p[3], 200);
    }

    #[test]
    fn invert_keeps_alpha() {
        let input = RgbaImage::from_pixel(1, 1, Rgba([10, 100, 255, 77]));
        let out = run(FilterOperation::Invert, &input, &[]);
        assert_eq!(out.get_pixel(0, 0).0, [245, 155, 0, 77]);
    }

    #[test]
    fn threshold_splits_on_level() {
        let input = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgba([60, 60, 60, 255]) } else { Rgba([200, 200, 200, 255]) }
        });
        let out = run(FilterOperation::Threshold, &input, &[Uniform::FilterParameter(0.5)]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn posterize_quantizes_to_levels() {
        let input = RgbaImage::from_fn(3, 1, |x, _| {
            let v = [20u8, 128, 250][x as usize];
            Rgba([v, v, v, 255])
        });
        let out = run(FilterOperation::Posterize, &input, &[Uniform::FilterParameter(2.0)]);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
        assert_eq!(out.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn opaque_forces_alpha() {
        let input = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 0]));
        let out = run(FilterOperation::Opaque, &input, &[]);
        assert_eq!(out.get_pixel(0, 0).0, [1, 2, 3, 255]);
    }

    #[test]
    fn erode_spreads_dark_pixels() {
        let mut input = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 255]));
        input.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let out = run(FilterOperation::Erode, &input, &[]);
        assert_eq!(out.get_pixel(1, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(0, 1).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn dilate_spreads_bright_pixels() {
        let mut input = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]));
        input.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let out = run(FilterOperation::Dilate, &input, &[]);
        assert_eq!(out.get_pixel(2, 1).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(1, 2).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 0, 255]);
    }

    #[test]
    fn horizontal_blur_stays_in_its_row() {
        let mut input = RgbaImage::from_pixel(9, 3, Rgba([0, 0, 0, 255]));
        input.put_pixel(4, 1, Rgba([255, 255, 255, 255]));
        let out = run(
            FilterOperation::Blur,
            &input,
            &[Uniform::Direction([1.0, 0.0]), Uniform::Radius(2.0)],
        );
        assert!(out.get_pixel(3, 1).0[0] > 0);
        assert!(out.get_pixel(4, 1).0[0] < 255);
        assert_eq!(out.get_pixel(4, 0).0[0], 0);
        assert_eq!(out.get_pixel(4, 2).0[0], 0);
        assert_eq!(out.get_pixel(0, 1).0[0], 0);
    }

    #[test]
    fn unknown_label_has_no_kernel() {
        assert!(kernel_for("sepia").is_none());
        assert!(kernel_for("blur").is_some());
    }
}
