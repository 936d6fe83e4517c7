//! # Host Surface
//!
//! The 2D drawing surface a filter reads from and writes back onto.
//! Sizes are logical; the backing store holds `size * pixel_density` pixels.

use image::{imageops, Rgba, RgbaImage};

/// What the filter engine needs from its host
pub trait HostSurface {
    /// Logical width
    fn width(&self) -> u32;
    /// Logical height
    fn height(&self) -> u32;
    fn pixel_density(&self) -> f32;
    /// Current RGBA8 contents at physical resolution
    fn pixels(&self) -> &RgbaImage;
    /// Reset every pixel to transparent black
    fn clear(&mut self);
    /// Source-over draw of `image` into the logical rectangle (x, y, w, h)
    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, w: f32, h: f32);

    /// Backing store size in pixels
    fn physical_size(&self) -> (u32, u32) {
        physical_extent(self.width(), self.height(), self.pixel_density())
    }
}

pub fn physical_extent(width: u32, height: u32, density: f32) -> (u32, u32) {
    let density = if density.is_finite() && density > 0.0 { density } else { 1.0 };
    (
        (width as f32 * density).round() as u32,
        (height as f32 * density).round() as u32,
    )
}

// ============================================================================
// Canvas
// ============================================================================

/// In-memory host surface
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    density: f32,
    pixels: RgbaImage,
}

impl Canvas {
    /// Create a transparent canvas of logical size `width` x `height`
    pub fn new(width: u32, height: u32, density: f32) -> Self {
        let (pw, ph) = physical_extent(width, height, density);
        Self {
            width,
            height,
            density,
            pixels: RgbaImage::new(pw, ph),
        }
    }

    /// Wrap an existing image; its size is taken as physical resolution
    pub fn from_image(image: RgbaImage, density: f32) -> Self {
        let density = if density.is_finite() && density > 0.0 { density } else { 1.0 };
        let width = (image.width() as f32 / density).round() as u32;
        let height = (image.height() as f32 / density).round() as u32;
        Self {
            width,
            height,
            density,
            pixels: image,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        self.pixels.put_pixel(x, y, Rgba(rgba));
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = Rgba(rgba);
        }
    }

    /// Change the logical size; contents are discarded
    pub fn resize(&mut self, width: u32, height: u32) {
        let (pw, ph) = physical_extent(width, height, self.density);
        self.width = width;
        self.height = height;
        self.pixels = RgbaImage::new(pw, ph);
    }
}

impl HostSurface for Canvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_density(&self) -> f32 {
        self.density
    }

    fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// The stored image is authoritative; a logical size rounded from it
    /// can miss a row or column at fractional densities
    fn physical_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn clear(&mut self) {
        self.fill([0, 0, 0, 0]);
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, w: f32, h: f32) {
        let d = self.density;
        let dx = (x * d).round() as i64;
        let dy = (y * d).round() as i64;
        let dw = (w * d).round().max(0.0) as u32;
        let dh = (h * d).round().max(0.0) as u32;
        if dw == 0 || dh == 0 || image.width() == 0 || image.height() == 0 {
            return;
        }

        let scaled;
        let source = if image.dimensions() == (dw, dh) {
            image
        } else {
            scaled = imageops::resize(image, dw, dh, imageops::FilterType::Triangle);
            &scaled
        };

        for (sx, sy, src) in source.enumerate_pixels() {
            let tx = dx + sx as i64;
            let ty = dy + sy as i64;
            if tx < 0 || ty < 0 || tx >= self.pixels.width() as i64 || ty >= self.pixels.height() as i64 {
                continue;
            }
            let dst = self.pixels.get_pixel_mut(tx as u32, ty as u32);
            *dst = source_over(src, dst);
        }
    }
}

fn source_over(src: &Rgba<u8>, dst: &Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    if sa >= 1.0 {
        return *src;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let s = src[c] as f32 / 255.0;
        let t = dst[c] as f32 / 255.0;
        let v = (s * sa + t * da * (1.0 - sa)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}
