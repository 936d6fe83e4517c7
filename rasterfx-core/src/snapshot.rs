//! Texture snapshots of the host surface.
//!
//! A fresh texture is captured before every pass so that the second blur
//! pass samples what the first one drew back onto the host.

use crate::backend::RenderBackend;
use crate::surface::HostSurface;

/// Copy the host's current pixels into a new sampleable texture
pub fn capture<B, H>(backend: &mut B, host: &H) -> B::Texture
where
    B: RenderBackend,
    H: HostSurface + ?Sized,
{
    let pixels = host.pixels();
    tracing::trace!(
        width = pixels.width(),
        height = pixels.height(),
        "Capturing host surface"
    );
    backend.create_texture(pixels)
}
