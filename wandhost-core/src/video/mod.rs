//! Frame presentation.
//!
//! Once per display frame the [`Presenter`] hands the guest's palette and indexed pixel buffer
//! to a [`RenderBackend`] and asks it for exactly one draw. Backends resolve the two-stage
//! lookup (pixel index -> palette color) however they like: [`SoftwareRenderer`] does it on the
//! CPU for the libretro core and for tests, the desktop frontend does it in a fragment shader.

use crate::abi::{COLOR_COUNT, PIXEL_BUFFER_H, PIXEL_BUFFER_W, layout};
use crate::bridge::{BridgeError, PaletteView, PixelView, SharedMemory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no graphics context: {0}")]
    Context(String),
    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: &'static str, log: String },
    #[error("shader program failed to link: {0}")]
    ProgramLink(String),
    #[error("shader program has no uniform `{0}`")]
    MissingUniform(&'static str),
    #[error("texture upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, Error)]
pub enum PresentError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A graphics backend able to run the palette lookup.
pub trait RenderBackend {
    /// Upload the 32x1 RGB float palette.
    fn upload_palette(&mut self, palette: PaletteView<'_>) -> Result<(), RenderError>;

    /// Upload the 400x240 index texture. Row 0 is the bottom of the screen.
    fn upload_pixels(&mut self, pixels: PixelView<'_>) -> Result<(), RenderError>;

    /// Draw the full-screen lookup quad.
    fn draw(&mut self) -> Result<(), RenderError>;
}

#[derive(Debug, Default)]
pub struct Presenter {
    frames: u64,
}

impl Presenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn present<B>(&mut self, shared: &mut SharedMemory<'_>, backend: &mut B) -> Result<(), PresentError>
    where
        B: RenderBackend + ?Sized,
    {
        backend.upload_palette(shared.palette()?)?;
        backend.upload_pixels(shared.pixels()?)?;
        backend.draw()?;
        self.frames += 1;
        Ok(())
    }
}

/// Quantize one `[0, 1]` channel to 8 bits.
#[inline]
fn quantize(channel: f32) -> u32 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u32
}

/// Pack an RGB float color as XRGB8888.
pub fn xrgb8888([r, g, b]: [f32; 3]) -> u32 {
    (quantize(r) << 16) | (quantize(g) << 8) | quantize(b)
}

/// CPU implementation of the palette lookup, producing an XRGB8888 framebuffer.
///
/// Output rows are top-down, so guest row 0 (the bottom row) lands on the last output row.
pub struct SoftwareRenderer {
    palette: [u32; COLOR_COUNT],
    indices: Vec<u8>,
    framebuffer: Vec<u32>,
    draws: u64,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub const WIDTH: usize = PIXEL_BUFFER_W;
    pub const HEIGHT: usize = PIXEL_BUFFER_H;
    /// Bytes per output row.
    pub const PITCH: usize = PIXEL_BUFFER_W * 4;

    pub fn new() -> Self {
        Self {
            palette: [0; COLOR_COUNT],
            indices: vec![0; layout::PIXELS_BYTES],
            framebuffer: vec![0; PIXEL_BUFFER_W * PIXEL_BUFFER_H],
            draws: 0,
        }
    }

    /// Output pixel at `(x, y)`, with `y = 0` the top row.
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.framebuffer[y * PIXEL_BUFFER_W + x]
    }

    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    /// Framebuffer as native-endian bytes, the layout libretro expects for XRGB8888.
    pub fn frame_bytes(&self) -> Vec<u8> {
        self.framebuffer
            .iter()
            .flat_map(|px| px.to_ne_bytes())
            .collect()
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl RenderBackend for SoftwareRenderer {
    fn upload_palette(&mut self, palette: PaletteView<'_>) -> Result<(), RenderError> {
        for (i, slot) in self.palette.iter_mut().enumerate() {
            *slot = palette.color(i).map(xrgb8888).unwrap_or(0);
        }
        Ok(())
    }

    fn upload_pixels(&mut self, pixels: PixelView<'_>) -> Result<(), RenderError> {
        self.indices.copy_from_slice(pixels.as_bytes());
        Ok(())
    }

    fn draw(&mut self) -> Result<(), RenderError> {
        for (src_row, dst_row) in self
            .indices
            .chunks_exact(PIXEL_BUFFER_W)
            .zip(self.framebuffer.chunks_exact_mut(PIXEL_BUFFER_W).rev())
        {
            for (index, out) in src_row.iter().zip(dst_row.iter_mut()) {
                *out = self.palette.get(*index as usize).copied().unwrap_or(0);
            }
        }
        self.draws += 1;
        Ok(())
    }
}
