//! Renderer collaborator contract.
//!
//! The compositor core drives a renderer through this trait; the concrete
//! GL ES implementation lives with the embedder. The renderer owns all GPU
//! resources keyed by surface id, and releases them on drop.

use crate::core::surface::Buffer;
use crate::core::view::View;
use crate::util::geometry::{Geometry, Point, Size};

pub trait Renderer {
    /// Make the output's context current and set up the viewport for
    /// `resolution`. Returning `false` skips the frame.
    fn bind(&mut self, output_id: u32, resolution: Size) -> bool;

    /// Hand the renderer the compositor clock for animated materials.
    fn time(&mut self, frame_time_ms: u32);

    /// Paint the background layer.
    fn background(&mut self);

    /// Clear the framebuffer to a neutral color.
    fn clear(&mut self);

    /// Paint one view using its committed state.
    fn view_paint(&mut self, view: &View);

    /// Paint the pointer at `position`.
    fn pointer_paint(&mut self, position: Point);

    /// Issue the buffer swap for the bound output.
    fn swap(&mut self);

    /// Realize `buffer` as GPU resources for `surface_id`.
    /// Must not leave partial state behind on failure.
    fn surface_attach(&mut self, surface_id: u32, buffer: &Buffer) -> bool;

    /// Release the GPU resources held for `surface_id`.
    fn surface_destroy(&mut self, surface_id: u32);

    /// Read back `geometry` as tightly packed RGBA8888 into `rgba`.
    fn read_pixels(&mut self, geometry: Geometry, rgba: &mut [u8]);
}
