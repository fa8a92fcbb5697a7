//! Surfaces and client buffers.
//!
//! Surfaces are owned by the compositor arena; an output's knowledge of a
//! surface is a weak relation (`Surface::output`) plus renderer resources
//! keyed by the surface id. A surface is attached to at most one output at
//! any instant; migration goes through
//! [`Compositor::output_surface_attach`](crate::core::compositor::Compositor::output_surface_attach).

use wayland_server::protocol::wl_callback::WlCallback;

use crate::util::geometry::Size;

/// A client buffer as seen by the render path.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub id: u32,
    pub size: Size,
}

impl Buffer {
    pub fn new(id: u32, size: Size) -> Self {
        Self { id, size }
    }
}

/// A staged `wl_surface.frame` request.
///
/// Wire callbacks wrap the client resource; tests construct probes from a
/// closure. Either way the callback is one-shot: `done` consumes it.
pub struct FrameCallback {
    send: Box<dyn FnOnce(u32)>,
}

impl FrameCallback {
    pub fn new(send: impl FnOnce(u32) + 'static) -> Self {
        Self {
            send: Box::new(send),
        }
    }

    /// Wrap a client `wl_callback` resource.
    pub fn from_resource(callback: WlCallback) -> Self {
        Self::new(move |frame_time_ms| callback.done(frame_time_ms))
    }

    /// Signal the callback with the frame time of the swap that showed the
    /// client's content.
    pub fn done(self, frame_time_ms: u32) {
        (self.send)(frame_time_ms)
    }
}

impl std::fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameCallback")
    }
}

/// One client surface.
#[derive(Debug)]
pub struct Surface {
    pub id: u32,

    /// The output whose renderer currently owns this surface's GPU
    /// resources, if any.
    pub output: Option<u32>,

    /// Whether the committed buffer fully covers the surface.
    pub opaque: bool,

    /// Whether a buffer is currently attached.
    pub attached: bool,

    /// Frame callbacks staged by commits, drained at the next repaint of
    /// the owning output.
    pub frame_callbacks: Vec<FrameCallback>,
}

impl Surface {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            output: None,
            opaque: false,
            attached: false,
            frame_callbacks: Vec::new(),
        }
    }

    /// Stage a frame callback for the next repaint.
    pub fn request_frame(&mut self, callback: FrameCallback) {
        self.frame_callbacks.push(callback);
    }

    /// Move all staged callbacks out, leaving the list empty.
    pub fn take_frame_callbacks(&mut self) -> Vec<FrameCallback> {
        std::mem::take(&mut self.frame_callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_surface_init() {
        let surface = Surface::new(7);
        assert_eq!(surface.id, 7);
        assert!(surface.output.is_none());
        assert!(!surface.attached);
        assert!(surface.frame_callbacks.is_empty());
    }

    #[test]
    fn test_frame_callback_one_shot() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let log = fired.clone();
        let cb = FrameCallback::new(move |t| log.borrow_mut().push(t));
        cb.done(16);
        assert_eq!(*fired.borrow(), vec![16]);
    }

    #[test]
    fn test_take_frame_callbacks_drains() {
        let mut surface = Surface::new(1);
        surface.request_frame(FrameCallback::new(|_| {}));
        surface.request_frame(FrameCallback::new(|_| {}));
        assert_eq!(surface.take_frame_callbacks().len(), 2);
        assert!(surface.frame_callbacks.is_empty());
    }
}
