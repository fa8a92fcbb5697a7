//! Neutral platform backend abstraction.
//!
//! A backend adapter (DRM, X11, a nested Wayland session) yields the native
//! handles the GL context library binds to, pumps platform events, and
//! optionally hooks buffer swaps so the driver can be told about page
//! flips. The context layer consumes this; nothing above it sees native
//! handles.

use std::os::raw::c_void;
use std::os::unix::io::RawFd;

pub trait Backend {
    /// Human-readable backend name for diagnostics.
    fn name(&self) -> &str;

    /// Native display handle passed to the GL context library.
    fn display(&self) -> *mut c_void;

    /// Native window handle the context's window surface binds to.
    fn window(&self) -> *mut c_void;

    /// Drain pending platform events.
    fn poll_events(&mut self);

    /// File descriptor the shared event loop can poll for backend events,
    /// if the backend is fd-driven.
    fn event_fd(&self) -> Option<RawFd>;

    /// Invoked after every buffer swap on backends that must tell the
    /// kernel or driver about the flip. Default: nothing to do.
    fn page_flip(&mut self) {}
}

/// The platform-provided drawable one output renders into.
///
/// Thin owner of a backend adapter; consumed by context bring-up, which
/// keeps it alive for the lifetime of the context.
pub struct BackendSurface {
    backend: Box<dyn Backend>,
}

impl BackendSurface {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn display(&self) -> *mut c_void {
        self.backend.display()
    }

    pub fn window(&self) -> *mut c_void {
        self.backend.window()
    }

    pub fn poll_events(&mut self) {
        self.backend.poll_events()
    }

    pub fn event_fd(&self) -> Option<RawFd> {
        self.backend.event_fd()
    }

    pub fn page_flip(&mut self) {
        self.backend.page_flip()
    }
}

impl std::fmt::Debug for BackendSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSurface")
            .field("name", &self.backend.name())
            .finish()
    }
}
