//! Native GL context contract.
//!
//! A [`Context`] is the uniform face the rest of the compositor sees:
//! make-current, swap, the backend event pump, and teardown. The concrete
//! provider behind it implements [`NativeContext`]; EGL is the only
//! in-tree provider.

pub mod egl;

use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use crate::core::errors::Result;
use crate::platform::backend::BackendSurface;

/// Contract a native context provider must fulfill.
///
/// `terminate` must tolerate partially initialized state and must be
/// idempotent; it is also invoked on drop.
pub trait NativeContext {
    fn make_current(&mut self) -> Result<()>;

    /// Issue the buffer swap, then the backend's page-flip hook.
    fn swap(&mut self);

    fn poll_events(&mut self);

    fn event_fd(&self) -> Option<RawFd>;

    /// Bind the compositor's Wayland display into the driver so clients
    /// can share GPU buffers. Returns `false` when unsupported.
    fn bind_wl_display(&mut self, display: *mut c_void) -> bool {
        let _ = display;
        false
    }

    fn terminate(&mut self);
}

/// A ready-to-render context bound to one backend surface.
pub struct Context {
    native: Box<dyn NativeContext>,
}

impl Context {
    /// Bring up a context for `surface`.
    ///
    /// The surface is consumed either way: on failure it is torn down with
    /// the partially initialized context state.
    pub fn new(surface: BackendSurface) -> Result<Self> {
        let native = egl::EglContext::new(surface)?;
        Ok(Self::from_native(Box::new(native)))
    }

    /// Wrap an already-initialized provider.
    pub fn from_native(native: Box<dyn NativeContext>) -> Self {
        Self { native }
    }

    pub fn make_current(&mut self) -> Result<()> {
        self.native.make_current()
    }

    pub fn swap(&mut self) {
        self.native.swap()
    }

    pub fn poll_events(&mut self) {
        self.native.poll_events()
    }

    pub fn event_fd(&self) -> Option<RawFd> {
        self.native.event_fd()
    }

    pub fn bind_wl_display(&mut self, display: *mut c_void) -> bool {
        self.native.bind_wl_display(display)
    }

    /// Reverse bring-up. Safe to call more than once.
    pub fn terminate(&mut self) {
        self.native.terminate()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.native.terminate();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Context")
    }
}
