// Madrona Compositor
// Copyright (c) 2026
//
// Output render scheduling and composition core for a Wayland compositor.
// Owns the per-output repaint state machine (coalescing, page-flip
// backpressure, adaptive idle intervals), space and view bookkeeping,
// surface migration between outputs, frame-callback delivery, and dynamic
// bring-up of the native EGL driver.

pub mod core;
pub mod platform;
pub mod prelude;
pub mod util;

pub use crate::core::compositor::{Compositor, CompositorEvent, CompositorOptions};
pub use crate::core::errors::{CoreError, Result};
pub use crate::core::output::{Output, OutputInformation, OutputMode, StackFactory};
pub use crate::platform::backend::{Backend, BackendSurface};
pub use crate::platform::context::Context;
