//! Platform integration: the neutral backend abstraction and native GL
//! context bring-up.

pub mod backend;
pub mod context;

pub use backend::{Backend, BackendSurface};
pub use context::{Context, NativeContext};
