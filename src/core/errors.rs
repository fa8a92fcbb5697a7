//! Core error types

use thiserror::Error;

/// Errors raised by context bring-up and the render path.
///
/// Bring-up errors are fatal to the caller and roll back any partial state.
/// Per-frame errors degrade silently (the frame is skipped); they exist here
/// only so skip paths can log a typed diagnostic.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("GL context library could not be opened: {0}")]
    LibraryNotFound(String),

    #[error("missing symbol '{0}' in GL context library")]
    SymbolMissing(&'static str),

    #[error("display initialization failed: {0}")]
    DisplayInitFailed(String),

    #[error("no framebuffer configuration matched: {0}")]
    ConfigChooseFailed(String),

    #[error("context creation failed: {0}")]
    ContextCreateFailed(String),

    #[error("window surface creation failed: {0}")]
    SurfaceCreateFailed(String),

    #[error("could not make context current: {0}")]
    MakeCurrentFailed(String),

    #[error("allocation of {0} bytes failed")]
    AllocationFailed(usize),

    #[error("renderer refused to bind output {0}")]
    RendererBindFailed(u32),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
