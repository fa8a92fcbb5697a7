//! Views: positioned instances of surfaces on a space.
//!
//! Layout policy lives outside this crate; a view here is the minimal
//! double-buffered placement record the render path needs. Views are owned
//! by the compositor arena and referenced (non-owning) from space view
//! lists.

use crate::util::geometry::Geometry;

/// The double-buffered part of a view.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub geometry: Geometry,
}

#[derive(Debug)]
pub struct View {
    pub id: u32,

    /// The surface this view presents.
    pub surface: u32,

    /// Set once the embedder has finished creating the view; uncreated
    /// views are never painted.
    pub created: bool,

    /// State being built up for the next repaint.
    pub pending: ViewState,

    /// State the last repaint painted from.
    pub commit: ViewState,
}

impl View {
    pub fn new(id: u32, surface: u32) -> Self {
        Self {
            id,
            surface,
            created: false,
            pending: ViewState::default(),
            commit: ViewState::default(),
        }
    }

    /// Apply the pending state. Called once per repaint for painted views.
    pub fn commit_state(&mut self) {
        self.commit = self.pending.clone();
    }
}
