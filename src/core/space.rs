//! Spaces: ordered view collections on one output.

use std::any::Any;

/// An ordered collection of views belonging to one output.
///
/// The view list holds non-owning references (ids into the compositor's
/// view arena), ordered back-to-front. The output back-reference is a
/// relation, not ownership: the output destroys its spaces before it goes
/// away itself.
pub struct Space {
    pub id: u32,

    /// Back-reference to the owning output.
    pub output: u32,

    views: Vec<u32>,

    user_data: Option<Box<dyn Any>>,
}

impl Space {
    pub fn new(id: u32, output: u32) -> Self {
        Self {
            id,
            output,
            views: Vec::new(),
            user_data: None,
        }
    }

    /// Views in back-to-front paint order.
    pub fn views(&self) -> &[u32] {
        &self.views
    }

    /// Add a view at the top of the stack.
    pub fn add_view(&mut self, view_id: u32) {
        if !self.views.contains(&view_id) {
            self.views.push(view_id);
        }
    }

    pub fn remove_view(&mut self, view_id: u32) {
        self.views.retain(|v| *v != view_id);
    }

    pub fn set_user_data(&mut self, data: Option<Box<dyn Any>>) {
        self.user_data = data;
    }

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("output", &self.output)
            .field("views", &self.views)
            .finish()
    }
}
