//! wl_output protocol implementation.
//!
//! Each output registers one global; clients bind at `min(requested, 2)`
//! (enforced by the server library from the advertised version). A bind
//! sends geometry, scale for protocol ≥ 2, every known mode, and a final
//! `done` for protocol ≥ 2. Bound resources carry their output id as user
//! data so the resource destructor can prune the owner's binding list,
//! whether the client released the output or disconnected.

use wayland_server::{
    protocol::wl_output::{self, WlOutput},
    Dispatch, DisplayHandle, GlobalDispatch, Resource,
};

use crate::core::compositor::Compositor;
use crate::core::output::{elect_mode, Output};
use crate::util::logging::OUTPUT;

/// Output global data - references an output by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGlobal {
    pub output_id: u32,
}

impl OutputGlobal {
    pub fn new(output_id: u32) -> Self {
        Self { output_id }
    }
}

// ============================================================================
// wl_output GlobalDispatch
// ============================================================================

impl GlobalDispatch<WlOutput, OutputGlobal> for Compositor {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlOutput>,
        global_data: &OutputGlobal,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let resource = data_init.init(resource, global_data.output_id);

        let Some(output) = state.outputs.get_mut(&global_data.output_id) else {
            tracing::warn!(
                target: OUTPUT,
                "wl_output bind for unknown output {}",
                global_data.output_id
            );
            return;
        };

        tracing::debug!(
            target: OUTPUT,
            "output {}: wl_output bound at version {}",
            output.id,
            resource.version()
        );

        send_output_info(&resource, output);

        output.resources.push(resource);
    }
}

impl Dispatch<WlOutput, u32> for Compositor {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlOutput,
        request: wl_output::Request,
        _data: &u32,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        // Release is a destructor request; cleanup happens in destroyed().
        let _ = request;
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlOutput,
        data: &u32,
    ) {
        if let Some(output) = state.outputs.get_mut(data) {
            output.resources.retain(|r| r.id() != resource.id());
            tracing::debug!(
                target: OUTPUT,
                "output {}: wl_output resource destroyed",
                output.id
            );
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Send the full output description to a newly bound resource and
/// (re-)elect the output's current mode index.
fn send_output_info(resource: &WlOutput, output: &mut Output) {
    let info = &output.information;

    resource.geometry(
        info.x,
        info.y,
        info.physical_width,
        info.physical_height,
        info.subpixel,
        if info.make.is_empty() {
            "unknown".to_string()
        } else {
            info.make.clone()
        },
        if info.model.is_empty() {
            "model".to_string()
        } else {
            info.model.clone()
        },
        info.transform,
    );

    // Scale event exists from version 2.
    if resource.version() >= 2 {
        resource.scale(info.scale);
    }

    for mode in &info.modes {
        resource.mode(mode.flags, mode.width, mode.height, mode.refresh);
    }

    output.mode_index = elect_mode(&info.modes);
    debug_assert!(
        output.mode_index.is_some(),
        "output should have at least one current or preferred mode"
    );

    // Done event exists from version 2.
    if resource.version() >= 2 {
        resource.done();
    }
}
