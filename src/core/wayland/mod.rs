//! Wayland protocol surface of the composition core.
//!
//! Only `wl_output` is spoken here; surface and callback traffic is routed
//! in by the embedder's protocol dispatcher.

pub mod output;
