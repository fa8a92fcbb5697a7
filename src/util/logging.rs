//! Logging setup for madrona.
//!
//! All crate logging goes through `tracing`. Per-frame scheduler chatter is
//! emitted at `trace!` level under the [`RENDER`] target so it can be
//! filtered out without losing bring-up and teardown diagnostics.

use tracing_subscriber::fmt::time::ChronoLocal;

/// Target for repaint scheduler and render-path messages.
pub const RENDER: &str = "madrona::render";
/// Target for platform backend and GL context bring-up.
pub const PLATFORM: &str = "madrona::platform";
/// Target for output lifecycle and wl_output traffic.
pub const OUTPUT: &str = "madrona::output";

/// Initialize logging with the standardized format.
///
/// Embedders that install their own subscriber should skip this.
pub fn init() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,madrona=debug");
    }

    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_ansi(false)
        .init();
}
