//! Outputs: per-display state and repaint orchestration.
//!
//! An output owns its backend surface / context / renderer stack, its
//! spaces, the client bindings observing it, and the scheduler state the
//! repaint loop in [`crate::core::compositor`] runs on. The stack is one
//! `Option<RenderStack>` so the three pieces are always all-present or
//! all-absent.

use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

use calloop::LoopHandle;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::DisplayHandle;

use crate::core::compositor::{Compositor, CompositorEvent, EventSink};
use crate::core::errors::Result;
use crate::core::render::Renderer;
use crate::core::space::Space;
use crate::core::surface::{FrameCallback, Surface};
use crate::core::timer::IdleTimer;
use crate::core::view::View;
use crate::core::wayland::output::OutputGlobal;
use crate::platform::backend::BackendSurface;
use crate::platform::context::Context;
use crate::util::geometry::{Geometry, Point, Size};
use crate::util::logging::{OUTPUT, RENDER};

/// Idle re-evaluation interval bounds, in milliseconds. The ceiling keeps
/// animated backgrounds ticking at roughly 24Hz while nothing else changes.
pub const IDLE_INTERVAL_MIN_MS: f64 = 1.0;
pub const IDLE_INTERVAL_MAX_MS: f64 = 41.0;

// ============================================================================
// Modes and information
// ============================================================================

/// One advertised display mode. `refresh` is in mHz, per the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub flags: wl_output::Mode,
    pub width: i32,
    pub height: i32,
    pub refresh: i32,
}

impl OutputMode {
    pub fn new(flags: wl_output::Mode, width: i32, height: i32, refresh: i32) -> Self {
        Self {
            flags,
            width,
            height,
            refresh,
        }
    }
}

/// Static facts about a physical display.
#[derive(Debug, Clone)]
pub struct OutputInformation {
    pub x: i32,
    pub y: i32,
    pub physical_width: i32,
    pub physical_height: i32,
    pub subpixel: wl_output::Subpixel,
    pub transform: wl_output::Transform,
    pub scale: i32,
    pub make: String,
    pub model: String,
    pub modes: Vec<OutputMode>,
}

impl OutputInformation {
    pub fn add_mode(&mut self, mode: OutputMode) {
        self.modes.push(mode);
    }
}

impl Default for OutputInformation {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            physical_width: 0,
            physical_height: 0,
            subpixel: wl_output::Subpixel::Unknown,
            transform: wl_output::Transform::Normal,
            scale: 1,
            make: String::new(),
            model: String::new(),
            modes: Vec::new(),
        }
    }
}

/// Pick the advertised mode: the last one flagged current, else the first
/// flagged preferred. `None` only on a violated precondition (every output
/// carries at least one of either).
pub fn elect_mode(modes: &[OutputMode]) -> Option<usize> {
    let mut elected = None;
    for (index, mode) in modes.iter().enumerate() {
        if mode.flags.contains(wl_output::Mode::Current)
            || (elected.is_none() && mode.flags.contains(wl_output::Mode::Preferred))
        {
            elected = Some(index);
        }
    }
    elected
}

// ============================================================================
// Render stack
// ============================================================================

/// The renderer/context pair built on top of one backend surface.
///
/// Field order is release order: the renderer's GPU resources go before the
/// context that hosts them; the context's drop tears down EGL and then the
/// backend surface it owns.
pub struct RenderStack {
    pub renderer: Box<dyn Renderer>,
    pub context: Context,
}

/// Builds the per-output context and renderer when a backend surface is
/// (re)assigned. The default context step is EGL bring-up; the renderer
/// step is supplied by the embedder.
pub struct StackFactory {
    pub context: Box<dyn Fn(BackendSurface) -> Result<Context>>,
    pub renderer: Box<dyn Fn(&mut Context) -> Result<Box<dyn Renderer>>>,
}

impl StackFactory {
    /// EGL context bring-up plus the given renderer constructor.
    pub fn with_renderer(
        renderer: impl Fn(&mut Context) -> Result<Box<dyn Renderer>> + 'static,
    ) -> Self {
        Self {
            context: Box::new(Context::new),
            renderer: Box::new(renderer),
        }
    }
}

/// One-shot pixel readback request.
pub struct PixelsCallback(Box<dyn FnOnce(Size, Vec<u8>)>);

impl PixelsCallback {
    pub fn new(callback: impl FnOnce(Size, Vec<u8>) + 'static) -> Self {
        Self(Box::new(callback))
    }

    pub fn done(self, size: Size, rgba: Vec<u8>) {
        (self.0)(size, rgba)
    }
}

// ============================================================================
// Output
// ============================================================================

/// One physical display managed by the compositor.
pub struct Output {
    pub id: u32,
    pub information: OutputInformation,
    pub resolution: Size,

    /// Index into `information.modes`, elected at creation and re-elected
    /// on every client bind.
    pub mode_index: Option<usize>,

    /// Backend surface + context + renderer, all-present or all-absent.
    pub stack: Option<RenderStack>,

    /// Client bindings observing this output.
    pub resources: Vec<WlOutput>,

    spaces: Vec<Space>,
    focused_space: Option<u32>,
    next_space_id: u32,

    pub(crate) timer: IdleTimer,
    global: Option<GlobalId>,
    events: EventSink,

    // Scheduler state. All mutation happens on the event loop thread.
    pub activity: bool,
    pub scheduled: bool,
    pub pending_flip: bool,
    pub terminating: bool,
    pub background_visible: bool,

    /// Monotonic-millisecond timestamp of the last finished frame. Wraps
    /// roughly every 50 days, matching the wire protocol's u32 clock.
    pub frame_time_ms: u32,

    /// Adaptive idle re-evaluation interval, always within
    /// [`IDLE_INTERVAL_MIN_MS`, `IDLE_INTERVAL_MAX_MS`].
    pub idle_interval_ms: f64,

    /// Frame callbacks collected at the last repaint, signaled at the next
    /// `finish_frame` with that flip's timestamp.
    pub(crate) pending_callbacks: Vec<FrameCallback>,

    pub(crate) pixels_task: Option<PixelsCallback>,

    user_data: Option<Box<dyn Any>>,
}

impl Output {
    /// Allocate an output: idle timer on the shared event loop, a
    /// `wl_output` global, one initial space, elected mode. The render
    /// stack and resolution are set by the caller afterwards.
    pub(crate) fn new(
        id: u32,
        loop_handle: LoopHandle<'static, Compositor>,
        display: &DisplayHandle,
        events: EventSink,
        information: OutputInformation,
    ) -> Self {
        let global = display.create_global::<Compositor, WlOutput, OutputGlobal>(
            2,
            OutputGlobal::new(id),
        );

        let mode_index = elect_mode(&information.modes);

        let mut output = Self {
            id,
            information,
            resolution: Size::default(),
            mode_index,
            stack: None,
            resources: Vec::new(),
            spaces: Vec::new(),
            focused_space: None,
            next_space_id: 1,
            timer: IdleTimer::new(loop_handle, id),
            global: Some(global),
            events,
            activity: false,
            scheduled: false,
            pending_flip: false,
            terminating: false,
            background_visible: false,
            frame_time_ms: 0,
            idle_interval_ms: IDLE_INTERVAL_MAX_MS,
            pending_callbacks: Vec::new(),
            pixels_task: None,
            user_data: None,
        };

        output.add_space();
        output
    }

    // =========================================================================
    // Render stack
    // =========================================================================

    /// Swap the backend surface / context / renderer stack.
    ///
    /// An existing stack is fully released first. The new stack is built
    /// context-from-surface, then renderer-from-context; any step failing
    /// rolls back to the absent stack and returns the bring-up error.
    pub fn set_surface(
        &mut self,
        surface: Option<BackendSurface>,
        factory: &StackFactory,
    ) -> Result<()> {
        if surface.is_none() && self.stack.is_none() {
            return Ok(());
        }

        self.stack = None;

        let Some(surface) = surface else {
            return Ok(());
        };

        let mut context = (factory.context)(surface)?;
        let renderer = (factory.renderer)(&mut context)?;
        self.stack = Some(RenderStack { renderer, context });

        tracing::debug!(target: OUTPUT, "output {}: render stack replaced", self.id);
        Ok(())
    }

    /// Whether the render path may run, apart from the compositor-wide
    /// active flag.
    pub(crate) fn ready(&self) -> bool {
        !self.pending_flip && self.stack.is_some()
    }

    pub fn context_mut(&mut self) -> Option<&mut Context> {
        self.stack.as_mut().map(|stack| &mut stack.context)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Request a future repaint. Bursts coalesce: while an arming is
    /// outstanding only the activity marker changes. The 1ms floor yields
    /// to the event loop so one render covers the whole burst.
    pub fn schedule_repaint(&mut self) {
        if !self.activity {
            tracing::trace!(target: RENDER, "output {}: activity marked", self.id);
        }
        self.activity = true;

        if self.scheduled {
            return;
        }

        self.scheduled = true;
        self.timer.arm(IDLE_INTERVAL_MIN_MS);
        tracing::trace!(target: RENDER, "output {}: repaint scheduled", self.id);
    }

    /// Flag the output for removal. The next `finish_frame` observes the
    /// flag and emits [`CompositorEvent::OutputRemove`] exactly once.
    pub fn terminate(&mut self) {
        self.terminating = true;
        self.schedule_repaint();
    }

    /// Request a one-shot pixel readback; ignored while one is pending.
    /// The callback fires inside the next repaint, after the frame is
    /// drawn but before the swap.
    pub fn get_pixels(&mut self, callback: impl FnOnce(Size, Vec<u8>) + 'static) {
        if self.pixels_task.is_some() {
            return;
        }
        self.pixels_task = Some(PixelsCallback::new(callback));
        self.schedule_repaint();
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    pub fn set_resolution(&mut self, resolution: Size) {
        if resolution == self.resolution {
            return;
        }

        self.resolution = resolution;
        self.events.borrow_mut().push(CompositorEvent::OutputResolution {
            output_id: self.id,
            resolution,
        });
        self.schedule_repaint();
    }

    pub fn resolution(&self) -> Size {
        self.resolution
    }

    // =========================================================================
    // Spaces
    // =========================================================================

    /// Create a space at the tail of the space list. The first space
    /// created becomes focused.
    pub fn add_space(&mut self) -> u32 {
        let id = self.next_space_id;
        self.next_space_id += 1;
        self.spaces.push(Space::new(id, self.id));
        if self.focused_space.is_none() {
            self.focused_space = Some(id);
        }
        id
    }

    /// Remove a space. Removing the focused space focuses its previous
    /// sibling, or the new head if it was first, or nothing if none
    /// remain. Views in the space are non-owning references and are simply
    /// dropped from the list.
    pub fn remove_space(&mut self, space_id: u32) {
        let Some(index) = self.spaces.iter().position(|s| s.id == space_id) else {
            return;
        };

        self.spaces.remove(index);

        if self.focused_space == Some(space_id) {
            self.focused_space = if self.spaces.is_empty() {
                None
            } else {
                Some(self.spaces[index.saturating_sub(1)].id)
            };
        }
    }

    /// Focus a space of this output; no-op if unknown or already focused.
    pub fn focus_space(&mut self, space_id: u32) {
        if self.focused_space == Some(space_id) {
            return;
        }
        if !self.spaces.iter().any(|s| s.id == space_id) {
            return;
        }

        self.focused_space = Some(space_id);
        self.events.borrow_mut().push(CompositorEvent::SpaceActivated {
            output_id: self.id,
            space_id,
        });
        self.schedule_repaint();
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn space(&self, space_id: u32) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == space_id)
    }

    pub fn space_mut(&mut self, space_id: u32) -> Option<&mut Space> {
        self.spaces.iter_mut().find(|s| s.id == space_id)
    }

    pub fn focused_space_id(&self) -> Option<u32> {
        self.focused_space
    }

    pub fn focused_space(&self) -> Option<&Space> {
        self.focused_space.and_then(|id| self.space(id))
    }

    /// Drop a view reference from every space of this output.
    pub(crate) fn remove_view(&mut self, view_id: u32) {
        for space in &mut self.spaces {
            space.remove_view(view_id);
        }
    }

    // =========================================================================
    // User data
    // =========================================================================

    pub fn set_user_data(&mut self, data: Option<Box<dyn Any>>) {
        self.user_data = data;
    }

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release everything this output owns: timer, client bindings,
    /// spaces, the render stack, the global. Tolerates partial state.
    pub(crate) fn destroy(&mut self, display: &DisplayHandle) {
        self.timer.disarm();
        self.resources.clear();
        self.spaces.clear();
        self.focused_space = None;
        self.pending_callbacks.clear();
        self.pixels_task = None;
        self.stack = None;

        if let Some(global) = self.global.take() {
            display.remove_global::<Compositor>(global);
        }

        tracing::debug!(target: OUTPUT, "output {}: destroyed", self.id);
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("resolution", &self.resolution)
            .field("spaces", &self.spaces.len())
            .field("activity", &self.activity)
            .field("scheduled", &self.scheduled)
            .field("pending_flip", &self.pending_flip)
            .finish()
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Fold a monotonic timestamp into wire-protocol milliseconds.
///
/// The u32 wraps roughly every 50 days; that limitation is inherent to the
/// protocol's clock and is carried here rather than widened.
pub(crate) fn timestamp_ms(ts: Duration) -> u32 {
    (ts.as_secs() as u32)
        .wrapping_mul(1000)
        .wrapping_add(ts.subsec_millis())
}

// ============================================================================
// Background visibility
// ============================================================================

/// Whether a non-opaque view sits over bare background: true unless some
/// opaque view's committed geometry contains it.
fn transparent_above_background(
    view: &View,
    space_views: &[u32],
    views: &HashMap<u32, View>,
    surfaces: &HashMap<u32, Surface>,
) -> bool {
    for other_id in space_views {
        let Some(other) = views.get(other_id) else {
            continue;
        };
        let Some(surface) = surfaces.get(&other.surface) else {
            continue;
        };
        if !surface.opaque {
            continue;
        }
        if other.commit.geometry.contains(&view.commit.geometry) {
            return false;
        }
    }
    true
}

/// Whether any background shows through the focused space's views.
///
/// Accumulates a pseudo-geometry over the opaque views whose `size` field
/// holds absolute bottom-right extents rather than a width/height, then
/// feeds it to the ordinary containment predicate. That overshoots the
/// union's true extent whenever the minimal origin is positive, making the
/// root easier to "cover". Known quirk, kept for behavioral compatibility.
pub(crate) fn is_visible(
    resolution: Size,
    space_views: &[u32],
    views: &HashMap<u32, View>,
    surfaces: &HashMap<u32, Surface>,
) -> bool {
    let root = Geometry {
        origin: Point::new(0, 0),
        size: resolution,
    };
    let mut union = Geometry {
        origin: Point::new(i32::MAX, i32::MAX),
        size: Size::new(0, 0),
    };

    for view_id in space_views {
        let Some(view) = views.get(view_id) else {
            continue;
        };
        let Some(surface) = surfaces.get(&view.surface) else {
            continue;
        };

        if !surface.opaque {
            if transparent_above_background(view, space_views, views, surfaces) {
                return true;
            }
            continue;
        }

        let geometry = &view.commit.geometry;
        let extent = Size::new(
            (geometry.origin.x + geometry.size.w as i32) as u32,
            (geometry.origin.y + geometry.size.h as i32) as u32,
        );

        union.origin = union.origin.min(&geometry.origin);
        union.size = union.size.max(&extent);
    }

    !union.contains(&root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(flags: wl_output::Mode) -> OutputMode {
        OutputMode::new(flags, 800, 600, 60000)
    }

    #[test]
    fn test_elect_mode_prefers_current() {
        let modes = [
            mode(wl_output::Mode::Preferred),
            mode(wl_output::Mode::Current),
        ];
        assert_eq!(elect_mode(&modes), Some(1));
    }

    #[test]
    fn test_elect_mode_falls_back_to_preferred() {
        let modes = [mode(wl_output::Mode::empty()), mode(wl_output::Mode::Preferred)];
        assert_eq!(elect_mode(&modes), Some(1));
    }

    #[test]
    fn test_elect_mode_none_without_candidates() {
        let modes = [mode(wl_output::Mode::empty())];
        assert_eq!(elect_mode(&modes), None);
        assert_eq!(elect_mode(&[]), None);
    }

    #[test]
    fn test_timestamp_ms_folds_and_wraps() {
        assert_eq!(timestamp_ms(Duration::from_millis(16)), 16);
        assert_eq!(timestamp_ms(Duration::new(2, 500_000_000)), 2500);
        // Past the u32 range the clock wraps instead of widening.
        let wrapped = timestamp_ms(Duration::from_millis(u32::MAX as u64 + 5));
        assert_eq!(wrapped, 4);
    }

    fn arena(
        entries: &[(u32, Geometry, bool)],
    ) -> (Vec<u32>, HashMap<u32, View>, HashMap<u32, Surface>) {
        let mut order = Vec::new();
        let mut views = HashMap::new();
        let mut surfaces = HashMap::new();
        for (id, geometry, opaque) in entries {
            let mut surface = Surface::new(*id);
            surface.opaque = *opaque;
            surface.attached = true;
            surfaces.insert(*id, surface);

            let mut view = View::new(*id, *id);
            view.created = true;
            view.commit.geometry = *geometry;
            views.insert(*id, view);
            order.push(*id);
        }
        (order, views, surfaces)
    }

    #[test]
    fn test_visible_with_no_views() {
        let (order, views, surfaces) = arena(&[]);
        assert!(is_visible(Size::new(800, 600), &order, &views, &surfaces));
    }

    #[test]
    fn test_covered_by_fullscreen_opaque_view() {
        let (order, views, surfaces) = arena(&[(1, Geometry::new(0, 0, 800, 600), true)]);
        assert!(!is_visible(Size::new(800, 600), &order, &views, &surfaces));
    }

    #[test]
    fn test_visible_next_to_partial_opaque_view() {
        let (order, views, surfaces) = arena(&[(1, Geometry::new(0, 0, 400, 600), true)]);
        assert!(is_visible(Size::new(800, 600), &order, &views, &surfaces));
    }

    #[test]
    fn test_transparent_view_over_bare_background() {
        let (order, views, surfaces) = arena(&[(1, Geometry::new(100, 100, 200, 200), false)]);
        assert!(is_visible(Size::new(800, 600), &order, &views, &surfaces));
    }

    #[test]
    fn test_transparent_view_inside_opaque_cover() {
        let (order, views, surfaces) = arena(&[
            (1, Geometry::new(0, 0, 800, 600), true),
            (2, Geometry::new(100, 100, 200, 200), false),
        ]);
        assert!(!is_visible(Size::new(800, 600), &order, &views, &surfaces));
    }
}
