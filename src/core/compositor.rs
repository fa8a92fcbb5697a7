//! Compositor core state.
//!
//! `Compositor` is the single-threaded state the shared event loop
//! dispatches into: the output table, the surface and view arenas, pointer
//! placement, and the repaint entry points the per-output idle timers call.
//! Everything here runs on the event loop thread; there are no locks.
//!
//! Higher layers observe the core through [`CompositorEvent`] values pushed
//! into a shared sink and drained with [`Compositor::take_events`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use calloop::LoopHandle;
use wayland_server::DisplayHandle;

use crate::core::errors::{CoreError, Result};
use crate::core::output::{self, Output, OutputInformation, StackFactory};
use crate::core::surface::{Buffer, Surface};
use crate::core::view::View;
use crate::platform::backend::BackendSurface;
use crate::util::geometry::{Geometry, Point, Size};
use crate::util::logging::{OUTPUT, RENDER};

// ============================================================================
// Options and events
// ============================================================================

/// Tunables for the composition core.
#[derive(Debug, Clone)]
pub struct CompositorOptions {
    /// Whether the background layer is rendered where views leave it
    /// uncovered. When disabled the frame is cleared to a neutral color
    /// instead.
    pub enable_background: bool,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            enable_background: true,
        }
    }
}

/// Events the core emits for the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    /// An output's resolution changed.
    OutputResolution { output_id: u32, resolution: Size },
    /// A space gained focus on its output.
    SpaceActivated { output_id: u32, space_id: u32 },
    /// A terminating output finished its last frame and can be released.
    OutputRemove { output_id: u32 },
}

/// Shared event sink. Outputs hold a clone and push directly; the embedder
/// drains through [`Compositor::take_events`].
pub type EventSink = Rc<RefCell<Vec<CompositorEvent>>>;

/// Pointer placement as far as the render path cares: which output paints
/// it, which surface backs the cursor image, and where it sits.
#[derive(Debug, Default)]
pub struct PointerState {
    pub output: Option<u32>,
    pub surface: Option<u32>,
    pub position: Point,
}

// ============================================================================
// Compositor
// ============================================================================

pub struct Compositor {
    handle: LoopHandle<'static, Compositor>,
    display: DisplayHandle,
    options: CompositorOptions,
    stack_factory: StackFactory,
    events: EventSink,

    /// Whether the session is foreground. Repaints are skipped while
    /// inactive and resume on the next external event after reactivation.
    active: bool,

    pub outputs: HashMap<u32, Output>,
    pub surfaces: HashMap<u32, Surface>,
    pub views: HashMap<u32, View>,
    pub pointer: PointerState,

    next_output_id: u32,
    next_surface_id: u32,
    next_view_id: u32,
}

impl Compositor {
    pub fn new(
        handle: LoopHandle<'static, Compositor>,
        display: DisplayHandle,
        options: CompositorOptions,
        stack_factory: StackFactory,
    ) -> Self {
        Self {
            handle,
            display,
            options,
            stack_factory,
            events: Rc::new(RefCell::new(Vec::new())),
            active: true,
            outputs: HashMap::new(),
            surfaces: HashMap::new(),
            views: HashMap::new(),
            pointer: PointerState::default(),
            next_output_id: 1,
            next_surface_id: 1,
            next_view_id: 1,
        }
    }

    pub fn loop_handle(&self) -> &LoopHandle<'static, Compositor> {
        &self.handle
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    pub fn options(&self) -> &CompositorOptions {
        &self.options
    }

    pub fn active(&self) -> bool {
        self.active
    }

    /// Flip the session foreground flag. Activation schedules a repaint on
    /// every output, since pending activity may have been dropped while
    /// the session was in the background.
    pub fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        if active {
            self.schedule_repaint_all();
        }
    }

    /// Drain the pending event queue.
    pub fn take_events(&mut self) -> Vec<CompositorEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    // =========================================================================
    // Output lifecycle
    // =========================================================================

    /// Create an output from a backend surface and display information.
    ///
    /// Registers the `wl_output` global, builds the render stack, creates
    /// the initial space, and sets the resolution from the elected mode,
    /// which also schedules the first repaint. Bring-up failure releases
    /// everything allocated so far.
    pub fn create_output(
        &mut self,
        surface: BackendSurface,
        information: OutputInformation,
    ) -> Result<u32> {
        let id = self.next_output_id;
        self.next_output_id += 1;

        let mut output = Output::new(
            id,
            self.handle.clone(),
            &self.display,
            self.events.clone(),
            information,
        );

        if let Err(err) = output.set_surface(Some(surface), &self.stack_factory) {
            output.destroy(&self.display);
            return Err(err);
        }

        if let Some(mode) = output
            .mode_index
            .and_then(|index| output.information.modes.get(index))
            .copied()
        {
            output.set_resolution(Size::new(mode.width as u32, mode.height as u32));
        }

        tracing::info!(
            target: OUTPUT,
            "output {}: created ({}x{}, {} mode(s))",
            id,
            output.resolution.w,
            output.resolution.h,
            output.information.modes.len()
        );

        self.outputs.insert(id, output);
        Ok(id)
    }

    /// Tear an output down. Surfaces the output's renderer still owned
    /// lose their owner relation; their GPU resources die with the
    /// renderer.
    pub fn destroy_output(&mut self, output_id: u32) {
        let Some(mut output) = self.outputs.remove(&output_id) else {
            return;
        };

        for surface in self.surfaces.values_mut() {
            if surface.output == Some(output_id) {
                surface.output = None;
            }
        }

        output.destroy(&self.display);
    }

    /// Request a repaint of one output.
    pub fn schedule_repaint(&mut self, output_id: u32) {
        if let Some(output) = self.outputs.get_mut(&output_id) {
            output.schedule_repaint();
        }
    }

    pub fn schedule_repaint_all(&mut self) {
        for output in self.outputs.values_mut() {
            output.schedule_repaint();
        }
    }

    // =========================================================================
    // Arenas
    // =========================================================================

    pub fn create_surface(&mut self) -> u32 {
        let id = self.next_surface_id;
        self.next_surface_id += 1;
        self.surfaces.insert(id, Surface::new(id));
        id
    }

    /// Drop a surface from the arena, releasing renderer resources on its
    /// owning output first and unlinking any views that present it.
    pub fn destroy_surface(&mut self, surface_id: u32) {
        if let Some(owner) = self.surfaces.get(&surface_id).and_then(|s| s.output) {
            self.output_surface_destroy(owner, surface_id);
        }
        self.surfaces.remove(&surface_id);

        let orphaned: Vec<u32> = self
            .views
            .iter()
            .filter(|(_, view)| view.surface == surface_id)
            .map(|(id, _)| *id)
            .collect();
        for view_id in orphaned {
            self.destroy_view(view_id);
        }
    }

    pub fn create_view(&mut self, surface_id: u32) -> u32 {
        let id = self.next_view_id;
        self.next_view_id += 1;
        self.views.insert(id, View::new(id, surface_id));
        id
    }

    pub fn destroy_view(&mut self, view_id: u32) {
        self.views.remove(&view_id);
        for output in self.outputs.values_mut() {
            output.remove_view(view_id);
        }
    }

    // =========================================================================
    // Surface migration
    // =========================================================================

    /// Attach a surface (with its committed buffer) to an output.
    ///
    /// A surface attached to a different output is destroyed there first,
    /// so it holds GPU resources on at most one output at any instant.
    /// Failure leaves no partial state behind.
    pub fn output_surface_attach(
        &mut self,
        output_id: u32,
        surface_id: u32,
        buffer: &Buffer,
    ) -> bool {
        let Some(previous) = self.surfaces.get(&surface_id).map(|s| s.output) else {
            return false;
        };
        if let Some(previous) = previous {
            if previous != output_id {
                self.output_surface_destroy(previous, surface_id);
            }
        }

        let Some(output) = self.outputs.get_mut(&output_id) else {
            return false;
        };

        let attached = match output.stack.as_mut() {
            Some(stack) => stack.renderer.surface_attach(surface_id, buffer),
            None => false,
        };
        if !attached {
            return false;
        }

        if let Some(surface) = self.surfaces.get_mut(&surface_id) {
            surface.output = Some(output_id);
            surface.attached = true;
        }

        tracing::trace!(
            target: RENDER,
            "surface {} attached to output {}",
            surface_id,
            output_id
        );
        output.schedule_repaint();
        true
    }

    /// Release a surface's renderer resources on an output and clear the
    /// owner relation. Detaches the pointer if it tracked this surface.
    pub fn output_surface_destroy(&mut self, output_id: u32, surface_id: u32) {
        if self.pointer.surface == Some(surface_id) {
            self.pointer.surface = None;
        }

        if let Some(output) = self.outputs.get_mut(&output_id) {
            if let Some(stack) = output.stack.as_mut() {
                stack.renderer.surface_destroy(surface_id);
            }
            output.schedule_repaint();
        }

        if let Some(surface) = self.surfaces.get_mut(&surface_id) {
            surface.output = None;
        }

        tracing::trace!(
            target: RENDER,
            "surface {} released from output {}",
            surface_id,
            output_id
        );
    }

    // =========================================================================
    // Repaint loop
    // =========================================================================

    /// Idle timer callback: the arming has fired, run the repaint.
    pub(crate) fn on_idle_timer(&mut self, output_id: u32) {
        if let Some(output) = self.outputs.get_mut(&output_id) {
            output.timer.fired();
        }
        self.repaint(output_id);
    }

    /// Render one frame of one output.
    ///
    /// Skips (and deliberately drops the pending activity) while the
    /// session is inactive, a flip is outstanding, the render stack is
    /// absent, or the renderer refuses to bind; `finish_frame` re-arms
    /// once the blocking condition clears.
    pub fn repaint(&mut self, output_id: u32) -> bool {
        let enable_background = self.options.enable_background;
        let active = self.active;

        let Some(output) = self.outputs.get_mut(&output_id) else {
            return false;
        };

        if !active || !output.ready() {
            tracing::trace!(target: RENDER, "output {}: skipped repaint", output_id);
            output.activity = false;
            output.scheduled = false;
            return false;
        }

        let resolution = output.resolution;
        let frame_time = output.frame_time_ms;
        let space_views: Vec<u32> = output
            .focused_space()
            .map(|space| space.views().to_vec())
            .unwrap_or_default();

        let pointer_position =
            (self.pointer.output == Some(output_id)).then_some(self.pointer.position);

        let Some(stack) = output.stack.as_mut() else {
            output.activity = false;
            output.scheduled = false;
            return false;
        };

        if !stack.renderer.bind(output_id, resolution) {
            tracing::trace!(
                target: RENDER,
                "output {}: {}",
                output_id,
                CoreError::RendererBindFailed(output_id)
            );
            output.activity = false;
            output.scheduled = false;
            return false;
        }

        stack.renderer.time(frame_time);

        if enable_background
            && !output.background_visible
            && output::is_visible(resolution, &space_views, &self.views, &self.surfaces)
        {
            tracing::trace!(target: RENDER, "output {}: background visible", output_id);
            output.background_visible = true;
        }

        if output.background_visible {
            stack.renderer.background();
        } else if !enable_background {
            stack.renderer.clear();
        }

        // Commit and paint back-to-front; collect the frame callbacks each
        // painted view staged, to be signaled once this swap has flipped.
        let mut callbacks = Vec::new();
        for view_id in &space_views {
            let Some(view) = self.views.get_mut(view_id) else {
                continue;
            };
            if !view.created {
                continue;
            }
            let Some(surface) = self.surfaces.get_mut(&view.surface) else {
                continue;
            };
            if !surface.attached {
                continue;
            }

            view.commit_state();
            stack.renderer.view_paint(view);
            callbacks.extend(surface.take_frame_callbacks());
        }

        if let Some(position) = pointer_position {
            stack.renderer.pointer_paint(position);
        }

        if output.pixels_task.is_some() {
            let geometry = Geometry {
                origin: Point::new(0, 0),
                size: resolution,
            };
            let len = resolution.w as usize * resolution.h as usize * 4;
            let mut rgba = Vec::new();
            if rgba.try_reserve_exact(len).is_ok() {
                rgba.resize(len, 0);
                stack.renderer.read_pixels(geometry, &mut rgba);
                if let Some(task) = output.pixels_task.take() {
                    task.done(resolution, rgba);
                }
            } else {
                tracing::warn!(
                    target: RENDER,
                    "output {}: {}",
                    output_id,
                    CoreError::AllocationFailed(len)
                );
            }
        }

        // The arming that got us here is consumed; while the flip is
        // outstanding nothing is scheduled until finish_frame re-arms.
        output.pending_flip = true;
        output.scheduled = false;
        stack.renderer.swap();

        output.pending_callbacks.append(&mut callbacks);

        tracing::trace!(target: RENDER, "output {}: repainted", output_id);
        true
    }

    /// Page-flip completion, driven by the backend.
    ///
    /// Stores the flip timestamp as the output's frame time, signals the
    /// frame callbacks collected at the matching repaint, re-evaluates
    /// background visibility, and adapts the idle interval: activity pulls
    /// it toward the 1ms floor, idleness backs it off toward the 41ms
    /// ceiling.
    pub fn finish_frame(&mut self, output_id: u32, ts: Duration) {
        let enable_background = self.options.enable_background;

        let Some(output) = self.outputs.get_mut(&output_id) else {
            return;
        };

        output.pending_flip = false;

        let last = output.frame_time_ms;
        output.frame_time_ms = output::timestamp_ms(ts);
        let delta_ms = output.frame_time_ms.wrapping_sub(last);

        let frame_time = output.frame_time_ms;
        let callbacks: Vec<_> = output.pending_callbacks.drain(..).collect();
        for callback in callbacks {
            callback.done(frame_time);
        }

        if enable_background && output.background_visible {
            let space_views: Vec<u32> = output
                .focused_space()
                .map(|space| space.views().to_vec())
                .unwrap_or_default();
            if !output::is_visible(output.resolution, &space_views, &self.views, &self.surfaces) {
                tracing::trace!(target: RENDER, "output {}: background not visible", output_id);
                output.background_visible = false;
            }
        }

        if (output.background_visible || output.activity) && !output.terminating {
            let factor = if output.activity { 0.9 } else { 1.1 };
            output.idle_interval_ms = (output.idle_interval_ms * factor)
                .clamp(output::IDLE_INTERVAL_MIN_MS, output::IDLE_INTERVAL_MAX_MS);
            tracing::trace!(
                target: RENDER,
                "output {}: idle interval {:.2}ms ({}ms : {})",
                output_id,
                output.idle_interval_ms,
                delta_ms,
                output.activity
            );
            output.timer.arm(output.idle_interval_ms);
            output.scheduled = true;
            output.activity = false;
        } else {
            output.scheduled = false;
        }

        tracing::trace!(target: RENDER, "output {}: finished frame", output_id);

        if output.terminating {
            self.events
                .borrow_mut()
                .push(CompositorEvent::OutputRemove { output_id });
            output.terminating = false;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::os::raw::c_void;
    use std::os::unix::io::RawFd;
    use std::ptr;
    use std::rc::Rc;

    use calloop::EventLoop;
    use wayland_server::protocol::wl_output::Mode;
    use wayland_server::Display;

    use crate::core::output::OutputMode;
    use crate::core::render::Renderer;
    use crate::core::surface::FrameCallback;
    use crate::platform::backend::{Backend, BackendSurface};
    use crate::platform::context::{Context, NativeContext};

    struct FakeBackend;

    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        fn display(&self) -> *mut c_void {
            ptr::null_mut()
        }
        fn window(&self) -> *mut c_void {
            ptr::null_mut()
        }
        fn poll_events(&mut self) {}
        fn event_fd(&self) -> Option<RawFd> {
            None
        }
    }

    struct FakeNative;

    impl NativeContext for FakeNative {
        fn make_current(&mut self) -> crate::core::errors::Result<()> {
            Ok(())
        }
        fn swap(&mut self) {}
        fn poll_events(&mut self) {}
        fn event_fd(&self) -> Option<RawFd> {
            None
        }
        fn terminate(&mut self) {}
    }

    struct RenderLog {
        ops: Vec<&'static str>,
        binds: u32,
        swaps: u32,
        bind_ok: bool,
        attach_ok: bool,
        painted: Vec<u32>,
        attached: Vec<u32>,
        destroyed: Vec<u32>,
    }

    impl RenderLog {
        fn new() -> Self {
            Self {
                ops: Vec::new(),
                binds: 0,
                swaps: 0,
                bind_ok: true,
                attach_ok: true,
                painted: Vec::new(),
                attached: Vec::new(),
                destroyed: Vec::new(),
            }
        }
    }

    struct FakeRenderer {
        log: Rc<RefCell<RenderLog>>,
    }

    impl Renderer for FakeRenderer {
        fn bind(&mut self, _output_id: u32, _resolution: Size) -> bool {
            let mut log = self.log.borrow_mut();
            log.binds += 1;
            log.ops.push("bind");
            log.bind_ok
        }
        fn time(&mut self, _frame_time_ms: u32) {
            self.log.borrow_mut().ops.push("time");
        }
        fn background(&mut self) {
            self.log.borrow_mut().ops.push("background");
        }
        fn clear(&mut self) {
            self.log.borrow_mut().ops.push("clear");
        }
        fn view_paint(&mut self, view: &View) {
            let mut log = self.log.borrow_mut();
            log.painted.push(view.id);
            log.ops.push("view_paint");
        }
        fn pointer_paint(&mut self, _position: Point) {
            self.log.borrow_mut().ops.push("pointer_paint");
        }
        fn swap(&mut self) {
            let mut log = self.log.borrow_mut();
            log.swaps += 1;
            log.ops.push("swap");
        }
        fn surface_attach(&mut self, surface_id: u32, _buffer: &Buffer) -> bool {
            let mut log = self.log.borrow_mut();
            log.attached.push(surface_id);
            log.attach_ok
        }
        fn surface_destroy(&mut self, surface_id: u32) {
            self.log.borrow_mut().destroyed.push(surface_id);
        }
        fn read_pixels(&mut self, _geometry: Geometry, rgba: &mut [u8]) {
            self.log.borrow_mut().ops.push("read_pixels");
            rgba.fill(0xAB);
        }
    }

    struct Harness {
        event_loop: EventLoop<'static, Compositor>,
        _display: Display<Compositor>,
        compositor: Compositor,
        logs: Rc<RefCell<Vec<Rc<RefCell<RenderLog>>>>>,
    }

    fn harness(options: CompositorOptions) -> Harness {
        let event_loop = EventLoop::try_new().unwrap();
        let display = Display::<Compositor>::new().unwrap();

        let logs: Rc<RefCell<Vec<Rc<RefCell<RenderLog>>>>> = Rc::new(RefCell::new(Vec::new()));
        let factory_logs = logs.clone();
        let factory = StackFactory {
            context: Box::new(|_surface| Ok(Context::from_native(Box::new(FakeNative)))),
            renderer: Box::new(move |_context| {
                let log = Rc::new(RefCell::new(RenderLog::new()));
                factory_logs.borrow_mut().push(log.clone());
                Ok(Box::new(FakeRenderer { log }) as Box<dyn Renderer>)
            }),
        };

        let compositor = Compositor::new(event_loop.handle(), display.handle(), options, factory);

        Harness {
            event_loop,
            _display: display,
            compositor,
            logs,
        }
    }

    impl Harness {
        fn new_output(&mut self) -> u32 {
            let mut information = OutputInformation::default();
            information.make = "fake".to_string();
            information.model = "display".to_string();
            information.add_mode(OutputMode::new(Mode::Current, 800, 600, 60000));
            self.compositor
                .create_output(BackendSurface::new(Box::new(FakeBackend)), information)
                .unwrap()
        }

        fn log(&self, index: usize) -> Rc<RefCell<RenderLog>> {
            self.logs.borrow()[index].clone()
        }

        fn dispatch(&mut self, ms: u64) {
            self.event_loop
                .dispatch(Some(Duration::from_millis(ms)), &mut self.compositor)
                .unwrap();
        }

        /// Attach a created view presenting an attached surface to the
        /// focused space of `output_id`.
        fn new_view(&mut self, output_id: u32, geometry: Geometry, opaque: bool) -> (u32, u32) {
            let surface_id = self.compositor.create_surface();
            {
                let surface = self.compositor.surfaces.get_mut(&surface_id).unwrap();
                surface.attached = true;
                surface.opaque = opaque;
            }
            let view_id = self.compositor.create_view(surface_id);
            {
                let view = self.compositor.views.get_mut(&view_id).unwrap();
                view.created = true;
                view.pending.geometry = geometry;
            }
            let output = self.compositor.outputs.get_mut(&output_id).unwrap();
            let space_id = output.focused_space_id().unwrap();
            output.space_mut(space_id).unwrap().add_view(view_id);
            (surface_id, view_id)
        }
    }

    #[test]
    fn test_create_output_schedules_first_repaint() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        let output = h.compositor.outputs.get(&id).unwrap();
        assert_eq!(output.resolution, Size::new(800, 600));
        assert!(output.activity);
        assert!(output.scheduled);

        let events = h.compositor.take_events();
        assert_eq!(
            events,
            vec![CompositorEvent::OutputResolution {
                output_id: id,
                resolution: Size::new(800, 600),
            }]
        );

        h.dispatch(50);
        let log = h.log(0);
        assert_eq!(log.borrow().binds, 1);
        assert_eq!(log.borrow().swaps, 1);
        assert!(h.compositor.outputs.get(&id).unwrap().pending_flip);
        // Background is on and nothing covers the root.
        assert!(log.borrow().ops.contains(&"background"));
    }

    #[test]
    fn test_schedule_repaint_coalesces_bursts() {
        let mut h = harness(CompositorOptions {
            enable_background: false,
        });
        let id = h.new_output();

        h.dispatch(50);
        assert_eq!(h.log(0).borrow().swaps, 1);
        h.compositor.finish_frame(id, Duration::from_millis(16));

        for _ in 0..1000 {
            h.compositor.schedule_repaint(id);
        }

        h.dispatch(60);
        let log = h.log(0);
        assert_eq!(log.borrow().binds, 2);
        assert_eq!(log.borrow().swaps, 2);

        // The flip is outstanding; nothing further renders until it lands.
        h.compositor.schedule_repaint(id);
        h.dispatch(10);
        assert_eq!(log.borrow().swaps, 2);
    }

    #[test]
    fn test_pending_flip_short_circuits_and_finish_frame_rearms() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        h.dispatch(50);
        {
            let output = h.compositor.outputs.get(&id).unwrap();
            assert!(output.pending_flip);
            assert!(!output.scheduled);
        }

        // Activity while the flip is outstanding arms the timer; the
        // resulting repaint short-circuits and drops the activity.
        h.compositor.schedule_repaint(id);
        assert!(h.compositor.outputs.get(&id).unwrap().scheduled);
        h.dispatch(20);
        {
            let output = h.compositor.outputs.get(&id).unwrap();
            assert!(!output.activity);
            assert!(!output.scheduled);
        }
        assert_eq!(h.log(0).borrow().swaps, 1);

        // The background is visible, so the flip re-arms the idle loop.
        h.compositor.finish_frame(id, Duration::from_millis(16));
        assert!(h.compositor.outputs.get(&id).unwrap().scheduled);
        h.dispatch(60);
        assert_eq!(h.log(0).borrow().swaps, 2);
    }

    #[test]
    fn test_idle_interval_decays_toward_floor_under_activity() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        for frame in 0..100u64 {
            let output = h.compositor.outputs.get_mut(&id).unwrap();
            output.activity = true;
            h.compositor
                .finish_frame(id, Duration::from_millis(16 * (frame + 1)));
        }

        let interval = h.compositor.outputs.get(&id).unwrap().idle_interval_ms;
        assert!(interval >= 1.0);
        assert!(interval <= 2.0);
    }

    #[test]
    fn test_idle_interval_saturates_at_ceiling_when_idle() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        {
            let output = h.compositor.outputs.get_mut(&id).unwrap();
            output.idle_interval_ms = 1.0;
            output.background_visible = true;
            output.activity = false;
        }

        for frame in 0..100u64 {
            h.compositor
                .finish_frame(id, Duration::from_millis(16 * (frame + 1)));
        }

        let output = h.compositor.outputs.get(&id).unwrap();
        assert_eq!(output.idle_interval_ms, 41.0);
        assert!(output.scheduled);
    }

    #[test]
    fn test_frame_callback_signaled_with_flip_timestamp() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        let (surface_id, view_id) = h.new_view(id, Geometry::new(0, 0, 400, 300), true);

        let times: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = times.clone();
        h.compositor
            .surfaces
            .get_mut(&surface_id)
            .unwrap()
            .request_frame(FrameCallback::new(move |t| sink.borrow_mut().push(t)));

        h.dispatch(50);
        assert_eq!(h.log(0).borrow().painted, vec![view_id]);
        // Collected at repaint, not yet signaled.
        assert!(times.borrow().is_empty());
        assert!(h
            .compositor
            .surfaces
            .get(&surface_id)
            .unwrap()
            .frame_callbacks
            .is_empty());

        h.compositor.finish_frame(id, Duration::from_millis(16));
        assert_eq!(*times.borrow(), vec![16]);

        // Signaled exactly once.
        h.compositor.finish_frame(id, Duration::from_millis(17));
        assert_eq!(*times.borrow(), vec![16]);
    }

    #[test]
    fn test_pixel_readback_fires_once_before_swap() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        let results: Rc<RefCell<Vec<(Size, usize, u8)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        h.compositor
            .outputs
            .get_mut(&id)
            .unwrap()
            .get_pixels(move |size, rgba| sink.borrow_mut().push((size, rgba.len(), rgba[0])));

        // A second request while one is pending is silently ignored.
        let ignored = Rc::new(RefCell::new(false));
        let flag = ignored.clone();
        h.compositor
            .outputs
            .get_mut(&id)
            .unwrap()
            .get_pixels(move |_, _| *flag.borrow_mut() = true);

        h.dispatch(50);

        assert_eq!(
            *results.borrow(),
            vec![(Size::new(800, 600), 800 * 600 * 4, 0xAB)]
        );
        assert!(!*ignored.borrow());

        let log = h.log(0);
        let ops = log.borrow().ops.clone();
        let read_at = ops.iter().position(|op| *op == "read_pixels").unwrap();
        let swap_at = ops.iter().position(|op| *op == "swap").unwrap();
        assert!(read_at < swap_at);
    }

    #[test]
    fn test_surface_migration_between_outputs() {
        let mut h = harness(CompositorOptions::default());
        let a = h.new_output();
        let b = h.new_output();

        let surface_id = h.compositor.create_surface();
        let buffer = Buffer::new(1, Size::new(128, 128));

        assert!(h.compositor.output_surface_attach(a, surface_id, &buffer));
        assert_eq!(
            h.compositor.surfaces.get(&surface_id).unwrap().output,
            Some(a)
        );
        assert_eq!(h.log(0).borrow().attached, vec![surface_id]);

        {
            let outputs = &mut h.compositor.outputs;
            outputs.get_mut(&a).unwrap().activity = false;
            outputs.get_mut(&b).unwrap().activity = false;
        }

        assert!(h.compositor.output_surface_attach(b, surface_id, &buffer));
        assert_eq!(h.log(0).borrow().destroyed, vec![surface_id]);
        assert_eq!(h.log(1).borrow().attached, vec![surface_id]);
        assert_eq!(
            h.compositor.surfaces.get(&surface_id).unwrap().output,
            Some(b)
        );
        assert!(h.compositor.outputs.get(&a).unwrap().activity);
        assert!(h.compositor.outputs.get(&b).unwrap().activity);
    }

    #[test]
    fn test_terminate_emits_remove_exactly_once() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        h.compositor.take_events();

        h.compositor.outputs.get_mut(&id).unwrap().terminate();
        h.dispatch(50);
        assert_eq!(h.log(0).borrow().swaps, 1);
        assert!(h.compositor.take_events().is_empty());

        h.compositor.finish_frame(id, Duration::from_millis(16));
        assert_eq!(
            h.compositor.take_events(),
            vec![CompositorEvent::OutputRemove { output_id: id }]
        );
        let output = h.compositor.outputs.get(&id).unwrap();
        assert!(!output.terminating);
        // Termination suppresses the idle re-arm.
        assert!(!output.scheduled);

        h.compositor.finish_frame(id, Duration::from_millis(17));
        assert!(h.compositor.take_events().is_empty());
    }

    #[test]
    fn test_inactive_session_skips_frames() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        h.compositor.set_active(false);

        h.dispatch(20);
        let log = h.log(0);
        assert_eq!(log.borrow().swaps, 0);
        {
            let output = h.compositor.outputs.get(&id).unwrap();
            assert!(!output.activity);
            assert!(!output.scheduled);
        }

        // Reactivation schedules every output again.
        h.compositor.set_active(true);
        assert!(h.compositor.outputs.get(&id).unwrap().scheduled);
        h.dispatch(50);
        assert_eq!(log.borrow().swaps, 1);
    }

    #[test]
    fn test_renderer_bind_failure_skips_frame() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        h.log(0).borrow_mut().bind_ok = false;

        h.dispatch(50);
        let log = h.log(0);
        assert_eq!(log.borrow().binds, 1);
        assert_eq!(log.borrow().swaps, 0);
        assert!(!h.compositor.outputs.get(&id).unwrap().scheduled);

        // A later external event retries.
        log.borrow_mut().bind_ok = true;
        h.compositor.schedule_repaint(id);
        h.dispatch(50);
        assert_eq!(log.borrow().swaps, 1);
    }

    #[test]
    fn test_set_surface_failure_rolls_back_to_absent_stack() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();

        let failing = StackFactory {
            context: Box::new(|_surface| Ok(Context::from_native(Box::new(FakeNative)))),
            renderer: Box::new(|_context| {
                Err(CoreError::ContextCreateFailed("no renderer".to_string()))
            }),
        };

        let output = h.compositor.outputs.get_mut(&id).unwrap();
        assert!(output
            .set_surface(Some(BackendSurface::new(Box::new(FakeBackend))), &failing)
            .is_err());
        assert!(output.stack.is_none());

        // Absent over absent is a no-op.
        assert!(output.set_surface(None, &failing).is_ok());
        assert!(output.stack.is_none());

        // Without a stack the repaint path only clears its state.
        h.compositor.schedule_repaint(id);
        h.dispatch(20);
        let output = h.compositor.outputs.get(&id).unwrap();
        assert!(!output.activity);
        assert!(!output.pending_flip);
    }

    #[test]
    fn test_space_focus_and_removal() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        h.compositor.take_events();

        let output = h.compositor.outputs.get_mut(&id).unwrap();
        let first = output.focused_space_id().unwrap();
        let second = output.add_space();
        let third = output.add_space();
        assert_eq!(output.spaces().len(), 3);

        output.focus_space(second);
        assert_eq!(output.focused_space_id(), Some(second));
        output.focus_space(second);
        assert_eq!(
            h.compositor.take_events(),
            vec![CompositorEvent::SpaceActivated {
                output_id: id,
                space_id: second,
            }]
        );

        // Removing the focused space focuses its previous sibling.
        let output = h.compositor.outputs.get_mut(&id).unwrap();
        output.remove_space(second);
        assert_eq!(output.focused_space_id(), Some(first));

        // Removing a focused head focuses the new head.
        output.remove_space(first);
        assert_eq!(output.focused_space_id(), Some(third));

        output.remove_space(third);
        assert_eq!(output.focused_space_id(), None);
        assert!(output.spaces().is_empty());
    }

    #[test]
    fn test_set_resolution_is_edge_triggered() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        h.compositor.take_events();

        let output = h.compositor.outputs.get_mut(&id).unwrap();
        output.set_resolution(Size::new(800, 600));
        assert!(h.compositor.take_events().is_empty());

        let output = h.compositor.outputs.get_mut(&id).unwrap();
        output.set_resolution(Size::new(1024, 768));
        assert_eq!(
            h.compositor.take_events(),
            vec![CompositorEvent::OutputResolution {
                output_id: id,
                resolution: Size::new(1024, 768),
            }]
        );
    }

    #[test]
    fn test_destroy_output_releases_owner_relation() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        let surface_id = h.compositor.create_surface();
        let buffer = Buffer::new(1, Size::new(64, 64));
        assert!(h.compositor.output_surface_attach(id, surface_id, &buffer));

        h.compositor.destroy_output(id);
        assert!(h.compositor.outputs.is_empty());
        assert_eq!(h.compositor.surfaces.get(&surface_id).unwrap().output, None);

        // The idle timer is gone with the output.
        h.dispatch(10);
    }

    #[test]
    fn test_pointer_detached_when_surface_leaves_output() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        let surface_id = h.compositor.create_surface();
        let buffer = Buffer::new(1, Size::new(64, 64));
        assert!(h.compositor.output_surface_attach(id, surface_id, &buffer));

        h.compositor.pointer.surface = Some(surface_id);
        h.compositor.output_surface_destroy(id, surface_id);
        assert_eq!(h.compositor.pointer.surface, None);
    }

    #[test]
    fn test_destroy_surface_unlinks_views() {
        let mut h = harness(CompositorOptions::default());
        let id = h.new_output();
        let (surface_id, view_id) = h.new_view(id, Geometry::new(0, 0, 100, 100), true);

        h.compositor.destroy_surface(surface_id);
        assert!(!h.compositor.views.contains_key(&view_id));
        let output = h.compositor.outputs.get(&id).unwrap();
        assert!(output.focused_space().unwrap().views().is_empty());
    }
}
