//! Per-output idle timer over the shared event loop.

use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};

use crate::core::compositor::Compositor;
use crate::util::logging::RENDER;

/// A re-armable one-shot timer driving one output's repaint loop.
///
/// Each arming replaces the previous one. When the timer fires it invokes
/// [`Compositor::on_idle_timer`] for the owning output and unregisters
/// itself; re-arming is the scheduler's job.
pub struct IdleTimer {
    handle: LoopHandle<'static, Compositor>,
    token: Option<RegistrationToken>,
    output_id: u32,
}

impl IdleTimer {
    pub fn new(handle: LoopHandle<'static, Compositor>, output_id: u32) -> Self {
        Self {
            handle,
            token: None,
            output_id,
        }
    }

    /// Arm the timer to fire once in `ms` milliseconds.
    ///
    /// Fractional intervals are truncated to whole milliseconds when armed;
    /// the scheduler keeps the fractional value for its own accumulation.
    pub fn arm(&mut self, ms: f64) {
        self.disarm();

        let output_id = self.output_id;
        let timer = Timer::from_duration(Duration::from_millis(ms as u64));
        match self.handle.insert_source(timer, move |_, _, compositor: &mut Compositor| {
            compositor.on_idle_timer(output_id);
            TimeoutAction::Drop
        }) {
            Ok(token) => self.token = Some(token),
            Err(err) => {
                tracing::warn!(target: RENDER, "output {}: failed to arm idle timer: {}", output_id, err);
            }
        }
    }

    /// Cancel a pending arming, if any.
    pub fn disarm(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.remove(token);
        }
    }

    /// Note that the armed source has fired and unregistered itself.
    pub fn fired(&mut self) {
        self.token = None;
    }

    /// Whether an arming is pending.
    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }
}

impl std::fmt::Debug for IdleTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimer")
            .field("output_id", &self.output_id)
            .field("armed", &self.token.is_some())
            .finish()
    }
}
