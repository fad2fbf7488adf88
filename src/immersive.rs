use crate::clock::{Clock, OneShotTimer};
use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_AUTO_HIDE_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Error)]
pub enum FullscreenError {
    #[error("fullscreen request was denied: {0}")]
    Denied(String),
    #[error("fullscreen request failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The platform side of fullscreen: whatever actually owns the window.
pub trait FullscreenHost {
    fn is_fullscreen(&self) -> bool;
    fn request_fullscreen(&mut self) -> Result<(), FullscreenError>;
    fn exit_fullscreen(&mut self) -> Result<(), FullscreenError>;
}

impl<H: FullscreenHost + ?Sized> FullscreenHost for Box<H> {
    fn is_fullscreen(&self) -> bool {
        (**self).is_fullscreen()
    }

    fn request_fullscreen(&mut self) -> Result<(), FullscreenError> {
        (**self).request_fullscreen()
    }

    fn exit_fullscreen(&mut self) -> Result<(), FullscreenError> {
        (**self).exit_fullscreen()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityState {
    pub ui_visible: bool,
    pub fullscreen: bool,
}

/// Decides whether reader chrome (header, footer, controls) is shown.
///
/// Manual actions always win over the auto-hide timer: every explicit
/// transition cancels it. The timer is owned here and only fires from
/// [`ImmersiveController::tick`].
pub struct ImmersiveController<H: FullscreenHost> {
    state: VisibilityState,
    host: H,
    clock: Arc<dyn Clock>,
    auto_hide_delay: Duration,
    hide_timer: OneShotTimer,
    last_scroll_offset: f64,
    is_scrolling: bool,
}

impl<H: FullscreenHost> ImmersiveController<H> {
    pub fn new(host: H, clock: Arc<dyn Clock>) -> Self {
        let fullscreen = host.is_fullscreen();
        Self {
            state: VisibilityState {
                ui_visible: true,
                fullscreen,
            },
            host,
            clock,
            auto_hide_delay: DEFAULT_AUTO_HIDE_DELAY,
            hide_timer: OneShotTimer::new(),
            last_scroll_offset: 0.0,
            is_scrolling: false,
        }
    }

    pub fn with_auto_hide_delay(mut self, delay: Duration) -> Self {
        self.auto_hide_delay = delay;
        self
    }

    /// Starts the scroll tracking from `offset`, e.g. a restored reading position.
    pub fn with_scroll_baseline(mut self, offset: f64) -> Self {
        self.last_scroll_offset = offset;
        self
    }

    pub fn state(&self) -> VisibilityState {
        self.state
    }

    pub fn is_ui_visible(&self) -> bool {
        self.state.ui_visible
    }

    pub fn is_fullscreen(&self) -> bool {
        self.state.fullscreen
    }

    pub fn has_pending_hide(&self) -> bool {
        self.hide_timer.is_pending()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn toggle_ui(&mut self) {
        self.hide_timer.cancel();
        self.state.ui_visible = !self.state.ui_visible;
    }

    pub fn show_ui(&mut self) {
        self.hide_timer.cancel();
        self.state.ui_visible = true;
    }

    pub fn hide_ui(&mut self) {
        self.hide_timer.cancel();
        self.state.ui_visible = false;
    }

    /// Samples the scroll position of the tracked container.
    pub fn handle_scroll(&mut self, offset: f64) {
        self.is_scrolling = true;

        if offset <= 0.0 {
            self.show_ui();
        } else if offset > self.last_scroll_offset {
            self.hide_ui();
        }
        // scrolling back up without reaching the top keeps the current state

        self.last_scroll_offset = offset;
    }

    pub fn handle_mouse_move(&mut self) {
        if !self.is_scrolling {
            self.state.ui_visible = true;
        }
        self.is_scrolling = false;
        self.hide_timer.schedule(self.clock.now(), self.auto_hide_delay);
    }

    /// Applies the platform's fullscreen state. Returns `true` if anything changed.
    pub fn handle_fullscreen_change(&mut self, is_fullscreen: bool) -> bool {
        if is_fullscreen == self.state.fullscreen && (is_fullscreen || self.state.ui_visible) {
            return false;
        }

        debug!("Fullscreen changed: {is_fullscreen}");
        self.state.fullscreen = is_fullscreen;
        if !is_fullscreen {
            // leaving fullscreen (e.g. Escape) must bring navigation back
            self.show_ui();
        }
        true
    }

    pub fn toggle_fullscreen(&mut self) {
        if self.state.fullscreen {
            match self.host.exit_fullscreen() {
                Ok(()) => {
                    self.handle_fullscreen_change(false);
                }
                Err(e) => error!("Failed to exit fullscreen: {e}"),
            }
        } else {
            match self.host.request_fullscreen() {
                Ok(()) => {
                    self.handle_fullscreen_change(true);
                }
                Err(e) => error!("Failed to enter fullscreen: {e}"),
            }
        }
    }

    /// Hides the chrome when the auto-hide delay has elapsed.
    pub fn tick(&mut self) -> bool {
        if self.hide_timer.fire_if_due(self.clock.now()) {
            self.state.ui_visible = false;
            return true;
        }
        false
    }

    pub fn teardown(&mut self) {
        self.hide_timer.cancel();
    }
}

impl<H: FullscreenHost> Drop for ImmersiveController<H> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeFullscreen, ManualClock};

    fn controller(host: FakeFullscreen) -> (ImmersiveController<FakeFullscreen>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ImmersiveController::new(host, clock.clone()), clock)
    }

    #[test]
    fn test_starts_visible() {
        let (immersive, _clock) = controller(FakeFullscreen::new());
        assert_eq!(
            immersive.state(),
            VisibilityState {
                ui_visible: true,
                fullscreen: false
            }
        );
    }

    #[test]
    fn test_manual_toggle_cancels_auto_hide() {
        let (mut immersive, clock) = controller(FakeFullscreen::new());
        immersive.handle_mouse_move();
        immersive.toggle_ui();
        immersive.toggle_ui();

        clock.advance_ms(10_000);
        assert!(!immersive.tick());
        assert!(immersive.is_ui_visible());
    }

    #[test]
    fn test_mouse_move_after_scroll_does_not_reveal() {
        let (mut immersive, clock) = controller(FakeFullscreen::new());
        immersive.handle_scroll(50.0);
        assert!(!immersive.is_ui_visible());

        immersive.handle_mouse_move();
        assert!(!immersive.is_ui_visible());

        immersive.handle_mouse_move();
        assert!(immersive.is_ui_visible());

        clock.advance_ms(3000);
        assert!(immersive.tick());
        assert!(!immersive.is_ui_visible());
    }

    #[test]
    fn test_scrolling_up_from_baseline_keeps_chrome() {
        let clock = Arc::new(ManualClock::new());
        let mut immersive =
            ImmersiveController::new(FakeFullscreen::new(), clock).with_scroll_baseline(30.0);

        immersive.handle_scroll(29.0);
        assert!(immersive.is_ui_visible());

        immersive.handle_scroll(31.0);
        assert!(!immersive.is_ui_visible());
    }

    #[test]
    fn test_enter_and_exit_fullscreen() {
        let (mut immersive, _clock) = controller(FakeFullscreen::new());
        immersive.hide_ui();

        immersive.toggle_fullscreen();
        assert!(immersive.is_fullscreen());
        assert!(immersive.host().is_fullscreen());
        assert!(!immersive.is_ui_visible());

        immersive.toggle_fullscreen();
        assert!(!immersive.is_fullscreen());
        assert!(immersive.is_ui_visible());
    }

    #[test]
    fn test_rejected_fullscreen_leaves_state() {
        let (mut immersive, _clock) = controller(FakeFullscreen::denying());
        immersive.toggle_fullscreen();
        assert!(!immersive.is_fullscreen());
    }

    #[test]
    fn test_escape_exit_forces_visible_and_is_idempotent() {
        let (mut immersive, _clock) = controller(FakeFullscreen::new());
        immersive.toggle_fullscreen();
        immersive.hide_ui();

        assert!(immersive.handle_fullscreen_change(false));
        assert!(immersive.is_ui_visible());
        assert!(!immersive.handle_fullscreen_change(false));
        assert!(!immersive.handle_fullscreen_change(false));
    }
}
