//! Transcript scroll / unread-affordance decisions.
//!
//! Pure state machine: the UI feeds it viewport measurements and
//! new-message events, it answers with what to do. Keeping it free of
//! any rendering framework is what makes the behavior testable.

use murmur_shared::constants::SCROLL_BOTTOM_THRESHOLD_PX;

/// What the transcript view should do in response to an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Scroll to the bottom to reveal the newest message.
    AutoScroll,
    /// Leave the viewport alone and show the unread indicator.
    ShowIndicator { unread: u32 },
    /// Remove the unread indicator; the user reached the bottom on
    /// their own.
    HideIndicator,
    /// Nothing to do.
    None,
}

/// Per-transcript scroll state.
#[derive(Debug, Clone)]
pub struct ScrollController {
    threshold_px: f64,
    at_bottom: bool,
    unread: u32,
}

impl ScrollController {
    pub fn new() -> Self {
        Self::with_threshold(SCROLL_BOTTOM_THRESHOLD_PX)
    }

    pub fn with_threshold(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            // A freshly opened transcript starts pinned to the bottom.
            at_bottom: true,
            unread: 0,
        }
    }

    pub fn at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    /// The viewport moved; `distance_from_bottom` is in pixels.
    ///
    /// Scrolling down to the bottom clears the unread state without
    /// requiring a click on the indicator.
    pub fn on_scroll(&mut self, distance_from_bottom: f64) -> ScrollAction {
        self.at_bottom = distance_from_bottom <= self.threshold_px;
        if self.at_bottom && self.unread > 0 {
            self.unread = 0;
            return ScrollAction::HideIndicator;
        }
        ScrollAction::None
    }

    /// A new inbound message landed in the open conversation.
    pub fn on_new_message(&mut self) -> ScrollAction {
        if self.at_bottom {
            ScrollAction::AutoScroll
        } else {
            self.unread += 1;
            ScrollAction::ShowIndicator {
                unread: self.unread,
            }
        }
    }

    /// The user clicked the unread indicator.
    pub fn on_indicator_clicked(&mut self) -> ScrollAction {
        self.unread = 0;
        self.at_bottom = true;
        ScrollAction::AutoScroll
    }
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_bottom_auto_scrolls() {
        let mut scroll = ScrollController::new();
        assert_eq!(scroll.on_new_message(), ScrollAction::AutoScroll);
        assert_eq!(scroll.unread(), 0);
    }

    #[test]
    fn within_threshold_counts_as_bottom() {
        let mut scroll = ScrollController::new();
        scroll.on_scroll(9.5);
        assert!(scroll.at_bottom());
        assert_eq!(scroll.on_new_message(), ScrollAction::AutoScroll);
    }

    #[test]
    fn scrolled_up_accumulates_unread() {
        let mut scroll = ScrollController::new();
        scroll.on_scroll(400.0);
        assert_eq!(
            scroll.on_new_message(),
            ScrollAction::ShowIndicator { unread: 1 }
        );
        assert_eq!(
            scroll.on_new_message(),
            ScrollAction::ShowIndicator { unread: 2 }
        );
    }

    #[test]
    fn indicator_click_jumps_and_clears() {
        let mut scroll = ScrollController::new();
        scroll.on_scroll(400.0);
        scroll.on_new_message();
        assert_eq!(scroll.on_indicator_clicked(), ScrollAction::AutoScroll);
        assert_eq!(scroll.unread(), 0);
        assert!(scroll.at_bottom());
    }

    #[test]
    fn manual_scroll_to_bottom_clears_without_click() {
        let mut scroll = ScrollController::new();
        scroll.on_scroll(400.0);
        scroll.on_new_message();
        scroll.on_new_message();
        assert_eq!(scroll.on_scroll(0.0), ScrollAction::HideIndicator);
        assert_eq!(scroll.unread(), 0);
        assert_eq!(scroll.on_new_message(), ScrollAction::AutoScroll);
    }
}
