//! Typing indicator debouncing.
//!
//! One start-typing signal per burst of keystrokes; a stop-typing signal
//! after three seconds of idle, or immediately on input blur and
//! conversation close. This bounds the signal rate to collaborators while
//! still feeling responsive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Idle period after the last keystroke before stop-typing fires.
pub(crate) const TYPING_IDLE: Duration = Duration::from_secs(3);

#[derive(Default)]
struct TypingInner {
    active: bool,
    generation: u64,
}

/// Debounce state for one conversation's local typing indicator.
///
/// Each keystroke bumps the generation; an idle timer only fires its stop
/// signal if no later keystroke superseded it.
#[derive(Clone, Default)]
pub(crate) struct TypingSignal {
    inner: Arc<Mutex<TypingInner>>,
}

impl TypingSignal {
    /// Record a keystroke. Returns `(emit_start, generation)`: whether a
    /// start-typing signal is due, and the generation to hand to the idle
    /// timer.
    pub(crate) fn keystroke(&self) -> (bool, u64) {
        let Ok(mut inner) = self.inner.lock() else {
            return (false, 0);
        };
        inner.generation += 1;
        let emit_start = !inner.active;
        inner.active = true;
        (emit_start, inner.generation)
    }

    /// The idle timer for `generation` elapsed. Returns whether a
    /// stop-typing signal is due (false when a later keystroke superseded
    /// the timer).
    pub(crate) fn idle_elapsed(&self, generation: u64) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.active && inner.generation == generation {
            inner.active = false;
            true
        } else {
            false
        }
    }

    /// Input blurred or conversation closed. Returns whether a stop-typing
    /// signal is due.
    pub(crate) fn flush(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        inner.generation += 1;
        if inner.active {
            inner.active = false;
            true
        } else {
            false
        }
    }
}
