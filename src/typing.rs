//! Typing-presence debouncer
//!
//! Collapses a stream of keystroke notifications into edge signals: one
//! `Start` when a burst begins, one `Stop` when the burst has been quiet
//! for the debounce window or a chat message is sent. The session actor
//! owns the timer; this struct only tracks the edge state and the
//! deadline, which keeps it synchronously testable.

use tokio::time::{Duration, Instant};

/// Quiet period after the last keystroke before typing stops
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Edge signal to transmit to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Debounce state machine
///
/// For any burst of N inputs spaced inside the window, exactly one
/// `Start` and at most one `Stop` come out.
#[derive(Debug)]
pub struct TypingDebouncer {
    delay: Duration,
    signaled: bool,
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new() -> Self {
        Self::with_delay(TYPING_DEBOUNCE)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            signaled: false,
            deadline: None,
        }
    }

    /// Record a keystroke
    ///
    /// Refreshes the quiet-period deadline on every call; returns `Start`
    /// only on the first call of a burst.
    pub fn note_input(&mut self) -> Option<TypingSignal> {
        self.deadline = Some(Instant::now() + self.delay);
        if self.signaled {
            None
        } else {
            self.signaled = true;
            Some(TypingSignal::Start)
        }
    }

    /// When the actor's timer should fire, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The quiet-period timer fired
    pub fn expire(&mut self) -> Option<TypingSignal> {
        self.finish()
    }

    /// A chat message is being sent: the stop signal must go out now,
    /// ahead of the chat frame, not after the timer
    pub fn flush(&mut self) -> Option<TypingSignal> {
        self.finish()
    }

    /// Forget everything without signaling (room leave, reconnect)
    pub fn reset(&mut self) {
        self.signaled = false;
        self.deadline = None;
    }

    fn finish(&mut self) -> Option<TypingSignal> {
        self.deadline = None;
        if self.signaled {
            self.signaled = false;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new()
    }
}
