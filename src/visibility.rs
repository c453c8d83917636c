// SPDX-License-Identifier: GPL-3.0-only

//! The visibility/presence state tracker.
//!
//! Combines hardware-keyboard presence, the desktop accessibility toggle,
//! forced show/hide overrides, and text-input focus into one show/hide
//! decision. This is the functional core: every state change consumes the
//! old tracker and returns the next one, the outward decision is a pure
//! function of the tracked inputs and the current time, and the tracker can
//! be driven by any event loop.
//!
//! Hiding is debounced: after focus leaves a text field the panel stays up
//! for a short quiet period, so rapid focus changes do not flicker. The
//! deferral is not a cancellable timer — the wake fires unconditionally and
//! [`Tracker::get_outcome`] simply re-evaluates.

use std::time::{Duration, Instant};

/// Whether a hardware keyboard is plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Missing,
}

/// Raw content-hint bits reported by the focused text field.
///
/// Stored untranslated; the layout-choosing collaborator interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputHints(pub u32);

/// What kind of input the focused field expects. Mirrors the text-input
/// protocol's purpose values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputPurpose {
    #[default]
    Normal,
    Alpha,
    Digits,
    Number,
    Phone,
    Url,
    Email,
    Name,
    Password,
    Pin,
    Date,
    Time,
    Datetime,
    Terminal,
}

/// Hint and purpose of the currently focused field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImDetails {
    pub hints: InputHints,
    pub purpose: InputPurpose,
}

/// Focus state of the structured text-input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImFocus {
    /// A text field is focused and accepts structured commits.
    Active(ImDetails),
    /// No focused field since the recorded moment. The timestamp anchors
    /// the hide debounce.
    InactiveSince(Instant),
}

/// User-driven visibility overrides.
pub mod force {
    /// An explicit external request (debug flag, D-Bus call).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        /// The user requested the panel to show.
        ForceVisible,
        /// The user requested the panel to go down.
        ForceHidden,
    }

    /// The last override interaction, if any.
    ///
    /// A single three-valued state rather than two booleans: both overrides
    /// asserted at once cannot be stored, the later request wins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum State {
        ForcedVisible,
        ForcedHidden,
        NotForced,
    }
}

/// Incoming events that change the tracked state.
#[derive(Debug, Clone)]
pub enum Event {
    Im(ImFocus),
    Force(force::Event),
    HardwareKeyboard(Presence),
    Accessibility(bool),
    /// A moment in time passed. Carries the ideal arrival time.
    TimeoutReached(Instant),
}

impl From<ImFocus> for Event {
    fn from(im: ImFocus) -> Self {
        Event::Im(im)
    }
}

/// The boolean decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// The outwardly visible state: the show/hide decision plus the input-method
/// details riding along so the GUI can pick a matching layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub visibility: Visibility,
    pub im: ImFocus,
}

/// The tracked inputs.
#[derive(Debug, Clone)]
pub struct Tracker {
    im: ImFocus,
    visibility_override: force::State,
    hardware_keyboard: Presence,
    /// The desktop "screen keyboard enabled" setting. Defaults to enabled
    /// when the setting source is unavailable.
    accessibility_enabled: bool,
    hide_debounce: Duration,
}

impl Tracker {
    /// A conservative initial state: inactive input, no overrides, no
    /// hardware keyboard. Adding the real state afterwards must not cause
    /// spurious transitions, which is why the input starts inactive.
    #[must_use]
    pub fn new(now: Instant, hide_debounce: Duration) -> Self {
        Self {
            // Start past the debounce window so the panel does not blink
            // on startup.
            im: ImFocus::InactiveSince(now.checked_sub(hide_debounce).unwrap_or(now)),
            visibility_override: force::State::NotForced,
            hardware_keyboard: Presence::Missing,
            accessibility_enabled: true,
            hide_debounce,
        }
    }

    /// Applies one event, returning the next state.
    #[must_use]
    pub fn apply_event(self, event: Event, _now: Instant) -> Self {
        match event {
            // Wakes carry no state; the outcome is re-derived by the caller.
            Event::TimeoutReached(_) => self,

            Event::Force(request) => Self {
                visibility_override: match request {
                    force::Event::ForceVisible => force::State::ForcedVisible,
                    force::Event::ForceHidden => force::State::ForcedHidden,
                },
                ..self
            },

            Event::HardwareKeyboard(presence) => Self {
                hardware_keyboard: presence,
                ..self
            },

            Event::Accessibility(enabled) => Self {
                accessibility_enabled: enabled,
                ..self
            },

            Event::Im(new_im) => match (self.im, new_im) {
                (ImFocus::Active(_), ImFocus::Active(details)) => Self {
                    im: ImFocus::Active(details),
                    ..self
                },
                // A change in active state releases the user's override, so
                // a stale "force hidden" does not suppress the keyboard on
                // the next focused field. Both directions spelled out: it is
                // the opposition that matters.
                (ImFocus::InactiveSince(_), ImFocus::Active(details)) => Self {
                    im: ImFocus::Active(details),
                    visibility_override: force::State::NotForced,
                    ..self
                },
                (ImFocus::Active(_), ImFocus::InactiveSince(since)) => Self {
                    im: ImFocus::InactiveSince(since),
                    visibility_override: force::State::NotForced,
                    ..self
                },
                // Already inactive at the older moment; the newer timestamp
                // must not restart the debounce window.
                (ImFocus::InactiveSince(old), ImFocus::InactiveSince(_new)) => Self {
                    im: ImFocus::InactiveSince(old),
                    ..self
                },
            },
        }
    }

    /// Derives the outward decision at the given moment.
    ///
    /// `force_visible` wins over everything, `force_hidden` over everything
    /// but it; with no override, the panel shows while a text field is
    /// focused, the accessibility toggle is on, and no hardware keyboard is
    /// present — and lingers through the debounce window after focus ends.
    #[must_use]
    pub fn get_outcome(&self, now: Instant) -> Outcome {
        let visibility = match self.visibility_override {
            force::State::ForcedVisible => Visibility::Visible,
            force::State::ForcedHidden => Visibility::Hidden,
            force::State::NotForced => {
                if !self.accessibility_enabled {
                    Visibility::Hidden
                } else {
                    match (self.hardware_keyboard, self.im) {
                        (Presence::Present, _) => Visibility::Hidden,
                        (Presence::Missing, ImFocus::Active(_)) => Visibility::Visible,
                        (Presence::Missing, ImFocus::InactiveSince(since)) => {
                            if now < since + self.hide_debounce {
                                Visibility::Visible
                            } else {
                                Visibility::Hidden
                            }
                        }
                    }
                }
            }
        };
        Outcome {
            visibility,
            im: self.im,
        }
    }

    /// The next time the outcome may change on its own: the end of a
    /// pending debounce window, if one is running.
    #[must_use]
    pub fn get_next_wake(&self, now: Instant) -> Option<Instant> {
        match self {
            Self {
                visibility_override: force::State::NotForced,
                im: ImFocus::InactiveSince(since),
                ..
            } => {
                let debounce_end = *since + self.hide_debounce;
                if now < debounce_end {
                    Some(debounce_end)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
