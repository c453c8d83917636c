// SPDX-License-Identifier: GPL-3.0-only

//! Pure event-loop iteration over the visibility tracker.
//!
//! [`handle_event`] is the whole loop body: take the previous loop state and
//! one event, return the next loop state and the commands needed to bring
//! the outside world in line. No I/O happens here; the [`driver`] owns the
//! thread, the channels, and the sleeps.
//!
//! Commands are diffed against the previously reached outcome, so repeated
//! identical events yield empty command sets: a panel never sees two `Show`s
//! in a row, and a D-Bus signal fires only on actual change.
//!
//! The only deferred operation is the debounced hide. There is no timer to
//! cancel: each iteration computes the single next wake-up moment from
//! scratch, and a wake that arrives when nothing needs doing produces no
//! commands.

pub mod driver;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::layout::{Layout, ViewId};
use crate::visibility::{Event, ImDetails, ImFocus, Outcome, Tracker, Visibility};

/// Show or hide the keyboard panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Show,
    Hide,
}

/// Instructions for the GUI loop and other collaborators after one
/// iteration. Every field is optional; an all-`None` value means nothing
/// changed.
#[derive(Debug, Clone, Default)]
pub struct Commands {
    pub panel_visibility: Option<PanelCommand>,
    /// New visibility to publish on the D-Bus signal.
    pub dbus_visible_set: Option<bool>,
    /// Hint/purpose of the newly focused field, for layout selection.
    pub input_hint: Option<ImDetails>,
    /// The view the GUI should render after a switch.
    pub view: Option<ViewId>,
    /// A freshly activated layout, with `view` naming its starting view.
    pub layout: Option<Arc<Layout>>,
}

impl Commands {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.panel_visibility.is_none()
            && self.dbus_visible_set.is_none()
            && self.input_hint.is_none()
            && self.view.is_none()
            && self.layout.is_none()
    }
}

/// State carried across loop iterations: the tracker plus bookkeeping about
/// what the outside world has already been told.
#[derive(Debug, Clone)]
pub struct LoopState {
    tracker: Tracker,
    /// The wake-up currently requested from the driver, if any.
    pub scheduled_wakeup: Option<Instant>,
    /// The last outcome commands were emitted for.
    last_outcome: Option<Outcome>,
}

impl LoopState {
    #[must_use]
    pub fn new(now: Instant, hide_debounce: Duration) -> Self {
        Self {
            tracker: Tracker::new(now, hide_debounce),
            scheduled_wakeup: None,
            last_outcome: None,
        }
    }
}

/// The commands that move the world from `last` to `next`.
fn commands_to_reach(last: Option<&Outcome>, next: &Outcome) -> Commands {
    let last_visibility = last.map(|o| o.visibility);
    let visibility_changed = last_visibility != Some(next.visibility);

    let (panel_visibility, dbus_visible_set) = if visibility_changed {
        match next.visibility {
            Visibility::Visible => (Some(PanelCommand::Show), Some(true)),
            Visibility::Hidden => (Some(PanelCommand::Hide), Some(false)),
        }
    } else {
        (None, None)
    };

    // The hint rides along when the panel comes up or the focused field
    // changed its expectations.
    let input_hint = match (next.visibility, next.im) {
        (Visibility::Visible, ImFocus::Active(details)) => {
            let last_details = last.and_then(|o| match o.im {
                ImFocus::Active(d) => Some(d),
                ImFocus::InactiveSince(_) => None,
            });
            if visibility_changed || last_details != Some(details) {
                Some(details)
            } else {
                None
            }
        }
        _ => None,
    };

    Commands {
        panel_visibility,
        dbus_visible_set,
        input_hint,
        view: None,
        layout: None,
    }
}

/// One loop iteration: apply the event, diff the outcome, recompute the
/// single pending wake-up.
#[must_use]
pub fn handle_event(mut state: LoopState, event: Event, now: Instant) -> (LoopState, Commands) {
    if let Event::TimeoutReached(when) = event {
        // This wake has been consumed, whether or not it still matters.
        if state.scheduled_wakeup == Some(when) {
            state.scheduled_wakeup = None;
        }
    }

    let tracker = state.tracker.apply_event(event, now);
    let outcome = tracker.get_outcome(now);
    let commands = commands_to_reach(state.last_outcome.as_ref(), &outcome);

    let scheduled_wakeup = tracker.get_next_wake(now).map(|when| {
        // A wake already due means the clock outran the sleeper; push it
        // out a little instead of spinning.
        if when <= now {
            now + Duration::from_millis(10)
        } else {
            when
        }
    });

    (
        LoopState {
            tracker,
            scheduled_wakeup,
            last_outcome: Some(outcome),
        },
        commands,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_settings::HIDE_DEBOUNCE;
    use crate::visibility::ImDetails;

    fn active_event() -> Event {
        Event::Im(ImFocus::Active(ImDetails::default()))
    }

    /// Focus in shows; focus out schedules a wake; the wake hides, exactly
    /// once.
    #[test]
    fn test_debounced_hide_fires_once() {
        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);

        let (state, commands) = handle_event(state, active_event(), start);
        assert_eq!(commands.panel_visibility, Some(PanelCommand::Show));
        assert_eq!(state.scheduled_wakeup, None);

        let (state, commands) =
            handle_event(state, Event::Im(ImFocus::InactiveSince(start)), start);
        assert_eq!(
            commands.panel_visibility, None,
            "Still visible inside the debounce window"
        );
        let wake = state
            .scheduled_wakeup
            .expect("A hide must schedule a wake-up");
        assert_eq!(wake, start + HIDE_DEBOUNCE);

        let (state, commands) = handle_event(state, Event::TimeoutReached(wake), wake);
        assert_eq!(commands.panel_visibility, Some(PanelCommand::Hide));
        assert_eq!(commands.dbus_visible_set, Some(false));
        assert_eq!(
            state.scheduled_wakeup, None,
            "No further wake after the hide completed"
        );
    }

    /// Repeating an event produces no commands the second time.
    #[test]
    fn test_commands_are_idempotent() {
        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);

        let (state, first) = handle_event(state, active_event(), start);
        assert!(!first.is_empty());

        let (_state, second) = handle_event(state, active_event(), start);
        assert!(
            second.is_empty(),
            "An unchanged outcome must emit nothing, got {:?}",
            second
        );
    }

    /// A wake arriving after the state moved on is absorbed silently.
    #[test]
    fn test_stale_wake_is_harmless() {
        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);

        let (state, _) = handle_event(state, active_event(), start);
        let (state, _) =
            handle_event(state, Event::Im(ImFocus::InactiveSince(start)), start);
        let wake = state.scheduled_wakeup.unwrap();

        // Focus returns before the wake fires.
        let (state, commands) = handle_event(state, active_event(), start);
        assert!(commands.is_empty(), "Still visible, nothing to do");

        let (_state, commands) = handle_event(state, Event::TimeoutReached(wake), wake);
        assert!(
            commands.is_empty(),
            "The stale wake must not hide a refocused keyboard"
        );
    }

    /// The hint rides along whenever the panel becomes visible with a
    /// focused field, and again when the field's expectations change.
    #[test]
    fn test_hint_follows_visibility_and_change() {
        use crate::visibility::{InputHints, InputPurpose};

        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);

        let (state, commands) = handle_event(state, active_event(), start);
        assert_eq!(commands.input_hint, Some(ImDetails::default()));

        let terminal = ImDetails {
            hints: InputHints(0),
            purpose: InputPurpose::Terminal,
        };
        let (_state, commands) =
            handle_event(state, Event::Im(ImFocus::Active(terminal)), start);
        assert_eq!(
            commands.input_hint,
            Some(terminal),
            "A purpose change must be forwarded even while already visible"
        );
        assert_eq!(commands.panel_visibility, None);
    }

    /// A wake scheduled in the past is pushed into the future instead of
    /// spinning the loop.
    #[test]
    fn test_overdue_wake_is_deferred() {
        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);

        let (state, _) = handle_event(state, active_event(), start);
        let long_ago = start - Duration::from_secs(5);
        let (state, _) =
            handle_event(state, Event::Im(ImFocus::InactiveSince(long_ago)), start);

        // The tracker is inactive but mid-window at `start`... not here:
        // the window expired long ago, so the outcome is already hidden and
        // no wake is needed.
        assert_eq!(state.scheduled_wakeup, None);

        // Now a window that is pending but whose wake lands exactly on the
        // current instant.
        let state2 = LoopState::new(start, HIDE_DEBOUNCE);
        let (state2, _) = handle_event(state2, active_event(), start);
        let (state2, _) = handle_event(
            state2,
            Event::Im(ImFocus::InactiveSince(start)),
            start,
        );
        let wake = state2.scheduled_wakeup.unwrap();
        // The wake arrives a hair early: re-handling at `wake - 1ms` keeps
        // a future wake scheduled rather than one in the past.
        let early = wake - Duration::from_millis(1);
        let (state2, commands) = handle_event(state2, Event::TimeoutReached(wake), early);
        assert!(commands.is_empty());
        let rescheduled = state2.scheduled_wakeup.unwrap();
        assert!(rescheduled > early, "Rescheduled wake must be in the future");
    }
}
