// SPDX-License-Identifier: GPL-3.0-only

//! Slateboard input-method engine library.
//!
//! The engine behind a Wayland on-screen keyboard: it decides when the
//! keyboard is shown, which view of the active layout is displayed, and how
//! each pressed button reaches the focused application — as a structured
//! text commit over the input-method protocol, or as raw keycodes through a
//! virtual keyboard driven by generated keymaps.
//!
//! # Modules
//!
//! - `layout`: layout data model, view cursor, and the view switch engine
//! - `keymap`: keycode assignment, xkb serialization, shared-memory handles
//! - `submission`: per-keystroke routing between the two transports
//! - `visibility`: the show/hide state tracker with debounced hiding
//! - `event_loop`: the pure loop iteration and the threaded driver
//! - `wayland`: protocol adapters for input-method and virtual-keyboard
//! - `dbus`: the session control interface (force show/hide, hw keyboard)
//! - `settings`: accessibility setting observation via the XDG portal
//! - `app_settings`: centralized constants
//!
//! Rendering, surface placement, and layout-file parsing live in external
//! collaborators; this crate meets them at data boundaries (`Commands` out,
//! button names and `Layout` values in).

pub mod app_settings;
pub mod dbus;
pub mod event_loop;
pub mod keymap;
pub mod layout;
pub mod settings;
pub mod submission;
pub mod visibility;
pub mod wayland;

#[cfg(test)]
mod integration_tests {
    use crate::app_settings::HIDE_DEBOUNCE;
    use crate::event_loop::{handle_event, LoopState, PanelCommand};
    use crate::layout::{Layout, LayoutState, Symbol};
    use crate::visibility::{Event, ImDetails, ImFocus, Presence};
    use std::sync::Arc;
    use std::time::Instant;

    /// Plugging in a hardware keyboard while a text field is focused emits
    /// exactly one Hide, and repeating the notification emits nothing.
    #[test]
    fn test_hardware_keyboard_emits_one_hide() {
        let start = Instant::now();
        let state = LoopState::new(start, HIDE_DEBOUNCE);
        let (state, _) = handle_event(
            state,
            Event::Im(ImFocus::Active(ImDetails::default())),
            start,
        );

        let (state, commands) =
            handle_event(state, Event::HardwareKeyboard(Presence::Present), start);
        assert_eq!(
            commands.panel_visibility,
            Some(PanelCommand::Hide),
            "Hardware keyboard arrival must hide the panel"
        );

        let (_state, commands) =
            handle_event(state, Event::HardwareKeyboard(Presence::Present), start);
        assert!(
            commands.is_empty(),
            "The repeated notification must emit nothing, got {:?}",
            commands
        );
    }

    /// A full typing round through the layout cursor: latch into the upper
    /// view, commit a letter, snap back to the base view.
    #[test]
    fn test_latched_commit_snaps_back() {
        let mut state = LayoutState::new(Arc::new(Layout::fallback()));

        let shift = state.symbol_for("Shift_L").cloned().unwrap();
        state.apply_symbol(&shift).unwrap();
        assert_eq!(state.current_view(), "upper");

        let letter = state.symbol_for("A").cloned().unwrap();
        assert_eq!(letter, Symbol::Text { text: "A".to_string() });
        state.apply_symbol(&letter).unwrap();

        assert_eq!(state.current_view(), "base");
        assert!(state.latch().is_none());
    }

    /// The engine's symbol table reaches the keymap builder intact: every
    /// key the fallback layout can submit gets a keycode.
    #[test]
    fn test_fallback_layout_keymap_round_trip() {
        let layout = Layout::fallback();
        let built = crate::keymap::build(&layout.key_names()).expect("build");

        for name in layout.key_names() {
            assert!(
                built.keycode(&name).is_some(),
                "Missing keycode for {}",
                name
            );
        }
    }
}
