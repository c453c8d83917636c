// SPDX-License-Identifier: GPL-3.0-only

//! Centralized application settings and constants.

use std::time::Duration;

/// Application ID in RDNN (reverse domain name notation) format.
pub const APP_ID: &str = "org.slateboard.Slateboard1";

/// D-Bus well-known name of the visibility control service.
pub const DBUS_INTERFACE: &str = "org.slateboard.Slateboard1";

/// D-Bus object path of the visibility control service.
pub const DBUS_PATH: &str = "/org/slateboard/Slateboard1";

/// Quiet period before a pending hide is carried out.
///
/// Rapid focus changes (switching between two text fields) produce a
/// deactivate immediately followed by an activate; hiding only after this
/// delay keeps the panel from flickering. A show arriving within the window
/// cancels the pending hide.
pub const HIDE_DEBOUNCE: Duration = Duration::from_millis(200);

/// Settings portal namespace carrying the accessibility toggle.
pub const A11Y_NAMESPACE: &str = "org.gnome.desktop.a11y.applications";

/// Settings portal key for "screen keyboard enabled".
pub const A11Y_KEY: &str = "screen-keyboard-enabled";
