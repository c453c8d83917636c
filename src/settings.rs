// SPDX-License-Identifier: GPL-3.0-only

//! Accessibility setting observation.
//!
//! The desktop's "screen keyboard enabled" switch lives in the
//! `org.gnome.desktop.a11y.applications` settings namespace and is read
//! through the XDG settings portal, which works from inside and outside
//! sandboxes alike. The current value is read once at startup and changes
//! are streamed for as long as the watcher runs.
//!
//! The portal is best-effort: when it is missing or the key is not exposed,
//! the engine keeps its default of enabled and only logs a warning. A
//! missing portal must never take the keyboard down.

use crate::app_settings::{A11Y_KEY, A11Y_NAMESPACE};
use crate::event_loop::driver::{Event, Threaded};
use futures::StreamExt;
use zbus::zvariant::OwnedValue;

/// Errors from the settings watcher. All of them degrade to the default
/// (enabled) rather than affecting the engine.
#[derive(Debug)]
pub enum SettingsError {
    /// Failed to reach the portal over the session bus.
    Portal(zbus::Error),
    /// The engine thread is gone.
    EngineGone,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Portal(e) => write!(f, "settings portal unavailable: {}", e),
            SettingsError::EngineGone => write!(f, "engine thread is gone"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Portal(e) => Some(e),
            SettingsError::EngineGone => None,
        }
    }
}

impl From<zbus::Error> for SettingsError {
    fn from(e: zbus::Error) -> Self {
        SettingsError::Portal(e)
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.portal.Settings",
    default_service = "org.freedesktop.portal.Desktop",
    default_path = "/org/freedesktop/portal/desktop"
)]
trait PortalSettings {
    /// Reads a single setting.
    fn read_one(&self, namespace: &str, key: &str) -> zbus::Result<OwnedValue>;

    /// Emitted when any setting changes.
    #[zbus(signal)]
    fn setting_changed(&self, namespace: String, key: String, value: OwnedValue)
        -> zbus::Result<()>;
}

fn to_bool(value: OwnedValue) -> Option<bool> {
    bool::try_from(value).ok()
}

/// Watches the screen-keyboard accessibility switch and forwards changes to
/// the engine. Runs until the signal stream or the engine ends.
pub async fn watch_accessibility(driver: Threaded) -> Result<(), SettingsError> {
    let connection = zbus::Connection::session().await?;
    let proxy = PortalSettingsProxy::new(&connection).await?;

    // Initial value; the signal stream only reports changes.
    match proxy.read_one(A11Y_NAMESPACE, A11Y_KEY).await {
        Ok(value) => {
            if let Some(enabled) = to_bool(value) {
                tracing::info!(enabled, "Screen keyboard accessibility setting read");
                driver
                    .send(Event::Accessibility(enabled))
                    .map_err(|_| SettingsError::EngineGone)?;
            }
        }
        Err(e) => {
            tracing::warn!("Accessibility setting not readable, keeping default: {}", e);
        }
    }

    let mut changes = proxy.receive_setting_changed().await?;
    while let Some(signal) = changes.next().await {
        let args = match signal.args() {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!("Malformed settings signal: {}", e);
                continue;
            }
        };
        if args.namespace != A11Y_NAMESPACE || args.key != A11Y_KEY {
            continue;
        }
        if let Some(enabled) = to_bool(args.value) {
            tracing::info!(enabled, "Screen keyboard accessibility setting changed");
            driver
                .send(Event::Accessibility(enabled))
                .map_err(|_| SettingsError::EngineGone)?;
        }
    }

    Ok(())
}
