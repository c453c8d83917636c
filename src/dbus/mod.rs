// SPDX-License-Identifier: GPL-3.0-only

//! D-Bus control interface for the keyboard engine.
//!
//! External applications (a settings panel, a tray applet, scripts) can
//! force the keyboard visible or hidden and report hardware-keyboard
//! presence. The engine publishes its decisions back as a signal.
//!
//! # Interface
//!
//! - Object path: `/org/slateboard/Slateboard1`
//! - Interface name: `org.slateboard.Slateboard1`
//! - Methods: `ForceShow()`, `ForceHide()`, `SetHardwareKeyboardPresent(present: bool)`
//! - Signals: `VisibilityChanged(visible: bool)`
//!
//! Method calls translate directly into engine events; they carry requests,
//! not state, so calling `ForceShow()` twice is harmless. The service is
//! optional: when the session bus is unavailable the engine runs without it.

use crate::app_settings::{DBUS_INTERFACE, DBUS_PATH};
use crate::event_loop::driver::{Event, Threaded};
use crate::visibility::{force, Presence};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

/// Result type for D-Bus operations.
pub type DbusResult<T> = Result<T, DbusError>;

/// Errors that can occur during D-Bus operations.
#[derive(Debug, Clone)]
pub enum DbusError {
    /// Failed to connect to the session bus.
    ConnectionFailed(String),
    /// Failed to register the service.
    RegistrationFailed(String),
    /// Failed to call a method or emit a signal.
    MethodCallFailed(String),
}

impl std::fmt::Display for DbusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbusError::ConnectionFailed(msg) => write!(f, "D-Bus connection failed: {}", msg),
            DbusError::RegistrationFailed(msg) => {
                write!(f, "D-Bus service registration failed: {}", msg)
            }
            DbusError::MethodCallFailed(msg) => write!(f, "D-Bus method call failed: {}", msg),
        }
    }
}

impl std::error::Error for DbusError {}

/// The D-Bus object handling incoming method calls.
///
/// Forwards every call as an event into the engine thread; the engine
/// remains the single owner of visibility state.
pub struct SlateboardInterface {
    driver: Threaded,
}

impl SlateboardInterface {
    pub fn new(driver: Threaded) -> Self {
        Self { driver }
    }

    fn forward(&self, event: Event) {
        if self.driver.send(event).is_err() {
            tracing::error!("Engine is gone, dropping D-Bus request");
        }
    }
}

#[interface(name = "org.slateboard.Slateboard1")]
impl SlateboardInterface {
    /// Force the keyboard visible until the next focus change.
    async fn force_show(&self) {
        tracing::debug!("D-Bus: ForceShow() called");
        self.forward(Event::Force(force::Event::ForceVisible));
    }

    /// Force the keyboard hidden until the next focus change.
    async fn force_hide(&self) {
        tracing::debug!("D-Bus: ForceHide() called");
        self.forward(Event::Force(force::Event::ForceHidden));
    }

    /// Report whether a hardware keyboard is plugged in.
    async fn set_hardware_keyboard_present(&self, present: bool) {
        tracing::debug!(present, "D-Bus: SetHardwareKeyboardPresent() called");
        let presence = if present {
            Presence::Present
        } else {
            Presence::Missing
        };
        self.forward(Event::HardwareKeyboard(presence));
    }

    /// Signal emitted when the engine's show/hide decision changes.
    #[zbus(signal)]
    async fn visibility_changed(emitter: &SignalEmitter<'_>, visible: bool) -> zbus::Result<()>;
}

/// Server handle owned by the binary: keeps the connection alive and emits
/// the visibility signal when told.
pub struct DbusServer {
    connection: zbus::Connection,
    visible: Arc<AtomicBool>,
}

impl std::fmt::Debug for DbusServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbusServer")
            .field("visible", &self.visible.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DbusServer {
    /// Registers the control interface on the session bus.
    pub async fn start(driver: Threaded) -> DbusResult<Self> {
        let interface = SlateboardInterface::new(driver);

        let connection = zbus::connection::Builder::session()
            .map_err(|e| DbusError::ConnectionFailed(e.to_string()))?
            .name(DBUS_INTERFACE)
            .map_err(|e| DbusError::RegistrationFailed(e.to_string()))?
            .serve_at(DBUS_PATH, interface)
            .map_err(|e| DbusError::RegistrationFailed(e.to_string()))?
            .build()
            .await
            .map_err(|e| DbusError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            "D-Bus service registered: {} at {}",
            DBUS_INTERFACE,
            DBUS_PATH
        );

        Ok(Self {
            connection,
            visible: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Publishes the engine's new visibility, emitting `VisibilityChanged`
    /// when it actually changed.
    pub async fn set_visible(&self, visible: bool) -> DbusResult<()> {
        let old_visible = self.visible.swap(visible, Ordering::SeqCst);
        if old_visible != visible {
            self.emit_visibility_changed(visible).await?;
        }
        Ok(())
    }

    async fn emit_visibility_changed(&self, visible: bool) -> DbusResult<()> {
        let iface_ref = self
            .connection
            .object_server()
            .interface::<_, SlateboardInterface>(DBUS_PATH)
            .await
            .map_err(|e| DbusError::MethodCallFailed(e.to_string()))?;

        SlateboardInterface::visibility_changed(iface_ref.signal_emitter(), visible)
            .await
            .map_err(|e| DbusError::MethodCallFailed(e.to_string()))?;

        tracing::debug!("D-Bus: VisibilityChanged({}) signal emitted", visible);
        Ok(())
    }
}

/// Type-safe proxy for calling the control interface from other processes.
#[zbus::proxy(
    interface = "org.slateboard.Slateboard1",
    default_service = "org.slateboard.Slateboard1",
    default_path = "/org/slateboard/Slateboard1"
)]
trait SlateboardControl {
    /// Force the keyboard visible.
    async fn force_show(&self) -> zbus::Result<()>;

    /// Force the keyboard hidden.
    async fn force_hide(&self) -> zbus::Result<()>;

    /// Report hardware keyboard presence.
    async fn set_hardware_keyboard_present(&self, present: bool) -> zbus::Result<()>;

    /// Signal for visibility changes.
    #[zbus(signal)]
    async fn visibility_changed(&self, visible: bool) -> zbus::Result<()>;
}

/// Client for the control interface, for applets and scripts.
pub struct DbusClient {
    proxy: SlateboardControlProxy<'static>,
}

impl DbusClient {
    /// Connects to the control service on the session bus.
    pub async fn connect() -> DbusResult<Self> {
        let connection = zbus::Connection::session()
            .await
            .map_err(|e| DbusError::ConnectionFailed(e.to_string()))?;

        let proxy = SlateboardControlProxy::new(&connection)
            .await
            .map_err(|e| DbusError::ConnectionFailed(e.to_string()))?;

        Ok(Self { proxy })
    }

    pub async fn force_show(&self) -> DbusResult<()> {
        self.proxy
            .force_show()
            .await
            .map_err(|e| DbusError::MethodCallFailed(e.to_string()))
    }

    pub async fn force_hide(&self) -> DbusResult<()> {
        self.proxy
            .force_hide()
            .await
            .map_err(|e| DbusError::MethodCallFailed(e.to_string()))
    }

    pub async fn set_hardware_keyboard_present(&self, present: bool) -> DbusResult<()> {
        self.proxy
            .set_hardware_keyboard_present(present)
            .await
            .map_err(|e| DbusError::MethodCallFailed(e.to_string()))
    }

    /// The underlying proxy, for subscribing to signals.
    pub fn proxy(&self) -> &SlateboardControlProxy<'static> {
        &self.proxy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_settings;

    /// Error values render their cause.
    #[test]
    fn test_dbus_error_display() {
        let conn_err = DbusError::ConnectionFailed("test".to_string());
        let reg_err = DbusError::RegistrationFailed("test".to_string());
        let method_err = DbusError::MethodCallFailed("test".to_string());

        assert!(conn_err.to_string().contains("connection failed"));
        assert!(reg_err.to_string().contains("registration failed"));
        assert!(method_err.to_string().contains("method call failed"));
    }

    /// Interface constants stay in sync with app_settings.
    #[test]
    fn test_dbus_constants() {
        assert_eq!(app_settings::DBUS_PATH, "/org/slateboard/Slateboard1");
        assert_eq!(app_settings::DBUS_INTERFACE, "org.slateboard.Slateboard1");
    }
}
