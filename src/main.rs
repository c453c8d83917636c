// SPDX-License-Identifier: GPL-3.0-only

//! Slateboard engine binary.
//!
//! Wires the engine to its real collaborators: the Wayland input protocols,
//! the D-Bus control interface, and the accessibility setting portal. The
//! GUI collaborator is represented by a command consumer that logs panel
//! and view changes; a renderer attaches by taking its place on the command
//! channel.

use std::sync::Arc;
use std::thread;

use futures::channel::mpsc::unbounded;
use futures::StreamExt;

use slateboard::app_settings;
use slateboard::dbus::DbusServer;
use slateboard::event_loop::driver::Threaded;
use slateboard::layout::Layout;
use slateboard::settings;
use slateboard::submission::SubmissionRouter;
use slateboard::wayland::WaylandIo;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slateboard=info".parse().unwrap()),
        )
        .init();

    // The input protocols are mandatory; without them this keyboard cannot
    // type anywhere.
    let (wayland, text_sink, key_sink) = match WaylandIo::connect() {
        Ok(io) => io,
        Err(e) => {
            tracing::error!("Cannot start: {}", e);
            std::process::exit(1);
        }
    };

    let layout = Arc::new(Layout::fallback());
    let router = SubmissionRouter::new(text_sink, key_sink, layout.key_names());

    let (command_tx, mut command_rx) = unbounded();
    let driver = Threaded::new(command_tx, layout, router, app_settings::HIDE_DEBOUNCE);

    // Protocol events flow into the engine from a dedicated thread.
    let wayland_driver = driver.clone();
    thread::Builder::new()
        .name("wayland".into())
        .spawn(move || wayland.run(wayland_driver))
        .expect("Failed to spawn the Wayland thread");

    // The control interface is optional; sessions without a bus still type.
    let dbus_server = match DbusServer::start(driver.clone()).await {
        Ok(server) => Some(server),
        Err(e) => {
            tracing::warn!("Running without D-Bus control interface: {}", e);
            None
        }
    };

    let settings_driver = driver.clone();
    tokio::spawn(async move {
        if let Err(e) = settings::watch_accessibility(settings_driver).await {
            tracing::warn!("Accessibility watcher stopped: {}", e);
        }
    });

    // Command consumer standing in for the GUI collaborator.
    while let Some(commands) = command_rx.next().await {
        if let Some(panel) = commands.panel_visibility {
            tracing::info!(?panel, "Panel visibility change");
        }
        if let Some(layout) = &commands.layout {
            tracing::info!(%layout, "Layout activated");
        }
        if let Some(view) = &commands.view {
            tracing::info!(view = %view, "View changed");
        }
        if let Some(hint) = &commands.input_hint {
            tracing::debug!(?hint, "Input hint updated");
        }
        if let Some(visible) = commands.dbus_visible_set {
            if let Some(server) = &dbus_server {
                if let Err(e) = server.set_visible(visible).await {
                    tracing::warn!("Failed to publish visibility: {}", e);
                }
            }
        }
    }

    tracing::info!("Engine shut down, exiting");
}
