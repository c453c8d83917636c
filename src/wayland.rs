// SPDX-License-Identifier: GPL-3.0-only

//! Wayland protocol adapters.
//!
//! Binds the two input protocols the engine depends on —
//! `zwp_input_method_v2` (the structured text channel) and
//! `zwp_virtual_keyboard_v1` (the raw keycode channel) — and translates
//! between protocol events and engine events.
//!
//! Both globals are required: a compositor without them cannot host this
//! keyboard at all, so their absence is a fatal startup error rather than a
//! degraded mode.
//!
//! The input-method state is double-buffered as the protocol demands:
//! `activate`/`deactivate`/`content_type` accumulate into a pending copy,
//! and only `done` applies it. Each `done` also bumps the commit serial the
//! text transport echoes back with every `commit`.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use wayland_client::protocol::{wl_registry, wl_seat};
use wayland_client::{Connection, Dispatch, EventQueue, QueueHandle, WEnum};
use wayland_protocols::wp::text_input::zv3::client::zwp_text_input_v3::{
    ContentHint, ContentPurpose,
};
use wayland_protocols_misc::zwp_input_method_v2::client::{
    zwp_input_method_manager_v2, zwp_input_method_v2,
};
use wayland_protocols_misc::zwp_virtual_keyboard_v1::client::{
    zwp_virtual_keyboard_manager_v1, zwp_virtual_keyboard_v1,
};

use crate::event_loop::driver::{Event, Threaded};
use crate::keymap::KeymapHandle;
use crate::submission::{KeySink, SubmitError, TextSink, Timestamp};
use crate::visibility::{ImDetails, ImFocus, InputHints, InputPurpose};

/// Errors from establishing the Wayland side. All of them are fatal at
/// startup.
#[derive(Debug)]
pub enum WaylandError {
    /// Could not connect to the compositor.
    Connection(String),
    /// The compositor does not advertise a required protocol global.
    MissingGlobal(&'static str),
}

impl std::fmt::Display for WaylandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaylandError::Connection(msg) => write!(f, "Wayland connection failed: {}", msg),
            WaylandError::MissingGlobal(name) => {
                write!(f, "compositor does not support {}", name)
            }
        }
    }
}

impl std::error::Error for WaylandError {}

/// One complete input-method state, as assembled between `done` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ImState {
    active: bool,
    details: ImDetails,
}

/// Dispatch state for the engine's Wayland event queue.
pub struct WaylandState {
    driver: Option<Threaded>,
    seat: Option<wl_seat::WlSeat>,
    input_method_manager: Option<zwp_input_method_manager_v2::ZwpInputMethodManagerV2>,
    virtual_keyboard_manager:
        Option<zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1>,
    /// State accumulated since the last `done`.
    pending: ImState,
    /// State as of the last `done`.
    current: ImState,
    /// Serial echoed back with text commits, shared with the text sink.
    serial: Arc<AtomicU32>,
}

impl WaylandState {
    fn new() -> Self {
        Self {
            driver: None,
            seat: None,
            input_method_manager: None,
            virtual_keyboard_manager: None,
            pending: ImState::default(),
            current: ImState::default(),
            serial: Arc::new(AtomicU32::new(0)),
        }
    }

    fn forward(&self, event: Event) {
        match &self.driver {
            Some(driver) => {
                if driver.send(event).is_err() {
                    tracing::error!("Engine is gone, dropping Wayland event");
                }
            }
            None => tracing::warn!("Wayland event before the engine was attached"),
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            tracing::trace!("[{}] {} (v{})", name, interface, version);
            match &interface[..] {
                "wl_seat" => {
                    let seat = registry.bind::<wl_seat::WlSeat, _, _>(name, 1, qh, ());
                    state.seat = Some(seat);
                }
                "zwp_input_method_manager_v2" => {
                    let manager = registry
                        .bind::<zwp_input_method_manager_v2::ZwpInputMethodManagerV2, _, _>(
                            name,
                            1,
                            qh,
                            (),
                        );
                    state.input_method_manager = Some(manager);
                }
                "zwp_virtual_keyboard_manager_v1" => {
                    let manager = registry
                        .bind::<zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1, _, _>(
                            name,
                            1,
                            qh,
                            (),
                        );
                    state.virtual_keyboard_manager = Some(manager);
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<zwp_input_method_v2::ZwpInputMethodV2, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _im: &zwp_input_method_v2::ZwpInputMethodV2,
        event: zwp_input_method_v2::Event,
        _: &(),
        _: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwp_input_method_v2::Event::Activate => {
                // Hints arrive separately; a fresh activation starts clean.
                state.pending = ImState {
                    active: true,
                    details: ImDetails::default(),
                };
            }
            zwp_input_method_v2::Event::Deactivate => {
                state.pending.active = false;
            }
            zwp_input_method_v2::Event::ContentType { hint, purpose } => {
                state.pending.details = ImDetails {
                    hints: map_hint(hint),
                    purpose: map_purpose(purpose),
                };
            }
            zwp_input_method_v2::Event::Done => {
                state.serial.fetch_add(1, Ordering::SeqCst);
                if state.current != state.pending {
                    state.current = state.pending;
                    let focus = if state.current.active {
                        ImFocus::Active(state.current.details)
                    } else {
                        ImFocus::InactiveSince(Instant::now())
                    };
                    state.forward(Event::TextInput(focus));
                }
            }
            zwp_input_method_v2::Event::Unavailable => {
                // Another input method holds the seat; text input stays off.
                tracing::error!("Input method unavailable: the seat is already taken");
                state.forward(Event::TextInput(ImFocus::InactiveSince(Instant::now())));
            }
            _ => {}
        }
    }
}

impl Dispatch<zwp_input_method_manager_v2::ZwpInputMethodManagerV2, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &zwp_input_method_manager_v2::ZwpInputMethodManagerV2,
        event: zwp_input_method_manager_v2::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        tracing::debug!("Input method manager event {:?}", event);
    }
}

impl Dispatch<zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1,
        event: zwp_virtual_keyboard_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        tracing::debug!("Virtual keyboard manager event {:?}", event);
    }
}

impl Dispatch<zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1,
        event: zwp_virtual_keyboard_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        tracing::debug!("Virtual keyboard event {:?}", event);
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        tracing::debug!("Seat event {:?}", event);
    }
}

fn map_hint(hint: WEnum<ContentHint>) -> InputHints {
    match hint {
        WEnum::Value(hint) => InputHints(hint.bits()),
        WEnum::Unknown(bits) => InputHints(bits),
    }
}

fn map_purpose(purpose: WEnum<ContentPurpose>) -> InputPurpose {
    match purpose {
        WEnum::Value(purpose) => match purpose {
            ContentPurpose::Normal => InputPurpose::Normal,
            ContentPurpose::Alpha => InputPurpose::Alpha,
            ContentPurpose::Digits => InputPurpose::Digits,
            ContentPurpose::Number => InputPurpose::Number,
            ContentPurpose::Phone => InputPurpose::Phone,
            ContentPurpose::Url => InputPurpose::Url,
            ContentPurpose::Email => InputPurpose::Email,
            ContentPurpose::Name => InputPurpose::Name,
            ContentPurpose::Password => InputPurpose::Password,
            ContentPurpose::Pin => InputPurpose::Pin,
            ContentPurpose::Date => InputPurpose::Date,
            ContentPurpose::Time => InputPurpose::Time,
            ContentPurpose::Datetime => InputPurpose::Datetime,
            ContentPurpose::Terminal => InputPurpose::Terminal,
            _ => InputPurpose::Normal,
        },
        WEnum::Unknown(_) => InputPurpose::Normal,
    }
}

/// The structured text transport: commits ride the input-method connection.
pub struct InputMethodSink {
    im: zwp_input_method_v2::ZwpInputMethodV2,
    serial: Arc<AtomicU32>,
    conn: Connection,
}

impl InputMethodSink {
    fn flush(&self) -> Result<(), SubmitError> {
        self.conn
            .flush()
            .map_err(|e| SubmitError::Transport(io::Error::other(e)))
    }

    fn serial(&self) -> u32 {
        self.serial.load(Ordering::SeqCst)
    }
}

impl TextSink for InputMethodSink {
    fn commit_text(&mut self, text: &str) -> Result<(), SubmitError> {
        self.im.commit_string(text.to_string());
        self.im.commit(self.serial());
        self.flush()
    }

    fn erase(&mut self) -> Result<(), SubmitError> {
        self.im.delete_surrounding_text(1, 0);
        self.im.commit(self.serial());
        self.flush()
    }
}

/// The raw keycode transport: a virtual keyboard fed by generated keymaps.
pub struct VirtualKeyboardSink {
    vk: zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1,
    conn: Connection,
}

/// Offset between XKB keycodes and the evdev codes on the wire.
const EVDEV_OFFSET: u32 = 8;

/// wl_keyboard keymap format: xkb_v1.
const KEYMAP_FORMAT_XKB_V1: u32 = 1;

impl VirtualKeyboardSink {
    fn flush(&self) -> Result<(), SubmitError> {
        self.conn
            .flush()
            .map_err(|e| SubmitError::Transport(io::Error::other(e)))
    }
}

impl KeySink for VirtualKeyboardSink {
    fn set_keymap(&mut self, keymap: &KeymapHandle) -> Result<(), SubmitError> {
        self.vk
            .keymap(KEYMAP_FORMAT_XKB_V1, keymap.fd(), keymap.len() as u32);
        self.flush()
    }

    fn key(&mut self, time: Timestamp, keycode: u32, pressed: bool) -> Result<(), SubmitError> {
        self.vk
            .key(time.0, keycode - EVDEV_OFFSET, u32::from(pressed));
        self.flush()
    }

    fn set_modifiers(&mut self, depressed: u32) -> Result<(), SubmitError> {
        self.vk.modifiers(depressed, 0, 0, 0);
        self.flush()
    }
}

/// A live Wayland connection with both input channels established.
pub struct WaylandIo {
    state: WaylandState,
    event_queue: EventQueue<WaylandState>,
}

impl WaylandIo {
    /// Connects to the compositor and binds the required globals, returning
    /// the connection plus the two transports for the submission router.
    pub fn connect() -> Result<(Self, InputMethodSink, VirtualKeyboardSink), WaylandError> {
        let conn = Connection::connect_to_env()
            .map_err(|e| WaylandError::Connection(e.to_string()))?;

        let mut event_queue = conn.new_event_queue();
        let qh = event_queue.handle();
        conn.display().get_registry(&qh, ());

        let mut state = WaylandState::new();
        event_queue
            .roundtrip(&mut state)
            .map_err(|e| WaylandError::Connection(e.to_string()))?;

        let seat = state
            .seat
            .clone()
            .ok_or(WaylandError::MissingGlobal("wl_seat"))?;
        let im_manager = state
            .input_method_manager
            .clone()
            .ok_or(WaylandError::MissingGlobal("zwp_input_method_manager_v2"))?;
        let vk_manager = state
            .virtual_keyboard_manager
            .clone()
            .ok_or(WaylandError::MissingGlobal(
                "zwp_virtual_keyboard_manager_v1",
            ))?;

        let im = im_manager.get_input_method(&seat, &qh, ());
        let vk = vk_manager.create_virtual_keyboard(&seat, &qh, ());
        tracing::info!("Wayland input protocols bound");

        let text_sink = InputMethodSink {
            im,
            serial: Arc::clone(&state.serial),
            conn: conn.clone(),
        };
        let key_sink = VirtualKeyboardSink { vk, conn };
        Ok((Self { state, event_queue }, text_sink, key_sink))
    }

    /// Attaches the engine and dispatches protocol events until the
    /// connection ends. Runs on its own thread.
    pub fn run(mut self, driver: Threaded) {
        self.state.driver = Some(driver);
        loop {
            if let Err(e) = self.event_queue.blocking_dispatch(&mut self.state) {
                tracing::error!("Wayland dispatch failed: {}", e);
                return;
            }
        }
    }
}
