// SPDX-License-Identifier: GPL-3.0-only

//! The threaded driver around the pure loop.
//!
//! One background thread owns every piece of mutable engine state: the
//! layout cursor, the submission router, and the visibility loop state.
//! Events arrive over a std `mpsc` channel and are processed strictly in
//! arrival order; commands leave over an unbounded `futures` channel the
//! GUI loop polls, so the driver never blocks on a slow consumer.
//!
//! Deferred wake-ups are one-shot sleeper threads: sleep until the moment,
//! send `TimeoutReached`, exit. Nothing is cancelled; a wake that turned out
//! unnecessary produces no commands when handled.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures::channel::mpsc::UnboundedSender;

use crate::event_loop::{self, Commands, LoopState};
use crate::layout::{Layout, LayoutState};
use crate::submission::{KeySink, SubmissionRouter, TextSink, Timestamp};
use crate::visibility::{self, force, ImFocus, Presence};

/// Everything the outside world can tell the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Focus change on the structured text-input channel.
    TextInput(ImFocus),
    /// User-requested show/hide override.
    Force(force::Event),
    HardwareKeyboard(Presence),
    Accessibility(bool),
    /// A button in the current view went down.
    ButtonPressed { button: String },
    /// A previously pressed button came back up.
    ButtonReleased { button: String },
    /// The layout collaborator activated a different layout.
    LayoutChanged(Arc<Layout>),
    TimeoutReached(Instant),
}

/// Cloneable handle sending events into the driver thread.
#[derive(Clone)]
pub struct Threaded {
    thread: mpsc::Sender<Event>,
}

impl Threaded {
    /// Spawns the engine thread. `ui` receives the resulting commands;
    /// `layout` is the initially active layout.
    pub fn new<T, K>(
        ui: UnboundedSender<Commands>,
        layout: Arc<Layout>,
        router: SubmissionRouter<T, K>,
        hide_debounce: std::time::Duration,
    ) -> Self
    where
        T: TextSink + Send + 'static,
        K: KeySink + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let wake_sender = sender.clone();
        thread::Builder::new()
            .name("engine".into())
            .spawn(move || {
                let start = Instant::now();
                let mut engine = Engine {
                    layout_state: LayoutState::new(layout),
                    router,
                    loop_state: LoopState::new(start, hide_debounce),
                    ui,
                    wake_sender,
                    start,
                };
                for event in receiver {
                    engine.handle(event);
                }
                tracing::debug!("Engine channel closed, thread exiting");
            })
            .expect("Failed to spawn the engine thread");
        Self { thread: sender }
    }

    /// Sends one event to the engine. Fails only when the engine thread is
    /// gone.
    pub fn send(&self, event: Event) -> Result<(), mpsc::SendError<Event>> {
        self.thread.send(event)
    }
}

/// The state owned by the engine thread.
struct Engine<T, K> {
    layout_state: LayoutState,
    router: SubmissionRouter<T, K>,
    loop_state: LoopState,
    ui: UnboundedSender<Commands>,
    wake_sender: mpsc::Sender<Event>,
    start: Instant,
}

impl<T: TextSink, K: KeySink> Engine<T, K> {
    fn handle(&mut self, event: Event) {
        match event {
            Event::ButtonPressed { button } => self.press(&button),
            Event::ButtonReleased { button } => self.release(&button),
            Event::LayoutChanged(layout) => self.change_layout(layout),

            Event::TextInput(im) => {
                self.router
                    .set_text_target_active(matches!(im, ImFocus::Active(_)));
                self.track(visibility::Event::Im(im));
            }
            Event::Force(request) => self.track(visibility::Event::Force(request)),
            Event::HardwareKeyboard(presence) => {
                self.track(visibility::Event::HardwareKeyboard(presence));
            }
            Event::Accessibility(enabled) => {
                self.track(visibility::Event::Accessibility(enabled));
            }
            Event::TimeoutReached(when) => {
                self.track(visibility::Event::TimeoutReached(when));
            }
        }
    }

    fn timestamp(&self) -> Timestamp {
        Timestamp(self.start.elapsed().as_millis() as u32)
    }

    fn press(&mut self, button: &str) {
        let Some(symbol) = self.layout_state.symbol_for(button).cloned() else {
            tracing::warn!(button, "Pressed button has no symbol in the current view");
            return;
        };

        let time = self.timestamp();
        if let Err(e) = self.router.submit_pressed(&symbol, time) {
            tracing::error!(button, error = %e, "Submission failed, dropping keystroke");
            if symbol.is_commit() {
                // The commit never reached the application, so do not let it
                // consume the latch either.
                return;
            }
        }

        match self.layout_state.apply_symbol(&symbol) {
            Ok(true) => {
                let view = self.layout_state.current_view().clone();
                self.send_commands(Commands {
                    view: Some(view),
                    ..Commands::default()
                });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(button, error = %e, "Ignoring symbol with dangling view");
            }
        }
    }

    fn release(&mut self, button: &str) {
        let Some(symbol) = self.layout_state.symbol_for(button).cloned() else {
            // A layout or view switch may have happened mid-press.
            tracing::debug!(button, "Released button has no symbol in the current view");
            return;
        };
        if let Err(e) = self.router.submit_released(&symbol) {
            tracing::error!(button, error = %e, "Release submission failed");
        }
    }

    fn change_layout(&mut self, layout: Arc<Layout>) {
        tracing::info!(layout = %layout, "Activating layout");
        self.router.set_layout_keys(layout.key_names());
        self.layout_state.replace_layout(layout.clone());
        self.send_commands(Commands {
            layout: Some(layout),
            view: Some(self.layout_state.current_view().clone()),
            ..Commands::default()
        });
    }

    /// Runs one pure loop iteration and acts on its results.
    fn track(&mut self, event: visibility::Event) {
        let previous_wake = self.loop_state.scheduled_wakeup;
        let (loop_state, commands) =
            event_loop::handle_event(self.loop_state.clone(), event, Instant::now());
        self.loop_state = loop_state;

        self.send_commands(commands);

        if let Some(when) = self.loop_state.scheduled_wakeup {
            if previous_wake != Some(when) {
                self.schedule_wake(when);
            }
        }
    }

    fn send_commands(&mut self, commands: Commands) {
        if commands.is_empty() {
            return;
        }
        if self.ui.unbounded_send(commands).is_err() {
            tracing::warn!("Command receiver is gone, dropping commands");
        }
    }

    /// One-shot sleeper: sleep until the moment, report it, exit.
    fn schedule_wake(&self, when: Instant) {
        let sender = self.wake_sender.clone();
        thread::spawn(move || {
            let now = Instant::now();
            if when > now {
                thread::sleep(when - now);
            }
            // The engine may have shut down meanwhile; nothing to do then.
            let _ = sender.send(Event::TimeoutReached(when));
        });
    }
}
