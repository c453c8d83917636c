// SPDX-License-Identifier: GPL-3.0-only

//! The submission router.
//!
//! Every activated commit symbol is delivered over exactly one of two
//! transports: the structured text channel (an input-method connection that
//! accepts whole strings) or the raw keycode channel (a virtual keyboard
//! driven by a generated keymap). The choice is recomputed per keystroke —
//! focus can change between any two presses.
//!
//! Structured commits win whenever the text channel is connected, the symbol
//! has a textual form, and no modifier is held. Anything else goes raw:
//! keysym-only keys like `Escape`, any press with Control/Alt held, and all
//! input while no text field is focused.
//!
//! The raw channel needs a keymap before its first key event. Keymaps are
//! built lazily: a layout change only marks the table stale, and the build
//! runs right before the next raw submission actually needs it. The previous
//! keymap is dropped only after the new one has been handed to the
//! transport.

use std::collections::{BTreeSet, HashSet};

use crate::keymap::{self, CompiledKeymap, KeymapError, KeymapHandle};
use crate::layout::{Modifier, Symbol};

/// Milliseconds since the engine started, forwarded with raw key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub u32);

/// Errors from delivering one submission. The submission is dropped and the
/// caller continues; nothing here is fatal.
#[derive(Debug)]
pub enum SubmitError {
    /// Rebuilding the keymap for the raw channel failed.
    Keymap(KeymapError),
    /// A keysym name is missing from the keymap it should be part of.
    UnknownKey { name: String },
    /// The underlying transport failed to flush.
    Transport(std::io::Error),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Keymap(e) => write!(f, "keymap rebuild failed: {}", e),
            SubmitError::UnknownKey { name } => {
                write!(f, "key {:?} is not in the active keymap", name)
            }
            SubmitError::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::Keymap(e) => Some(e),
            SubmitError::UnknownKey { .. } => None,
            SubmitError::Transport(e) => Some(e),
        }
    }
}

impl From<KeymapError> for SubmitError {
    fn from(e: KeymapError) -> Self {
        SubmitError::Keymap(e)
    }
}

/// The structured text channel: an input-method connection.
pub trait TextSink {
    /// Commits a string at the cursor.
    fn commit_text(&mut self, text: &str) -> Result<(), SubmitError>;
    /// Deletes one character before the cursor.
    fn erase(&mut self) -> Result<(), SubmitError>;
}

/// The raw keycode channel: a virtual keyboard.
///
/// Keycodes are XKB keycodes (first assigned code is 9); a wire adapter
/// applies whatever offset its protocol expects.
pub trait KeySink {
    /// Replaces the keymap subsequent key events are interpreted against.
    fn set_keymap(&mut self, keymap: &KeymapHandle) -> Result<(), SubmitError>;
    /// Presses or releases one key.
    fn key(&mut self, time: Timestamp, keycode: u32, pressed: bool) -> Result<(), SubmitError>;
    /// Sets the depressed modifier mask.
    fn set_modifiers(&mut self, depressed: u32) -> Result<(), SubmitError>;
}

/// Routes submissions to the structured or raw channel, owning the keymap
/// lifecycle and the modifier mask.
pub struct SubmissionRouter<T, K> {
    text: T,
    keys: K,
    /// Whether the structured channel currently has a focused target.
    text_active: bool,
    /// Keymap last handed to the raw channel, if any.
    keymap: Option<CompiledKeymap>,
    /// Set when the symbol table changed since the last handoff.
    keymap_stale: bool,
    key_names: BTreeSet<String>,
    /// Modifiers currently held, as an X11 mask.
    modifiers: HashSet<Modifier>,
}

impl<T: TextSink, K: KeySink> SubmissionRouter<T, K> {
    #[must_use]
    pub fn new(text: T, keys: K, key_names: BTreeSet<String>) -> Self {
        Self {
            text,
            keys,
            text_active: false,
            keymap: None,
            keymap_stale: true,
            key_names,
            modifiers: HashSet::new(),
        }
    }

    /// Records whether the structured channel has a focused target. Takes
    /// effect from the next submission on.
    pub fn set_text_target_active(&mut self, active: bool) {
        self.text_active = active;
    }

    /// Replaces the symbol table after a layout change. The raw channel's
    /// keymap is rebuilt lazily, on the next submission that needs it.
    pub fn set_layout_keys(&mut self, key_names: BTreeSet<String>) {
        if key_names != self.key_names {
            self.key_names = key_names;
            self.keymap_stale = true;
        }
    }

    fn modifier_mask(&self) -> u32 {
        self.modifiers.iter().map(|m| m.mask()).sum()
    }

    /// Makes sure the raw channel has a current keymap, rebuilding it if the
    /// symbol table changed. The old keymap is dropped only after the new
    /// handle has been handed off.
    fn ensure_keymap(&mut self) -> Result<(), SubmitError> {
        if self.keymap.is_some() && !self.keymap_stale {
            return Ok(());
        }
        let built = keymap::build(&self.key_names)?;
        self.keys.set_keymap(&built.handle)?;
        self.keymap = Some(built);
        self.keymap_stale = false;
        Ok(())
    }

    /// Taps one key on the raw channel: press immediately followed by
    /// release.
    fn tap(&mut self, name: &str, time: Timestamp) -> Result<(), SubmitError> {
        self.ensure_keymap()?;
        let keycode = self
            .keymap
            .as_ref()
            .and_then(|k| k.keycode(name))
            .ok_or_else(|| SubmitError::UnknownKey { name: name.to_string() })?;
        self.keys.key(time, keycode, true)?;
        self.keys.key(time, keycode, false)
    }

    /// Whether this symbol would go over the structured channel right now.
    fn routes_structured(&self, symbol: &Symbol) -> bool {
        if !self.text_active || !self.modifiers.is_empty() {
            return false;
        }
        match symbol {
            Symbol::Erase => true,
            _ => symbol.text().is_some(),
        }
    }

    /// Delivers a pressed symbol.
    ///
    /// Commit symbols are delivered in full here (a raw tap is a press and a
    /// release); releases of commit symbols are no-ops. A held modifier
    /// clears on the next commit as well as on its own release.
    pub fn submit_pressed(&mut self, symbol: &Symbol, time: Timestamp) -> Result<(), SubmitError> {
        match symbol {
            Symbol::Modifier(modifier) => {
                self.modifiers.insert(*modifier);
                self.ensure_keymap()?;
                self.keys.set_modifiers(self.modifier_mask())
            }

            Symbol::Erase => {
                if self.routes_structured(symbol) {
                    self.text.erase()
                } else {
                    self.tap("BackSpace", time)?;
                    self.clear_latched_modifiers()
                }
            }

            Symbol::Text { text } => {
                if self.routes_structured(symbol) {
                    self.text.commit_text(text)
                } else {
                    for name in symbol.key_names() {
                        self.tap(&name, time)?;
                    }
                    self.clear_latched_modifiers()
                }
            }

            Symbol::Keysym { name, .. } => {
                if self.routes_structured(symbol) {
                    // routes_structured checked text is present
                    let text = symbol.text().unwrap_or_default().to_string();
                    self.text.commit_text(&text)
                } else {
                    self.tap(name, time)?;
                    self.clear_latched_modifiers()
                }
            }

            // View switching never leaves the engine.
            Symbol::SetView { .. } | Symbol::Locking { .. } => Ok(()),
        }
    }

    /// Delivers the release of a symbol. Only modifiers carry state across
    /// the press; everything else was completed at press time.
    pub fn submit_released(&mut self, symbol: &Symbol) -> Result<(), SubmitError> {
        match symbol {
            Symbol::Modifier(modifier) => {
                if self.modifiers.remove(modifier) {
                    self.keys.set_modifiers(self.modifier_mask())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Drops held modifiers after a commit, so a single Control+key chord
    /// does not stick to the following plain keystrokes.
    fn clear_latched_modifiers(&mut self) -> Result<(), SubmitError> {
        if self.modifiers.is_empty() {
            return Ok(());
        }
        self.modifiers.clear();
        self.keys.set_modifiers(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Everything the two recorder sinks observed, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Commit(String),
        Erase,
        Keymap(usize),
        Key { keycode: u32, pressed: bool },
        Modifiers(u32),
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Sent>>>);

    impl Recorder {
        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut self.0.borrow_mut())
        }
    }

    impl TextSink for Recorder {
        fn commit_text(&mut self, text: &str) -> Result<(), SubmitError> {
            self.0.borrow_mut().push(Sent::Commit(text.to_string()));
            Ok(())
        }
        fn erase(&mut self) -> Result<(), SubmitError> {
            self.0.borrow_mut().push(Sent::Erase);
            Ok(())
        }
    }

    impl KeySink for Recorder {
        fn set_keymap(&mut self, keymap: &KeymapHandle) -> Result<(), SubmitError> {
            self.0.borrow_mut().push(Sent::Keymap(keymap.len()));
            Ok(())
        }
        fn key(&mut self, _time: Timestamp, keycode: u32, pressed: bool) -> Result<(), SubmitError> {
            self.0.borrow_mut().push(Sent::Key { keycode, pressed });
            Ok(())
        }
        fn set_modifiers(&mut self, depressed: u32) -> Result<(), SubmitError> {
            self.0.borrow_mut().push(Sent::Modifiers(depressed));
            Ok(())
        }
    }

    fn router() -> (SubmissionRouter<Recorder, Recorder>, Recorder) {
        let log = Recorder::default();
        let names = crate::layout::Layout::fallback().key_names();
        (
            SubmissionRouter::new(log.clone(), log.clone(), names),
            log,
        )
    }

    fn text(s: &str) -> Symbol {
        Symbol::Text { text: s.to_string() }
    }

    /// With a focused text field, a text symbol goes out as one structured
    /// commit and nothing touches the raw channel.
    #[test]
    fn test_structured_commit_preferred() {
        let (mut router, log) = router();
        router.set_text_target_active(true);

        router.submit_pressed(&text("hi"), Timestamp(1)).unwrap();

        assert_eq!(
            log.take(),
            vec![Sent::Commit("hi".to_string())],
            "A focused text target must receive the commit directly"
        );
    }

    /// Without a text target the same symbol falls back to raw keycodes,
    /// with the keymap handed over first.
    #[test]
    fn test_raw_fallback_sets_keymap_first() {
        let (mut router, log) = router();

        router.submit_pressed(&text("a"), Timestamp(1)).unwrap();
        let sent = log.take();

        assert!(
            matches!(sent[0], Sent::Keymap(_)),
            "Keymap must be set before the first key event, got {:?}",
            sent
        );
        assert!(matches!(sent[1], Sent::Key { pressed: true, .. }));
        assert!(matches!(sent[2], Sent::Key { pressed: false, .. }));
        assert_eq!(sent.len(), 3);
    }

    /// The keymap is handed over once and reused until the symbol table
    /// changes.
    #[test]
    fn test_keymap_reused_until_table_changes() {
        let (mut router, log) = router();

        router.submit_pressed(&text("a"), Timestamp(1)).unwrap();
        router.submit_pressed(&text("b"), Timestamp(2)).unwrap();
        let handovers = log
            .take()
            .iter()
            .filter(|s| matches!(s, Sent::Keymap(_)))
            .count();
        assert_eq!(handovers, 1, "Unchanged table must not trigger a rebuild");

        // Unchanged table: no staleness either.
        router.set_layout_keys(crate::layout::Layout::fallback().key_names());
        router.submit_pressed(&text("c"), Timestamp(3)).unwrap();
        assert!(log.take().iter().all(|s| !matches!(s, Sent::Keymap(_))));

        // A genuinely different table rebuilds lazily.
        let mut names = crate::layout::Layout::fallback().key_names();
        names.insert("Escape".to_string());
        router.set_layout_keys(names);
        router.submit_pressed(&text("d"), Timestamp(4)).unwrap();
        assert!(
            log.take().iter().any(|s| matches!(s, Sent::Keymap(_))),
            "A changed table must reach the transport before the next key"
        );
    }

    /// A keysym without textual form goes raw even while a text field is
    /// focused.
    #[test]
    fn test_keysym_without_text_goes_raw() {
        let (mut router, log) = router();
        router.set_text_target_active(true);
        let mut names = crate::layout::Layout::fallback().key_names();
        names.insert("Escape".to_string());
        router.set_layout_keys(names);

        let escape = Symbol::Keysym { name: "Escape".to_string(), text: None };
        router.submit_pressed(&escape, Timestamp(1)).unwrap();

        let sent = log.take();
        assert!(
            sent.iter().any(|s| matches!(s, Sent::Key { pressed: true, .. })),
            "Escape has no textual form and must go over the raw channel"
        );
        assert!(!sent.iter().any(|s| matches!(s, Sent::Commit(_))));
    }

    /// A held modifier forces the raw path and is cleared again by the
    /// commit it applied to.
    #[test]
    fn test_modifier_forces_raw_and_clears_after_commit() {
        let (mut router, log) = router();
        router.set_text_target_active(true);

        let control = Symbol::Modifier(Modifier::Control);
        router.submit_pressed(&control, Timestamp(1)).unwrap();
        assert!(
            log.take().contains(&Sent::Modifiers(0x4)),
            "Pressing Control must raise its mask bit"
        );

        router.submit_pressed(&text("c"), Timestamp(2)).unwrap();
        let sent = log.take();
        assert!(
            sent.iter().any(|s| matches!(s, Sent::Key { .. })),
            "Control+c must go raw despite the focused text field"
        );
        assert_eq!(
            sent.last(),
            Some(&Sent::Modifiers(0)),
            "The mask must clear after the commit it modified"
        );

        // Releasing the already-cleared modifier stays quiet.
        router.submit_released(&control).unwrap();
        assert_eq!(log.take(), Vec::new());

        // The next commit is structured again.
        router.submit_pressed(&text("x"), Timestamp(3)).unwrap();
        assert_eq!(log.take(), vec![Sent::Commit("x".to_string())]);
    }

    /// Erase routes to the structured channel when focused, raw BackSpace
    /// otherwise.
    #[test]
    fn test_erase_follows_the_active_channel() {
        let (mut router, log) = router();

        router.set_text_target_active(true);
        router.submit_pressed(&Symbol::Erase, Timestamp(1)).unwrap();
        assert_eq!(log.take(), vec![Sent::Erase]);

        router.set_text_target_active(false);
        router.submit_pressed(&Symbol::Erase, Timestamp(2)).unwrap();
        let sent = log.take();
        assert!(sent.iter().any(|s| matches!(s, Sent::Key { pressed: true, .. })));
    }

    /// Multi-character text symbols tap one key per character on the raw
    /// path.
    #[test]
    fn test_multichar_text_taps_per_character() {
        let (mut router, log) = router();
        let mut names = crate::layout::Layout::fallback().key_names();
        names.extend(["U0068".to_string(), "U0069".to_string()]);
        router.set_layout_keys(names);

        router.submit_pressed(&text("hi"), Timestamp(1)).unwrap();
        let taps = log
            .take()
            .iter()
            .filter(|s| matches!(s, Sent::Key { pressed: true, .. }))
            .count();
        assert_eq!(taps, 2, "One press per character");
    }

    /// A key name missing from the keymap is reported, not silently skipped.
    #[test]
    fn test_unknown_key_is_an_error() {
        let (mut router, _log) = router();

        let missing = Symbol::Keysym { name: "Hangul".to_string(), text: None };
        match router.submit_pressed(&missing, Timestamp(1)) {
            Err(SubmitError::UnknownKey { name }) => assert_eq!(name, "Hangul"),
            other => panic!("Expected UnknownKey, got {:?}", other.map(|_| ())),
        }
    }

    /// View-switching symbols submit nothing.
    #[test]
    fn test_view_switches_submit_nothing() {
        let (mut router, log) = router();
        router.set_text_target_active(true);

        let set = Symbol::SetView { view: "upper".to_string() };
        router.submit_pressed(&set, Timestamp(1)).unwrap();
        router.submit_released(&set).unwrap();

        assert_eq!(log.take(), Vec::new());
    }
}
