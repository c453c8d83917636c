// SPDX-License-Identifier: GPL-3.0-only

//! Data model for keyboard layouts.
//!
//! A [`Layout`] is a named bag of [`View`]s plus one designated base view.
//! Each view is an ordered collection of [`Button`]s, and each button carries
//! a [`Symbol`] per (group, level) position. The engine only ever reads the
//! symbol at the currently active position.
//!
//! Layouts are produced by an external collaborator (the layout-file parser)
//! and handed over as complete values; the types here derive `serde` so that
//! boundary stays a plain data handoff. A loaded layout is immutable — all
//! mutable cursor state (current view, latch memory) lives in
//! [`LayoutState`].

pub mod switching;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Name of a view within its layout.
///
/// View names are only meaningful inside one layout; two layouts may both
/// have a view called `upper`.
pub type ViewId = String;

/// A modifier held while its button is pressed.
///
/// Variants map to the X11 modifier mask bits consumed by the
/// virtual-keyboard `modifiers` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Shift,
    Lock,
    Control,
    /// Alt.
    Mod1,
    /// Super/Meta.
    Mod4,
    /// AltGr.
    Mod5,
}

impl Modifier {
    /// The X11 modifier mask bit for this modifier.
    #[must_use]
    pub fn mask(self) -> u32 {
        match self {
            Modifier::Shift => 0x1,
            Modifier::Lock => 0x2,
            Modifier::Control => 0x4,
            Modifier::Mod1 => 0x8,
            Modifier::Mod4 => 0x40,
            Modifier::Mod5 => 0x80,
        }
    }
}

/// An atomic action a button performs when activated.
///
/// Symbols are immutable once loaded. The commit variants (`Text`, `Keysym`,
/// `Erase`) consume latch memory when processed; the view-switching variants
/// (`SetView`, `Locking`) drive the view switch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    /// Commit a literal string.
    Text { text: String },
    /// Commit a symbolic key value.
    ///
    /// `name` is the XKB keysym name used on the raw-keycode fallback path;
    /// `text` is the textual form sent over the structured channel when one
    /// is connected. Keys like `Escape` have no textual form and always go
    /// raw.
    Keysym { name: String, text: Option<String> },
    /// Erase one character before the cursor.
    Erase,
    /// Modifier held while the button is pressed.
    Modifier(Modifier),
    /// Switch to another view without latching.
    SetView { view: ViewId },
    /// Two-way locking switch between a pair of views.
    Locking { lock_view: ViewId, unlock_view: ViewId },
}

impl Symbol {
    /// Whether processing this symbol commits something to the application,
    /// consuming latch memory.
    #[must_use]
    pub fn is_commit(&self) -> bool {
        matches!(self, Symbol::Text { .. } | Symbol::Keysym { .. } | Symbol::Erase)
    }

    /// The textual form sent over the structured text-input channel,
    /// if this symbol has one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Symbol::Text { text } => Some(text),
            Symbol::Keysym { text, .. } => text.as_deref(),
            _ => None,
        }
    }

    /// XKB key names this symbol occupies in a generated keymap.
    ///
    /// Text symbols are spelled as `U+XXXX`-style keysym names, one per
    /// character, so they remain expressible without a structured channel.
    /// Modifiers are delivered as a modifier mask, not as keys, and
    /// view-switching symbols never leave the engine, so neither claims
    /// keycodes.
    #[must_use]
    pub fn key_names(&self) -> Vec<String> {
        match self {
            Symbol::Text { text } => text
                .chars()
                .map(|ch| format!("U{:04X}", ch as u32))
                .collect(),
            Symbol::Keysym { name, .. } => vec![name.clone()],
            Symbol::Erase => vec!["BackSpace".to_string()],
            Symbol::Modifier(_) | Symbol::SetView { .. } | Symbol::Locking { .. } => Vec::new(),
        }
    }
}

/// One symbol assignment within a button's (group, level) matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSlot {
    /// XKB group index.
    #[serde(default)]
    pub group: u32,
    /// Shift level within the group.
    #[serde(default)]
    pub level: u32,
    /// The action at this position.
    pub symbol: Symbol,
}

/// A single button within a view.
///
/// The outline reference describes geometry owned by the rendering
/// collaborator; the engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Name, unique within the containing view.
    pub name: String,
    /// Outline (geometry) reference for the renderer.
    #[serde(default)]
    pub outline: Option<String>,
    /// Symbol per (group, level) position.
    pub symbols: Vec<SymbolSlot>,
}

impl Button {
    /// The symbol at the given (group, level) position, falling back to the
    /// first declared slot when the exact position is not populated.
    #[must_use]
    pub fn symbol_at(&self, group: u32, level: u32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|slot| slot.group == group && slot.level == level)
            .or_else(|| self.symbols.first())
            .map(|slot| &slot.symbol)
    }
}

/// A named, ordered collection of buttons: one complete switchable button
/// arrangement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: ViewId,
    pub buttons: Vec<Button>,
}

impl View {
    /// Looks up a button by name.
    #[must_use]
    pub fn button(&self, name: &str) -> Option<&Button> {
        self.buttons.iter().find(|b| b.name == name)
    }
}

/// The full set of views for one selected keyboard language/mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Layout name, e.g. `us` or `terminal/us`.
    pub name: String,
    /// The view shown when the layout is first activated.
    pub base_view: ViewId,
    /// All views, in declaration order.
    pub views: Vec<View>,
}

impl Layout {
    /// Looks up a view by name.
    #[must_use]
    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Whether a view of the given name belongs to this layout.
    #[must_use]
    pub fn contains_view(&self, name: &str) -> bool {
        self.view(name).is_some()
    }

    /// All XKB key names any symbol in this layout may submit, deduplicated
    /// and sorted. This is the symbol table handed to the keymap builder.
    #[must_use]
    pub fn key_names(&self) -> std::collections::BTreeSet<String> {
        self.views
            .iter()
            .flat_map(|view| view.buttons.iter())
            .flat_map(|button| button.symbols.iter())
            .flat_map(|slot| slot.symbol.key_names())
            .collect()
    }

    /// A minimal built-in layout used when no layout file has been loaded
    /// yet. Lower-case letters on the base view, a latching shift into an
    /// upper-case view, space, backspace and return.
    #[must_use]
    pub fn fallback() -> Layout {
        fn text_button(label: &str) -> Button {
            Button {
                name: label.to_string(),
                outline: None,
                symbols: vec![SymbolSlot {
                    group: 0,
                    level: 0,
                    symbol: Symbol::Text { text: label.to_string() },
                }],
            }
        }

        fn special(name: &str, symbol: Symbol) -> Button {
            Button {
                name: name.to_string(),
                outline: None,
                symbols: vec![SymbolSlot { group: 0, level: 0, symbol }],
            }
        }

        let shift = || {
            special(
                "Shift_L",
                Symbol::Locking {
                    lock_view: "upper".to_string(),
                    unlock_view: "base".to_string(),
                },
            )
        };

        let mut base: Vec<Button> =
            ('a'..='z').map(|c| text_button(&c.to_string())).collect();
        base.push(shift());
        base.push(special("space", Symbol::Text { text: " ".to_string() }));
        base.push(special("BackSpace", Symbol::Erase));
        base.push(special(
            "Return",
            Symbol::Keysym { name: "Return".to_string(), text: Some("\n".to_string()) },
        ));

        let mut upper: Vec<Button> =
            ('A'..='Z').map(|c| text_button(&c.to_string())).collect();
        upper.push(shift());
        upper.push(special("space", Symbol::Text { text: " ".to_string() }));
        upper.push(special("BackSpace", Symbol::Erase));

        Layout {
            name: "fallback".to_string(),
            base_view: "base".to_string(),
            views: vec![
                View { name: "base".to_string(), buttons: base },
                View { name: "upper".to_string(), buttons: upper },
            ],
        }
    }
}

/// Mutable cursor over the active layout: which view is current, and where
/// to return after a latched switch.
///
/// Exactly one view is current at all times, and it is always a member of
/// the layout's view set. Latch memory, when present, names a view of the
/// same layout.
#[derive(Debug, Clone)]
pub struct LayoutState {
    layout: Arc<Layout>,
    current_view: ViewId,
    latch: Option<ViewId>,
    /// Active XKB group. Selected by the layout collaborator; stays 0 until
    /// multi-group layouts are loaded.
    group: u32,
    /// Active shift level within the group.
    level: u32,
}

impl LayoutState {
    /// Starts tracking the given layout at its base view, with no latch.
    #[must_use]
    pub fn new(layout: Arc<Layout>) -> Self {
        let current_view = layout.base_view.clone();
        Self {
            layout,
            current_view,
            latch: None,
            group: 0,
            level: 0,
        }
    }

    /// Atomically replaces the layout, resetting the cursor to the new base
    /// view and dropping any latch.
    pub fn replace_layout(&mut self, layout: Arc<Layout>) {
        self.current_view = layout.base_view.clone();
        self.latch = None;
        self.layout = layout;
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    #[must_use]
    pub fn current_view(&self) -> &ViewId {
        &self.current_view
    }

    #[must_use]
    pub fn latch(&self) -> Option<&ViewId> {
        self.latch.as_ref()
    }

    /// The symbol a named button in the current view performs at the active
    /// (group, level) position.
    #[must_use]
    pub fn symbol_for(&self, button: &str) -> Option<&Symbol> {
        self.layout
            .view(&self.current_view)?
            .button(button)?
            .symbol_at(self.group, self.level)
    }

    /// Applies a symbol's view-switching effect. Returns `true` when the
    /// current view changed.
    ///
    /// See [`switching::apply`] for the transition rules.
    pub fn apply_symbol(&mut self, symbol: &Symbol) -> Result<bool, switching::SwitchError> {
        let (view, latch) =
            switching::apply(symbol, &self.current_view, &self.latch, &self.layout)?;
        let changed = view != self.current_view;
        self.current_view = view;
        self.latch = latch;
        Ok(changed)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} views)", self.name, self.views.len())
    }
}
