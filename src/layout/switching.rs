// SPDX-License-Identifier: GPL-3.0-only

//! The view switch engine.
//!
//! Applies a pressed symbol to the (current view, latch memory) pair and
//! yields the next pair. The rules:
//!
//! - `SetView(v)` jumps to `v` and clears any latch.
//! - `Locking(lock, unlock)` pressed outside `lock` behaves like
//!   `SetView(lock)` but latches the departure view, so the next commit
//!   returns there. Pressing it again from inside `lock` jumps to `unlock`
//!   and clears the latch ("stay here" cancels the pending return).
//! - Any commit (text, keysym, erase) consumes the latch: after the commit,
//!   the view snaps back to the remembered one.
//!
//! Successive latching presses preserve the original return point; the
//! latch never accumulates a chain.

use crate::layout::{Layout, Symbol, ViewId};
use std::fmt;

/// A symbol referenced a view that is not part of the current layout.
///
/// This is an internal-consistency violation — the layout loader guarantees
/// locking pairs and set-view targets are members — so the engine refuses to
/// guess: callers log the error and ignore the offending symbol rather than
/// switching to an undefined view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchError {
    /// The missing view name.
    pub view: ViewId,
    /// Name of the layout that was searched.
    pub layout: String,
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "view {:?} is not part of layout {:?}",
            self.view, self.layout
        )
    }
}

impl std::error::Error for SwitchError {}

fn member<'a>(layout: &Layout, view: &'a ViewId) -> Result<&'a ViewId, SwitchError> {
    if layout.contains_view(view) {
        Ok(view)
    } else {
        Err(SwitchError {
            view: view.clone(),
            layout: layout.name.clone(),
        })
    }
}

/// Applies `symbol` to the `(current, latch)` pair, returning the next pair.
///
/// Pure: the only inputs are the arguments, the only output the returned
/// pair. `layout` is consulted solely for membership checks.
pub fn apply(
    symbol: &Symbol,
    current: &ViewId,
    latch: &Option<ViewId>,
    layout: &Layout,
) -> Result<(ViewId, Option<ViewId>), SwitchError> {
    match symbol {
        // Unconditional jump; breaks any in-progress latch.
        Symbol::SetView { view } => Ok((member(layout, view)?.clone(), None)),

        Symbol::Locking { lock_view, unlock_view } => {
            member(layout, lock_view)?;
            member(layout, unlock_view)?;
            if current == lock_view {
                // Unlatching press: return to the unlock view and drop the
                // pending return, whether or not one was set.
                Ok((unlock_view.clone(), None))
            } else {
                // Latching press: remember where we came from, unless an
                // earlier latch already recorded the original return point.
                let latch = latch.clone().or_else(|| Some(current.clone()));
                Ok((lock_view.clone(), latch))
            }
        }

        // A commit consumes the latch once the commit has completed.
        Symbol::Text { .. } | Symbol::Keysym { .. } | Symbol::Erase => match latch {
            Some(return_view) => Ok((member(layout, return_view)?.clone(), None)),
            None => Ok((current.clone(), None)),
        },

        // Modifiers do not move between views.
        Symbol::Modifier(_) => Ok((current.clone(), latch.clone())),
    }
}
