// SPDX-License-Identifier: GPL-3.0-only

//! Keymap builder for the raw-keycode submission path.
//!
//! Turns a symbol table (the set of XKB key names a layout may submit) into
//! a compiled, shared-memory-backed keymap the virtual-keyboard transport
//! hands to the compositor:
//!
//! 1. assign each name a keycode, deterministically (sorted input);
//! 2. serialize a single-level `xkb_keymap` description;
//! 3. validate it by compiling with `xkbcommon`;
//! 4. write it into a freshly allocated memfd, sized exactly to the text
//!    plus NUL terminator.
//!
//! Every build allocates a new region — a consumer may still be mapping the
//! previous one. The old [`KeymapHandle`] is dropped (closing its fd) only
//! once the new one has been handed off.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use xkbcommon::xkb;

/// Lowest assigned keycode. Keycode 8 maps to evdev code 0 after the
/// protocol offset, which compositors discard, so assignment starts at 9.
const FIRST_KEYCODE: u32 = 9;

/// Highest keycode Xwayland will consume.
const LAST_KEYCODE: u32 = 255;

/// Errors from building a keymap. Recoverable: the triggering submission is
/// dropped, the driver continues.
#[derive(Debug)]
pub enum KeymapError {
    /// More distinct key names than assignable keycodes.
    TooManyKeys { count: usize },
    /// The serialized description failed to compile.
    Compile,
    /// Allocating or filling the shared-memory region failed.
    Shm(std::io::Error),
}

impl std::fmt::Display for KeymapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeymapError::TooManyKeys { count } => write!(
                f,
                "{} distinct keys exceed the {} assignable keycodes",
                count,
                LAST_KEYCODE - FIRST_KEYCODE + 1,
            ),
            KeymapError::Compile => write!(f, "generated keymap failed to compile"),
            KeymapError::Shm(e) => write!(f, "shared memory allocation failed: {}", e),
        }
    }
}

impl std::error::Error for KeymapError {}

impl From<std::io::Error> for KeymapError {
    fn from(e: std::io::Error) -> Self {
        KeymapError::Shm(e)
    }
}

/// An opaque shared-memory descriptor plus length, consumed by the
/// raw-keycode transport.
///
/// The region is written once, before the handle is published, and is
/// read-only for consumers afterwards. Dropping the handle closes the fd.
#[derive(Debug)]
pub struct KeymapHandle {
    fd: OwnedFd,
    len: usize,
}

impl KeymapHandle {
    /// The descriptor to pass over the wire.
    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Region length in bytes, including the NUL terminator.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the region back out through a duplicated descriptor.
    pub fn contents(&self) -> std::io::Result<Vec<u8>> {
        let mut file = File::from(self.fd.try_clone()?);
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.len);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// A built keymap: the shared-memory handle plus the keycode each key name
/// was assigned.
#[derive(Debug)]
pub struct CompiledKeymap {
    pub handle: KeymapHandle,
    keycodes: BTreeMap<String, u32>,
}

impl CompiledKeymap {
    /// The XKB keycode assigned to a key name, if the name is part of the
    /// table this keymap was built from.
    #[must_use]
    pub fn keycode(&self, name: &str) -> Option<u32> {
        self.keycodes.get(name).copied()
    }
}

/// Assigns each key name a keycode, starting from [`FIRST_KEYCODE`].
///
/// Input is a sorted set, so assignment is deterministic: identical tables
/// always produce identical mappings.
fn assign_keycodes(names: &BTreeSet<String>) -> Result<BTreeMap<String, u32>, KeymapError> {
    let capacity = (LAST_KEYCODE - FIRST_KEYCODE + 1) as usize;
    if names.len() > capacity {
        return Err(KeymapError::TooManyKeys { count: names.len() });
    }
    Ok(names
        .iter()
        .zip(FIRST_KEYCODE..=LAST_KEYCODE)
        .map(|(name, code)| (name.clone(), code))
        .collect())
}

/// Serializes a de-facto single-level keymap.
///
/// The types and compatibility sections, and the indicator, are required by
/// Xwayland even though no key here has more than one level.
fn serialize(keycodes: &BTreeMap<String, u32>) -> String {
    let mut buf = String::new();

    let _ = writeln!(
        buf,
        "xkb_keymap {{

    xkb_keycodes \"slateboard\" {{
        minimum = 8;
        maximum = {};",
        LAST_KEYCODE,
    );
    for code in keycodes.values() {
        let _ = writeln!(buf, "        <I{}> = {0};", code);
    }
    let _ = writeln!(
        buf,
        "        indicator 1 = \"Caps Lock\";
    }};

    xkb_symbols \"slateboard\" {{"
    );
    for (name, code) in keycodes {
        let _ = writeln!(buf, "        key <I{}> {{ [ {} ] }};", code, name);
    }
    let _ = writeln!(
        buf,
        "    }};

    xkb_types \"slateboard\" {{
        virtual_modifiers Slateboard;

        type \"ONE_LEVEL\" {{
            modifiers = none;
            level_name[Level1] = \"Any\";
        }};
        type \"TWO_LEVEL\" {{
            level_name[Level1] = \"Base\";
        }};
        type \"ALPHABETIC\" {{
            level_name[Level1] = \"Base\";
        }};
        type \"KEYPAD\" {{
            level_name[Level1] = \"Base\";
        }};
    }};

    xkb_compatibility \"slateboard\" {{
        interpret Any+AnyOf(all) {{
            action = SetMods(modifiers=modMapMods,clearLocks);
        }};
    }};
}};"
    );

    buf
}

/// Compiles the description with xkbcommon to catch malformed output before
/// it reaches the compositor.
fn validate(text: &str) -> Result<(), KeymapError> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    xkb::Keymap::new_from_string(
        &context,
        text.to_string(),
        xkb::KEYMAP_FORMAT_TEXT_V1,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .map(|_| ())
    .ok_or(KeymapError::Compile)
}

/// Writes the serialized text plus NUL terminator into a fresh anonymous
/// shared-memory region.
fn allocate(text: &str) -> Result<KeymapHandle, KeymapError> {
    let fd = memfd_create(c"slateboard-keymap", MemFdCreateFlag::MFD_CLOEXEC)
        .map_err(|e| KeymapError::Shm(std::io::Error::from_raw_os_error(e as i32)))?;
    let mut file = File::from(fd);
    file.write_all(text.as_bytes())?;
    file.write_all(&[0])?;
    Ok(KeymapHandle {
        fd: OwnedFd::from(file),
        len: text.len() + 1,
    })
}

/// Builds a compiled keymap from a symbol table.
///
/// Identical tables yield byte-identical serialized content (the handles and
/// regions still differ). Failure is reported up and blocks only the
/// in-flight submission.
pub fn build(names: &BTreeSet<String>) -> Result<CompiledKeymap, KeymapError> {
    let keycodes = assign_keycodes(names)?;
    let text = serialize(&keycodes);
    validate(&text)?;
    let handle = allocate(&text)?;
    tracing::debug!(
        keys = keycodes.len(),
        bytes = handle.len(),
        "Built keymap"
    );
    Ok(CompiledKeymap { handle, keycodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// Keycodes are assigned in sorted order starting from 9, and the
    /// generated keymap resolves them back to the right keysyms.
    #[test]
    fn test_keymap_resolves_assigned_codes() {
        let keycodes = assign_keycodes(&table(&["a", "c"])).unwrap();
        assert_eq!(keycodes.get("a"), Some(&9));
        assert_eq!(keycodes.get("c"), Some(&10));

        let text = serialize(&keycodes);
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_string(
            &context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .expect("Failed to compile generated keymap");
        let state = xkb::State::new(&keymap);

        assert_eq!(
            state.key_get_one_sym(xkb::Keycode::new(9)),
            xkb::Keysym::from(xkb::keysyms::KEY_a)
        );
        assert_eq!(
            state.key_get_one_sym(xkb::Keycode::new(10)),
            xkb::Keysym::from(xkb::keysyms::KEY_c)
        );
    }

    /// Two builds from identical tables produce identical region content,
    /// through distinct regions.
    #[test]
    fn test_build_is_content_deterministic() {
        let names = crate::layout::Layout::fallback().key_names();

        let first = build(&names).expect("first build");
        let second = build(&names).expect("second build");

        assert_eq!(first.handle.len(), second.handle.len());
        assert_eq!(
            first.handle.contents().unwrap(),
            second.handle.contents().unwrap(),
            "Identical tables must serialize identically"
        );
        // Same name, same code, on both builds.
        assert_eq!(first.keycode("BackSpace"), second.keycode("BackSpace"));
    }

    /// The region is sized exactly to the text plus NUL terminator.
    #[test]
    fn test_region_sized_to_text_plus_terminator() {
        let built = build(&table(&["a"])).expect("build");
        let contents = built.handle.contents().unwrap();

        assert_eq!(contents.len(), built.handle.len());
        assert_eq!(contents.last(), Some(&0), "Region must end with NUL");
        assert!(!contents[..contents.len() - 1].contains(&0));
    }

    /// The fallback layout's full symbol table compiles, including the
    /// U+XXXX spellings for text symbols.
    #[test]
    fn test_fallback_symbol_table_compiles() {
        let names = crate::layout::Layout::fallback().key_names();
        let built = build(&names).expect("fallback table must build");
        for name in &names {
            assert!(
                built.keycode(name).is_some(),
                "Every table entry needs a keycode: {}",
                name
            );
        }
    }

    /// Overflowing the keycode space is an error, not a truncation.
    #[test]
    fn test_symbol_table_overflow_rejected() {
        let names: BTreeSet<String> =
            (0..300).map(|n| format!("U{:04X}", 0x1000 + n)).collect();
        match assign_keycodes(&names) {
            Err(KeymapError::TooManyKeys { count }) => assert_eq!(count, 300),
            other => panic!("Expected TooManyKeys, got {:?}", other.map(|_| ())),
        }
    }
}
