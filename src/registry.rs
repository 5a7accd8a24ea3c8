//! Format detection registry.
//!
//! The original design this crate's scope was distilled from detected file
//! formats through free functions dispatching on global state. This crate
//! uses an explicit [`Registry`] value instead: callers construct one (or
//! use [`Registry::with_defaults`]), register additional decoders into it,
//! and pass it to [`detect`]. No global mutable registry exists anywhere in
//! this crate.

/// One entry in a [`Registry`]: a name plus the predicates that recognize
/// its input.
pub struct DecoderHandle {
    pub name: &'static str,
    magic: &'static [u8],
    extensions: &'static [&'static str],
}

impl DecoderHandle {
    fn matches_magic(&self, bytes: &[u8]) -> bool {
        !self.magic.is_empty() && bytes.starts_with(self.magic)
    }

    fn matches_extension(&self, file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext))
    }
}

/// An ordered set of registered decoders.
///
/// Detection prefers a magic-byte match over an extension match; among
/// magic matches, the first-registered handle wins.
#[derive(Default)]
pub struct Registry {
    handles: Vec<DecoderHandle>,
}

impl Registry {
    /// An empty registry with no decoders.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with this crate's built-in TNEF decoder.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DecoderHandle {
            name: "tnef",
            magic: &[0x78, 0x9F, 0x3E, 0x22],
            extensions: &[".dat"],
        });
        registry
    }

    /// Add a decoder handle to the registry.
    pub fn register(&mut self, handle: DecoderHandle) {
        self.handles.push(handle);
    }

    /// Find the decoder that recognizes `bytes`, preferring a magic match
    /// over a name-extension match and breaking ties by registration order.
    pub fn detect(&self, file_name: &str, bytes: &[u8]) -> Option<&DecoderHandle> {
        self.handles
            .iter()
            .find(|h| h.matches_magic(bytes))
            .or_else(|| self.handles.iter().find(|h| h.matches_extension(file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_wins_over_extension() {
        let registry = Registry::with_defaults();
        let tnef_bytes = [0x78, 0x9F, 0x3E, 0x22, 0, 0];
        let found = registry.detect("attachment.bin", &tnef_bytes).unwrap();
        assert_eq!(found.name, "tnef");
    }

    #[test]
    fn falls_back_to_extension() {
        let registry = Registry::with_defaults();
        let found = registry.detect("winmail.dat", b"not tnef").unwrap();
        assert_eq!(found.name, "tnef");
    }

    #[test]
    fn unrecognized_input_returns_none() {
        let registry = Registry::with_defaults();
        assert!(registry.detect("readme.txt", b"plain text").is_none());
    }

    #[test]
    fn first_registered_wins_ties() {
        let mut registry = Registry::new();
        registry.register(DecoderHandle { name: "first", magic: b"AB", extensions: &[] });
        registry.register(DecoderHandle { name: "second", magic: b"AB", extensions: &[] });
        let found = registry.detect("x", b"ABCD").unwrap();
        assert_eq!(found.name, "first");
    }
}
