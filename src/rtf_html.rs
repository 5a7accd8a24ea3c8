//! RTF → HTML de-encapsulation (MS-OXRTFEX).
//!
//! Recovers the original HTML document wrapped inside an "HTML-encapsulated
//! RTF" body: an RTF stream that exists only to let non-HTML-aware RTF
//! readers degrade gracefully, while carrying the literal HTML bytes inside
//! `{\*\htmltag ...}` destination groups. This is a small purpose-built byte
//! walker, not a full RTF document parser — de-encapsulation only needs to
//! track brace depth, the `\htmlrtf` toggle, and a handful of control words.

/// True if `rtf` contains the `\fromhtml1` marker that identifies
/// HTML-encapsulated RTF (MS-OXRTFEX §2.1.1).
pub fn is_html_encapsulated(rtf: &[u8]) -> bool {
    find_subslice(rtf, b"\\fromhtml1").is_some()
}

/// Recover the embedded HTML document from HTML-encapsulated RTF bytes.
///
/// Returns `None` if `rtf` has no `\fromhtml1` marker (caller should keep the
/// raw RTF as-is instead). A malformed document yields best-effort partial
/// output rather than an error, matching MS-OXRTFEX's intent that this is a
/// recovery operation, not strict validation.
pub fn de_encapsulate(rtf: &[u8]) -> Option<Vec<u8>> {
    if !is_html_encapsulated(rtf) {
        return None;
    }

    let mut out = Vec::with_capacity(rtf.len());
    let mut walker = Walker::new(rtf);
    walker.run(&mut out);
    Some(out)
}

struct Scope {
    htmlrtf: bool,
    /// `{\*...}` whose destination is not `\htmltag`: skip every byte until
    /// this group's matching close brace.
    skip_group: bool,
}

struct Walker<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Scope>,
}

impl<'a> Walker<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: vec![Scope {
                htmlrtf: false,
                skip_group: false,
            }],
        }
    }

    fn top(&self) -> &Scope {
        self.stack.last().expect("root scope always present")
    }

    fn top_mut(&mut self) -> &mut Scope {
        self.stack.last_mut().expect("root scope always present")
    }

    fn emitting(&self) -> bool {
        let s = self.top();
        !s.htmlrtf && !s.skip_group
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn run(&mut self, out: &mut Vec<u8>) {
        while let Some(b) = self.peek() {
            match b {
                b'{' => {
                    self.pos += 1;
                    self.enter_group();
                }
                b'}' => {
                    self.pos += 1;
                    if self.stack.len() > 1 {
                        self.stack.pop();
                    }
                }
                b'\\' => {
                    self.pos += 1;
                    self.control_word_or_symbol(out);
                }
                b'\r' | b'\n' => {
                    self.pos += 1;
                }
                _ => {
                    self.pos += 1;
                    if self.emitting() {
                        out.push(b);
                    }
                }
            }
        }
    }

    fn enter_group(&mut self) {
        let parent_htmlrtf = self.top().htmlrtf;
        let mut skip_group = false;

        if self.data[self.pos..].starts_with(b"\\*") {
            self.pos += 2;
            if !self.consume_literal(b"\\htmltag") {
                skip_group = true;
            }
        }

        self.stack.push(Scope {
            htmlrtf: parent_htmlrtf,
            skip_group,
        });
    }

    fn consume_literal(&mut self, lit: &[u8]) -> bool {
        if self.data[self.pos..].starts_with(lit) {
            self.pos += lit.len();
            // swallow exactly one following space delimiter, RTF convention
            if self.peek() == Some(b' ') {
                self.pos += 1;
            }
            true
        } else {
            false
        }
    }

    fn control_word_or_symbol(&mut self, out: &mut Vec<u8>) {
        let Some(b) = self.peek() else { return };

        if !b.is_ascii_alphabetic() {
            // Control symbol: \'xx hex escape or a single punctuation escape.
            if b == b'\'' {
                self.pos += 1;
                if let Some(byte) = self.read_hex_byte() {
                    if self.emitting() {
                        out.push(byte);
                    }
                }
                return;
            }
            // \par, \line, \tab only ever appear as words; a backslash
            // followed by punctuation is a literal escaped character.
            self.pos += 1;
            if self.emitting() && (b == b'\\' || b == b'{' || b == b'}') {
                out.push(b);
            }
            return;
        }

        let word_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let word = &self.data[word_start..self.pos];

        let neg = self.peek() == Some(b'-');
        if neg {
            self.pos += 1;
        }
        let num_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let param: Option<i32> = if self.pos > num_start {
            std::str::from_utf8(&self.data[num_start..self.pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|v: i32| if neg { -v } else { v })
        } else {
            None
        };

        // Single mandatory space delimiter after a control word.
        if self.peek() == Some(b' ') {
            self.pos += 1;
        }

        match word {
            b"htmlrtf" => self.top_mut().htmlrtf = param != Some(0),
            b"par" | b"line" => {
                if self.emitting() {
                    out.push(b'\n');
                }
            }
            b"tab" => {
                if self.emitting() {
                    out.push(b'\t');
                }
            }
            _ => {}
        }
    }

    fn read_hex_byte(&mut self) -> Option<u8> {
        if self.pos + 2 > self.data.len() {
            return None;
        }
        let hex = std::str::from_utf8(&self.data[self.pos..self.pos + 2]).ok()?;
        let byte = u8::from_str_radix(hex, 16).ok()?;
        self.pos += 2;
        Some(byte)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_returns_none() {
        let rtf = br"{\rtf1\ansi Hello\par}";
        assert!(de_encapsulate(rtf).is_none());
    }

    #[test]
    fn recovers_htmltag_group() {
        let rtf = br"{\rtf1\ansi\fromhtml1{\*\htmltag <html><body>Hi</body></html>}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"<html><body>Hi</body></html>");
    }

    #[test]
    fn htmlrtf_toggle_suppresses_output() {
        let rtf = br"{\rtf1\fromhtml1{\*\htmltag <p>keep\htmlrtf1 drop\htmlrtf0  keep</p>}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"<p>keep keep</p>");
    }

    #[test]
    fn skips_non_htmltag_star_destinations() {
        let rtf = br"{\rtf1\fromhtml1{\*\htmltag <a>}{\*\generator Foo}{\*\htmltag </a>}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"<a></a>");
    }

    #[test]
    fn hex_escape_inside_htmltag() {
        let rtf = br"{\rtf1\fromhtml1{\*\htmltag \'3c\'2fp\'3e}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"</p>");
    }

    #[test]
    fn emits_ordinary_text_between_htmltag_groups() {
        // Real encapsulation: \htmltag groups carry only the markup, the
        // rendered text between them is plain RTF character data.
        let rtf = br"{\rtf1\fromhtml1{\*\htmltag <p>}Hello world{\*\htmltag </p>}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"<p>Hello world</p>");
    }

    #[test]
    fn htmlrtf_toggle_suppresses_text_outside_htmltag_groups() {
        let rtf = br"{\rtf1\fromhtml1{\*\htmltag <p>}Hello\htmlrtf1 \par\htmlrtf0  world{\*\htmltag </p>}}";
        let html = de_encapsulate(rtf).unwrap();
        assert_eq!(html, b"<p>Hello world</p>");
    }
}
