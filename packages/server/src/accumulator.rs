use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Language tag or opening fence the generator puts in front of the markup
fn leading_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:```[ \t]*(?:jsx|tsx|javascript|typescript|js|ts)?|(?:jsx|tsx)(?:\s|$))")
            .expect("leading marker pattern is valid")
    })
}

/// Closing fence, possibly still followed by whitespace
fn trailing_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\s*$").expect("trailing fence pattern is valid"))
}

/// Strip one leading language tag and one trailing fence from `source`
pub fn clean(source: &str) -> Cow<'_, str> {
    let start = leading_marker().find(source).map(|m| m.end()).unwrap_or(0);
    let body = &source[start..];
    match trailing_fence().find(body) {
        Some(m) => Cow::Owned(body[..m.start()].to_string()),
        None if start > 0 => Cow::Owned(body.to_string()),
        None => Cow::Borrowed(source),
    }
}

/// Growing text of one generation session.
///
/// Fragments arrive as raw bytes and may split multi-byte characters; the
/// incomplete tail of a fragment is held back until the next one completes
/// it. The accumulated text is only ever appended to.
#[derive(Debug, Default)]
pub struct SourceAccumulator {
    raw: String,
    pending: Vec<u8>,
}

impl SourceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(fragment);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.raw.push_str(valid);
                    return;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    self.raw.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(len) => {
                            self.raw.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the fragment
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush a dangling partial character at end of input
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.raw.push(char::REPLACEMENT_CHARACTER);
        }
    }

    /// Everything received so far
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Transient view with generator framing removed
    pub fn cleaned(&self) -> Cow<'_, str> {
        clean(&self.raw)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_fragments() {
        let mut acc = SourceAccumulator::new();
        acc.append(b"<div>");
        acc.append(b"hello</div>");

        assert_eq!(acc.raw(), "<div>hello</div>");
        assert_eq!(acc.len(), 16);
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "a🤌b".as_bytes();
        let mut acc = SourceAccumulator::new();

        acc.append(&bytes[..3]);
        assert_eq!(acc.raw(), "a");

        acc.append(&bytes[3..]);
        assert_eq!(acc.raw(), "a🤌b");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut acc = SourceAccumulator::new();
        acc.append(&[b'a', 0xff, b'b']);
        assert_eq!(acc.raw(), "a\u{fffd}b");
    }

    #[test]
    fn test_finish_flushes_partial_sequence() {
        let mut acc = SourceAccumulator::new();
        acc.append(&"é".as_bytes()[..1]);
        acc.finish();
        assert_eq!(acc.raw(), "\u{fffd}");
    }

    #[test]
    fn test_clean_strips_fences() {
        assert_eq!(clean("```jsx\n<div />\n```\n"), "\n<div />\n");
        assert_eq!(clean("jsx\n<div />"), "<div />");
        assert_eq!(clean("<div />```"), "<div />");
        assert_eq!(clean("```tsx <b />"), " <b />");
    }

    #[test]
    fn test_clean_leaves_plain_markup_borrowed() {
        let source = "<p>jsx is mentioned here</p>";
        assert!(matches!(clean(source), Cow::Borrowed(_)));
    }

    #[test]
    fn test_cleaning_never_mutates_raw() {
        let mut acc = SourceAccumulator::new();
        acc.append(b"```jsx\n<br />```");

        assert_eq!(acc.cleaned(), "\n<br />");
        assert_eq!(acc.raw(), "```jsx\n<br />```");
    }
}
