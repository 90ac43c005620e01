//! Pull-style streaming JSON reader.
//!
//! Only what array location and element extraction need: entering arrays and
//! objects, reading member names, skipping values, and copying out one array
//! element at a time as raw bytes. Memory use is bounded by the largest single
//! element, not by the payload size.

use std::io::BufRead;

use crate::errors::{EtlError, Result};

pub struct JsonStreamReader<R> {
    inner: R,
    offset: u64,
    /// Containers entered through `begin_array`/`begin_object`, innermost last.
    frames: Vec<Frame>,
    array_done: bool,
}

struct Frame {
    closer: u8,
    /// No member or element has been read yet.
    first: bool,
}

/// What the container scanner accepts next.
#[derive(Clone, Copy)]
enum Expect {
    Value,
    ValueOrClose,
    Name,
    NameOrClose,
    Colon,
    CommaOrClose,
}

fn is_scalar_start(b: u8) -> bool {
    matches!(b, b'-' | b'0'..=b'9' | b't' | b'f' | b'n')
}

fn push(out: &mut Option<&mut Vec<u8>>, b: u8) {
    if let Some(buf) = out.as_deref_mut() {
        buf.push(b);
    }
}

impl<R: BufRead> JsonStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            frames: Vec::new(),
            array_done: false,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> EtlError {
        EtlError::Snapshot(format!("{} at byte {}", message, self.offset))
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.inner.consume(1);
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<u8> {
        match self.peek()? {
            Some(b) => {
                self.bump();
                Ok(b)
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        self.copy_whitespace(&mut None)
    }

    /// Skips whitespace, copying it to `out`, and peeks the byte after it.
    fn copy_whitespace(&mut self, out: &mut Option<&mut Vec<u8>>) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b @ (b' ' | b'\t' | b'\n' | b'\r')) => {
                    self.bump();
                    push(out, b);
                }
                other => return Ok(other),
            }
        }
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        match self.skip_whitespace()? {
            Some(b) if b == expected => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected '{}' but found '{}'",
                expected as char, b as char
            ))),
            None => Err(self.error(format!("expected '{}' but input ended", expected as char))),
        }
    }

    /// Whether the innermost entered container closes with `closer`, and if
    /// so whether nothing has been read from it yet.
    fn current_frame(&self, closer: u8) -> Option<bool> {
        self.frames
            .last()
            .filter(|frame| frame.closer == closer)
            .map(|frame| frame.first)
    }

    fn mark_read(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.first = false;
        }
    }

    pub fn begin_array(&mut self) -> Result<()> {
        self.expect(b'[')?;
        self.frames.push(Frame { closer: b']', first: true });
        self.array_done = false;
        Ok(())
    }

    pub fn begin_object(&mut self) -> Result<()> {
        self.expect(b'{')?;
        self.frames.push(Frame { closer: b'}', first: true });
        Ok(())
    }

    /// Next member name of the current object, or `None` after its closing brace.
    pub fn next_name(&mut self) -> Result<Option<String>> {
        let Some(first) = self.current_frame(b'}') else {
            return Err(self.error("not positioned inside an object"));
        };
        match self.skip_whitespace()? {
            Some(b'}') => {
                self.bump();
                self.frames.pop();
                return Ok(None);
            }
            None => return Err(self.error("object not terminated")),
            Some(_) if first => {}
            Some(b',') => self.bump(),
            Some(b) => {
                return Err(self.error(format!("expected ',' or '}}' but found '{}'", b as char)))
            }
        }
        self.mark_read();
        self.expect(b'"')?;
        let mut raw = vec![b'"'];
        self.scan_string_body(Some(&mut raw))?;
        let name: String = serde_json::from_slice(&raw).map_err(|e| self.error(e))?;
        self.expect(b':')?;
        Ok(Some(name))
    }

    /// Skips the next value, whatever its kind.
    pub fn skip_value(&mut self) -> Result<()> {
        self.scan_value(None)
    }

    /// Copies out the next element of the current array, or `None` after the
    /// closing bracket. Calls after the end keep returning `None`.
    pub fn next_element(&mut self) -> Result<Option<Vec<u8>>> {
        if self.array_done {
            return Ok(None);
        }
        let Some(first) = self.current_frame(b']') else {
            return Err(self.error("not positioned inside an array"));
        };
        match self.skip_whitespace()? {
            Some(b']') => {
                self.bump();
                self.frames.pop();
                self.array_done = true;
                return Ok(None);
            }
            None => return Err(self.error("array not terminated")),
            Some(_) if first => {}
            Some(b',') => {
                self.bump();
                if let Some(b']') = self.skip_whitespace()? {
                    return Err(self.error("trailing comma in array"));
                }
            }
            Some(b) => {
                return Err(self.error(format!("expected ',' or ']' but found '{}'", b as char)))
            }
        }
        self.mark_read();
        let mut element = Vec::new();
        self.scan_value(Some(&mut element))?;
        Ok(Some(element))
    }

    fn scan_value(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<()> {
        let first = match self.skip_whitespace()? {
            Some(b) => b,
            None => return Err(self.error("expected a value but input ended")),
        };
        match first {
            b'{' | b'[' => self.scan_container(out),
            b'"' => {
                self.bump();
                push(&mut out, b'"');
                self.scan_string_body(out)
            }
            b if is_scalar_start(b) => self.scan_scalar(out),
            _ => Err(self.error(format!(
                "unexpected '{}' where a value was expected",
                first as char
            ))),
        }
    }

    /// Consumes one object or array, checking that brackets match and that
    /// members and elements are separated by commas.
    fn scan_container(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<()> {
        let mut closers: Vec<u8> = Vec::new();
        let mut expect = Expect::Value;
        loop {
            let b = match self.copy_whitespace(&mut out)? {
                Some(b) => b,
                None => return Err(self.error("unexpected end of input")),
            };
            self.bump();
            push(&mut out, b);
            expect = match (expect, b) {
                (Expect::Value | Expect::ValueOrClose, b'{') => {
                    closers.push(b'}');
                    Expect::NameOrClose
                }
                (Expect::Value | Expect::ValueOrClose, b'[') => {
                    closers.push(b']');
                    Expect::ValueOrClose
                }
                (Expect::NameOrClose | Expect::ValueOrClose | Expect::CommaOrClose, b'}' | b']') => {
                    if closers.pop() != Some(b) {
                        return Err(self.error(format!("mismatched '{}'", b as char)));
                    }
                    if closers.is_empty() {
                        return Ok(());
                    }
                    Expect::CommaOrClose
                }
                (Expect::Value | Expect::ValueOrClose, b'"') => {
                    self.scan_string_body(out.as_deref_mut())?;
                    Expect::CommaOrClose
                }
                (Expect::Name | Expect::NameOrClose, b'"') => {
                    self.scan_string_body(out.as_deref_mut())?;
                    Expect::Colon
                }
                (Expect::Colon, b':') => Expect::Value,
                (Expect::CommaOrClose, b',') => match closers.last() {
                    Some(b'}') => Expect::Name,
                    _ => Expect::Value,
                },
                (Expect::Value | Expect::ValueOrClose, b) if is_scalar_start(b) => {
                    self.scan_scalar(out.as_deref_mut())?;
                    Expect::CommaOrClose
                }
                (_, b) => return Err(self.error(format!("unexpected '{}'", b as char))),
            };
        }
    }

    /// Consumes a string body after its opening quote, up to and including the
    /// closing quote.
    fn scan_string_body(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<()> {
        let mut escaped = false;
        loop {
            let b = self.next_byte()?;
            push(&mut out, b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                return Ok(());
            }
        }
    }

    /// Numbers and literals end at the next delimiter, which is left unread.
    fn scan_scalar(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<()> {
        while let Some(b) = self.peek()? {
            if matches!(b, b',' | b']' | b'}' | b':' | b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.bump();
            push(&mut out, b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(json: &str) -> JsonStreamReader<&[u8]> {
        JsonStreamReader::new(json.as_bytes())
    }

    fn elements(r: &mut JsonStreamReader<&[u8]>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(bytes) = r.next_element().unwrap() {
            out.push(String::from_utf8(bytes).unwrap());
        }
        out
    }

    #[test]
    fn reads_mixed_elements() {
        let mut r = reader(r#" [ {"a": [1, {"b": "]"}]}, "x\"y", 42, -1.5e3, true, null ] "#);
        r.begin_array().unwrap();
        assert_eq!(
            elements(&mut r),
            vec![
                r#"{"a": [1, {"b": "]"}]}"#,
                r#""x\"y""#,
                "42",
                "-1.5e3",
                "true",
                "null"
            ]
        );
        assert!(r.next_element().unwrap().is_none());
    }

    #[test]
    fn empty_array() {
        let mut r = reader("[]");
        r.begin_array().unwrap();
        assert!(r.next_element().unwrap().is_none());
    }

    #[test]
    fn navigates_object_members() {
        let mut r = reader(r#"{"skip": {"deep": [1,2,{"x":"}"}]}, "keep": [7]}"#);
        r.begin_object().unwrap();
        assert_eq!(r.next_name().unwrap().as_deref(), Some("skip"));
        r.skip_value().unwrap();
        assert_eq!(r.next_name().unwrap().as_deref(), Some("keep"));
        r.begin_array().unwrap();
        assert_eq!(elements(&mut r), vec!["7"]);
        assert_eq!(r.next_name().unwrap(), None);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut r = reader(r#"[{"a": 1"#);
        r.begin_array().unwrap();
        let err = r.next_element().unwrap_err();
        assert!(err.to_string().contains("unexpected end of input"));

        let mut r = reader("[1, 2");
        r.begin_array().unwrap();
        assert!(r.next_element().unwrap().is_some());
        assert!(r.next_element().unwrap().is_some());
        assert!(r.next_element().is_err());
    }

    #[test]
    fn wrong_container_is_reported_with_offset() {
        let mut r = reader(r#"  {"a": 1}"#);
        let err = r.begin_array().unwrap_err();
        assert!(err.to_string().contains("expected '['"));
        assert!(err.to_string().contains("byte 2"));
    }

    #[test]
    fn missing_separators_are_errors() {
        let mut r = reader(r#"[{"a":1} {"a":2}]"#);
        r.begin_array().unwrap();
        assert_eq!(r.next_element().unwrap().unwrap(), br#"{"a":1}"#);
        let err = r.next_element().unwrap_err();
        assert!(err.to_string().contains("expected ',' or ']'"), "{err}");

        let mut r = reader("[1 2 3]");
        r.begin_array().unwrap();
        assert!(r.next_element().unwrap().is_some());
        assert!(r.next_element().is_err());

        let mut r = reader(r#"{"a": 1 "b": 2}"#);
        r.begin_object().unwrap();
        assert_eq!(r.next_name().unwrap().as_deref(), Some("a"));
        r.skip_value().unwrap();
        assert!(r.next_name().is_err());
    }

    #[test]
    fn mismatched_brackets_are_errors() {
        let mut r = reader(r#"[{"a":1]]"#);
        r.begin_array().unwrap();
        let err = r.next_element().unwrap_err();
        assert!(err.to_string().contains("mismatched ']'"), "{err}");

        let mut r = reader(r#"[[1, {"b": 2]}]"#);
        r.begin_array().unwrap();
        assert!(r.next_element().is_err());
    }

    #[test]
    fn nested_values_need_separators_too() {
        for bad in [r#"[[1 2]]"#, r#"[{"a" 1}]"#, r#"[{"a":1,}]"#, r#"[[,1]]"#] {
            let mut r = reader(bad);
            r.begin_array().unwrap();
            assert!(r.next_element().is_err(), "{bad}");
        }
    }
}
