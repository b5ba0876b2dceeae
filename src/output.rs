//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An `Outputter` which writes indented JSON.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::descriptor::Outputter;

/// Writes the values reported by `Descriptor::read` as JSON.
///
/// Nested values are indented by two spaces per level. Every value is
/// followed by a comma and a newline; the comma after the last member of an
/// object or array is removed when it is closed, and the one after the
/// whole document by `done`.
///
/// Times are written as RFC 3339 strings with nanosecond precision. Floats
/// which JSON cannot represent are written as the strings `"NaN"`,
/// `"+Inf"` and `"-Inf"`.
#[derive(Debug, Default)]
pub struct JsonOutput {
    buf: String,
    depth: usize,
    /// Set after `name_field`, so that the value follows on the same line.
    in_field: bool,
}

impl JsonOutput {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finishes the document and returns it.
    pub fn done(&mut self) -> &str {
        self.remove_comma();
        &self.buf
    }

    /// Clears the output so that another document can be written.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.depth = 0;
        self.in_field = false;
    }

    fn prefix(&mut self) {
        if self.in_field {
            self.in_field = false;
            return;
        }
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    fn suffix(&mut self) {
        self.buf.push_str(",\n");
    }

    fn remove_comma(&mut self) {
        if self.buf.ends_with(",\n") {
            let len = self.buf.len();
            self.buf.truncate(len - 2);
            self.buf.push('\n');
        }
    }

    fn open(&mut self, c: char) {
        self.prefix();
        self.buf.push(c);
        self.buf.push('\n');
        self.depth += 1;
    }

    fn close(&mut self, c: char) {
        self.depth = self.depth.saturating_sub(1);
        self.remove_comma();
        self.prefix();
        self.buf.push(c);
        self.suffix();
    }

    fn scalar<T : std::fmt::Display>(&mut self, v: T) {
        self.prefix();
        let _ = write!(self.buf, "{}", v);
        self.suffix();
    }

    fn quoted(&mut self, s: &str) {
        self.buf.push('"');
        for c in s.chars() {
            match c {
                '\\' => self.buf.push_str("\\\\"),
                '"' => self.buf.push_str("\\\""),
                '\n' => self.buf.push_str("\\n"),
                '\r' => self.buf.push_str("\\r"),
                '\t' => self.buf.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    let _ = write!(self.buf, "\\u{:04x}", c as u32);
                },
                c => self.buf.push(c),
            }
        }
        self.buf.push('"');
    }

    fn float<T>(&mut self, v: T, nan: bool, positive: bool, finite: bool)
    where T : std::fmt::Display {
        if finite {
            self.scalar(v);
        } else if nan {
            self.string("NaN");
        } else if positive {
            self.string("+Inf");
        } else {
            self.string("-Inf");
        }
    }
}

impl Outputter for JsonOutput {
    fn start_object(&mut self) { self.open('{') }
    fn end_object(&mut self) { self.close('}') }
    fn start_array(&mut self) { self.open('[') }
    fn end_array(&mut self) { self.close(']') }

    fn name_field(&mut self, name: &str) {
        self.prefix();
        self.quoted(name);
        self.buf.push_str(": ");
        self.in_field = true;
    }

    fn int64(&mut self, v: i64) { self.scalar(v) }
    fn uint64(&mut self, v: u64) { self.scalar(v) }

    fn float32(&mut self, v: f32) {
        self.float(v, v.is_nan(), v > 0.0, v.is_finite())
    }

    fn float64(&mut self, v: f64) {
        self.float(v, v.is_nan(), v > 0.0, v.is_finite())
    }

    fn string(&mut self, s: &str) {
        self.prefix();
        self.quoted(s);
        self.suffix();
    }

    fn bool(&mut self, b: bool) { self.scalar(b) }

    fn time(&mut self, t: DateTime<Utc>) {
        self.string(&t.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    fn raw(&mut self, s: &str) { self.scalar(s) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_layout() {
        let mut out = JsonOutput::new();
        out.start_object();
        out.name_field("a");
        out.int64(-1);
        out.name_field("b");
        out.start_array();
        out.bool(true);
        out.uint64(2);
        out.end_array();
        out.name_field("c");
        out.start_object();
        out.end_object();
        out.end_object();

        assert_eq!("{\n  \"a\": -1,\n  \"b\": [\n    true,\n    2\n  ],\n  \
                    \"c\": {\n  }\n}\n", out.done());
    }

    #[test]
    fn strings_are_escaped() {
        let mut out = JsonOutput::new();
        out.string("a\"b\\c\n\r\t\u{1}é");
        assert_eq!("\"a\\\"b\\\\c\\n\\r\\t\\u0001é\"\n", out.done());
    }

    #[test]
    fn times_and_odd_floats() {
        let mut out = JsonOutput::new();
        out.start_array();
        out.time(DateTime::from_timestamp(1, 5).unwrap());
        out.float64(f64::NAN);
        out.float32(f32::NEG_INFINITY);
        out.float64(f64::INFINITY);
        out.float32(0.5);
        out.end_array();

        let doc: serde_json::Value = serde_json::from_str(out.done())
            .unwrap();
        assert_eq!(serde_json::json!([
            "1970-01-01T00:00:01.000000005Z", "NaN", "-Inf", "+Inf", 0.5,
        ]), doc);
    }

    #[test]
    fn reset_allows_reuse() {
        let mut out = JsonOutput::new();
        out.int64(1);
        out.reset();
        out.int64(2);
        assert_eq!("2\n", out.done());
    }
}
