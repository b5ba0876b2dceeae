//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The error type shared by codec construction, encoding and decoding.

quick_error! {
    /// Errors that can be produced while building codecs or decoding data.
    ///
    /// Build-time errors (`DuplicateFieldIndex`, `MissingFieldAnnotation`,
    /// `BadAnnotation`, `UnsupportedType`) are returned by the first codec
    /// lookup for the offending type. Everything else is a decode error.
    ///
    /// Decode errors raised inside a record are wrapped in `Field`, which
    /// records the path from the outermost record to the failing value.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// The data ended in the middle of a value.
        Truncated {
            display("unexpected end of data")
        }
        /// A varint continued past its 10th byte, or carried more than 64
        /// bits of data.
        Overflow {
            display("varint overflows 64 bits")
        }
        /// The wire type is reserved (4), unknown, or not one the value being
        /// decoded can be read from.
        BadWireType(wt: u8) {
            display("bad wire type {}", wt)
        }
        /// A length prefix declared more bytes than remain in the enclosing
        /// buffer.
        LengthExceedsBuffer(declared: u64, remaining: usize) {
            display("declared length {} exceeds the {} bytes remaining",
                    declared, remaining)
        }
        /// A top-level value did not consume all of its input.
        TrailingBytes(extra: usize) {
            display("{} unconsumed bytes after value", extra)
        }
        /// Two fields of a record share a field index.
        DuplicateFieldIndex(record: &'static str, index: u32) {
            display("duplicate field index {} in {}", index, record)
        }
        /// A record field carries a blank `plenc` annotation.
        MissingFieldAnnotation(record: &'static str, field: &'static str) {
            display("field {}.{} has no plenc annotation", record, field)
        }
        /// A record field carries a `plenc` annotation which does not parse.
        BadAnnotation(record: &'static str, field: &'static str,
                      annotation: &'static str) {
            display("field {}.{} has bad plenc annotation {:?}",
                    record, field, annotation)
        }
        /// No codec can be built for the named type (with the given
        /// postfix).
        UnsupportedType(type_name: String) {
            display("unsupported type {}", type_name)
        }
        /// Values were nested more deeply than the recursion limit allows.
        /// `what` names the innermost value.
        ///
        /// See `Config::recursion_limit` to control the cut-off point.
        RecursionLimitExceeded(what: String) {
            display("recursion limit exceeded in {}", what)
        }
        /// A decode error inside a record. `path` is
        /// `<record>.<field#>[/<subfield>...]`.
        Field(path: String, err: Box<Error>) {
            display("{} at {}", err, path)
        }
    }
}

/// The general result type returned by this crate.
pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    /// Wraps this error with the location `<record>.<index>`, prepending to
    /// any path it already carries.
    pub fn in_field(self, record: &str, index: u32) -> Self {
        match self {
            Error::Field(path, err) =>
                Error::Field(format!("{}.{}/{}", record, index, path), err),
            err => Error::Field(format!("{}.{}", record, index), Box::new(err)),
        }
    }

    /// Returns the innermost error, stripping any `Field` paths.
    pub fn root(&self) -> &Error {
        match *self {
            Error::Field(_, ref err) => err.root(),
            ref err => err,
        }
    }

    /// Returns the field path of this error, if it occurred inside a record.
    pub fn path(&self) -> Option<&str> {
        match *self {
            Error::Field(ref path, _) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_field_paths_accumulate_outwards() {
        let err = Error::Truncated
            .in_field("Hat", 2)
            .in_field("Person", 3);
        assert_eq!(Some("Person.3/Hat.2"), err.path());
        assert_eq!(&Error::Truncated, err.root());
        assert_eq!("unexpected end of data at Person.3/Hat.2",
                   err.to_string());
    }
}
