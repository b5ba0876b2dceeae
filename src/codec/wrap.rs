//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wrappers which add presence to another codec: `Option<T>` and `Box<T>`.

use std::sync::Arc;

use crate::codec::{append_frame, framed_size, Codec, Plenc};
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::registry::Registry;
use crate::wire::WireType;

/// Codec for `Option<T>`.
///
/// `None` is omitted. Reading into `None` first fills it with the inner
/// codec's zero value, then reads into that. Unlike the inner codec, a
/// `Some` holding the zero value is still written, so the presence of the
/// value survives a round trip.
///
/// An inner codec which writes one field per element (the protobuf-style
/// repeated forms) would write nothing at all for an empty collection, so
/// such values are written as a single field in their bare form instead.
pub struct OptionalCodec<T> {
    inner: Arc<dyn Codec<T>>,
    /// Whether the inner codec writes one field per element.
    repeated: bool,
}

impl<T> OptionalCodec<T> {
    #[allow(missing_docs)]
    pub fn new(inner: Arc<dyn Codec<T>>) -> Self {
        let repeated = inner.field_wire_type() != inner.wire_type();
        OptionalCodec { inner, repeated }
    }

    fn size_of(&self, v: &T, tag: Option<&[u8]>) -> usize {
        match tag {
            Some(_) if self.repeated => framed_size(
                self.inner.wire_type(), self.inner.size(v, None), tag),
            _ => self.inner.size(v, tag),
        }
    }

    fn append_to(&self, out: &mut Vec<u8>, v: &T, tag: Option<&[u8]>) {
        match tag {
            Some(_) if self.repeated => {
                append_frame(out, self.inner.wire_type(),
                             self.inner.size(v, None), tag);
                self.inner.append(out, v, None);
            },
            _ => self.inner.append(out, v, tag),
        }
    }
}

impl<T : Send + Sync> Codec<Option<T>> for OptionalCodec<T> {
    fn omit(&self, value: &Option<T>) -> bool { value.is_none() }

    fn size(&self, value: &Option<T>, tag: Option<&[u8]>) -> usize {
        match *value {
            Some(ref v) => self.size_of(v, tag),
            None => self.size_of(&self.inner.new_value(), tag),
        }
    }

    fn append(&self, out: &mut Vec<u8>, value: &Option<T>,
              tag: Option<&[u8]>) {
        match *value {
            Some(ref v) => self.append_to(out, v, tag),
            None => self.append_to(out, &self.inner.new_value(), tag),
        }
    }

    fn read(&self, data: &[u8], value: &mut Option<T>, wt: WireType)
            -> Result<usize> {
        let inner = &self.inner;
        let v = value.get_or_insert_with(|| inner.new_value());
        inner.read(data, v, wt)
    }

    fn new_value(&self) -> Option<T> { None }
    fn wire_type(&self) -> WireType { self.inner.wire_type() }
    fn field_wire_type(&self) -> WireType {
        if self.repeated {
            self.inner.wire_type()
        } else {
            self.inner.field_wire_type()
        }
    }

    fn descriptor(&self) -> Descriptor {
        let mut desc = self.inner.descriptor();
        desc.explicit_presence = true;
        desc
    }
}

impl<T : Plenc> Plenc for Option<T> {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(OptionalCodec::new(registry.codec_for::<T>(postfix)?)))
    }
}

/// Codec for `Box<T>`.
///
/// A box is never null, so it is never omitted, even when it points at a
/// zero value. The nullable pointer is `Option<Box<T>>`, which is what
/// recursive records use.
pub struct PointerCodec<T> {
    inner: Arc<dyn Codec<T>>,
}

impl<T> PointerCodec<T> {
    #[allow(missing_docs)]
    pub fn new(inner: Arc<dyn Codec<T>>) -> Self {
        PointerCodec { inner }
    }
}

impl<T : Send + Sync> Codec<Box<T>> for PointerCodec<T> {
    fn omit(&self, _: &Box<T>) -> bool { false }

    fn size(&self, value: &Box<T>, tag: Option<&[u8]>) -> usize {
        self.inner.size(value, tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &Box<T>,
              tag: Option<&[u8]>) {
        self.inner.append(out, value, tag)
    }

    fn read(&self, data: &[u8], value: &mut Box<T>, wt: WireType)
            -> Result<usize> {
        self.inner.read(data, value, wt)
    }

    fn new_value(&self) -> Box<T> { Box::new(self.inner.new_value()) }
    fn wire_type(&self) -> WireType { self.inner.wire_type() }
    fn field_wire_type(&self) -> WireType { self.inner.field_wire_type() }

    fn descriptor(&self) -> Descriptor {
        let mut desc = self.inner.descriptor();
        desc.explicit_presence = true;
        desc
    }
}

impl<T : Plenc> Plenc for Box<T> {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(PointerCodec::new(registry.codec_for::<T>(postfix)?)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::scalar::IntCodec;
    use crate::codec::tag_bytes;
    use crate::registry::Config;
    use crate::test_helpers::parse;

    #[test]
    fn optional_zero_is_still_written() {
        let codec = OptionalCodec::new(Arc::new(IntCodec::<i32>::new()));
        let tag = tag_bytes(WireType::VarInt, 1);

        assert!(codec.omit(&None));
        assert!(!codec.omit(&Some(0)));

        let mut out = Vec::new();
        codec.append(&mut out, &Some(0), Some(&tag));
        assert_eq!(parse("08 00"), out);
        assert!(codec.descriptor().explicit_presence);
    }

    #[test]
    fn optional_read_sets_presence() {
        let codec = OptionalCodec::new(Arc::new(IntCodec::<i32>::new()));
        let mut v = None;
        codec.read(&parse("06"), &mut v, WireType::VarInt).unwrap();
        assert_eq!(Some(3), v);
    }

    #[test]
    fn optional_empty_repeated_field_keeps_presence() {
        let registry = Registry::new(Config {
            proto_arrays: true, .. Config::default()
        });
        let codec = registry.codec_for::<Option<Vec<String>>>("").unwrap();
        assert_eq!(WireType::Slice, codec.field_wire_type());
        let tag = tag_bytes(codec.field_wire_type(), 1);

        let mut out = Vec::new();
        codec.append(&mut out, &Some(vec![]), Some(&tag));
        assert_eq!(parse("0B 00"), out);
        assert_eq!(out.len(), codec.size(&Some(vec![]), Some(&tag)));

        let mut v = None;
        codec.read(&out[1..], &mut v, WireType::Slice).unwrap();
        assert_eq!(Some(vec![]), v);
    }

    #[test]
    fn pointer_delegates() {
        let codec = PointerCodec::new(Arc::new(IntCodec::<i64>::new()));
        let mut v = codec.new_value();
        assert!(!codec.omit(&v));
        codec.read(&parse("05"), &mut v, WireType::VarInt).unwrap();
        assert_eq!(-3, *v);
    }
}
