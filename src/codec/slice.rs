//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Codecs for `Vec<T>`.
//!
//! The layout depends on the element's wire type:
//!
//! - Elements which are themselves delimited (`Length` or `Slice`) are
//!   written as a `Slice` payload: the element count, then each element
//!   prefixed by its length. With `Config::proto_arrays`, `Length` elements
//!   are instead written protobuf-style, as one `Length` field per element,
//!   all sharing the same tag.
//!
//! - `Fixed32` and `Fixed64` elements are packed back-to-back into one
//!   `Length` field.
//!
//! - `VarInt` elements are likewise packed into one `Length` field.
//!
//! Decoding always accepts both the packed or `Slice` form (which replaces
//! the whole vector) and the repeated form (which appends one element per
//! occurrence), regardless of configuration.

use std::sync::Arc;

use crate::codec::{append_frame, framed_size, Codec, Plenc};
use crate::descriptor::{Descriptor, FieldType};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

impl<T : Plenc> Plenc for Vec<T> {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        T::build_vec_codec(registry, postfix)
    }
}

/// Builds the slice codec for `Vec<T>` appropriate to `T`'s wire type.
///
/// The postfix is passed through to the element, so `Vec<Arc<str>>` with
/// `intern` interns each element.
pub fn build_slice_codec<T : Plenc>(registry: &Registry, postfix: &str)
                                    -> Result<Arc<dyn Codec<Vec<T>>>> {
    let elt = registry.codec_for::<T>(postfix)?;
    Ok(match elt.wire_type() {
        WireType::Length | WireType::Slice => {
            let proto = registry.config().proto_arrays &&
                WireType::Length == elt.wire_type();
            Arc::new(DelimitedSliceCodec { elt, proto })
        },
        WireType::Fixed32 => Arc::new(PackedSliceCodec {
            elt, width: Some(4),
        }),
        WireType::Fixed64 => Arc::new(PackedSliceCodec {
            elt, width: Some(8),
        }),
        WireType::VarInt => Arc::new(PackedSliceCodec { elt, width: None }),
    })
}

fn slice_descriptor(elt: Descriptor) -> Descriptor {
    let mut desc = Descriptor::of(FieldType::Slice);
    desc.elements.push(elt);
    desc
}

/// Reads the `Slice` payload at the front of `data`, calling `f` with each
/// element's bytes in turn. Returns the number of bytes consumed.
pub(crate) fn read_slice_entries<F>(data: &[u8], mut f: F) -> Result<usize>
where F : FnMut (&[u8]) -> Result<()> {
    let (count, mut off) = wire::read_varuint(data)?;
    for _ in 0..count {
        let (entry, n) = wire::read_delimited(&data[off..])?;
        f(entry)?;
        off += n;
    }
    Ok(off)
}

/// Codec for vectors of delimited elements, such as strings, records and
/// nested vectors.
pub struct DelimitedSliceCodec<T> {
    elt: Arc<dyn Codec<T>>,
    proto: bool,
}

impl<T> DelimitedSliceCodec<T> {
    fn entry_size(&self, value: &T) -> usize {
        let n = self.elt.size(value, None);
        wire::size_varuint(n as u64) + n
    }

    fn slice_size(&self, value: &[T]) -> usize {
        wire::size_varuint(value.len() as u64) +
            value.iter().map(|v| self.entry_size(v)).sum::<usize>()
    }
}

impl<T : Send + Sync> Codec<Vec<T>> for DelimitedSliceCodec<T> {
    fn omit(&self, value: &Vec<T>) -> bool { value.is_empty() }

    fn size(&self, value: &Vec<T>, tag: Option<&[u8]>) -> usize {
        match tag {
            Some(tag) if self.proto => value.iter()
                .map(|v| tag.len() + self.entry_size(v))
                .sum(),
            _ => framed_size(WireType::Slice, self.slice_size(value), tag),
        }
    }

    fn append(&self, out: &mut Vec<u8>, value: &Vec<T>,
              tag: Option<&[u8]>) {
        if let (true, Some(tag)) = (self.proto, tag) {
            for v in value {
                append_frame(out, WireType::Length,
                             self.elt.size(v, None), Some(tag));
                self.elt.append(out, v, None);
            }
            return;
        }

        append_frame(out, WireType::Slice, self.slice_size(value), tag);
        wire::append_varuint(out, value.len() as u64);
        for v in value {
            wire::append_varuint(out, self.elt.size(v, None) as u64);
            self.elt.append(out, v, None);
        }
    }

    fn read(&self, data: &[u8], value: &mut Vec<T>, wt: WireType)
            -> Result<usize> {
        let elt_wt = self.elt.wire_type();
        match wt {
            WireType::Slice => {
                let mut elements = Vec::new();
                let n = read_slice_entries(data, |entry| {
                    let mut v = self.elt.new_value();
                    self.elt.read(entry, &mut v, elt_wt)?;
                    elements.push(v);
                    Ok(())
                })?;
                *value = elements;
                Ok(n)
            },

            // One element of the repeated form. `data` has already been
            // narrowed to this element.
            WireType::Length => {
                let mut v = self.elt.new_value();
                self.elt.read(data, &mut v, elt_wt)?;
                value.push(v);
                Ok(data.len())
            },

            wt => Err(Error::BadWireType(wt as u8)),
        }
    }

    fn new_value(&self) -> Vec<T> { Vec::new() }
    fn wire_type(&self) -> WireType { WireType::Slice }

    fn field_wire_type(&self) -> WireType {
        if self.proto { WireType::Length } else { WireType::Slice }
    }

    fn descriptor(&self) -> Descriptor {
        slice_descriptor(self.elt.descriptor())
    }
}

/// Codec for vectors of fixed-width or varint elements, packed into a
/// single `Length` payload.
pub struct PackedSliceCodec<T> {
    elt: Arc<dyn Codec<T>>,
    /// The width of each element, or `None` for varints.
    width: Option<usize>,
}

impl<T> PackedSliceCodec<T> {
    fn payload_size(&self, value: &[T]) -> usize {
        match self.width {
            Some(width) => width * value.len(),
            None => value.iter().map(|v| self.elt.size(v, None)).sum(),
        }
    }
}

impl<T : Send + Sync> Codec<Vec<T>> for PackedSliceCodec<T> {
    fn omit(&self, value: &Vec<T>) -> bool { value.is_empty() }

    fn size(&self, value: &Vec<T>, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, self.payload_size(value), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &Vec<T>,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Length, self.payload_size(value), tag);
        for v in value {
            self.elt.append(out, v, None);
        }
    }

    fn read(&self, data: &[u8], value: &mut Vec<T>, wt: WireType)
            -> Result<usize> {
        let elt_wt = self.elt.wire_type();

        if WireType::Length == wt {
            if let Some(width) = self.width {
                if 0 != data.len() % width {
                    return Err(Error::Truncated);
                }
            }

            let mut elements = Vec::new();
            let mut off = 0;
            while off < data.len() {
                let mut v = self.elt.new_value();
                off += self.elt.read(&data[off..], &mut v, elt_wt)?;
                elements.push(v);
            }
            *value = elements;
            Ok(data.len())
        } else if elt_wt == wt {
            // Unpacked repeated element
            let mut v = self.elt.new_value();
            let n = self.elt.read(data, &mut v, elt_wt)?;
            value.push(v);
            Ok(n)
        } else {
            Err(Error::BadWireType(wt as u8))
        }
    }

    fn new_value(&self) -> Vec<T> { Vec::new() }
    fn wire_type(&self) -> WireType { WireType::Length }

    fn descriptor(&self) -> Descriptor {
        slice_descriptor(self.elt.descriptor())
    }
}
