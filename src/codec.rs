//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Defines the `Codec` and `Plenc` traits and the codecs built on them.
//!
//! A `Codec<T>` knows how to size, write and read values of type `T`. Codecs
//! are built once per `(type, postfix)` by a `Registry` and then shared; they
//! hold no per-call state.
//!
//! Every codec can write a value in two shapes. Given a tag, it writes a
//! complete field: the tag, a length prefix if its wire type is
//! `WireType::Length`, and then the payload. Given no tag, it writes only the
//! bare payload, which is what appears inside length-delimited containers and
//! at top level.

pub mod scalar;
pub mod wrap;
pub mod slice;
pub mod record;
pub mod map;
pub mod time;
pub mod json;

use std::cell::Cell;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

/// Encoder and decoder for values of type `T`.
pub trait Codec<T> : Send + Sync {
    /// Returns whether `value` is the zero value and can be left out of a
    /// record entirely.
    fn omit(&self, value: &T) -> bool;

    /// Returns the number of bytes `append` would write for the same
    /// arguments.
    fn size(&self, value: &T, tag: Option<&[u8]>) -> usize;

    /// Appends `value` to `out`, as a complete field if `tag` is given or as
    /// a bare payload otherwise.
    fn append(&self, out: &mut Vec<u8>, value: &T, tag: Option<&[u8]>);

    /// Reads a value from the front of `data` into `value`, returning the
    /// number of bytes consumed.
    ///
    /// `wt` is the wire type the value was found with. For `Length` values
    /// the length prefix has already been removed and `data` is exactly the
    /// payload. Fields of `value` which are absent from `data` are left
    /// untouched.
    fn read(&self, data: &[u8], value: &mut T, wt: WireType)
            -> Result<usize>;

    /// Returns a freshly constructed zero value.
    fn new_value(&self) -> T;

    /// The wire type of the bare payload.
    fn wire_type(&self) -> WireType;

    /// The wire type announced in the tag when this codec writes a complete
    /// field.
    ///
    /// This differs from `wire_type` only for protobuf-style repeated forms,
    /// which write one `Length` field per element.
    fn field_wire_type(&self) -> WireType {
        self.wire_type()
    }

    /// Describes the encoding produced by this codec.
    fn descriptor(&self) -> Descriptor;
}

/// Types which know how to construct their own codec.
///
/// A `Registry` calls `build_codec` the first time it is asked for a codec for
/// `(Self, postfix)` and caches the result. Implementations obtain codecs for
/// contained types through `registry` so that those are shared and cached
/// too.
pub trait Plenc : Sized + Send + Sync + 'static {
    /// Builds the codec for this type. `postfix` is the postfix from the
    /// field annotation (such as `"intern"`), or `""`.
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>>;

    /// Builds the codec for `Vec<Self>`.
    ///
    /// By default this wraps the element codec in one of the slice codecs.
    /// `u8` overrides it so that `Vec<u8>` is written as a byte string.
    fn build_vec_codec(registry: &Registry, postfix: &str)
                       -> Result<Arc<dyn Codec<Vec<Self>>>> {
        slice::build_slice_codec::<Self>(registry, postfix)
    }
}

/// Returns the framed size of a field whose bare payload is `payload` bytes.
#[inline]
pub fn framed_size(wt: WireType, payload: usize, tag: Option<&[u8]>)
                   -> usize {
    match tag {
        None => payload,
        Some(tag) if WireType::Length == wt =>
            tag.len() + wire::size_varuint(payload as u64) + payload,
        Some(tag) => tag.len() + payload,
    }
}

/// Writes the framing which precedes a payload of `payload` bytes: nothing
/// for a bare payload, the tag otherwise, plus the length for `Length`
/// fields.
#[inline]
pub fn append_frame(out: &mut Vec<u8>, wt: WireType, payload: usize,
                    tag: Option<&[u8]>) {
    if let Some(tag) = tag {
        out.extend_from_slice(tag);
        if WireType::Length == wt {
            wire::append_varuint(out, payload as u64);
        }
    }
}

/// Returns the precomputed tag bytes for field `index` with wire type `wt`.
pub fn tag_bytes(wt: WireType, index: u32) -> Vec<u8> {
    let mut tag = Vec::with_capacity(wire::size_tag(wt, index));
    wire::append_tag(&mut tag, wt, index);
    tag
}

/// Reads one value of a field whose tag has already been consumed, removing
/// the length prefix for `Length` fields before delegating to the codec.
///
/// Returns the number of bytes consumed from `data`, including any length
/// prefix.
pub fn read_field<T>(codec: &dyn Codec<T>, data: &[u8], value: &mut T,
                     wt: WireType) -> Result<usize> {
    if WireType::Length == wt {
        let (payload, n) = wire::read_delimited(data)?;
        codec.read(payload, value, wt)?;
        Ok(n)
    } else {
        codec.read(data, value, wt)
    }
}

thread_local! {
    /// How many nested values are being decoded on this thread.
    static DEPTH: Cell<usize> = Cell::new(0);
}

/// Marks one level of nesting in a decode; the level is left when this is
/// dropped.
///
/// Every decoder which can recurse into a value of unbounded depth enters
/// a level first, so that hostile or merely deep input fails with
/// `RecursionLimitExceeded` rather than overflowing the stack.
pub(crate) struct Nesting(());

impl Nesting {
    /// Enters a level for a value described by `what`, failing if `limit`
    /// levels are already entered on this thread.
    pub(crate) fn enter(limit: usize, what: &str) -> Result<Self> {
        DEPTH.with(|depth| {
            if depth.get() >= limit {
                Err(Error::RecursionLimitExceeded(what.to_owned()))
            } else {
                depth.set(depth.get() + 1);
                Ok(Nesting(()))
            }
        })
    }
}

impl Drop for Nesting {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}
