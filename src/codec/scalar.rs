//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Codecs for the primitive types: booleans, integers, floats, strings and
//! byte strings.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{append_frame, framed_size, Codec, Plenc};
use crate::descriptor::{Descriptor, FieldType};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

/// Fails with `BadWireType` unless `wt` is `expected`.
#[inline]
pub(crate) fn expect_wire_type(wt: WireType, expected: WireType)
                               -> Result<()> {
    if wt == expected {
        Ok(())
    } else {
        Err(Error::BadWireType(wt as u8))
    }
}

/// Signed integer types, which are widened to `i64` on the wire.
pub trait SignedInt : Copy + Default + PartialEq + Send + Sync + 'static {
    /// Sign-extends to 64 bits.
    fn to_i64(self) -> i64;
    /// Truncates from 64 bits.
    fn from_i64(v: i64) -> Self;
}

/// Unsigned integer types, which are widened to `u64` on the wire.
pub trait UnsignedInt : Copy + Default + PartialEq + Send + Sync + 'static {
    /// Zero-extends to 64 bits.
    fn to_u64(self) -> u64;
    /// Truncates from 64 bits.
    fn from_u64(v: u64) -> Self;
}

macro_rules! signed_int {
    ($($t:ty),*) => { $(
        impl SignedInt for $t {
            #[inline] fn to_i64(self) -> i64 { self as i64 }
            #[inline] fn from_i64(v: i64) -> Self { v as $t }
        }

        impl Plenc for $t {
            fn build_codec(_: &Registry, postfix: &str)
                           -> Result<Arc<dyn Codec<Self>>> {
                if "flat" == postfix {
                    Ok(Arc::new(FlatIntCodec::<$t>::new()))
                } else {
                    Ok(Arc::new(IntCodec::<$t>::new()))
                }
            }
        }
    )* }
}
signed_int!(i8, i16, i32, i64, isize);

macro_rules! unsigned_int {
    ($($t:ty),*) => { $(
        impl UnsignedInt for $t {
            #[inline] fn to_u64(self) -> u64 { self as u64 }
            #[inline] fn from_u64(v: u64) -> Self { v as $t }
        }
    )* }
}
unsigned_int!(u8, u16, u32, u64, usize);

macro_rules! plenc_uint {
    ($($t:ty),*) => { $(
        impl Plenc for $t {
            fn build_codec(_: &Registry, _: &str)
                           -> Result<Arc<dyn Codec<Self>>> {
                Ok(Arc::new(UintCodec::<$t>::new()))
            }
        }
    )* }
}
plenc_uint!(u16, u32, u64, usize);

impl Plenc for u8 {
    fn build_codec(_: &Registry, _: &str) -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(UintCodec::<u8>::new()))
    }

    fn build_vec_codec(_: &Registry, _: &str)
                       -> Result<Arc<dyn Codec<Vec<Self>>>> {
        Ok(Arc::new(BytesCodec))
    }
}

/// `bool` as a varint 0 or 1. Any non-zero value reads as `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn omit(&self, value: &bool) -> bool { !*value }

    fn size(&self, _: &bool, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt, 1, tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &bool, tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 1, tag);
        out.push(*value as u8);
    }

    fn read(&self, data: &[u8], value: &mut bool, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varuint(data)?;
        *value = 0 != v;
        Ok(n)
    }

    fn new_value(&self) -> bool { false }
    fn wire_type(&self) -> WireType { WireType::VarInt }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Bool) }
}

impl Plenc for bool {
    fn build_codec(_: &Registry, _: &str) -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(BoolCodec))
    }
}

/// Signed integers as zig-zag varints.
#[derive(Debug)]
pub struct IntCodec<T>(PhantomData<fn () -> T>);

impl<T> IntCodec<T> {
    #[allow(missing_docs)]
    pub fn new() -> Self { IntCodec(PhantomData) }
}

impl<T : SignedInt> Codec<T> for IntCodec<T> {
    fn omit(&self, value: &T) -> bool { 0 == value.to_i64() }

    fn size(&self, value: &T, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt, wire::size_varint(value.to_i64()), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &T, tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 0, tag);
        wire::append_varint(out, value.to_i64());
    }

    fn read(&self, data: &[u8], value: &mut T, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varint(data)?;
        *value = T::from_i64(v);
        Ok(n)
    }

    fn new_value(&self) -> T { T::default() }
    fn wire_type(&self) -> WireType { WireType::VarInt }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Int) }
}

/// Signed integers as plain two's complement varints, without zig-zag.
///
/// Negative values always take 10 bytes. This matches protobuf's `int32` and
/// `int64`.
#[derive(Debug)]
pub struct FlatIntCodec<T>(PhantomData<fn () -> T>);

impl<T> FlatIntCodec<T> {
    #[allow(missing_docs)]
    pub fn new() -> Self { FlatIntCodec(PhantomData) }
}

impl<T : SignedInt> Codec<T> for FlatIntCodec<T> {
    fn omit(&self, value: &T) -> bool { 0 == value.to_i64() }

    fn size(&self, value: &T, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt,
                    wire::size_varuint(value.to_i64() as u64), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &T, tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 0, tag);
        wire::append_varuint(out, value.to_i64() as u64);
    }

    fn read(&self, data: &[u8], value: &mut T, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varuint(data)?;
        *value = T::from_i64(v as i64);
        Ok(n)
    }

    fn new_value(&self) -> T { T::default() }
    fn wire_type(&self) -> WireType { WireType::VarInt }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::FlatInt) }
}

/// Unsigned integers as varints.
#[derive(Debug)]
pub struct UintCodec<T>(PhantomData<fn () -> T>);

impl<T> UintCodec<T> {
    #[allow(missing_docs)]
    pub fn new() -> Self { UintCodec(PhantomData) }
}

impl<T : UnsignedInt> Codec<T> for UintCodec<T> {
    fn omit(&self, value: &T) -> bool { 0 == value.to_u64() }

    fn size(&self, value: &T, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt, wire::size_varuint(value.to_u64()), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &T, tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 0, tag);
        wire::append_varuint(out, value.to_u64());
    }

    fn read(&self, data: &[u8], value: &mut T, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varuint(data)?;
        *value = T::from_u64(v);
        Ok(n)
    }

    fn new_value(&self) -> T { T::default() }
    fn wire_type(&self) -> WireType { WireType::VarInt }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Uint) }
}

/// `f32` as 4 little-endian bytes. Only `+0.0` is omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float32Codec;

impl Codec<f32> for Float32Codec {
    fn omit(&self, value: &f32) -> bool { 0 == value.to_bits() }

    fn size(&self, _: &f32, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Fixed32, 4, tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &f32, tag: Option<&[u8]>) {
        append_frame(out, WireType::Fixed32, 4, tag);
        wire::append_fixed32(out, value.to_bits());
    }

    fn read(&self, data: &[u8], value: &mut f32, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Fixed32)?;
        let (v, n) = wire::read_fixed32(data)?;
        *value = f32::from_bits(v);
        Ok(n)
    }

    fn new_value(&self) -> f32 { 0.0 }
    fn wire_type(&self) -> WireType { WireType::Fixed32 }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Float32) }
}

impl Plenc for f32 {
    fn build_codec(_: &Registry, _: &str) -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(Float32Codec))
    }
}

/// `f64` as 8 little-endian bytes. Only `+0.0` is omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float64Codec;

impl Codec<f64> for Float64Codec {
    fn omit(&self, value: &f64) -> bool { 0 == value.to_bits() }

    fn size(&self, _: &f64, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Fixed64, 8, tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &f64, tag: Option<&[u8]>) {
        append_frame(out, WireType::Fixed64, 8, tag);
        wire::append_fixed64(out, value.to_bits());
    }

    fn read(&self, data: &[u8], value: &mut f64, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Fixed64)?;
        let (v, n) = wire::read_fixed64(data)?;
        *value = f64::from_bits(v);
        Ok(n)
    }

    fn new_value(&self) -> f64 { 0.0 }
    fn wire_type(&self) -> WireType { WireType::Fixed64 }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Float64) }
}

impl Plenc for f64 {
    fn build_codec(_: &Registry, _: &str) -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(Float64Codec))
    }
}

/// Strings as length-delimited bytes.
///
/// The encoder does not validate anything. On read, invalid UTF-8 is
/// replaced with U+FFFD rather than rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn omit(&self, value: &String) -> bool { value.is_empty() }

    fn size(&self, value: &String, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, value.len(), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &String, tag: Option<&[u8]>) {
        append_frame(out, WireType::Length, value.len(), tag);
        out.extend_from_slice(value.as_bytes());
    }

    fn read(&self, data: &[u8], value: &mut String, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Length)?;
        *value = String::from_utf8_lossy(data).into_owned();
        Ok(data.len())
    }

    fn new_value(&self) -> String { String::new() }
    fn wire_type(&self) -> WireType { WireType::Length }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::String) }
}

impl Plenc for String {
    fn build_codec(_: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        if "intern" == postfix {
            return Err(Error::UnsupportedType(
                "String with postfix intern (use Arc<str>)".to_owned()));
        }
        Ok(Arc::new(StringCodec))
    }
}

/// Byte strings. Reads always copy into a new buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn omit(&self, value: &Vec<u8>) -> bool { value.is_empty() }

    fn size(&self, value: &Vec<u8>, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, value.len(), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &Vec<u8>,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Length, value.len(), tag);
        out.extend_from_slice(value);
    }

    fn read(&self, data: &[u8], value: &mut Vec<u8>, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Length)?;
        value.clear();
        value.extend_from_slice(data);
        Ok(data.len())
    }

    fn new_value(&self) -> Vec<u8> { Vec::new() }
    fn wire_type(&self) -> WireType { WireType::Length }

    fn descriptor(&self) -> Descriptor {
        let mut desc = Descriptor::of(FieldType::String);
        desc.type_name = "bytes".to_owned();
        desc
    }
}

/// Shared strings. Each read allocates a new `Arc<str>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArcStrCodec;

impl Codec<Arc<str>> for ArcStrCodec {
    fn omit(&self, value: &Arc<str>) -> bool { value.is_empty() }

    fn size(&self, value: &Arc<str>, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, value.len(), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &Arc<str>,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Length, value.len(), tag);
        out.extend_from_slice(value.as_bytes());
    }

    fn read(&self, data: &[u8], value: &mut Arc<str>, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Length)?;
        *value = Arc::from(String::from_utf8_lossy(data).as_ref());
        Ok(data.len())
    }

    fn new_value(&self) -> Arc<str> { Arc::from("") }
    fn wire_type(&self) -> WireType { WireType::Length }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::String) }
}

/// Shared strings which are canonicalised on read, so that equal strings
/// decoded through the same codec share one allocation.
///
/// The table is never pruned.
#[derive(Debug, Default)]
pub struct InternCodec {
    table: Mutex<HashSet<Arc<str>>>,
}

impl InternCodec {
    #[allow(missing_docs)]
    pub fn new() -> Self { Self::default() }

    /// Returns the canonical `Arc<str>` equal to `s`, adding it to the table
    /// if this is the first time it has been seen.
    pub fn intern(&self, s: &str) -> Arc<str> {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(s) {
            return existing.clone();
        }
        let new: Arc<str> = Arc::from(s);
        table.insert(new.clone());
        new
    }

    /// Returns the number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }
}

impl Codec<Arc<str>> for InternCodec {
    fn omit(&self, value: &Arc<str>) -> bool { value.is_empty() }

    fn size(&self, value: &Arc<str>, tag: Option<&[u8]>) -> usize {
        ArcStrCodec.size(value, tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &Arc<str>,
              tag: Option<&[u8]>) {
        ArcStrCodec.append(out, value, tag)
    }

    fn read(&self, data: &[u8], value: &mut Arc<str>, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Length)?;
        *value = self.intern(&String::from_utf8_lossy(data));
        Ok(data.len())
    }

    fn new_value(&self) -> Arc<str> { Arc::from("") }
    fn wire_type(&self) -> WireType { WireType::Length }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::String) }
}

impl Plenc for Arc<str> {
    fn build_codec(_: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        if "intern" == postfix {
            Ok(Arc::new(InternCodec::new()))
        } else {
            Ok(Arc::new(ArcStrCodec))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::tag_bytes;
    use crate::test_helpers::parse;

    fn encode<T, C : Codec<T>>(codec: &C, value: &T, index: u32) -> Vec<u8> {
        let tag = tag_bytes(codec.field_wire_type(), index);
        let mut out = Vec::new();
        codec.append(&mut out, value, Some(&tag));
        assert_eq!(out.len(), codec.size(value, Some(&tag)));
        out
    }

    #[test]
    fn bool_field() {
        assert_eq!(parse("30 01"), encode(&BoolCodec, &true, 6));
        assert!(BoolCodec.omit(&false));

        let mut v = false;
        assert_eq!(Ok(1), BoolCodec.read(&[7], &mut v, WireType::VarInt));
        assert!(v);
    }

    #[test]
    fn ints_zigzag_unless_flat() {
        assert_eq!(parse("10 32"), encode(&IntCodec::<i32>::new(), &25, 2));
        assert_eq!(parse("08 03"), encode(&IntCodec::<i8>::new(), &-2, 1));
        assert_eq!(parse("08 FE FF FF FF FF FF FF FF FF 01"),
                   encode(&FlatIntCodec::<i64>::new(), &-2, 1));
        assert_eq!(parse("08 AC 02"),
                   encode(&UintCodec::<u16>::new(), &300, 1));

        let mut v = 0i64;
        FlatIntCodec::<i64>::new().read(
            &parse("FE FF FF FF FF FF FF FF FF 01"), &mut v, WireType::VarInt)
            .unwrap();
        assert_eq!(-2, v);
    }

    #[test]
    fn floats_are_little_endian() {
        assert_eq!(parse("15 00 00 C0 40"), encode(&Float32Codec, &6.0, 2));
        assert_eq!(parse("09 00 00 00 00 00 00 F8 3F"),
                   encode(&Float64Codec, &1.5, 1));
        assert!(Float32Codec.omit(&0.0));
        assert!(!Float32Codec.omit(&-0.0));
        assert!(!Float64Codec.omit(&-0.0));
    }

    #[test]
    fn strings_are_length_delimited() {
        assert_eq!(parse("0A 04 'Lucy'"),
                   encode(&StringCodec, &"Lucy".to_owned(), 1));

        let mut s = String::new();
        assert_eq!(Ok(3), StringCodec.read(b"abc", &mut s, WireType::Length));
        assert_eq!("abc", s);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut s = String::new();
        StringCodec.read(&[b'a', 0xFF], &mut s, WireType::Length).unwrap();
        assert_eq!("a\u{FFFD}", s);
    }

    #[test]
    fn wrong_wire_type_is_rejected() {
        let mut s = String::new();
        assert_eq!(Err(Error::BadWireType(0)),
                   StringCodec.read(&[1], &mut s, WireType::VarInt));
        let mut f = 0.0f32;
        assert_eq!(Err(Error::BadWireType(1)),
                   Float32Codec.read(&[0; 8], &mut f, WireType::Fixed64));
    }

    #[test]
    fn bytes_are_copied() {
        let input = parse("01 02 03");
        let mut v = vec![9, 9, 9, 9, 9];
        BytesCodec.read(&input, &mut v, WireType::Length).unwrap();
        assert_eq!(vec![1, 2, 3], v);
    }

    #[test]
    fn interned_strings_share_storage() {
        let codec = InternCodec::new();
        let mut a: Arc<str> = Arc::from("");
        let mut b: Arc<str> = Arc::from("");
        codec.read(b"hello", &mut a, WireType::Length).unwrap();
        codec.read(b"hello", &mut b, WireType::Length).unwrap();
        assert_eq!("hello", &*a);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(1, codec.len());
    }
}
