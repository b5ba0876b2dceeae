//-
// Copyright 2017, Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Low-level definitions for working with the wire format.
//!
//! Everything here works directly on byte slices: encoders append to a
//! `Vec<u8>`, decoders take a slice and return the decoded value together
//! with the number of bytes consumed.

use crate::error::{Error, Result};

/// The maximum number of bytes in the encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// The framing category of a value on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum WireType {
    /// A base-128 varint.
    VarInt = 0,
    /// Exactly 8 little-endian bytes.
    Fixed64 = 1,
    /// A varint length followed by that many bytes.
    Length = 2,
    /// A varint count followed by that many length-prefixed items.
    ///
    /// This occupies protobuf's deprecated "start group" slot.
    Slice = 3,
    /// Exactly 4 little-endian bytes.
    Fixed32 = 5,
}

/// Wire type 4, protobuf's "end group". Never emitted and always rejected.
pub const WT_END_GROUP_DEPRECATED: u8 = 4;

impl WireType {
    /// Converts the low three bits of a tag to a `WireType`.
    pub fn from_u8(wt: u8) -> Result<Self> {
        use self::WireType::*;

        match wt {
            0 => Ok(VarInt),
            1 => Ok(Fixed64),
            2 => Ok(Length),
            3 => Ok(Slice),
            5 => Ok(Fixed32),
            wt => Err(Error::BadWireType(wt)),
        }
    }

    /// Returns whether values of this type are framed with a length (or a
    /// count of lengths), rather than having a self-delimiting encoding.
    pub fn is_delimited(self) -> bool {
        match self {
            WireType::Length | WireType::Slice => true,
            _ => false,
        }
    }
}

/// Returns the number of bytes `append_varuint` would write for `v`.
#[inline]
pub fn size_varuint(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Encodes an unsigned 64-bit integer onto `out` in canonical form.
pub fn append_varuint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let b = (v & 0x7F) as u8;
        v >>= 7;
        if 0 == v {
            out.push(b);
            break;
        }
        out.push(b | 0x80);
    }
}

/// Decodes an unsigned varint from the front of `data`, returning the value
/// and the number of bytes it occupied.
///
/// Non-canonical (padded) encodings are accepted as long as they fit in 10
/// bytes and carry no bits beyond the 64th.
pub fn read_varuint(data: &[u8]) -> Result<(u64, usize)> {
    let mut accum = 0u64;
    let mut shift = 0;
    for (i, &b) in data.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(Error::Overflow);
        }

        let v = (b & 0x7F) as u64;
        if 0 != v {
            if shift >= 64 || v << shift >> shift != v {
                return Err(Error::Overflow);
            }
            accum |= v << shift;
        }
        shift += 7;

        if 0 == (b & 0x80) {
            return Ok((accum, i + 1));
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(Error::Overflow)
    } else {
        Err(Error::Truncated)
    }
}

/// ZigZag the given signed 64-bit integer into the unsigned storage format.
#[inline]
pub fn zigzag(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}

/// Invert `zigzag`.
#[inline]
pub fn zagzig(i: u64) -> i64 {
    let sign = if (i & 1) != 0 { !0u64 } else { 0 };
    ((i >> 1) ^ sign) as i64
}

/// Returns the number of bytes `append_varint` would write for `v`.
#[inline]
pub fn size_varint(v: i64) -> usize {
    size_varuint(zigzag(v))
}

/// ZigZag the given signed integer, then append it as a varint.
pub fn append_varint(out: &mut Vec<u8>, v: i64) {
    append_varuint(out, zigzag(v))
}

/// Decode a varint and then unZigZag it to a signed value.
pub fn read_varint(data: &[u8]) -> Result<(i64, usize)> {
    let (v, n) = read_varuint(data)?;
    Ok((zagzig(v), n))
}

/// Computes the tag value for a field index and wire type.
#[inline]
pub fn tag_value(wt: WireType, index: u32) -> u64 {
    ((index as u64) << 3) | (wt as u64)
}

/// Returns the number of bytes the tag for `(wt, index)` occupies.
#[inline]
pub fn size_tag(wt: WireType, index: u32) -> usize {
    size_varuint(tag_value(wt, index))
}

/// Appends the tag for `(wt, index)`.
pub fn append_tag(out: &mut Vec<u8>, wt: WireType, index: u32) {
    append_varuint(out, tag_value(wt, index))
}

/// Reads a tag, returning the wire type, the field index and the number of
/// bytes consumed.
///
/// Returns `BadWireType` for the reserved and unassigned wire types.
pub fn read_tag(data: &[u8]) -> Result<(WireType, u32, usize)> {
    let (tag, n) = read_varuint(data)?;
    let wt = WireType::from_u8((tag & 0x7) as u8)?;
    let index = tag >> 3;
    if index > u32::MAX as u64 {
        return Err(Error::Overflow);
    }
    Ok((wt, index as u32, n))
}

/// Reads a length prefix and checks that the data it announces is present.
///
/// Returns the length and the size of the prefix itself.
pub fn read_length(data: &[u8]) -> Result<(usize, usize)> {
    let (len, n) = read_varuint(data)?;
    let remaining = data.len() - n;
    if len > remaining as u64 {
        return Err(Error::LengthExceedsBuffer(len, remaining));
    }
    Ok((len as usize, n))
}

/// Splits a length-prefixed value off the front of `data`, returning its
/// content and the total number of bytes consumed including the prefix.
pub fn read_delimited(data: &[u8]) -> Result<(&[u8], usize)> {
    let (len, n) = read_length(data)?;
    Ok((&data[n..n + len], n + len))
}

/// Appends `v` as 4 little-endian bytes.
#[inline]
pub fn append_fixed32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Reads 4 little-endian bytes.
pub fn read_fixed32(data: &[u8]) -> Result<(u32, usize)> {
    if data.len() < 4 {
        return Err(Error::Truncated);
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[..4]);
    Ok((u32::from_le_bytes(bytes), 4))
}

/// Appends `v` as 8 little-endian bytes.
#[inline]
pub fn append_fixed64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Reads 8 little-endian bytes.
pub fn read_fixed64(data: &[u8]) -> Result<(u64, usize)> {
    if data.len() < 8 {
        return Err(Error::Truncated);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    Ok((u64::from_le_bytes(bytes), 8))
}

/// Returns the number of bytes occupied by one value of wire type `wt` at
/// the front of `data`, without decoding it.
pub fn skip(data: &[u8], wt: WireType) -> Result<usize> {
    match wt {
        WireType::VarInt => {
            for (i, &b) in data.iter().enumerate() {
                if i >= MAX_VARINT_LEN {
                    return Err(Error::Overflow);
                }
                if 0 == (b & 0x80) {
                    return Ok(i + 1);
                }
            }
            if data.len() >= MAX_VARINT_LEN {
                Err(Error::Overflow)
            } else {
                Err(Error::Truncated)
            }
        },

        WireType::Fixed64 =>
            if data.len() < 8 { Err(Error::Truncated) } else { Ok(8) },

        WireType::Fixed32 =>
            if data.len() < 4 { Err(Error::Truncated) } else { Ok(4) },

        WireType::Length => read_delimited(data).map(|(_, n)| n),

        WireType::Slice => {
            let (count, mut offset) = read_varuint(data)?;
            for _ in 0..count {
                let (_, n) = read_delimited(&data[offset..])?;
                offset += n;
            }
            Ok(offset)
        },
    }
}

/// Like `skip`, but takes the raw wire type bits of a tag, so that the
/// reserved wire type 4 and unassigned values fail cleanly.
pub fn skip_raw(data: &[u8], wt: u8) -> Result<usize> {
    skip(data, WireType::from_u8(wt)?)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn integer_encoding_and_decoding() {
        macro_rules! test {
            ($enc:ident, $dec:ident, $v:expr, $vec:expr) => { {
                let mut output = Vec::new();
                $enc(&mut output, $v);
                assert_eq!(&$vec[..], &output[..]);

                let (decoded, n) = $dec(&output[..]).unwrap();
                assert_eq!(output.len(), n);
                assert_eq!($v, decoded);
            } }
        }

        test!(append_varuint, read_varuint, 0, [0]);
        test!(append_varint, read_varint, 0, [0]);
        test!(append_varuint, read_varuint, 1, [1]);
        test!(append_varint, read_varint, 1, [2]);
        test!(append_varint, read_varint, -1, [1]);
        test!(append_varint, read_varint, 25, [0x32]);
        test!(append_varuint, read_varuint, 256, [128, 2]);
        test!(append_varuint, read_varuint, 300, [0xAC, 0x02]);
        test!(append_varint, read_varint, 256, [128, 4]);
        test!(append_varuint, read_varuint, u64::MAX,
              [255, 255, 255, 255, 255, 255, 255, 255, 255, 1]);
        test!(append_varint, read_varint, i64::MAX,
              [254, 255, 255, 255, 255, 255, 255, 255, 255, 1]);
        test!(append_varint, read_varint, i64::MIN,
              [255, 255, 255, 255, 255, 255, 255, 255, 255, 1]);
    }

    #[test]
    fn integer_decode_accepts_padded_encoding() {
        assert_eq!((1, 3), read_varuint(&[0x81, 0x80, 0x00]).unwrap());
    }

    #[test]
    fn integer_decode_detects_overflow() {
        assert_eq!(Err(Error::Overflow),
                   read_varuint(&[255, 255, 255, 255, 255,
                                  255, 255, 255, 255, 2]));
    }

    #[test]
    fn integer_decode_detects_continuation_past_ten_bytes() {
        assert_eq!(Err(Error::Overflow),
                   read_varuint(&[128, 128, 128, 128, 128,
                                  128, 128, 128, 128, 128, 0]));
        assert_eq!(Err(Error::Overflow),
                   skip(&[128u8; 16], WireType::VarInt));
    }

    #[test]
    fn integer_decode_detects_truncation() {
        assert_eq!(Err(Error::Truncated), read_varuint(&[]));
        assert_eq!(Err(Error::Truncated), read_varuint(&[0x80, 0x80]));
    }

    #[test]
    fn tag_conversion() {
        let mut out = Vec::new();
        append_tag(&mut out, WireType::VarInt, 6);
        assert_eq!(vec![0x30], out);
        assert_eq!((WireType::VarInt, 6, 1), read_tag(&out).unwrap());

        out.clear();
        append_tag(&mut out, WireType::Slice, 3);
        assert_eq!(vec![0x1B], out);

        out.clear();
        append_tag(&mut out, WireType::Length, 999);
        assert_eq!(out.len(), size_tag(WireType::Length, 999));
        assert_eq!((WireType::Length, 999, out.len()),
                   read_tag(&out).unwrap());
    }

    #[test]
    fn reserved_wire_types_are_rejected() {
        assert_eq!(Err(Error::BadWireType(4)), read_tag(&[0x0C]));
        assert_eq!(Err(Error::BadWireType(6)), read_tag(&[0x0E]));
        assert_eq!(Err(Error::BadWireType(7)), read_tag(&[0x0F]));
        assert_eq!(Err(Error::BadWireType(4)),
                   skip_raw(&[0], WT_END_GROUP_DEPRECATED));
    }

    #[test]
    fn skip_each_wire_type() {
        assert_eq!(Ok(2), skip(&[0xAC, 0x02, 0x99], WireType::VarInt));
        assert_eq!(Ok(4), skip(&[0; 6], WireType::Fixed32));
        assert_eq!(Ok(8), skip(&[0; 8], WireType::Fixed64));
        assert_eq!(Err(Error::Truncated), skip(&[0; 7], WireType::Fixed64));
        assert_eq!(Ok(4), skip(&[3, 1, 2, 3, 4], WireType::Length));
        assert_eq!(Ok(6), skip(&[2, 1, 9, 2, 8, 8, 0xFF], WireType::Slice));
    }

    #[test]
    fn lengths_must_fit_the_buffer() {
        assert_eq!(Err(Error::LengthExceedsBuffer(5, 2)),
                   skip(&[5, 1, 2], WireType::Length));
        assert_eq!(Err(Error::LengthExceedsBuffer(3, 1)),
                   skip(&[2, 1, 9, 3, 8], WireType::Slice));
    }

    proptest! {
        #[test]
        fn varint_length_law(v in any::<u64>()) {
            let mut out = Vec::new();
            append_varuint(&mut out, v);
            prop_assert_eq!(out.len(), size_varuint(v));
            prop_assert_eq!(Ok((v, out.len())), read_varuint(&out));
            prop_assert_eq!(Ok(out.len()), skip(&out, WireType::VarInt));
        }

        #[test]
        fn zigzag_law(v in any::<i64>()) {
            prop_assert_eq!(v, zagzig(zigzag(v)));
            prop_assert_eq!(size_varuint(zigzag(v)), size_varint(v));
        }

        #[test]
        fn zigzag_orders_by_magnitude(v in 0i64..i64::MAX) {
            prop_assert!(zigzag(v) < zigzag(v + 1));
            prop_assert!(zigzag(-v) <= zigzag(v));
        }

        #[test]
        fn skip_matches_length_delimited_reads(
            items in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..40), 0..8))
        {
            let mut out = Vec::new();
            append_varuint(&mut out, items.len() as u64);
            for item in &items {
                append_varuint(&mut out, item.len() as u64);
                out.extend_from_slice(item);
            }
            let total = out.len();
            out.extend_from_slice(&[0xFF, 0xFF]);
            prop_assert_eq!(Ok(total), skip(&out, WireType::Slice));
        }
    }
}
