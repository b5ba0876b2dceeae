//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Codecs for `chrono::DateTime<Utc>`.
//!
//! There are three layouts:
//!
//! - The default is a `Length` record holding the seconds since the Unix
//!   epoch at index 1 and the nanoseconds within the second at index 2,
//!   both zig-zag encoded.
//!
//! - With the `proto` postfix, or `Config::proto_time`, the same record
//!   uses plain varints, which makes it identical to
//!   `google.protobuf.Timestamp`.
//!
//! - With the `flat` postfix, the time is a single plain varint holding the
//!   microseconds since the epoch. Anything finer is truncated.
//!
//! The epoch itself is the zero value and is omitted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::codec::{append_frame, framed_size, Codec, Plenc};
use crate::codec::scalar::expect_wire_type;
use crate::descriptor::{Descriptor, FieldType, LogicalType};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

const NANOS_PER_SEC: i64 = 1_000_000_000;

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Builds a time from seconds and nanoseconds, carrying nanoseconds outside
/// `0..1e9` into the seconds.
fn from_parts(secs: i64, nanos: i64) -> Result<DateTime<Utc>> {
    let secs = secs.checked_add(nanos.div_euclid(NANOS_PER_SEC))
        .ok_or(Error::Overflow)?;
    DateTime::from_timestamp(secs, nanos.rem_euclid(NANOS_PER_SEC) as u32)
        .ok_or(Error::Overflow)
}

/// Codec for times as a seconds and nanoseconds record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeCodec {
    /// Whether the parts are plain varints rather than zig-zag.
    pub proto: bool,
}

impl TimeCodec {
    fn size_part(&self, v: i64) -> usize {
        if self.proto {
            wire::size_varuint(v as u64)
        } else {
            wire::size_varint(v)
        }
    }

    fn append_part(&self, out: &mut Vec<u8>, index: u32, v: i64) {
        if 0 != v {
            wire::append_tag(out, WireType::VarInt, index);
            if self.proto {
                wire::append_varuint(out, v as u64);
            } else {
                wire::append_varint(out, v);
            }
        }
    }

    fn parts(value: &DateTime<Utc>) -> (i64, i64) {
        (value.timestamp(), value.timestamp_subsec_nanos() as i64)
    }

    fn payload_size(&self, value: &DateTime<Utc>) -> usize {
        let (secs, nanos) = Self::parts(value);
        let mut n = 0;
        if 0 != secs {
            n += 1 + self.size_part(secs);
        }
        if 0 != nanos {
            n += 1 + self.size_part(nanos);
        }
        n
    }

    /// Decodes a bare time record.
    pub fn decode(&self, data: &[u8]) -> Result<DateTime<Utc>> {
        let (mut secs, mut nanos) = (0i64, 0i64);
        let mut off = 0;
        while off < data.len() {
            let (wt, index, n) = wire::read_tag(&data[off..])?;
            off += n;
            if (1 == index || 2 == index) && WireType::VarInt == wt {
                let (v, n) = if self.proto {
                    wire::read_varuint(&data[off..])
                        .map(|(v, n)| (v as i64, n))
                } else {
                    wire::read_varint(&data[off..])
                }.map_err(|e| e.in_field("Time", index))?;
                off += n;
                if 1 == index { secs = v } else { nanos = v }
            } else {
                off += wire::skip(&data[off..], wt)
                    .map_err(|e| e.in_field("Time", index))?;
            }
        }
        from_parts(secs, nanos)
    }
}

impl Codec<DateTime<Utc>> for TimeCodec {
    fn omit(&self, value: &DateTime<Utc>) -> bool { epoch() == *value }

    fn size(&self, value: &DateTime<Utc>, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, self.payload_size(value), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &DateTime<Utc>,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Length, self.payload_size(value), tag);
        let (secs, nanos) = Self::parts(value);
        self.append_part(out, 1, secs);
        self.append_part(out, 2, nanos);
    }

    fn read(&self, data: &[u8], value: &mut DateTime<Utc>, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::Length)?;
        *value = self.decode(data)?;
        Ok(data.len())
    }

    fn new_value(&self) -> DateTime<Utc> { epoch() }
    fn wire_type(&self) -> WireType { WireType::Length }

    fn descriptor(&self) -> Descriptor {
        if !self.proto {
            return Descriptor::of(FieldType::Time);
        }

        let mut secs = Descriptor::of(FieldType::FlatInt);
        secs.index = 1;
        secs.name = "seconds".to_owned();
        let mut nanos = Descriptor::of(FieldType::FlatInt);
        nanos.index = 2;
        nanos.name = "nanos".to_owned();

        let mut desc = Descriptor::of(FieldType::Struct);
        desc.type_name = "Timestamp".to_owned();
        desc.logical_type = LogicalType::Timestamp;
        desc.elements = vec![secs, nanos];
        desc
    }
}

/// Codec for times as a plain varint count of microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrosCodec;

impl MicrosCodec {
    /// Converts a microsecond count to a time.
    pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_micros(micros).ok_or(Error::Overflow)
    }
}

impl Codec<DateTime<Utc>> for MicrosCodec {
    fn omit(&self, value: &DateTime<Utc>) -> bool { epoch() == *value }

    fn size(&self, value: &DateTime<Utc>, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt,
                    wire::size_varuint(value.timestamp_micros() as u64), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &DateTime<Utc>,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 0, tag);
        wire::append_varuint(out, value.timestamp_micros() as u64);
    }

    fn read(&self, data: &[u8], value: &mut DateTime<Utc>, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varuint(data)?;
        *value = Self::from_micros(v as i64)?;
        Ok(n)
    }

    fn new_value(&self) -> DateTime<Utc> { epoch() }
    fn wire_type(&self) -> WireType { WireType::VarInt }

    fn descriptor(&self) -> Descriptor {
        let mut desc = Descriptor::of(FieldType::FlatInt);
        desc.logical_type = LogicalType::Timestamp;
        desc
    }
}

impl Plenc for DateTime<Utc> {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(match postfix {
            "flat" => Arc::new(MicrosCodec),
            "proto" => Arc::new(TimeCodec { proto: true }),
            _ => Arc::new(TimeCodec { proto: registry.config().proto_time }),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::tag_bytes;
    use crate::test_helpers::parse;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, nanos).unwrap()
    }

    fn encode<C : Codec<DateTime<Utc>>>(codec: &C, value: DateTime<Utc>)
                                        -> Vec<u8> {
        let tag = tag_bytes(codec.field_wire_type(), 1);
        let mut out = Vec::new();
        codec.append(&mut out, &value, Some(&tag));
        assert_eq!(out.len(), codec.size(&value, Some(&tag)));
        out
    }

    #[test]
    fn epoch_is_omitted() {
        assert!(TimeCodec::default().omit(&epoch()));
        assert!(MicrosCodec.omit(&epoch()));
        assert!(!TimeCodec::default().omit(&at(0, 1)));
    }

    #[test]
    fn default_layout_zigzags() {
        assert_eq!(parse("0A 04 08 03 10 02"),
                   encode(&TimeCodec::default(), at(-2, 1)));
    }

    #[test]
    fn proto_layout_matches_timestamp() {
        assert_eq!(parse("0A 06 08 80 01 10 AC 02"),
                   encode(&TimeCodec { proto: true }, at(128, 300)));

        let t = TimeCodec { proto: true }.decode(&parse("08 80 01 10 AC 02"))
            .unwrap();
        assert_eq!(at(128, 300), t);
    }

    #[test]
    fn negative_times_round_trip() {
        let t = at(-1_000_000, 999_999_999);
        let codec = TimeCodec::default();
        let data = encode(&codec, t);
        let mut back = epoch();
        codec.read(&data[2..], &mut back, WireType::Length).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn micros_truncate() {
        let data = encode(&MicrosCodec, at(1, 2_500));
        assert_eq!(parse("08 C2 84 3D"), data);

        let mut back = epoch();
        MicrosCodec.read(&data[1..], &mut back, WireType::VarInt).unwrap();
        assert_eq!(at(1, 2_000), back);
    }

    #[test]
    fn nanos_carry_into_seconds() {
        let t = TimeCodec::default().decode(&parse("08 02 10 01")).unwrap();
        assert_eq!(at(0, 999_999_999), t);
    }
}
