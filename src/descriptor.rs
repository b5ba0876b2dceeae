//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Self-describing schemas, and reading encoded data through them.
//!
//! Every codec can produce a `Descriptor` of the data it writes. A
//! descriptor is itself a record, so it can be encoded and shipped to a
//! reader which does not have the original Rust types. `Descriptor::read`
//! then walks encoded data under the direction of the descriptor, reporting
//! each value to an `Outputter`; `JsonOutput` is an outputter which turns
//! the data into JSON.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::codec::{append_frame, framed_size, Codec, Nesting, Plenc};
use crate::codec::scalar::expect_wire_type;
use crate::codec::slice::read_slice_entries;
use crate::codec::json::{self, JsonValue};
use crate::codec::time::{MicrosCodec, TimeCodec};
use crate::error::{Error, Result};
use crate::registry::{Registry, DEFAULT_RECURSION_LIMIT};
use crate::wire::{self, WireType};

/// Enums which are encoded as their zig-zag integer value.
pub trait IntEnum : Copy + PartialEq + Default + Send + Sync + 'static {
    /// Name used in errors for unknown values.
    const NAME: &'static str;
    /// Returns the integer value.
    fn to_i64(self) -> i64;
    /// Returns the variant for `v`, if there is one.
    fn from_i64(v: i64) -> Option<Self>;
}

/// Codec for `IntEnum` types. Values without a variant fail to decode.
pub struct IntEnumCodec<E>(PhantomData<fn () -> E>);

impl<E : IntEnum> Codec<E> for IntEnumCodec<E> {
    fn omit(&self, value: &E) -> bool { 0 == value.to_i64() }

    fn size(&self, value: &E, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::VarInt, wire::size_varint(value.to_i64()), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &E, tag: Option<&[u8]>) {
        append_frame(out, WireType::VarInt, 0, tag);
        wire::append_varint(out, value.to_i64());
    }

    fn read(&self, data: &[u8], value: &mut E, wt: WireType)
            -> Result<usize> {
        expect_wire_type(wt, WireType::VarInt)?;
        let (v, n) = wire::read_varint(data)?;
        *value = E::from_i64(v).ok_or_else(
            || Error::UnsupportedType(format!("{} {}", E::NAME, v)))?;
        Ok(n)
    }

    fn new_value(&self) -> E { E::default() }
    fn wire_type(&self) -> WireType { WireType::VarInt }
    fn descriptor(&self) -> Descriptor { Descriptor::of(FieldType::Int) }
}

macro_rules! int_enum {
    (@first $name:ident $first:ident $($rest:ident)*) => { $name::$first };

    ($(#[$meta:meta])* pub enum $name:ident {
        $($(#[$vmeta:meta])* $variant:ident = $value:literal,)*
    }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl Default for $name {
            fn default() -> Self { int_enum!(@first $name $($variant)*) }
        }

        impl IntEnum for $name {
            const NAME: &'static str = stringify!($name);

            fn to_i64(self) -> i64 { self as i64 }

            fn from_i64(v: i64) -> Option<Self> {
                match v {
                    $($value => Some($name::$variant),)*
                    _ => None,
                }
            }
        }

        impl Plenc for $name {
            fn build_codec(_: &Registry, _: &str)
                           -> Result<Arc<dyn Codec<Self>>> {
                Ok(Arc::new(IntEnumCodec::<$name>(PhantomData)))
            }
        }
    };
}

int_enum! {
    /// The kind of value a descriptor describes.
    #[allow(missing_docs)]
    pub enum FieldType {
        /// Zig-zag signed integer.
        Int = 0,
        Uint = 1,
        Float32 = 2,
        Float64 = 3,
        String = 4,
        Slice = 5,
        Struct = 6,
        Bool = 7,
        Time = 8,
        JsonObject = 9,
        JsonArray = 10,
        /// Signed integer written without zig-zag.
        FlatInt = 11,
    }
}

int_enum! {
    /// Further interpretation of the described value.
    #[allow(missing_docs)]
    pub enum LogicalType {
        None = 0,
        Timestamp = 1,
        Date = 2,
        Time = 3,
        /// A slice of `MapEntry` structs.
        Map = 4,
        /// A struct with the key at index 1 and the value at index 2.
        MapEntry = 5,
    }
}

/// Describes the encoding of a value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Descriptor {
    /// The field index within the parent struct.
    pub index: i64,
    /// The JSON name of the field within the parent struct.
    pub name: String,
    /// The kind of value.
    pub ty: FieldType,
    /// For structs, the name of the record type.
    pub type_name: String,
    /// For slices, the element. For structs, the fields.
    pub elements: Vec<Descriptor>,
    /// Whether the field is optional or behind a pointer.
    pub explicit_presence: bool,
    /// Further interpretation of the value.
    pub logical_type: LogicalType,
}

plenc_record! {
    Descriptor {
        index: i64 = "1" json "index",
        name: String = "2" json "name",
        ty: FieldType = "3" json "type",
        type_name: String = "4" json "typeName",
        elements: Vec<Descriptor> = "5" json "elements",
        explicit_presence: bool = "6" json "explicitPresence",
        logical_type: LogicalType = "7" json "logicalType",
    }
}

/// Receives the values found by `Descriptor::read`.
///
/// Struct fields are reported as `name_field` followed by the value; maps
/// with string keys likewise, with the key as the name.
pub trait Outputter {
    /// Starts a struct or map.
    fn start_object(&mut self);
    /// Ends the current struct or map.
    fn end_object(&mut self);
    /// Starts a slice.
    fn start_array(&mut self);
    /// Ends the current slice.
    fn end_array(&mut self);
    /// Names the next value within the current object.
    fn name_field(&mut self, name: &str);
    /// A signed integer.
    fn int64(&mut self, v: i64);
    /// An unsigned integer.
    fn uint64(&mut self, v: u64);
    /// A 32-bit float.
    fn float32(&mut self, v: f32);
    /// A 64-bit float.
    fn float64(&mut self, v: f64);
    /// A string.
    fn string(&mut self, s: &str);
    /// A boolean.
    fn bool(&mut self, b: bool);
    /// A time.
    fn time(&mut self, t: DateTime<Utc>);
    /// A value already in output form, such as a JSON number.
    fn raw(&mut self, s: &str);
}

/// One field of an encoded struct.
struct Occurrence<'a> {
    index: u32,
    wt: WireType,
    /// The payload, without the length prefix if `wt` is `Length`.
    data: &'a [u8],
}

fn occurrences<'a>(record: &str, data: &'a [u8])
                   -> Result<Vec<Occurrence<'a>>> {
    let mut found = Vec::new();
    let mut off = 0;
    while off < data.len() {
        let (wt, index, n) = wire::read_tag(&data[off..])?;
        off += n;
        let rest = &data[off..];
        let (value, n) = if WireType::Length == wt {
            wire::read_delimited(rest)
        } else {
            wire::skip(rest, wt).map(|n| (&rest[..n], n))
        }.map_err(|e| e.in_field(record, index))?;
        off += n;
        found.push(Occurrence { index, wt, data: value });
    }
    Ok(found)
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl Descriptor {
    /// Returns a descriptor of the given type with everything else zero.
    pub fn of(ty: FieldType) -> Self {
        Descriptor { ty, .. Descriptor::default() }
    }

    /// Returns the wire type of a bare value of this descriptor.
    pub fn bare_wire_type(&self) -> WireType {
        match self.ty {
            FieldType::Int | FieldType::Uint | FieldType::Bool |
            FieldType::FlatInt => WireType::VarInt,
            FieldType::Float32 => WireType::Fixed32,
            FieldType::Float64 => WireType::Fixed64,
            FieldType::String | FieldType::Struct | FieldType::Time =>
                WireType::Length,
            FieldType::JsonObject | FieldType::JsonArray => WireType::Slice,
            FieldType::Slice => match self.elements.first()
                .map(Descriptor::bare_wire_type)
            {
                Some(WireType::Length) | Some(WireType::Slice) =>
                    WireType::Slice,
                _ => WireType::Length,
            },
        }
    }

    fn element(&self, index: u32) -> Option<&Descriptor> {
        self.elements.iter().find(|e| index as i64 == e.index)
    }

    fn is_timestamp(&self) -> bool {
        LogicalType::Timestamp == self.logical_type
    }

    /// Whether this is a map entry struct with a string key, which is read
    /// as a named value rather than an object.
    fn is_named_entry(&self) -> bool {
        LogicalType::MapEntry == self.logical_type &&
            FieldType::Struct == self.ty &&
            self.element(1).map_or(false, |k| FieldType::String == k.ty) &&
            self.element(2).is_some()
    }

    /// Whether this is a slice which is read as an object.
    fn is_map(&self) -> bool {
        LogicalType::Map == self.logical_type &&
            FieldType::Slice == self.ty &&
            1 == self.elements.len() &&
            self.elements[0].is_named_entry()
    }

    /// Whether this describes a byte string rather than text.
    fn is_bytes(&self) -> bool {
        FieldType::String == self.ty && "bytes" == self.type_name
    }

    /// Returns the descriptor which lists the fields of this struct.
    ///
    /// A record which contains itself is described only once; the inner
    /// references are bare `Struct` descriptors naming the record, and are
    /// resolved against the enclosing descriptors being read.
    fn resolve<'d>(&'d self, enclosing: &[&'d Descriptor])
                   -> &'d Descriptor {
        if !self.elements.is_empty() || self.type_name.is_empty() {
            return self;
        }

        enclosing.iter().rev()
            .find(|d| d.type_name == self.type_name && !d.elements.is_empty())
            .cloned()
            .unwrap_or(self)
    }

    fn slice_element(&self) -> Result<&Descriptor> {
        self.elements.first().ok_or_else(|| Error::UnsupportedType(
            "slice descriptor without an element".to_owned()))
    }

    /// Reads the bare value in `data` as described by this descriptor,
    /// reporting it to `out`.
    ///
    /// `data` must hold exactly one value. Records and JSON values nested
    /// more than `DEFAULT_RECURSION_LIMIT` deep fail with
    /// `RecursionLimitExceeded`.
    pub fn read(&self, out: &mut dyn Outputter, data: &[u8]) -> Result<()> {
        let mut enclosing = Vec::new();
        let n = self.read_value(out, &mut enclosing, data,
                                self.bare_wire_type())?;
        if n < data.len() {
            return Err(Error::TrailingBytes(data.len() - n));
        }
        Ok(())
    }

    /// Reads one value found with wire type `wt`, returning the number of
    /// bytes consumed. `Length` values have already been narrowed to their
    /// payload. `enclosing` holds the structs being read, outermost first.
    fn read_value<'d>(&'d self, out: &mut dyn Outputter,
                      enclosing: &mut Vec<&'d Descriptor>,
                      data: &[u8], wt: WireType) -> Result<usize> {
        match self.ty {
            FieldType::Int => {
                expect_wire_type(wt, WireType::VarInt)?;
                let (v, n) = wire::read_varint(data)?;
                out.int64(v);
                Ok(n)
            },

            FieldType::FlatInt => {
                expect_wire_type(wt, WireType::VarInt)?;
                let (v, n) = wire::read_varuint(data)?;
                if self.is_timestamp() {
                    out.time(MicrosCodec::from_micros(v as i64)?);
                } else {
                    out.int64(v as i64);
                }
                Ok(n)
            },

            FieldType::Uint => {
                expect_wire_type(wt, WireType::VarInt)?;
                let (v, n) = wire::read_varuint(data)?;
                out.uint64(v);
                Ok(n)
            },

            FieldType::Bool => {
                expect_wire_type(wt, WireType::VarInt)?;
                let (v, n) = wire::read_varuint(data)?;
                out.bool(0 != v);
                Ok(n)
            },

            FieldType::Float32 => {
                expect_wire_type(wt, WireType::Fixed32)?;
                let (v, n) = wire::read_fixed32(data)?;
                out.float32(f32::from_bits(v));
                Ok(n)
            },

            FieldType::Float64 => {
                expect_wire_type(wt, WireType::Fixed64)?;
                let (v, n) = wire::read_fixed64(data)?;
                out.float64(f64::from_bits(v));
                Ok(n)
            },

            FieldType::String if self.is_bytes() => {
                expect_wire_type(wt, WireType::Length)?;
                out.start_array();
                for &b in data {
                    out.uint64(b as u64);
                }
                out.end_array();
                Ok(data.len())
            },

            FieldType::String => {
                expect_wire_type(wt, WireType::Length)?;
                out.string(&String::from_utf8_lossy(data));
                Ok(data.len())
            },

            FieldType::Time => {
                expect_wire_type(wt, WireType::Length)?;
                out.time(TimeCodec { proto: false }.decode(data)?);
                Ok(data.len())
            },

            FieldType::Struct => {
                expect_wire_type(wt, WireType::Length)?;
                if self.is_timestamp() {
                    out.time(TimeCodec { proto: true }.decode(data)?);
                } else if self.is_named_entry() {
                    self.read_named_entry(out, enclosing, data)?;
                } else {
                    self.resolve(enclosing).read_struct(out, enclosing, data)?;
                }
                Ok(data.len())
            },

            FieldType::Slice => {
                let elt = self.slice_element()?;
                let map = self.is_map();
                self.open(out, map);
                let n = Self::read_slice_part(out, enclosing, elt, data, wt)?;
                self.close(out, map);
                Ok(n)
            },

            FieldType::JsonObject => {
                expect_wire_type(wt, WireType::Slice)?;
                let mut o = BTreeMap::new();
                let n = json::read_object(data, &mut o,
                                          DEFAULT_RECURSION_LIMIT)?;
                emit_json_object(out, &o);
                Ok(n)
            },

            FieldType::JsonArray => {
                expect_wire_type(wt, WireType::Slice)?;
                let mut a = Vec::new();
                let n = json::read_array(data, &mut a,
                                         DEFAULT_RECURSION_LIMIT)?;
                emit_json_array(out, &a);
                Ok(n)
            },
        }
    }

    fn open(&self, out: &mut dyn Outputter, map: bool) {
        if map { out.start_object() } else { out.start_array() }
    }

    fn close(&self, out: &mut dyn Outputter, map: bool) {
        if map { out.end_object() } else { out.end_array() }
    }

    /// Reads the elements in one occurrence of a slice field.
    ///
    /// A `Slice` payload holds any number of delimited elements; a `Length`
    /// payload holds either one delimited element of the repeated form or
    /// a run of packed elements; anything else is a single unpacked
    /// element.
    fn read_slice_part<'d>(out: &mut dyn Outputter,
                           enclosing: &mut Vec<&'d Descriptor>,
                           elt: &'d Descriptor, data: &[u8], wt: WireType)
                           -> Result<usize> {
        let ewt = elt.bare_wire_type();
        let delimited = WireType::Length == ewt || WireType::Slice == ewt;

        match wt {
            WireType::Slice if delimited => read_slice_entries(data, |entry| {
                elt.read_value(out, enclosing, entry, ewt).map(|_| ())
            }),

            WireType::Length if delimited => {
                elt.read_value(out, enclosing, data, ewt)?;
                Ok(data.len())
            },

            WireType::Length => {
                let mut off = 0;
                while off < data.len() {
                    off += elt.read_value(out, enclosing, &data[off..], ewt)?;
                }
                Ok(data.len())
            },

            wt if wt == ewt => elt.read_value(out, enclosing, data, ewt),

            wt => Err(Error::BadWireType(wt as u8)),
        }
    }

    fn read_struct<'d>(&'d self, out: &mut dyn Outputter,
                       enclosing: &mut Vec<&'d Descriptor>, data: &[u8])
                       -> Result<()> {
        let _nesting = Nesting::enter(DEFAULT_RECURSION_LIMIT,
                                      &self.type_name)?;
        enclosing.push(self);
        let result = self.read_fields(out, enclosing, data);
        enclosing.pop();
        result
    }

    fn read_fields<'d>(&'d self, out: &mut dyn Outputter,
                       enclosing: &mut Vec<&'d Descriptor>, data: &[u8])
                       -> Result<()> {
        let found = occurrences(&self.type_name, data)?;
        let mut done: Vec<u32> = Vec::new();

        out.start_object();
        for (pos, occ) in found.iter().enumerate() {
            if done.contains(&occ.index) {
                continue;
            }
            done.push(occ.index);

            let field = match self.element(occ.index) {
                Some(field) => field,
                None => {
                    trace!("skipping unknown field {}.{}",
                           self.type_name, occ.index);
                    continue;
                },
            };

            out.name_field(&field.name);
            let same = found[pos..].iter()
                .filter(|o| o.index == occ.index);
            let result = if FieldType::Slice == field.ty {
                // Repeated and chunked forms are gathered into one value
                field.slice_element().and_then(|elt| {
                    let map = field.is_map();
                    field.open(out, map);
                    for o in same {
                        Self::read_slice_part(out, enclosing, elt,
                                              o.data, o.wt)?;
                    }
                    field.close(out, map);
                    Ok(())
                })
            } else {
                // Last one wins
                let last = same.last().unwrap_or(occ);
                field.read_value(out, enclosing, last.data, last.wt)
                    .map(|_| ())
            };
            result.map_err(|e| e.in_field(&self.type_name, occ.index))?;
        }
        out.end_object();

        Ok(())
    }

    fn read_named_entry<'d>(&'d self, out: &mut dyn Outputter,
                            enclosing: &mut Vec<&'d Descriptor>, data: &[u8])
                            -> Result<()> {
        let found = occurrences("MapEntry", data)?;
        let key = found.iter().rev().find(|o| 1 == o.index);
        let value = found.iter().rev().find(|o| 2 == o.index);

        match key {
            Some(k) => {
                expect_wire_type(k.wt, WireType::Length)
                    .map_err(|e| e.in_field("MapEntry", 1))?;
                out.name_field(&String::from_utf8_lossy(k.data));
            },
            None => out.name_field(""),
        }

        // `is_named_entry` has checked that the value is described
        let value_desc = match self.element(2) {
            Some(d) => d,
            None => return Ok(()),
        };
        match value {
            Some(v) => value_desc.read_value(out, enclosing, v.data, v.wt)
                .map(|_| ())
                .map_err(|e| e.in_field("MapEntry", 2)),
            None => {
                value_desc.emit_zero(out);
                Ok(())
            },
        }
    }

    /// Reports the zero value of this descriptor.
    fn emit_zero(&self, out: &mut dyn Outputter) {
        match self.ty {
            FieldType::Int | FieldType::FlatInt if self.is_timestamp() =>
                out.time(epoch()),
            FieldType::Int | FieldType::FlatInt => out.int64(0),
            FieldType::Uint => out.uint64(0),
            FieldType::Float32 => out.float32(0.0),
            FieldType::Float64 => out.float64(0.0),
            FieldType::String if self.is_bytes() => {
                out.start_array();
                out.end_array();
            },
            FieldType::String => out.string(""),
            FieldType::Bool => out.bool(false),
            FieldType::Time => out.time(epoch()),
            FieldType::Struct if self.is_timestamp() => out.time(epoch()),
            FieldType::Struct | FieldType::JsonObject => {
                out.start_object();
                out.end_object();
            },
            FieldType::Slice => {
                let map = self.is_map();
                self.open(out, map);
                self.close(out, map);
            },
            FieldType::JsonArray => {
                out.start_array();
                out.end_array();
            },
        }
    }
}

fn emit_json_value(out: &mut dyn Outputter, v: &JsonValue) {
    match *v {
        JsonValue::Null => out.raw("null"),
        JsonValue::String(ref s) => out.string(s),
        JsonValue::Int(i) => out.int64(i),
        JsonValue::Float(f) => out.float64(f),
        JsonValue::Bool(b) => out.bool(b),
        JsonValue::Array(ref a) => emit_json_array(out, &a.0),
        JsonValue::Object(ref o) => emit_json_object(out, &o.0),
        JsonValue::Number(ref s) => out.raw(s),
    }
}

fn emit_json_array(out: &mut dyn Outputter, a: &[JsonValue]) {
    out.start_array();
    for v in a {
        emit_json_value(out, v);
    }
    out.end_array();
}

fn emit_json_object(out: &mut dyn Outputter,
                    o: &BTreeMap<String, JsonValue>) {
    out.start_object();
    for (k, v) in o {
        out.name_field(k);
        emit_json_value(out, v);
    }
    out.end_object();
}
