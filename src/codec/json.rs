//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dynamically typed JSON values.
//!
//! `JsonObject` and `JsonArray` are both encoded as a `Slice` of entries.
//! Each entry is a small record:
//!
//! - index 1: the key, for object entries (`Length`);
//! - index 2: the kind of the value (`VarInt`, see `JsonKind`);
//! - index 3: the value itself, absent for `null`.
//!
//! Strings and numbers are `Length`, integers are zig-zag `VarInt`, floats
//! are `Fixed64`, booleans are `VarInt`, and nested arrays and objects are
//! themselves `Slice` payloads of entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{append_frame, framed_size, Codec, Nesting, Plenc};
use crate::codec::slice::read_slice_entries;
use crate::descriptor::{Descriptor, FieldType};
use crate::error::{Error, Result};
use crate::registry::{Registry, DEFAULT_RECURSION_LIMIT};
use crate::wire::{self, WireType};

/// The discriminator written at index 2 of each entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum JsonKind {
    Null = 0,
    String = 1,
    Int = 2,
    Float = 3,
    Bool = 4,
    Array = 5,
    Object = 6,
    Number = 7,
}

impl JsonKind {
    fn from_u64(v: u64) -> Result<Self> {
        Ok(match v {
            0 => JsonKind::Null,
            1 => JsonKind::String,
            2 => JsonKind::Int,
            3 => JsonKind::Float,
            4 => JsonKind::Bool,
            5 => JsonKind::Array,
            6 => JsonKind::Object,
            7 => JsonKind::Number,
            _ => return Err(Error::UnsupportedType(
                format!("JSON value kind {}", v))),
        })
    }
}

/// A JSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonValue {
    /// `null`
    Null,
    /// A string.
    String(String),
    /// A number which fits in an `i64`.
    Int(i64),
    /// Any other number representable as an `f64`.
    Float(f64),
    /// `true` or `false`.
    Bool(bool),
    /// An array.
    Array(JsonArray),
    /// An object.
    Object(JsonObject),
    /// A number kept in its decimal text form.
    Number(String),
}

/// A JSON object, keyed in sorted order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonObject(pub BTreeMap<String, JsonValue>);

/// A JSON array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonArray(pub Vec<JsonValue>);

impl JsonValue {
    /// Returns the discriminator for this value.
    pub fn kind(&self) -> JsonKind {
        match *self {
            JsonValue::Null => JsonKind::Null,
            JsonValue::String(_) => JsonKind::String,
            JsonValue::Int(_) => JsonKind::Int,
            JsonValue::Float(_) => JsonKind::Float,
            JsonValue::Bool(_) => JsonKind::Bool,
            JsonValue::Array(_) => JsonKind::Array,
            JsonValue::Object(_) => JsonKind::Object,
            JsonValue::Number(_) => JsonKind::Number,
        }
    }

    fn payload_wire_type(&self) -> WireType {
        match *self {
            JsonValue::Null | JsonValue::Int(_) | JsonValue::Bool(_) =>
                WireType::VarInt,
            JsonValue::String(_) | JsonValue::Number(_) => WireType::Length,
            JsonValue::Float(_) => WireType::Fixed64,
            JsonValue::Array(_) | JsonValue::Object(_) => WireType::Slice,
        }
    }

    fn payload_size(&self) -> usize {
        match *self {
            JsonValue::Null => 0,
            JsonValue::String(ref s) | JsonValue::Number(ref s) => s.len(),
            JsonValue::Int(i) => wire::size_varint(i),
            JsonValue::Float(_) => 8,
            JsonValue::Bool(_) => 1,
            JsonValue::Array(ref a) => array_size(&a.0),
            JsonValue::Object(ref o) => object_size(&o.0),
        }
    }

    fn append_payload(&self, out: &mut Vec<u8>) {
        match *self {
            JsonValue::Null => (),
            JsonValue::String(ref s) | JsonValue::Number(ref s) =>
                out.extend_from_slice(s.as_bytes()),
            JsonValue::Int(i) => wire::append_varint(out, i),
            JsonValue::Float(f) => wire::append_fixed64(out, f.to_bits()),
            JsonValue::Bool(b) => out.push(b as u8),
            JsonValue::Array(ref a) => append_array(out, &a.0),
            JsonValue::Object(ref o) => append_object(out, &o.0),
        }
    }
}

const KEY_TAG: u8 = (1 << 3) | WireType::Length as u8;
const KIND_TAG: u8 = (2 << 3) | WireType::VarInt as u8;

fn entry_size(key: &str, value: &JsonValue) -> usize {
    let mut n = 2;
    if !key.is_empty() {
        n += framed_size(WireType::Length, key.len(),
                         Some(&[KEY_TAG][..]));
    }
    if JsonKind::Null != value.kind() {
        n += framed_size(value.payload_wire_type(), value.payload_size(),
                         Some(&[0][..]));
    }
    n
}

fn append_entry(out: &mut Vec<u8>, key: &str, value: &JsonValue) {
    let n = entry_size(key, value);
    wire::append_varuint(out, n as u64);
    if !key.is_empty() {
        append_frame(out, WireType::Length, key.len(),
                     Some(&[KEY_TAG][..]));
        out.extend_from_slice(key.as_bytes());
    }
    out.push(KIND_TAG);
    out.push(value.kind() as u8);
    if JsonKind::Null != value.kind() {
        let wt = value.payload_wire_type();
        wire::append_tag(out, wt, 3);
        if WireType::Length == wt {
            wire::append_varuint(out, value.payload_size() as u64);
        }
        value.append_payload(out);
    }
}

fn entries_size<'a, I>(count: usize, entries: I) -> usize
where I : Iterator<Item = (&'a str, &'a JsonValue)> {
    wire::size_varuint(count as u64) + entries.map(|(k, v)| {
        let n = entry_size(k, v);
        wire::size_varuint(n as u64) + n
    }).sum::<usize>()
}

fn array_size(a: &[JsonValue]) -> usize {
    entries_size(a.len(), a.iter().map(|v| ("", v)))
}

fn object_size(o: &BTreeMap<String, JsonValue>) -> usize {
    entries_size(o.len(), o.iter().map(|(k, v)| (&**k, v)))
}

fn append_array(out: &mut Vec<u8>, a: &[JsonValue]) {
    wire::append_varuint(out, a.len() as u64);
    for v in a {
        append_entry(out, "", v);
    }
}

fn append_object(out: &mut Vec<u8>, o: &BTreeMap<String, JsonValue>) {
    wire::append_varuint(out, o.len() as u64);
    for (k, v) in o {
        append_entry(out, k, v);
    }
}

/// Decodes one entry, returning its key (empty if absent) and value.
fn read_entry(data: &[u8], limit: usize) -> Result<(String, JsonValue)> {
    let mut key = String::new();
    let mut kind = JsonKind::Null;
    let mut payload: Option<(WireType, &[u8])> = None;

    let mut off = 0;
    while off < data.len() {
        let (wt, index, n) = wire::read_tag(&data[off..])?;
        off += n;
        let rest = &data[off..];
        off += match (index, wt) {
            (1, WireType::Length) => {
                let (s, n) = wire::read_delimited(rest)?;
                key = String::from_utf8_lossy(s).into_owned();
                n
            },
            (2, WireType::VarInt) => {
                let (v, n) = wire::read_varuint(rest)?;
                kind = JsonKind::from_u64(v)?;
                n
            },
            (3, WireType::Length) => {
                let (s, n) = wire::read_delimited(rest)?;
                payload = Some((wt, s));
                n
            },
            (3, wt) => {
                let n = wire::skip(rest, wt)?;
                payload = Some((wt, &rest[..n]));
                n
            },
            (_, wt) => wire::skip(rest, wt)?,
        };
    }

    Ok((key, read_value(kind, payload, limit)?))
}

fn read_value(kind: JsonKind, payload: Option<(WireType, &[u8])>,
              limit: usize) -> Result<JsonValue> {
    let (wt, data) = match payload {
        Some(p) => p,
        None => return Ok(match kind {
            JsonKind::Null => JsonValue::Null,
            JsonKind::String => JsonValue::String(String::new()),
            JsonKind::Int => JsonValue::Int(0),
            JsonKind::Float => JsonValue::Float(0.0),
            JsonKind::Bool => JsonValue::Bool(false),
            JsonKind::Array => JsonValue::Array(JsonArray::default()),
            JsonKind::Object => JsonValue::Object(JsonObject::default()),
            JsonKind::Number => JsonValue::Number("0".to_owned()),
        }),
    };

    let expected = match kind {
        JsonKind::Null => return Ok(JsonValue::Null),
        JsonKind::String | JsonKind::Number => WireType::Length,
        JsonKind::Int | JsonKind::Bool => WireType::VarInt,
        JsonKind::Float => WireType::Fixed64,
        JsonKind::Array | JsonKind::Object => WireType::Slice,
    };
    if expected != wt {
        return Err(Error::BadWireType(wt as u8));
    }

    Ok(match kind {
        JsonKind::Null => JsonValue::Null,
        JsonKind::String =>
            JsonValue::String(String::from_utf8_lossy(data).into_owned()),
        JsonKind::Number =>
            JsonValue::Number(String::from_utf8_lossy(data).into_owned()),
        JsonKind::Int => JsonValue::Int(wire::read_varint(data)?.0),
        JsonKind::Bool => JsonValue::Bool(0 != wire::read_varuint(data)?.0),
        JsonKind::Float =>
            JsonValue::Float(f64::from_bits(wire::read_fixed64(data)?.0)),
        JsonKind::Array => {
            let mut a = Vec::new();
            read_array(data, &mut a, limit)?;
            JsonValue::Array(JsonArray(a))
        },
        JsonKind::Object => {
            let mut o = BTreeMap::new();
            read_object(data, &mut o, limit)?;
            JsonValue::Object(JsonObject(o))
        },
    })
}

/// Decodes a `Slice` payload of array entries, appending to `out`.
///
/// Nested arrays and objects count against `limit` along with whatever
/// encloses this array.
pub(crate) fn read_array(data: &[u8], out: &mut Vec<JsonValue>,
                         limit: usize) -> Result<usize> {
    let _nesting = Nesting::enter(limit, "JsonArray")?;
    read_slice_entries(data, |entry| {
        out.push(read_entry(entry, limit)?.1);
        Ok(())
    })
}

/// Decodes a `Slice` payload of object entries, inserting into `out`.
pub(crate) fn read_object(data: &[u8], out: &mut BTreeMap<String, JsonValue>,
                          limit: usize) -> Result<usize> {
    let _nesting = Nesting::enter(limit, "JsonObject")?;
    read_slice_entries(data, |entry| {
        let (k, v) = read_entry(entry, limit)?;
        out.insert(k, v);
        Ok(())
    })
}

/// Codec for `JsonObject`. Empty objects are omitted. Decoding merges into
/// the existing object.
#[derive(Debug, Clone, Copy)]
pub struct JsonObjectCodec {
    recursion_limit: usize,
}

impl Default for JsonObjectCodec {
    fn default() -> Self {
        JsonObjectCodec { recursion_limit: DEFAULT_RECURSION_LIMIT }
    }
}

impl Codec<JsonObject> for JsonObjectCodec {
    fn omit(&self, value: &JsonObject) -> bool { value.0.is_empty() }

    fn size(&self, value: &JsonObject, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Slice, object_size(&value.0), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &JsonObject,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Slice, 0, tag);
        append_object(out, &value.0);
    }

    fn read(&self, data: &[u8], value: &mut JsonObject, wt: WireType)
            -> Result<usize> {
        if WireType::Slice != wt {
            return Err(Error::BadWireType(wt as u8));
        }
        read_object(data, &mut value.0, self.recursion_limit)
    }

    fn new_value(&self) -> JsonObject { JsonObject::default() }
    fn wire_type(&self) -> WireType { WireType::Slice }

    fn descriptor(&self) -> Descriptor {
        Descriptor::of(FieldType::JsonObject)
    }
}

impl Plenc for JsonObject {
    fn build_codec(registry: &Registry, _: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(JsonObjectCodec {
            recursion_limit: registry.config().recursion_limit,
        }))
    }
}

/// Codec for `JsonArray`. Empty arrays are omitted. Decoding replaces the
/// existing array.
#[derive(Debug, Clone, Copy)]
pub struct JsonArrayCodec {
    recursion_limit: usize,
}

impl Default for JsonArrayCodec {
    fn default() -> Self {
        JsonArrayCodec { recursion_limit: DEFAULT_RECURSION_LIMIT }
    }
}

impl Codec<JsonArray> for JsonArrayCodec {
    fn omit(&self, value: &JsonArray) -> bool { value.0.is_empty() }

    fn size(&self, value: &JsonArray, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Slice, array_size(&value.0), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &JsonArray,
              tag: Option<&[u8]>) {
        append_frame(out, WireType::Slice, 0, tag);
        append_array(out, &value.0);
    }

    fn read(&self, data: &[u8], value: &mut JsonArray, wt: WireType)
            -> Result<usize> {
        if WireType::Slice != wt {
            return Err(Error::BadWireType(wt as u8));
        }
        let mut a = Vec::new();
        let n = read_array(data, &mut a, self.recursion_limit)?;
        value.0 = a;
        Ok(n)
    }

    fn new_value(&self) -> JsonArray { JsonArray::default() }
    fn wire_type(&self) -> WireType { WireType::Slice }

    fn descriptor(&self) -> Descriptor {
        Descriptor::of(FieldType::JsonArray)
    }
}

impl Plenc for JsonArray {
    fn build_codec(registry: &Registry, _: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(JsonArrayCodec {
            recursion_limit: registry.config().recursion_limit,
        }))
    }
}

impl From<serde_json::Value> for JsonValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Number(n) => if let Some(i) = n.as_i64() {
                JsonValue::Int(i)
            } else if n.is_u64() {
                // Too big for Int, and an f64 would lose precision
                JsonValue::Number(n.to_string())
            } else {
                JsonValue::Float(n.as_f64().unwrap_or(0.0))
            },
            Value::String(s) => JsonValue::String(s),
            Value::Array(a) => JsonValue::Array(a.into()),
            Value::Object(o) => JsonValue::Object(o.into()),
        }
    }
}

impl From<Vec<serde_json::Value>> for JsonArray {
    fn from(a: Vec<serde_json::Value>) -> Self {
        JsonArray(a.into_iter().map(JsonValue::from).collect())
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for JsonObject {
    fn from(o: serde_json::Map<String, serde_json::Value>) -> Self {
        JsonObject(o.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<JsonValue> for serde_json::Value {
    fn from(v: JsonValue) -> Self {
        use serde_json::{Number, Value};

        match v {
            JsonValue::Null => Value::Null,
            JsonValue::String(s) => Value::String(s),
            JsonValue::Int(i) => Value::Number(i.into()),
            JsonValue::Float(f) => Number::from_f64(f)
                .map_or(Value::Null, Value::Number),
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Array(a) => a.into(),
            JsonValue::Object(o) => o.into(),
            JsonValue::Number(s) => match s.parse::<Number>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::String(s),
            },
        }
    }
}

impl From<JsonArray> for serde_json::Value {
    fn from(a: JsonArray) -> Self {
        serde_json::Value::Array(
            a.0.into_iter().map(serde_json::Value::from).collect())
    }
}

impl From<JsonObject> for serde_json::Value {
    fn from(o: JsonObject) -> Self {
        serde_json::Value::Object(
            o.0.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::test_helpers::parse;

    fn round_trip(v: serde_json::Value) -> serde_json::Value {
        let obj = match JsonValue::from(v) {
            JsonValue::Object(o) => o,
            other => panic!("not an object: {:?}", other),
        };
        let mut out = Vec::new();
        let codec = JsonObjectCodec::default();
        codec.append(&mut out, &obj, None);
        assert_eq!(out.len(), codec.size(&obj, None));

        let mut back = JsonObject::default();
        let n = codec.read(&out, &mut back, WireType::Slice).unwrap();
        assert_eq!(out.len(), n);
        back.into()
    }

    #[test]
    fn entry_layout() {
        let mut out = Vec::new();
        append_object(&mut out, &JsonValue::from(json!({"a": 1}))
                      .into_object());
        assert_eq!(parse("01 07 0A 01 'a' 10 02 18 02"), out);

        let mut out = Vec::new();
        append_array(&mut out, &[JsonValue::Null, JsonValue::Bool(true)]);
        assert_eq!(parse("02 02 10 00 04 10 04 18 01"), out);
    }

    #[test]
    fn nested_values_survive() {
        let v = json!({
            "s": "str",
            "i": -7,
            "f": 1.5,
            "b": false,
            "n": null,
            "a": [1, "two", [3.25], {}],
            "o": {"deep": {"deeper": true}},
            "big": 18446744073709551615u64,
        });
        assert_eq!(v, round_trip(v.clone()));
    }

    #[test]
    fn zero_payloads_are_still_typed() {
        let v = json!({"i": 0, "s": "", "f": 0.0});
        assert_eq!(v, round_trip(v.clone()));
    }

    #[test]
    fn empty_collections_are_omitted() {
        assert!(JsonObjectCodec::default().omit(&JsonObject::default()));
        assert!(JsonArrayCodec::default().omit(&JsonArray::default()));
    }

    /// Encodes `depth` arrays, each the only element of the next.
    fn nested_arrays(depth: usize) -> Vec<u8> {
        // Bare payload sizes, innermost first. A nested array payload
        // follows its entry's kind without a length prefix.
        let mut sizes = vec![1usize];
        for i in 1..depth {
            let entry = 3 + sizes[i - 1];
            sizes.push(1 + wire::size_varuint(entry as u64) + entry);
        }

        let mut out = Vec::with_capacity(sizes[depth - 1]);
        for &inner in sizes[..depth - 1].iter().rev() {
            out.push(1);
            wire::append_varuint(&mut out, 3 + inner as u64);
            out.extend_from_slice(&[0x10, JsonKind::Array as u8, 0x1B]);
        }
        out.push(0);
        out
    }

    #[test]
    fn nesting_is_limited() {
        let codec = JsonArrayCodec { recursion_limit: 4 };
        let mut a = JsonArray::default();
        codec.read(&nested_arrays(4), &mut a, WireType::Slice).unwrap();
        assert_eq!(JsonValue::from(json!([[[[]]]])), JsonValue::Array(a));

        let mut a = JsonArray::default();
        assert_eq!(Err(Error::RecursionLimitExceeded("JsonArray".to_owned())),
                   codec.read(&nested_arrays(5), &mut a, WireType::Slice));

        let mut a = JsonArray::default();
        assert!(JsonArrayCodec::default()
                .read(&nested_arrays(200_000), &mut a, WireType::Slice)
                .is_err());
    }

    impl JsonValue {
        fn into_object(self) -> BTreeMap<String, JsonValue> {
            match self {
                JsonValue::Object(o) => o.0,
                _ => panic!("not an object"),
            }
        }
    }
}
