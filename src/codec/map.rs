//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Codecs for `HashMap` and `BTreeMap`.
//!
//! A map is a sequence of entries, each a small record with the key at
//! index 1 and the value at index 2. Either side may be omitted, in which
//! case it reads as its zero value.
//!
//! By default the entries are written as a `Slice` payload: the entry count,
//! then each entry prefixed by its length. This form is never omitted, so
//! an empty map is written as a zero count. With the `proto` postfix, each
//! entry is instead written as its own `Length` field under the map's tag,
//! which is how protobuf encodes maps; in that form an empty map can only be
//! omitted.
//!
//! Decoding accepts either form and merges into the existing map: keys
//! which occur in the input replace existing entries, the last occurrence
//! winning, and other entries are kept.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{append_frame, framed_size, read_field, tag_bytes,
                   Codec, Plenc};
use crate::codec::slice::read_slice_entries;
use crate::descriptor::{Descriptor, FieldType, LogicalType};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

/// The operations the map codec needs from a map type.
pub trait MapLike<K, V> : Default + Send + Sync + 'static {
    /// Returns the number of entries.
    fn map_len(&self) -> usize;
    /// Iterates over the entries.
    fn map_entries<'a>(&'a self)
                       -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a>;
    /// Inserts an entry, replacing any with the same key.
    fn map_insert(&mut self, key: K, value: V);
}

impl<K, V> MapLike<K, V> for HashMap<K, V>
where K : Eq + Hash + Send + Sync + 'static, V : Send + Sync + 'static {
    fn map_len(&self) -> usize { self.len() }

    fn map_entries<'a>(&'a self)
                       -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a> {
        Box::new(self.iter())
    }

    fn map_insert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
}

impl<K, V> MapLike<K, V> for BTreeMap<K, V>
where K : Ord + Send + Sync + 'static, V : Send + Sync + 'static {
    fn map_len(&self) -> usize { self.len() }

    fn map_entries<'a>(&'a self)
                       -> Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a> {
        Box::new(self.iter())
    }

    fn map_insert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }
}

impl<K, V> Plenc for HashMap<K, V>
where K : Plenc + Eq + Hash, V : Plenc {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(MapCodec::<Self, K, V>::build(registry, postfix)?))
    }
}

impl<K, V> Plenc for BTreeMap<K, V>
where K : Plenc + Ord, V : Plenc {
    fn build_codec(registry: &Registry, postfix: &str)
                   -> Result<Arc<dyn Codec<Self>>> {
        Ok(Arc::new(MapCodec::<Self, K, V>::build(registry, postfix)?))
    }
}

/// Codec for a `MapLike` map type `M`.
pub struct MapCodec<M, K, V> {
    key: Arc<dyn Codec<K>>,
    value: Arc<dyn Codec<V>>,
    key_tag: Vec<u8>,
    value_tag: Vec<u8>,
    proto: bool,
    _map: PhantomData<fn () -> M>,
}

impl<M, K : Plenc, V : Plenc> MapCodec<M, K, V> {
    /// Builds the codec. `proto` selects the protobuf form and `intern`
    /// applies to the values only; any other postfix is passed on to the
    /// key and value codecs.
    pub fn build(registry: &Registry, postfix: &str) -> Result<Self> {
        let proto = "proto" == postfix;
        let (key_postfix, value_postfix) = match postfix {
            "proto" => ("", ""),
            "intern" => ("", "intern"),
            other => (other, other),
        };
        let key = registry.codec_for::<K>(key_postfix)?;
        let value = registry.codec_for::<V>(value_postfix)?;
        Ok(MapCodec {
            key_tag: tag_bytes(key.field_wire_type(), 1),
            value_tag: tag_bytes(value.field_wire_type(), 2),
            key, value, proto,
            _map: PhantomData,
        })
    }
}

impl<M, K, V> MapCodec<M, K, V> {
    fn entry_size(&self, k: &K, v: &V) -> usize {
        let mut n = 0;
        if !self.key.omit(k) {
            n += self.key.size(k, Some(&self.key_tag));
        }
        if !self.value.omit(v) {
            n += self.value.size(v, Some(&self.value_tag));
        }
        n
    }

    fn append_entry(&self, out: &mut Vec<u8>, k: &K, v: &V) {
        if !self.key.omit(k) {
            self.key.append(out, k, Some(&self.key_tag));
        }
        if !self.value.omit(v) {
            self.value.append(out, v, Some(&self.value_tag));
        }
    }

    fn read_entry(&self, data: &[u8]) -> Result<(K, V)> {
        let mut k = self.key.new_value();
        let mut v = self.value.new_value();

        let mut off = 0;
        while off < data.len() {
            let (wt, index, n) = wire::read_tag(&data[off..])?;
            off += n;
            off += match index {
                1 => read_field(&*self.key, &data[off..], &mut k, wt),
                2 => read_field(&*self.value, &data[off..], &mut v, wt),
                _ => wire::skip(&data[off..], wt),
            }.map_err(|e| e.in_field("MapEntry", index))?;
        }

        Ok((k, v))
    }
}

impl<M : MapLike<K, V>, K, V> MapCodec<M, K, V> {
    fn slice_size(&self, map: &M) -> usize {
        wire::size_varuint(map.map_len() as u64) +
            map.map_entries().map(|(k, v)| {
                let n = self.entry_size(k, v);
                wire::size_varuint(n as u64) + n
            }).sum::<usize>()
    }
}

impl<M : MapLike<K, V>, K, V> Codec<M> for MapCodec<M, K, V> {
    fn omit(&self, map: &M) -> bool {
        self.proto && 0 == map.map_len()
    }

    fn size(&self, map: &M, tag: Option<&[u8]>) -> usize {
        match tag {
            Some(tag) if self.proto => map.map_entries().map(|(k, v)| {
                framed_size(WireType::Length, self.entry_size(k, v),
                            Some(tag))
            }).sum(),
            _ => framed_size(WireType::Slice, self.slice_size(map), tag),
        }
    }

    fn append(&self, out: &mut Vec<u8>, map: &M, tag: Option<&[u8]>) {
        if let (true, Some(tag)) = (self.proto, tag) {
            for (k, v) in map.map_entries() {
                append_frame(out, WireType::Length,
                             self.entry_size(k, v), Some(tag));
                self.append_entry(out, k, v);
            }
            return;
        }

        append_frame(out, WireType::Slice, self.slice_size(map), tag);
        wire::append_varuint(out, map.map_len() as u64);
        for (k, v) in map.map_entries() {
            wire::append_varuint(out, self.entry_size(k, v) as u64);
            self.append_entry(out, k, v);
        }
    }

    fn read(&self, data: &[u8], map: &mut M, wt: WireType)
            -> Result<usize> {
        match wt {
            WireType::Slice => read_slice_entries(data, |entry| {
                let (k, v) = self.read_entry(entry)?;
                map.map_insert(k, v);
                Ok(())
            }),

            WireType::Length => {
                let (k, v) = self.read_entry(data)?;
                map.map_insert(k, v);
                Ok(data.len())
            },

            wt => Err(Error::BadWireType(wt as u8)),
        }
    }

    fn new_value(&self) -> M { M::default() }
    fn wire_type(&self) -> WireType { WireType::Slice }

    fn field_wire_type(&self) -> WireType {
        if self.proto { WireType::Length } else { WireType::Slice }
    }

    fn descriptor(&self) -> Descriptor {
        let mut key = self.key.descriptor();
        key.index = 1;
        key.name = "key".to_owned();
        let mut value = self.value.descriptor();
        value.index = 2;
        value.name = "value".to_owned();

        let mut entry = Descriptor::of(FieldType::Struct);
        entry.logical_type = LogicalType::MapEntry;
        entry.elements = vec![key, value];

        let mut desc = Descriptor::of(FieldType::Slice);
        desc.logical_type = LogicalType::Map;
        desc.elements.push(entry);
        desc
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Config;
    use crate::test_helpers::parse;

    fn codec(postfix: &str) -> MapCodec<BTreeMap<String, i32>, String, i32> {
        MapCodec::build(&Registry::new(Config::default()), postfix).unwrap()
    }

    fn sample() -> BTreeMap<String, i32> {
        let mut map = BTreeMap::new();
        map.insert("a".to_owned(), 1);
        map.insert("b".to_owned(), 0);
        map
    }

    #[test]
    fn native_form() {
        let codec = codec("");
        let tag = tag_bytes(codec.field_wire_type(), 3);
        let mut out = Vec::new();
        codec.append(&mut out, &sample(), Some(&tag));
        // The zero value of "b" is left out of its entry
        assert_eq!(parse("1B 02 05 0A 01 'a' 10 02 03 0A 01 'b'"), out);
        assert_eq!(out.len(), codec.size(&sample(), Some(&tag)));

        let mut back = BTreeMap::new();
        codec.read(&out[1..], &mut back, WireType::Slice).unwrap();
        assert_eq!(sample(), back);
    }

    #[test]
    fn empty_native_map_is_written() {
        let codec = codec("");
        let empty = BTreeMap::new();
        assert!(!codec.omit(&empty));
        let mut out = Vec::new();
        codec.append(&mut out, &empty, Some(&tag_bytes(WireType::Slice, 1)));
        assert_eq!(parse("0B 00"), out);
    }

    #[test]
    fn proto_form_repeats_the_tag() {
        let codec = codec("proto");
        assert!(codec.omit(&BTreeMap::new()));
        let tag = tag_bytes(codec.field_wire_type(), 3);
        let mut out = Vec::new();
        codec.append(&mut out, &sample(), Some(&tag));
        assert_eq!(parse("1A 05 0A 01 'a' 10 02 1A 03 0A 01 'b'"), out);
        assert_eq!(out.len(), codec.size(&sample(), Some(&tag)));
    }

    #[test]
    fn last_key_wins_and_others_are_kept() {
        let codec = codec("");
        let mut map = BTreeMap::new();
        map.insert("keep".to_owned(), 9);
        map.insert("a".to_owned(), 9);
        codec.read(&parse("02 05 0A 01 'a' 10 02 05 0A 01 'a' 10 04"),
                   &mut map, WireType::Slice).unwrap();
        assert_eq!(Some(&2), map.get("a"));
        assert_eq!(Some(&9), map.get("keep"));
        assert_eq!(2, map.len());
    }

    #[test]
    fn intern_applies_to_string_keyed_values() {
        let registry = Registry::new(Config::default());
        let codec = MapCodec::<HashMap<String, Arc<str>>, String, Arc<str>>
            ::build(&registry, "intern").unwrap();

        let mut map = HashMap::new();
        codec.read(&parse("02 06 0A 01 'a' 12 01 'v' 06 0A 01 'b' 12 01 'v'"),
                   &mut map, WireType::Slice).unwrap();
        assert_eq!(2, map.len());
        assert!(Arc::ptr_eq(&map["a"], &map["b"]));
        assert_eq!("v", &*map["a"]);
    }

    #[test]
    fn descriptor_is_map_of_entries() {
        let desc = codec("").descriptor();
        assert_eq!(FieldType::Slice, desc.ty);
        assert_eq!(LogicalType::Map, desc.logical_type);
        let entry = &desc.elements[0];
        assert_eq!(LogicalType::MapEntry, entry.logical_type);
        assert_eq!(FieldType::String, entry.elements[0].ty);
        assert_eq!(1, entry.elements[0].index);
        assert_eq!(FieldType::Int, entry.elements[1].ty);
        assert_eq!(2, entry.elements[1].index);
    }
}
