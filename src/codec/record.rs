//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The codec for records: structs whose fields each carry an explicit field
//! index.
//!
//! A record describes its fields by implementing `Record`, normally through
//! the `plenc_record!` macro. Each field carries a `plenc` annotation of the
//! form `<index>[,<postfix>]`, or `-` to leave the field out of the encoding
//! entirely. Annotations are only parsed when the codec is built, so
//! mistakes surface as errors from the first codec lookup for the type.
//!
//! Records are encoded as a `Length` payload holding one field per
//! non-omitted member, in declaration order. When decoding, fields may
//! appear in any order, unknown fields are skipped, and members whose
//! fields are absent from the input keep whatever value they already had.

use std::any::{self, TypeId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::codec::{framed_size, append_frame, read_field, tag_bytes,
                   Codec, Nesting, Plenc};
use crate::descriptor::{Descriptor, FieldType};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::wire::{self, WireType};

/// Postfixes which may follow the field index in a `plenc` annotation.
pub const POSTFIXES: &[&str] = &["intern", "flat", "proto"];

/// A struct which can be encoded as a record.
///
/// This is normally implemented with `plenc_record!`, which also implements
/// `Plenc` by calling `build_record`.
pub trait Record : Default + Send + Sync + 'static {
    /// The name of the record, used in error paths and as the `type_name`
    /// of its descriptor.
    const NAME: &'static str;

    /// Lists the fields of the record in declaration order.
    fn fields() -> Vec<Field<Self>>;
}

type FieldBuilder<S> =
    Box<dyn Fn (&Registry, &str) -> Result<Box<dyn FieldCodec<S>>>>;

/// One member of a `Record`, as declared.
pub struct Field<S> {
    /// The Rust identifier of the member.
    pub name: &'static str,
    /// The raw `plenc` annotation.
    pub plenc: &'static str,
    /// The raw `json` annotation, if any.
    pub json: Option<&'static str>,
    build: FieldBuilder<S>,
}

impl<S : 'static> Field<S> {
    /// Declares a member of type `F`, whose codec will be looked up through
    /// `Plenc`.
    pub fn new<F : Plenc>(name: &'static str, plenc: &'static str,
                          json: Option<&'static str>,
                          get: fn (&S) -> &F, get_mut: fn (&mut S) -> &mut F)
                          -> Self {
        Field {
            name, plenc, json,
            build: Box::new(move |registry, postfix| {
                let codec = registry.codec_for::<F>(postfix)?;
                Ok(Box::new(Accessor { codec, get, get_mut })
                   as Box<dyn FieldCodec<S>>)
            }),
        }
    }

    /// Declares a member of a type which does not implement `Plenc`. Its
    /// codec must have been installed with `Registry::register_codec`
    /// before the record's codec is built.
    pub fn custom<F : Send + Sync + 'static>(
        name: &'static str, plenc: &'static str, json: Option<&'static str>,
        get: fn (&S) -> &F, get_mut: fn (&mut S) -> &mut F) -> Self
    {
        Field {
            name, plenc, json,
            build: Box::new(move |registry, postfix| {
                let codec = registry.registered::<F>(postfix)
                    .or_else(|| registry.registered::<F>(""))
                    .ok_or_else(|| Error::UnsupportedType(
                        any::type_name::<F>().to_owned()))?;
                Ok(Box::new(Accessor { codec, get, get_mut })
                   as Box<dyn FieldCodec<S>>)
            }),
        }
    }
}

/// A member's codec, bound to the member within the record.
trait FieldCodec<S> : Send + Sync {
    fn omit(&self, record: &S) -> bool;
    fn size(&self, record: &S, tag: &[u8]) -> usize;
    fn append(&self, out: &mut Vec<u8>, record: &S, tag: &[u8]);
    fn read(&self, data: &[u8], record: &mut S, wt: WireType)
            -> Result<usize>;
    fn field_wire_type(&self) -> WireType;
    fn descriptor(&self) -> Descriptor;
}

struct Accessor<S, F> {
    codec: Arc<dyn Codec<F>>,
    get: fn (&S) -> &F,
    get_mut: fn (&mut S) -> &mut F,
}

impl<S, F> FieldCodec<S> for Accessor<S, F> {
    fn omit(&self, record: &S) -> bool {
        self.codec.omit((self.get)(record))
    }

    fn size(&self, record: &S, tag: &[u8]) -> usize {
        self.codec.size((self.get)(record), Some(tag))
    }

    fn append(&self, out: &mut Vec<u8>, record: &S, tag: &[u8]) {
        self.codec.append(out, (self.get)(record), Some(tag))
    }

    fn read(&self, data: &[u8], record: &mut S, wt: WireType)
            -> Result<usize> {
        read_field(&*self.codec, data, (self.get_mut)(record), wt)
    }

    fn field_wire_type(&self) -> WireType {
        self.codec.field_wire_type()
    }

    fn descriptor(&self) -> Descriptor {
        self.codec.descriptor()
    }
}

struct BuiltField<S> {
    index: u32,
    json_name: &'static str,
    tag: Vec<u8>,
    codec: Box<dyn FieldCodec<S>>,
}

/// Field indices above this are looked up by binary search instead of in a
/// table indexed by field index.
const MAX_TABLE_INDEX: u32 = 1024;

/// Maps field index to position in the field list.
enum FieldIndex {
    Table(Vec<Option<usize>>),
    /// Sorted by field index.
    Sorted(Vec<(u32, usize)>),
}

impl FieldIndex {
    fn new<S>(list: &[BuiltField<S>]) -> Self {
        let max = list.iter().map(|f| f.index).max().unwrap_or(0);
        if max <= MAX_TABLE_INDEX {
            let mut table = vec![None; max as usize + 1];
            for (pos, f) in list.iter().enumerate() {
                table[f.index as usize] = Some(pos);
            }
            FieldIndex::Table(table)
        } else {
            let mut sorted: Vec<_> = list.iter().enumerate()
                .map(|(pos, f)| (f.index, pos))
                .collect();
            sorted.sort_unstable();
            FieldIndex::Sorted(sorted)
        }
    }

    fn get(&self, index: u32) -> Option<usize> {
        match *self {
            FieldIndex::Table(ref table) =>
                table.get(index as usize).cloned().flatten(),
            FieldIndex::Sorted(ref sorted) => sorted
                .binary_search_by_key(&index, |&(i, _)| i)
                .ok()
                .map(|at| sorted[at].1),
        }
    }
}

struct Fields<S> {
    /// In declaration order.
    list: Vec<BuiltField<S>>,
    by_index: FieldIndex,
}

/// Codec for a `Record`.
pub struct RecordCodec<S> {
    /// Filled once every member's codec has been built. A recursive record
    /// obtains this codec for its own members while it is still empty.
    fields: OnceLock<Fields<S>>,
    recursion_limit: usize,
}

/// Parses a `plenc` annotation into the field index and postfix. Returns
/// `None` for `-`.
pub fn parse_annotation(record: &'static str, field: &'static str,
                        annotation: &'static str)
                        -> Result<Option<(u32, &'static str)>> {
    let trimmed = annotation.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingFieldAnnotation(record, field));
    }
    if "-" == trimmed {
        return Ok(None);
    }

    let bad = || Error::BadAnnotation(record, field, annotation);
    let mut parts = trimmed.splitn(2, ',');
    let index = parts.next().unwrap_or("").trim()
        .parse::<u32>().map_err(|_| bad())?;
    // Field indices share the tag varint with the 3 wire type bits
    if 0 == index || index > (u32::MAX >> 3) {
        return Err(bad());
    }
    let postfix = parts.next().map(str::trim).unwrap_or("");
    if !postfix.is_empty() && !POSTFIXES.contains(&postfix) {
        return Err(bad());
    }
    Ok(Some((index, postfix)))
}

fn json_name<S>(field: &Field<S>) -> &'static str {
    match field.json.and_then(|j| j.split(',').next()) {
        Some(name) if !name.is_empty() => name,
        _ => field.name,
    }
}

fn build_fields<S : Record>(registry: &Registry) -> Result<Fields<S>> {
    let mut list = Vec::new();
    for field in S::fields() {
        let (index, postfix) = match parse_annotation(
            S::NAME, field.name, field.plenc)?
        {
            Some(parsed) => parsed,
            None => continue,
        };
        if list.iter().any(|f: &BuiltField<S>| index == f.index) {
            return Err(Error::DuplicateFieldIndex(S::NAME, index));
        }

        let codec = (field.build)(registry, postfix)?;
        list.push(BuiltField {
            index,
            json_name: json_name(&field),
            tag: tag_bytes(codec.field_wire_type(), index),
            codec,
        });
    }

    let by_index = FieldIndex::new(&list);
    Ok(Fields { list, by_index })
}

/// Builds the codec for record type `S`.
///
/// The codec is published to `registry` as a pending codec before its
/// members are built, so that members which refer back to `S` resolve to
/// it.
pub fn build_record<S : Record>(registry: &Registry, postfix: &str)
                                -> Result<Arc<dyn Codec<S>>> {
    let codec = Arc::new(RecordCodec::<S> {
        fields: OnceLock::new(),
        recursion_limit: registry.config().recursion_limit,
    });
    registry.install_pending::<S>(postfix, codec.clone());
    let fields = build_fields::<S>(registry)?;
    let _ = codec.fields.set(fields);
    Ok(codec)
}

thread_local! {
    /// Records whose descriptors are being built on this thread.
    static DESCRIBING: RefCell<HashSet<TypeId>> = RefCell::new(HashSet::new());
}

impl<S : Record> RecordCodec<S> {
    fn list(&self) -> &[BuiltField<S>] {
        match self.fields.get() {
            Some(fields) => &fields.list,
            None => &[],
        }
    }

    fn lookup(&self, index: u32) -> Option<&BuiltField<S>> {
        let fields = self.fields.get()?;
        fields.list.get(fields.by_index.get(index)?)
    }

    fn payload_size(&self, value: &S) -> usize {
        self.list().iter()
            .filter(|f| !f.codec.omit(value))
            .map(|f| f.codec.size(value, &f.tag))
            .sum()
    }
}

impl<S : Record> Codec<S> for RecordCodec<S> {
    fn omit(&self, _: &S) -> bool { false }

    fn size(&self, value: &S, tag: Option<&[u8]>) -> usize {
        framed_size(WireType::Length, self.payload_size(value), tag)
    }

    fn append(&self, out: &mut Vec<u8>, value: &S, tag: Option<&[u8]>) {
        if tag.is_some() {
            append_frame(out, WireType::Length,
                         self.payload_size(value), tag);
        }
        for f in self.list() {
            if !f.codec.omit(value) {
                f.codec.append(out, value, &f.tag);
            }
        }
    }

    fn read(&self, data: &[u8], value: &mut S, wt: WireType)
            -> Result<usize> {
        if WireType::Length != wt {
            return Err(Error::BadWireType(wt as u8));
        }

        let _nesting = Nesting::enter(self.recursion_limit, S::NAME)?;
        let mut off = 0;
        while off < data.len() {
            let (wt, index, n) = wire::read_tag(&data[off..])?;
            off += n;

            off += match self.lookup(index) {
                Some(f) => f.codec.read(&data[off..], value, wt),
                None => {
                    trace!("skipping unknown field {}.{} ({:?})",
                           S::NAME, index, wt);
                    wire::skip(&data[off..], wt)
                },
            }.map_err(|e| e.in_field(S::NAME, index))?;
        }

        Ok(data.len())
    }

    fn new_value(&self) -> S { S::default() }
    fn wire_type(&self) -> WireType { WireType::Length }

    fn descriptor(&self) -> Descriptor {
        let mut desc = Descriptor::of(FieldType::Struct);
        desc.type_name = S::NAME.to_owned();

        let id = TypeId::of::<S>();
        if !DESCRIBING.with(|d| d.borrow_mut().insert(id)) {
            // Recursive reference; the outer call lists the fields
            return desc;
        }

        for f in self.list() {
            let mut elt = f.codec.descriptor();
            elt.index = f.index as i64;
            elt.name = f.json_name.to_owned();
            desc.elements.push(elt);
        }

        DESCRIBING.with(|d| d.borrow_mut().remove(&id));
        desc
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Config;
    use crate::test_helpers::parse;

    #[derive(Debug, Default, PartialEq)]
    struct Pair {
        a: i32,
        b: String,
        skipped: u8,
    }

    plenc_record! {
        Pair {
            a: i32 = "1" json "alpha,omitempty",
            b: String = "2" json ",omitempty",
            skipped: u8 = "-",
        }
    }

    #[test]
    fn annotations() {
        assert_eq!(Ok(Some((3, ""))), parse_annotation("R", "f", "3"));
        assert_eq!(Ok(Some((3, "flat"))),
                   parse_annotation("R", "f", "3,flat"));
        assert_eq!(Ok(None), parse_annotation("R", "f", "-"));
        assert_eq!(Err(Error::MissingFieldAnnotation("R", "f")),
                   parse_annotation("R", "f", ""));
        assert_eq!(Err(Error::BadAnnotation("R", "f", "x")),
                   parse_annotation("R", "f", "x"));
        assert_eq!(Err(Error::BadAnnotation("R", "f", "0")),
                   parse_annotation("R", "f", "0"));
        assert_eq!(Err(Error::BadAnnotation("R", "f", "1,fast")),
                   parse_annotation("R", "f", "1,fast"));
    }

    #[test]
    fn skipped_members_are_not_written() {
        let registry = Registry::new(Config::default());
        let codec = registry.codec_for::<Pair>("").unwrap();
        let value = Pair { a: -1, b: "x".to_owned(), skipped: 7 };

        let mut out = Vec::new();
        codec.append(&mut out, &value, None);
        assert_eq!(parse("08 01 12 01 'x'"), out);
        assert_eq!(out.len(), codec.size(&value, None));
    }

    #[test]
    fn absent_fields_are_untouched() {
        let registry = Registry::new(Config::default());
        let codec = registry.codec_for::<Pair>("").unwrap();
        let mut value = Pair { a: 5, b: "keep".to_owned(), skipped: 7 };
        codec.read(&parse("08 04"), &mut value, WireType::Length).unwrap();
        assert_eq!(Pair { a: 2, b: "keep".to_owned(), skipped: 7 }, value);
    }

    #[test]
    fn descriptor_uses_json_names() {
        let registry = Registry::new(Config::default());
        let desc = registry.codec_for::<Pair>("").unwrap().descriptor();
        assert_eq!(FieldType::Struct, desc.ty);
        assert_eq!("Pair", desc.type_name);
        assert_eq!(2, desc.elements.len());
        assert_eq!("alpha", desc.elements[0].name);
        assert_eq!(1, desc.elements[0].index);
        assert_eq!("b", desc.elements[1].name);
        assert_eq!(2, desc.elements[1].index);
    }

    #[derive(Debug, Default)]
    struct Dup {
        x: i32,
        y: i32,
    }

    plenc_record! {
        Dup {
            x: i32 = "1",
            y: i32 = "1",
        }
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        let registry = Registry::new(Config::default());
        match registry.codec_for::<Dup>("") {
            Err(Error::DuplicateFieldIndex("Dup", 1)) => (),
            Err(e) => panic!("failed for wrong reason: {}", e),
            Ok(_) => panic!("unexpectedly succeeded"),
        }
        // The failed build must not leave anything behind
        assert!(registry.codec_for::<Dup>("").is_err());
    }

    #[test]
    fn nested_errors_carry_the_path() {
        let registry = Registry::new(Config::default());
        let codec = registry.codec_for::<Pair>("").unwrap();
        let mut value = Pair::default();
        let err = codec.read(&parse("12 05 'ab'"), &mut value,
                             WireType::Length).unwrap_err();
        assert_eq!(Some("Pair.2"), err.path());
        assert_eq!(&Error::LengthExceedsBuffer(5, 2), err.root());
    }

    #[derive(Debug, Default, PartialEq)]
    struct Far {
        near: i32,
        far: i32,
    }

    plenc_record! {
        Far {
            near: i32 = "1",
            far: i32 = "536870911",
        }
    }

    #[test]
    fn high_field_indices_are_found() {
        let registry = Registry::new(Config::default());
        let codec = registry.codec_for::<Far>("").unwrap();
        let value = Far { near: 1, far: 3 };

        let mut out = Vec::new();
        codec.append(&mut out, &value, None);
        assert_eq!(parse("08 02 F8 FF FF FF 0F 06"), out);

        let mut back = Far::default();
        codec.read(&out, &mut back, WireType::Length).unwrap();
        assert_eq!(value, back);
    }

    #[derive(Debug, Default)]
    struct Chain {
        next: Option<Box<Chain>>,
    }

    plenc_record! {
        Chain {
            next: Option<Box<Chain>> = "1",
        }
    }

    /// Encodes a `Chain` holding `links` further chains.
    fn chain(links: usize) -> Vec<u8> {
        // Payload lengths, innermost first
        let mut lens = vec![0usize];
        for i in 0..links {
            let len = lens[i];
            lens.push(1 + wire::size_varuint(len as u64) + len);
        }

        let mut data = Vec::with_capacity(lens[links]);
        for &len in lens[..links].iter().rev() {
            data.push(0x0A);
            wire::append_varuint(&mut data, len as u64);
        }
        data
    }

    #[test]
    fn nesting_is_limited() {
        let registry = Registry::new(Config {
            recursion_limit: 8, .. Config::default()
        });
        let codec = registry.codec_for::<Chain>("").unwrap();

        let mut value = Chain::default();
        codec.read(&chain(7), &mut value, WireType::Length).unwrap();

        let mut value = Chain::default();
        let err = codec.read(&chain(8), &mut value, WireType::Length)
            .unwrap_err();
        assert_eq!(&Error::RecursionLimitExceeded("Chain".to_owned()),
                   err.root());

        // Levels are left again on failure
        let mut value = Chain::default();
        codec.read(&chain(7), &mut value, WireType::Length).unwrap();
    }

    #[test]
    fn very_deep_input_fails_cleanly() {
        let registry = Registry::new(Config::default());
        let codec = registry.codec_for::<Chain>("").unwrap();
        let mut value = Chain::default();
        assert!(codec.read(&chain(100_000), &mut value, WireType::Length)
                .is_err());
    }
}
