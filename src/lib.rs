//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A tag-length-value binary encoding which is compatible with the protocol
//! buffers wire format.
//!
//! Records are ordinary structs whose fields are given explicit field
//! indices with `plenc_record!`. Encoding is driven by codecs, which a
//! `Registry` builds once per type and then shares between threads.
//!
//! Beyond the protobuf wire types, a `Slice` wire type (reusing the
//! deprecated start-group slot) carries a count followed by length-prefixed
//! elements, which lets repeated strings, records and maps be written as a
//! single field.
//!
//! Every codec can describe its encoding as a `Descriptor`, which is
//! itself encodable and can be used to read the data without the original
//! types, for example into JSON with `JsonOutput`.

#![warn(missing_docs)]
#![recursion_limit = "1024"]

#[macro_use] extern crate log;
#[macro_use] extern crate quick_error;

#[macro_use] mod sugar;
pub mod error;
pub mod wire;
pub mod codec;
pub mod registry;
pub mod descriptor;
pub mod output;

#[cfg(test)] mod test_helpers;

use std::sync::Arc;

pub use crate::codec::{Codec, Plenc};
pub use crate::codec::json::{JsonArray, JsonObject, JsonValue};
pub use crate::codec::record::{build_record, Field, Record};
pub use crate::descriptor::{Descriptor, FieldType, LogicalType, Outputter};
pub use crate::error::{Error, Result};
pub use crate::output::JsonOutput;
pub use crate::registry::{Config, Registry};

/// Encodes `value` with the global registry, appending it to `buf`.
///
/// The value is written bare: there is no tag or outer length, so the
/// reader must know what type to expect.
pub fn marshal<T : Plenc>(buf: Vec<u8>, value: &T) -> Result<Vec<u8>> {
    Registry::global().marshal(buf, value)
}

/// Decodes `data` into `value` with the global registry.
///
/// `value` is not reset first, so fields absent from `data` keep their
/// current values.
pub fn unmarshal<T : Plenc>(data: &[u8], value: &mut T) -> Result<()> {
    Registry::global().unmarshal(data, value)
}

/// Returns the global registry's codec for `T`.
pub fn codec_for_type<T : Plenc>() -> Result<Arc<dyn Codec<T>>> {
    Registry::global().codec_for::<T>("")
}

/// Installs a custom codec for `T` in the global registry.
pub fn register_codec<T : 'static>(codec: Arc<dyn Codec<T>>) {
    Registry::global().register_codec(codec)
}

/// Renders encoded data as JSON, under the direction of `desc`.
pub fn to_json(desc: &Descriptor, data: &[u8]) -> Result<String> {
    let mut out = JsonOutput::new();
    desc.read(&mut out, data)?;
    Ok(out.done().to_owned())
}
