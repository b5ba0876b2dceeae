//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The codec registry, which builds each codec once and shares it.
//!
//! Codecs are keyed by the Rust type and the postfix from the field
//! annotation. Lookups of codecs which already exist only take a shared
//! lock. Building a codec happens under a separate build lock, which is
//! reentrant so that a codec under construction can look up the codecs of
//! its members. A record codec publishes itself to its own builder before
//! building its members, which is what makes recursive types work; other
//! threads never see it until it is complete.

use std::any::{self, Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::codec::{Codec, Plenc};
use crate::codec::scalar::{BoolCodec, Float32Codec, Float64Codec, IntCodec,
                           StringCodec, UintCodec};
use crate::error::{Error, Result};

/// The default for `Config::recursion_limit`.
pub const DEFAULT_RECURSION_LIMIT: usize = 128;

/// Options which change the codecs a `Registry` builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// If true, times are written in the `google.protobuf.Timestamp`
    /// layout even without the `proto` postfix.
    ///
    /// Default false.
    pub proto_time: bool,
    /// If true, vectors of delimited values (strings, records, ...) are
    /// written protobuf-style, as one `Length` field per element, instead
    /// of as a single `Slice` field. Reading accepts both either way.
    ///
    /// Default false.
    pub proto_arrays: bool,
    /// The maximum depth to which records and JSON values may be nested
    /// when decoding. Deeper input fails with `RecursionLimitExceeded`
    /// instead of exhausting the stack.
    ///
    /// Default 128.
    pub recursion_limit: usize,
    /// Prevents construction of the struct by explicit initialisation,
    /// so that more options may be added without breaking callers.
    pub _non_public: (),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            proto_time: false,
            proto_arrays: false,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            _non_public: (),
        }
    }
}

type Key = (TypeId, String);
/// Always an `Arc<dyn Codec<T>>` for the `T` in the key.
type Entry = Box<dyn Any + Send + Sync>;

/// A cache of codecs keyed by type and postfix.
pub struct Registry {
    config: Config,
    codecs: RwLock<HashMap<Key, Entry>>,
    /// Held while building codecs. Holds the nesting depth of the build.
    build_lock: ReentrantMutex<Cell<usize>>,
    /// Codecs built by the build in progress, including record codecs
    /// whose members are still being built. Published to `codecs` when the
    /// outermost build succeeds. Only used by the thread holding
    /// `build_lock`.
    pending: Mutex<HashMap<Key, Entry>>,
}

fn key<T : 'static>(postfix: &str) -> Key {
    (TypeId::of::<T>(), postfix.to_owned())
}

fn downcast<T : 'static>(entry: &Entry) -> Option<Arc<dyn Codec<T>>> {
    entry.downcast_ref::<Arc<dyn Codec<T>>>().cloned()
}

impl Registry {
    /// Creates a registry with the given configuration, holding the default
    /// codecs for the scalar types.
    pub fn new(config: Config) -> Self {
        debug!("creating codec registry with {:?}", config);
        let registry = Registry {
            config,
            codecs: RwLock::new(HashMap::new()),
            build_lock: ReentrantMutex::new(Cell::new(0)),
            pending: Mutex::new(HashMap::new()),
        };

        registry.insert::<bool>("", Arc::new(BoolCodec));
        registry.insert::<i8>("", Arc::new(IntCodec::<i8>::new()));
        registry.insert::<i16>("", Arc::new(IntCodec::<i16>::new()));
        registry.insert::<i32>("", Arc::new(IntCodec::<i32>::new()));
        registry.insert::<i64>("", Arc::new(IntCodec::<i64>::new()));
        registry.insert::<isize>("", Arc::new(IntCodec::<isize>::new()));
        registry.insert::<u8>("", Arc::new(UintCodec::<u8>::new()));
        registry.insert::<u16>("", Arc::new(UintCodec::<u16>::new()));
        registry.insert::<u32>("", Arc::new(UintCodec::<u32>::new()));
        registry.insert::<u64>("", Arc::new(UintCodec::<u64>::new()));
        registry.insert::<usize>("", Arc::new(UintCodec::<usize>::new()));
        registry.insert::<f32>("", Arc::new(Float32Codec));
        registry.insert::<f64>("", Arc::new(Float64Codec));
        registry.insert::<String>("", Arc::new(StringCodec));

        registry
    }

    /// Returns the process-wide registry with the default configuration,
    /// creating it on first use.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| Registry::new(Config::default()))
    }

    /// Returns the configuration this registry was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn insert<T : 'static>(&self, postfix: &str, codec: Arc<dyn Codec<T>>)
                           -> Option<Entry> {
        self.codecs.write().insert(key::<T>(postfix), Box::new(codec))
    }

    /// Returns the codec already held for `(T, postfix)`, without building
    /// anything.
    pub fn registered<T : 'static>(&self, postfix: &str)
                                   -> Option<Arc<dyn Codec<T>>> {
        self.codecs.read().get(&key::<T>(postfix)).and_then(downcast::<T>)
    }

    /// Returns the codec for `(T, postfix)`, building it if this is the
    /// first request.
    ///
    /// Build errors are not cached; a later request tries again. Nothing
    /// built as part of a failed build is kept either.
    pub fn codec_for<T : Plenc>(&self, postfix: &str)
                                -> Result<Arc<dyn Codec<T>>> {
        if let Some(codec) = self.registered::<T>(postfix) {
            return Ok(codec);
        }

        let depth = self.build_lock.lock();
        if let Some(codec) = self.registered::<T>(postfix) {
            return Ok(codec);
        }
        let k = key::<T>(postfix);
        if let Some(codec) = self.pending.lock().get(&k)
            .and_then(downcast::<T>)
        {
            return Ok(codec);
        }

        depth.set(depth.get() + 1);
        let built = T::build_codec(self, postfix);
        depth.set(depth.get() - 1);

        let mut pending = self.pending.lock();
        match built {
            Ok(codec) => {
                debug!("built codec for {} with postfix {:?}",
                       any::type_name::<T>(), postfix);
                pending.insert(k, Box::new(codec.clone()));
                if 0 == depth.get() {
                    self.codecs.write().extend(pending.drain());
                }
                Ok(codec)
            },
            Err(err) => {
                // Codecs built alongside this one may refer to incomplete
                // record codecs, so none of them can be kept.
                if 0 == depth.get() {
                    pending.clear();
                }
                Err(err)
            },
        }
    }

    /// Publishes `codec` for `(T, postfix)` to the thread currently building
    /// it, before it is complete. Must only be called from `build_codec`.
    pub(crate) fn install_pending<T : 'static>(
        &self, postfix: &str, codec: Arc<dyn Codec<T>>)
    {
        self.pending.lock().insert(key::<T>(postfix), Box::new(codec));
    }

    /// Installs `codec` as the codec for `T` with no postfix, replacing any
    /// codec already built or registered for it.
    ///
    /// This works for types which do not implement `Plenc`; record members
    /// of such types are declared with `Field::custom`. Records already
    /// built keep the codec they were built with.
    pub fn register_codec<T : 'static>(&self, codec: Arc<dyn Codec<T>>) {
        let _guard = self.build_lock.lock();
        if self.insert::<T>("", codec).is_some() {
            warn!("replacing the codec for {}", any::type_name::<T>());
        }
    }

    /// Encodes `value` as a bare payload, appending it to `buf`.
    pub fn marshal<T : Plenc>(&self, mut buf: Vec<u8>, value: &T)
                              -> Result<Vec<u8>> {
        let codec = self.codec_for::<T>("")?;
        buf.reserve(codec.size(value, None));
        codec.append(&mut buf, value, None);
        Ok(buf)
    }

    /// Decodes `data` into `value`, which is not reset first.
    ///
    /// `data` must hold exactly one bare payload; leftover bytes are an
    /// error.
    pub fn unmarshal<T : Plenc>(&self, data: &[u8], value: &mut T)
                                -> Result<()> {
        let codec = self.codec_for::<T>("")?;
        let n = codec.read(data, value, codec.wire_type())?;
        if n < data.len() {
            return Err(Error::TrailingBytes(data.len() - n));
        }
        Ok(())
    }
}
