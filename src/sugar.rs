//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Implements `Record` and `Plenc` for an existing struct.
///
/// Each field of the struct which is to be encoded is listed with its type
/// and `plenc` annotation, and optionally a `json` annotation naming it in
/// descriptors and JSON output. Fields left out of the list are neither
/// encoded nor decoded; so are fields annotated `"-"`.
///
/// The struct must implement `Default`, which provides the value new
/// records are decoded into.
///
/// ```
/// #[macro_use] extern crate plenc;
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Hat {
///     colour: String,
///     size: f32,
/// }
///
/// plenc_record! {
///     Hat {
///         colour: String = "1" json "color",
///         size: f32 = "2",
///     }
/// }
///
/// # fn main() {
/// let hat = Hat { colour: "red".to_owned(), size: 6.0 };
/// let data = plenc::marshal(Vec::new(), &hat).unwrap();
/// let mut back = Hat::default();
/// plenc::unmarshal(&data, &mut back).unwrap();
/// assert_eq!(hat, back);
/// # }
/// ```
#[macro_export]
macro_rules! plenc_record {
    ($name:ident {
        $($field:ident : $ty:ty = $plenc:literal $(json $json:literal)?),*
        $(,)?
    }) => {
        impl $crate::Record for $name {
            const NAME: &'static str = stringify!($name);

            fn fields() -> ::std::vec::Vec<$crate::Field<Self>> {
                vec![$({
                    let json: ::std::option::Option<&'static str> =
                        None $(.or(Some($json)))?;
                    $crate::Field::<Self>::new::<$ty>(
                        stringify!($field), $plenc, json,
                        |this| &this.$field,
                        |this| &mut this.$field)
                }),*]
            }
        }

        impl $crate::Plenc for $name {
            fn build_codec(registry: &$crate::Registry, postfix: &str)
                           -> $crate::Result<::std::sync::Arc<
                                   dyn $crate::Codec<Self>>> {
                $crate::build_record::<Self>(registry, postfix)
            }
        }
    };
}
