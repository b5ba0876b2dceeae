//-
// Copyright 2017 Jason Lingle
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Parses hex text into bytes, for writing expected encodings.
///
/// Whitespace is skipped. Text between single quotes is copied as UTF-8.
pub fn parse(text: &str) -> Vec<u8> {
    let mut data = Vec::new();
    let mut chars = text.chars();

    while let Some(first) = chars.next() {
        if first.is_whitespace() {
            continue;
        }

        if '\'' == first {
            let mut buf = [0u8; 4];
            for c in chars.by_ref().take_while(|&c| '\'' != c) {
                data.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            continue;
        }

        let second = chars.next()
            .unwrap_or_else(|| panic!("odd hexit count in {:?}", text));
        match (first.to_digit(16), second.to_digit(16)) {
            (Some(hi), Some(lo)) => data.push((hi << 4 | lo) as u8),
            _ => panic!("invalid hex byte {}{}", first, second),
        }
    }

    data
}

#[test]
fn parse_mixes_hex_and_text() {
    assert_eq!(vec![0x0A, b'a', b' ', 0xFF], parse("0A 'a ' ff"));
    assert_eq!(vec![0xC3, 0xA9], parse("'\u{e9}'"));
}
