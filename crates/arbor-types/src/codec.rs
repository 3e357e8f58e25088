//! Field codec shared by every serialized object.
//!
//! Objects serialize to a single line. Fields are split by one of five
//! separator characters, one per nesting level, and every free-form value is
//! percent-escaped so it can never contain a separator.

use crate::error::TypeError;

/// Top-level field separator.
pub const LEVEL1: char = '/';
/// List separator inside a top-level field.
pub const LEVEL2: char = ',';
/// Separator one level below [`LEVEL2`].
pub const LEVEL3: char = ';';
/// Separator one level below [`LEVEL3`].
pub const LEVEL4: char = ':';
/// Separates a key from its value in `role=value` pairs.
pub const MAPPING: char = '=';

/// Encoding of an absent value.
pub const NULL_ENCODING: &str = "%00";

const RESERVED: [char; 6] = ['%', LEVEL1, LEVEL2, LEVEL3, LEVEL4, MAPPING];

/// Escape an optional value for use as a field.
///
/// `None` becomes `%00`. Because `%` itself is always escaped, a field equal
/// to `%00` can only mean an absent value.
pub fn escape(value: Option<&str>) -> String {
    let Some(value) = value else {
        return NULL_ENCODING.to_owned();
    };
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if RESERVED.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of [`escape`].
pub fn unescape(field: &str) -> Result<Option<String>, TypeError> {
    if field == NULL_ENCODING {
        return Ok(None);
    }
    if !field.contains('%') {
        return Ok(Some(field.to_owned()));
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let digits = field
                .get(i + 1..i + 3)
                .ok_or_else(|| TypeError::InvalidEscape(field.to_owned()))?;
            let byte = u8::from_str_radix(digits, 16)
                .map_err(|_| TypeError::InvalidEscape(field.to_owned()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map(Some)
        .map_err(|_| TypeError::InvalidEscape(field.to_owned()))
}

/// Unescape a field that must be present.
pub fn unescape_required(field: &str) -> Result<String, TypeError> {
    unescape(field)?.ok_or_else(|| TypeError::InvalidEscape(field.to_owned()))
}

/// Split a list field. An empty field is an empty list.
///
/// A list whose last item is empty carries one extra trailing separator, so
/// `[""]` (written `","`) stays distinct from `[]` (written `""`).
pub fn split_list(field: &str, separator: char) -> Vec<&str> {
    if field.is_empty() {
        return Vec::new();
    }
    let mut items: Vec<&str> = field.split(separator).collect();
    if field.ends_with(separator) {
        items.pop();
    }
    items
}

/// Join fields with `separator`; inverse of [`split_list`].
pub fn join_list<I, S>(items: I, separator: char) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    let mut last_empty = false;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(separator);
        }
        let item = item.as_ref();
        out.push_str(item);
        last_empty = item.is_empty();
    }
    if last_empty {
        out.push(separator);
    }
    out
}

/// Join a fixed number of fields; inverse of [`split_exact`]. Unlike
/// [`join_list`], trailing empty fields get no extra separator.
pub fn join_fields<I, S>(fields: I, separator: char) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(separator);
        }
        out.push_str(field.as_ref());
    }
    out
}

/// Split into exactly `expected` fields.
pub fn split_exact(input: &str, separator: char, expected: usize) -> Result<Vec<&str>, TypeError> {
    let parts: Vec<&str> = input.split(separator).collect();
    if parts.len() != expected {
        return Err(TypeError::FieldCount {
            expected,
            actual: parts.len(),
        });
    }
    Ok(parts)
}

/// Lowercase hex without prefix or padding.
pub fn format_hex(value: u64) -> String {
    format!("{value:x}")
}

/// Parse [`format_hex`] output.
pub fn parse_hex(field: &str) -> Result<u64, TypeError> {
    u64::from_str_radix(field, 16).map_err(|_| TypeError::InvalidNodeId(field.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn absent_value_roundtrip() {
        assert_eq!(escape(None), "%00");
        assert_eq!(unescape("%00").unwrap(), None);
    }

    #[test]
    fn separators_are_escaped() {
        let escaped = escape(Some("a/b,c;d:e=f%g"));
        for sep in [LEVEL1, LEVEL2, LEVEL3, LEVEL4, MAPPING] {
            assert!(!escaped.contains(sep));
        }
        assert_eq!(unescape(&escaped).unwrap().as_deref(), Some("a/b,c;d:e=f%g"));
    }

    #[test]
    fn literal_percent_zero_zero_is_not_null() {
        let escaped = escape(Some("%00"));
        assert_eq!(escaped, "%2500");
        assert_eq!(unescape(&escaped).unwrap().as_deref(), Some("%00"));
    }

    #[test]
    fn empty_string_is_not_null() {
        assert_eq!(escape(Some("")), "");
        assert_eq!(unescape("").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn truncated_escape_is_rejected() {
        assert!(unescape("abc%2").is_err());
        assert!(unescape("%zz").is_err());
    }

    #[test]
    fn split_list_of_empty_field() {
        assert!(split_list("", LEVEL2).is_empty());
        assert_eq!(split_list("a,b", LEVEL2), vec!["a", "b"]);
    }

    #[test]
    fn lists_with_empty_items() {
        assert_eq!(join_list([""], LEVEL2), ",");
        assert_eq!(split_list(",", LEVEL2), vec![""]);
        assert_eq!(join_list(["a", ""], LEVEL2), "a,,");
        assert_eq!(split_list("a,,", LEVEL2), vec!["a", ""]);
        assert_eq!(join_list(["", "a"], LEVEL2), ",a");
        assert_eq!(split_list(",a", LEVEL2), vec!["", "a"]);
        assert_eq!(join_list(Vec::<String>::new(), LEVEL2), "");
    }

    #[test]
    fn fixed_fields_keep_trailing_empties() {
        let joined = join_fields(["a", "", ""], LEVEL1);
        assert_eq!(joined, "a//");
        assert_eq!(split_exact(&joined, LEVEL1, 3).unwrap(), vec!["a", "", ""]);
    }

    #[test]
    fn split_exact_counts_fields() {
        assert_eq!(split_exact("a/b/c", LEVEL1, 3).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            split_exact("a/b", LEVEL1, 3).unwrap_err(),
            TypeError::FieldCount { expected: 3, actual: 2 }
        );
    }

    #[test]
    fn hex_roundtrip() {
        assert_eq!(format_hex(255), "ff");
        assert_eq!(parse_hex("ff").unwrap(), 255);
        assert_eq!(parse_hex(&format_hex(u64::MAX)).unwrap(), u64::MAX);
    }

    proptest! {
        #[test]
        fn escape_roundtrip(s in ".*") {
            let escaped = escape(Some(&s));
            prop_assert!(!escaped.contains(LEVEL1));
            prop_assert!(!escaped.contains(LEVEL2));
            prop_assert_eq!(unescape(&escaped).unwrap(), Some(s));
        }

        #[test]
        fn list_roundtrip(items in proptest::collection::vec("[a-z/,]{0,3}", 0..6)) {
            let joined = join_list(items.iter().map(|i| escape(Some(i))), LEVEL2);
            let back: Vec<String> = split_list(&joined, LEVEL2)
                .into_iter()
                .map(|f| unescape_required(f).unwrap())
                .collect();
            prop_assert_eq!(back, items);
        }
    }
}
