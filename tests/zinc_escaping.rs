//! Caller-controlled text must never change the shape of a Zinc grid.

#![expect(clippy::expect_used, reason = "test assertions")]
#![expect(clippy::indexing_slicing, reason = "test assertions")]

use haystack_client::{
    entities::Entity,
    zinc::{encode_commit_add, encode_read_by_filter, escape, quote},
};
use proptest::prelude::*;

/// Reverse [`escape`], failing on any sequence it would never produce.
fn unescape(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        out.push(match chars.next()? {
            '\\' => '\\',
            '"' => '"',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            _ => return None,
        });
    }
    Some(out)
}

fn without_dropped_controls(text: &str) -> String {
    text.chars()
        .filter(|c| matches!(c, '\n' | '\r' | '\t') || u32::from(*c) >= 0x20)
        .collect()
}

/// Whether `literal` is exactly one quoted token: opening quote, closing
/// quote, and no unescaped quote in between.
fn is_single_token(literal: &str) -> bool {
    let Some(inner) = literal.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return false;
    };
    let mut escaped = false;
    for ch in inner.chars() {
        match (escaped, ch) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, '"') => return false,
            _ => {}
        }
    }
    !escaped
}

fn hostile_text() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        prop::collection::vec(
            prop_oneof![
                Just('"'),
                Just('\\'),
                Just('\n'),
                Just('\r'),
                Just('\t'),
                Just(','),
                Just('\0'),
                Just('\u{1b}'),
                Just('@'),
                Just('x'),
            ],
            0..40,
        )
        .prop_map(|chars| chars.into_iter().collect()),
    ]
}

proptest! {
    #[test]
    fn escape_round_trips_except_dropped_controls(text in hostile_text()) {
        let escaped = escape(&text);
        prop_assert!(escaped.chars().all(|c| u32::from(c) >= 0x20));
        prop_assert_eq!(unescape(&escaped), Some(without_dropped_controls(&text)));
    }

    #[test]
    fn quoted_text_is_one_token(text in hostile_text()) {
        prop_assert!(is_single_token(&quote(&text)));
    }

    #[test]
    fn filter_grid_keeps_its_shape(filter in hostile_text()) {
        let zinc = encode_read_by_filter(&filter).to_zinc();
        prop_assert_eq!(zinc.lines().count(), 3);
        let lines: Vec<&str> = zinc.lines().collect();
        prop_assert_eq!(lines[1], "filter");
        prop_assert!(is_single_token(lines[2]));
    }

    #[test]
    fn commit_grid_keeps_its_shape(dis in hostile_text(), ref_name in hostile_text()) {
        let zinc = encode_commit_add(&[Entity::site(&dis, &ref_name, "UTC")])
            .expect("fixed tag names")
            .to_zinc();
        let lines: Vec<&str> = zinc.lines().collect();
        prop_assert_eq!(lines.len(), 3);
        prop_assert_eq!(lines[1], "dis, refName, site, tz");
    }
}
