use std::collections::BTreeMap;

use rstest::rstest;
use serde_json::json;

use super::*;
use crate::error::ClientError;

fn ts(iso: &str, zone: &str) -> ZonedDateTime { ZonedDateTime::parse(iso, zone).expect("valid timestamp") }

fn r(id: &str) -> Ref { Ref::new(id).expect("valid ref") }

/// Minimal commit record: a `thing` marker plus whatever tags are added.
#[derive(Clone, Default)]
struct Thing {
    id: Option<Ref>,
    tags: BTreeMap<String, Value>,
}

impl Thing {
    fn named(dis: &str) -> Self { Self::default().tag("dis", dis) }

    fn tag(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.tags.insert(name.to_owned(), value.into());
        self
    }

    fn identified(mut self, id: &str) -> Self {
        self.id = Some(r(id));
        self
    }
}

impl CommitRecord for Thing {
    fn record_id(&self) -> Option<&Ref> { self.id.as_ref() }

    fn required_columns(&self) -> &'static [&'static str] { &["dis", "thing"] }

    fn wire_tags(&self) -> BTreeMap<String, Value> {
        let mut tags = self.tags.clone();
        tags.insert("thing".to_owned(), Value::Marker);
        if let Some(id) = &self.id {
            tags.insert("id".to_owned(), Value::Ref(id.clone()));
        }
        tags
    }

    fn label(&self) -> String { format!("thing {:?}", self.tags.get("dis").and_then(Value::as_str).unwrap_or_default()) }
}

struct Reading {
    point: Ref,
    at: ZonedDateTime,
    value: Value,
}

impl HisWriteRecord for Reading {
    fn point(&self) -> &Ref { &self.point }

    fn sampled_at(&self) -> &ZonedDateTime { &self.at }

    fn reading(&self) -> Value { self.value.clone() }
}

#[rstest]
fn header_is_sorted_union_of_all_tags() {
    let a = Thing::named("A").tag("geoAddr", "1 Main St");
    let b = Thing::named("B").tag("hq", Value::Marker);
    let grid = encode_commit_add(&[a, b]).expect("grid");
    assert_eq!(grid.columns(), ["dis", "geoAddr", "hq", "thing"]);
    assert_eq!(
        grid.to_zinc(),
        "ver:\"3.0\" commit:\"add\"\n\
         dis, geoAddr, hq, thing\n\
         \"A\", \"1 Main St\", , M\n\
         \"B\", , M, M\n"
    );
}

#[rstest]
fn required_columns_appear_even_when_absent() {
    let grid = encode_commit_add(&[Thing::default()]).expect("grid");
    assert_eq!(grid.columns(), ["dis", "thing"]);
    assert_eq!(grid.to_zinc().lines().nth(2), Some(", M"));
}

#[rstest]
fn header_ignores_tag_insertion_order() {
    let forward = Thing::named("A").tag("area", 120.0).tag("hq", Value::Marker);
    let backward = Thing::named("A").tag("hq", Value::Marker).tag("area", 120.0);
    let one = encode_commit_add(&[forward]).expect("grid").to_zinc();
    let two = encode_commit_add(&[backward]).expect("grid").to_zinc();
    assert_eq!(one, two);
}

#[rstest]
fn add_drops_id_and_update_keeps_it() {
    let thing = Thing::named("B").identified("t1");
    let add = encode_commit_add(std::slice::from_ref(&thing)).expect("add");
    assert!(!add.columns().iter().any(|c| c == "id"));

    let update = encode_commit_update(&[thing]).expect("update");
    assert_eq!(
        update.to_zinc(),
        "ver:\"3.0\" commit:\"update\"\ndis, id, thing\n\"B\", @t1, M\n"
    );
}

#[rstest]
fn update_without_id_fails_before_building() {
    let with_id = Thing::named("A").identified("t1");
    let without = Thing::named("B");
    let err = encode_commit_update(&[with_id, without]).expect_err("missing id");
    assert!(matches!(
        err,
        ClientError::Validation(ref m) if m == "thing \"B\" must have an id for update operations"
    ));
}

#[rstest]
#[case("bad name")]
#[case("Upper")]
#[case("x,y")]
#[case("")]
fn rejects_illegal_tag_names(#[case] name: &str) {
    let thing = Thing::named("A").tag(name, 1.0);
    assert!(matches!(
        encode_commit_add(&[thing]),
        Err(ClientError::Validation(_))
    ));
}

#[rstest]
fn remove_grid_includes_mod_when_known() {
    let modified = ts("2024-01-15T10:30:00Z", "UTC");
    let grid = encode_commit_remove(&[(r("p1"), Some(modified))]);
    assert_eq!(
        grid.to_zinc(),
        "ver:\"3.0\" commit:\"remove\"\nid, mod\n@p1, 2024-01-15T10:30:00+00:00 UTC\n"
    );
    let bare = encode_commit_remove(&[(r("p1"), None), (r("p2"), None)]);
    assert_eq!(bare.to_zinc(), "ver:\"3.0\" commit:\"remove\"\nid\n@p1\n@p2\n");
}

#[rstest]
fn filter_payload_cannot_break_grid() {
    let grid = encode_read_by_filter("dis==\"x\"\n\"injected\", row");
    let text = grid.to_zinc();
    assert_eq!(text.lines().count(), 3);
    assert_eq!(
        text,
        "ver:\"3.0\"\nfilter\n\"dis==\\\"x\\\"\\n\\\"injected\\\", row\"\n"
    );
}

#[rstest]
#[case("plain", "plain")]
#[case("a\\b", "a\\\\b")]
#[case("say \"hi\"", "say \\\"hi\\\"")]
#[case("l1\nl2\r\tend", "l1\\nl2\\r\\tend")]
#[case("nul\0byte", "nulbyte")]
#[case("bell\u{7}esc\u{1b}", "bellesc")]
#[case("\\n literal", "\\\\n literal")]
fn escapes_control_and_quote_characters(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(escape(input), expected);
}

#[rstest]
#[case(Value::Null, "")]
#[case(Value::Marker, "M")]
#[case(Value::Bool(true), "T")]
#[case(Value::Bool(false), "F")]
#[case(Value::Number(72.5), "72.5")]
#[case(Value::Number(3.0), "3")]
#[case(Value::Number(f64::NAN), "NaN")]
#[case(Value::Number(f64::NEG_INFINITY), "-INF")]
#[case(Value::Str("x\"y".to_owned()), "\"x\\\"y\"")]
#[case(Value::Ref(Ref::new("@a.b-c").expect("ref")), "@a.b-c")]
fn encodes_scalars(#[case] value: Value, #[case] expected: &str) {
    assert_eq!(value.encode(), expected);
}

#[rstest]
#[case("", Value::Null)]
#[case("m:", Value::Marker)]
#[case("@site-1", Value::Ref(Ref::new("site-1").expect("ref")))]
#[case("@not a ref", Value::Str("@not a ref".to_owned()))]
#[case("site-1", Value::Str("site-1".to_owned()))]
fn infers_legacy_sentinels(#[case] text: &str, #[case] expected: Value) {
    assert_eq!(Value::infer(text), expected);
}

#[rstest]
#[case("")]
#[case("@")]
#[case("a b")]
#[case("a,b")]
#[case("a\"b")]
fn rejects_invalid_refs(#[case] id: &str) {
    assert!(matches!(Ref::new(id), Err(ClientError::Validation(_))));
}

#[rstest]
fn naive_timestamps_are_rejected() {
    assert!(matches!(
        ZonedDateTime::parse("2024-01-15T10:30:00", "UTC"),
        Err(ClientError::Validation(_))
    ));
    assert!(ZonedDateTime::parse("2024-01-15T10:30:00Z", "New York").is_err());
}

#[rstest]
#[case(Value::Number(72.5), "72.5")]
#[case(Value::Bool(false), "false")]
#[case(Value::Str("on \"high\"".to_owned()), "\"on \\\"high\\\"\"")]
#[case(Value::Null, "null")]
fn his_write_expression_embeds_zone_and_value(#[case] value: Value, #[case] literal: &str) {
    let reading = Reading {
        point: r("p1"),
        at: ts("2024-01-15T10:30:00.250-05:00", "New_York"),
        value,
    };
    assert_eq!(
        his_write_expr(&reading),
        format!(
            "hisWrite({{ts: parseDateTime(\"2024-01-15T10:30:00-05:00\", \"YYYY-MM-DDThh:mm:ssz\", \"New_York\"), val: {literal}}}, @p1)"
        )
    );
}

#[rstest]
fn his_write_grid_has_one_expr_row_per_reading() {
    let at = ts("2024-01-15T10:30:00Z", "UTC");
    let readings = [
        Reading { point: r("p1"), at: at.clone(), value: Value::Bool(true) },
        Reading { point: r("p2"), at, value: Value::Number(1.5) },
    ];
    let grid = encode_his_write_rpc(&readings);
    assert_eq!(grid.columns(), ["expr"]);
    assert_eq!(grid.len(), 2);
    let text = grid.to_zinc();
    let mut rows = text.lines().skip(2);
    assert!(rows.next().is_some_and(|row| row.contains("val: true}, @p1)")));
    assert!(rows.next().is_some_and(|row| row.contains("val: 1.5}, @p2)")));
}

#[rstest]
#[case(json!({"val": "p1"}))]
#[case(json!({"_kind": "ref", "val": "p1"}))]
#[case(json!({"_kind": "ref", "val": "@p1", "dis": "Point 1"}))]
#[case(json!("@p1"))]
fn decodes_ref_spellings(#[case] cell: serde_json::Value) {
    assert_eq!(decode_value(&cell), Value::Ref(r("p1")));
}

#[rstest]
#[case(json!("m:"))]
#[case(json!({"_kind": "marker"}))]
fn decodes_marker_spellings(#[case] cell: serde_json::Value) {
    assert_eq!(decode_value(&cell), Value::Marker);
}

#[rstest]
#[case(json!({"_kind": "dateTime", "val": "2024-01-15T10:30:00-05:00 New_York", "tz": "New_York"}), "New_York")]
#[case(json!({"val": "2024-01-15T10:30:00-05:00 New_York"}), "New_York")]
#[case(json!({"val": "2024-01-15T10:30:00-05:00"}), "UTC")]
fn decodes_datetime_dicts(#[case] cell: serde_json::Value, #[case] zone: &str) {
    let Value::DateTime(dt) = decode_value(&cell) else {
        panic!("expected datetime");
    };
    assert_eq!(dt.zone(), zone);
    assert_eq!(dt.to_iso(), "2024-01-15T10:30:00-05:00");
}

#[rstest]
fn decodes_rows_and_errors() {
    let response = json!({
        "meta": {"ver": "3.0"},
        "rows": [
            {"id": {"_kind": "ref", "val": "s1"}, "site": "m:", "dis": "HQ", "area": {"_kind": "number", "val": 120}},
            "not a row"
        ]
    });
    let rows = decode_rows(&response);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("id"), Some(&Value::Ref(r("s1"))));
    assert_eq!(row.get("site"), Some(&Value::Marker));
    assert_eq!(row.get("dis"), Some(&Value::Str("HQ".to_owned())));
    assert_eq!(row.get("area"), Some(&Value::Number(120.0)));
    assert_eq!(response_error(&response), None);

    let failed = json!({"meta": {"err": "m:", "dis": "bad ref"}, "rows": []});
    assert_eq!(response_error(&failed).as_deref(), Some("bad ref"));
    let anonymous = json!({"meta": {"err": true}});
    assert_eq!(response_error(&anonymous).as_deref(), Some("Unknown error"));
}

#[rstest]
fn renders_rows_as_json() {
    let mut dict = Dict::new();
    dict.insert("id".to_owned(), Value::Ref(r("s1")));
    dict.insert("site".to_owned(), Value::Marker);
    dict.insert("mod".to_owned(), Value::DateTime(ts("2024-01-15T10:30:00Z", "UTC")));
    dict.insert("bad".to_owned(), Value::Number(f64::NAN));
    assert_eq!(
        dict_to_json(&dict),
        json!({
            "id": "@s1",
            "site": "m:",
            "mod": {"_kind": "dateTime", "val": "2024-01-15T10:30:00+00:00", "tz": "UTC"},
            "bad": "NaN"
        })
    );
}
