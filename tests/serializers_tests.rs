use backbone::orm::{FieldDef, FieldKind, ModelMeta, Record};
use backbone::serializers::{AllFieldsSerializer, encode_value, format_datetime, json_dumps};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;

fn event_record() -> Record {
    let mut values = BTreeMap::new();
    values.insert("name".to_string(), json!("Launch"));
    values.insert("starts".to_string(), json!("2024-05-01T10:30:00.250+02:00"));
    values.insert("budget".to_string(), json!("1200.50"));
    Record { id: 7, values }
}

#[test]
fn test_serialize_selected_fields() {
    let model = ModelMeta::builder("events", "Event")
        .field(FieldDef::char("name", 50))
        .field(FieldDef::datetime("starts"))
        .field(FieldDef::decimal("budget"))
        .build()
        .unwrap();

    let objects =
        AllFieldsSerializer.serialize(&model, &[event_record()], &["id", "name", "starts", "nope"]);
    assert_eq!(objects.len(), 1);
    let object = &objects[0];
    assert_eq!(object.model, "events.event");
    assert_eq!(object.pk, 7);
    assert_eq!(
        serde_json::Value::Object(object.fields.clone()),
        json!({
            "id": 7,
            "name": "Launch",
            "starts": "2024-05-01T08:30:00.250Z",
        })
    );
}

#[test]
fn test_encode_value_per_kind() {
    assert_eq!(
        encode_value(FieldKind::DateTime, json!("2024-01-02T03:04:05+00:00")),
        json!("2024-01-02T03:04:05Z")
    );
    // Values that are not RFC 3339 pass through
    assert_eq!(encode_value(FieldKind::DateTime, json!("soon")), json!("soon"));
    assert_eq!(encode_value(FieldKind::Decimal, json!(2.5)), json!("2.5"));
    assert_eq!(encode_value(FieldKind::Integer, json!(3)), json!(3));
    assert_eq!(encode_value(FieldKind::DateTime, json!(null)), json!(null));
}

#[test]
fn test_format_datetime_precision() {
    let whole = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    assert_eq!(format_datetime(&whole), "2024-05-01T12:00:00Z");

    let fractional = whole + chrono::Duration::microseconds(123_456);
    assert_eq!(format_datetime(&fractional), "2024-05-01T12:00:00.123Z");
}

#[test]
fn test_json_dumps_sorts_keys_and_indents() {
    let data = json!({"title": "Hi", "id": 1, "body": {"z": 1, "a": 2}});
    assert_eq!(
        json_dumps(&data).unwrap(),
        "{\n  \"body\": {\n    \"a\": 2,\n    \"z\": 1\n  },\n  \"id\": 1,\n  \"title\": \"Hi\"\n}"
    );
    assert_eq!(json_dumps(&Vec::<i32>::new()).unwrap(), "[]");
}
