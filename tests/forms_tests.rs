use backbone::Error;
use backbone::forms::{FieldOverride, FormOptions, NON_FIELD_ERRORS, ValidationError, form_factory};
use backbone::orm::{Db, FieldDef, ModelMeta};
use serde_json::{Map, Value, json};
use std::sync::Arc;

fn article_model() -> Arc<ModelMeta> {
    ModelMeta::builder("news", "Article")
        .field(FieldDef::char("title", 20))
        .field(FieldDef::text("body").blank())
        .field(FieldDef::boolean("published"))
        .field(FieldDef::integer("rank").null().blank())
        .field(FieldDef::integer("views").blank().default(json!(0)))
        .field(FieldDef::datetime("created").null().not_editable())
        .build()
        .unwrap()
}

fn typed_model() -> Arc<ModelMeta> {
    ModelMeta::builder("shop", "Item")
        .field(FieldDef::float("weight").null().blank())
        .field(FieldDef::decimal("price").null().blank())
        .field(FieldDef::datetime("listed").null().blank())
        .field(FieldDef::date("released").null().blank())
        .field(FieldDef::char("status", 10).blank().choices(["draft", "live"]))
        .build()
        .unwrap()
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("payload must be an object"),
    }
}

fn field_names(model: &Arc<ModelMeta>, options: Option<&FormOptions>, fields: &[&str]) -> Vec<String> {
    let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    form_factory(model, options, &fields)
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

#[test]
fn test_form_factory_field_selection() {
    let model = article_model();

    // Every editable field by default
    assert_eq!(
        field_names(&model, None, &[]),
        vec!["title", "body", "published", "rank", "views"]
    );

    // The view's list wins over the form's whitelist
    let options = FormOptions::new().fields(["body", "rank"]);
    assert_eq!(field_names(&model, Some(&options), &["title"]), vec!["title"]);
    assert_eq!(field_names(&model, Some(&options), &[]), vec!["body", "rank"]);

    let options = FormOptions::new().exclude(["body", "views"]);
    assert_eq!(
        field_names(&model, Some(&options), &[]),
        vec!["title", "published", "rank"]
    );
}

#[test]
fn test_form_factory_rejects_unknown_and_non_editable_fields() {
    let model = article_model();
    let unknown = form_factory(&model, None, &["nope".to_string()]);
    assert!(matches!(unknown, Err(Error::InvalidField(name)) if name == "nope"));
    let locked = form_factory(&model, None, &["created".to_string()]);
    assert!(matches!(locked, Err(Error::InvalidField(name)) if name == "created"));
}

#[test]
fn test_unbound_form_is_invalid() {
    let mut form = form_factory(&article_model(), None, &[]).unwrap();
    assert!(!form.is_bound());
    assert!(!form.is_valid());
    assert!(form.errors().is_empty());
}

#[test]
fn test_required_and_max_length_errors() {
    let model = article_model();
    let mut form = form_factory(&model, None, &[])
        .unwrap()
        .bind(payload(json!({"rank": "abc"})), None);
    assert!(!form.is_valid());
    let errors = form.errors().clone();
    assert_eq!(errors["title"], vec!["This field is required."]);
    assert_eq!(errors["rank"], vec!["Enter a whole number."]);
    // Blank and boolean fields are optional
    assert!(!errors.contains_key("body"));
    assert!(!errors.contains_key("published"));

    let mut form = form_factory(&model, None, &[])
        .unwrap()
        .bind(payload(json!({"title": "x".repeat(21)})), None);
    assert_eq!(
        form.errors()["title"],
        vec!["Ensure this value has at most 20 characters (it has 21)."]
    );
}

#[test]
fn test_field_values_are_coerced() {
    let model = article_model();
    let mut form = form_factory(&model, None, &[]).unwrap().bind(
        payload(json!({
            "title": "  Hello  ",
            "published": "false",
            "rank": "3.00",
        })),
        None,
    );
    assert!(form.is_valid(), "{:?}", form.errors());
    let cleaned = form.cleaned_data();
    assert_eq!(cleaned["title"], json!("Hello"));
    assert_eq!(cleaned["body"], json!(""));
    assert_eq!(cleaned["published"], json!(false));
    assert_eq!(cleaned["rank"], json!(3));
    // Omitted non-null field falls back to its default
    assert_eq!(cleaned["views"], json!(0));

    let mut form = form_factory(&typed_model(), None, &[]).unwrap().bind(
        payload(json!({
            "weight": "2.5",
            "price": "10.50",
            "listed": "2024-05-01T12:30:00+02:00",
            "released": "05/01/2024",
            "status": "live",
        })),
        None,
    );
    assert!(form.is_valid(), "{:?}", form.errors());
    let cleaned = form.cleaned_data();
    assert_eq!(cleaned["weight"], json!(2.5));
    assert_eq!(cleaned["price"], json!("10.50"));
    assert_eq!(cleaned["listed"], json!("2024-05-01T10:30:00Z"));
    assert_eq!(cleaned["released"], json!("2024-05-01"));
    assert_eq!(cleaned["status"], json!("live"));
}

#[test]
fn test_naive_datetimes_are_taken_as_utc() {
    let mut form = form_factory(&typed_model(), None, &["listed".to_string()])
        .unwrap()
        .bind(payload(json!({"listed": "2024-05-01 08:15"})), None);
    assert!(form.is_valid());
    assert_eq!(form.cleaned_data()["listed"], json!("2024-05-01T08:15:00Z"));
}

#[test]
fn test_invalid_typed_values() {
    let mut form = form_factory(&typed_model(), None, &[]).unwrap().bind(
        payload(json!({
            "weight": "heavy",
            "price": "1.2.3",
            "listed": "yesterday",
            "released": "2024-13-01",
            "status": "archived",
        })),
        None,
    );
    assert!(!form.is_valid());
    let errors = form.errors();
    assert_eq!(errors["weight"], vec!["Enter a number."]);
    assert_eq!(errors["price"], vec!["Enter a number."]);
    assert_eq!(errors["listed"], vec!["Enter a valid date/time."]);
    assert_eq!(errors["released"], vec!["Enter a valid date."]);
    assert_eq!(
        errors["status"],
        vec!["Select a valid choice. archived is not one of the available choices."]
    );
}

#[test]
fn test_non_null_field_without_default_rejects_null() {
    let model = ModelMeta::builder("news", "Counter")
        .field(FieldDef::integer("total").blank())
        .build()
        .unwrap();
    let mut form = form_factory(&model, None, &[])
        .unwrap()
        .bind(payload(json!({"total": null})), None);
    assert!(!form.is_valid());
    assert_eq!(form.errors()["total"], vec!["This field cannot be null."]);
}

#[test]
fn test_field_overrides() {
    let options = FormOptions::new()
        .override_field(
            "body",
            FieldOverride {
                required: Some(true),
                ..Default::default()
            },
        )
        .override_field(
            "title",
            FieldOverride {
                max_length: Some(3),
                ..Default::default()
            },
        );
    let mut form = form_factory(&article_model(), Some(&options), &[])
        .unwrap()
        .bind(payload(json!({"title": "abcd"})), None);
    let errors = form.errors();
    assert_eq!(errors["body"], vec!["This field is required."]);
    assert_eq!(
        errors["title"],
        vec!["Ensure this value has at most 3 characters (it has 4)."]
    );
}

#[test]
fn test_clean_hooks_report_field_and_form_errors() {
    let options = FormOptions::new()
        .clean(|data| {
            let shouting = data
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.chars().any(char::is_lowercase));
            if shouting {
                return Err(ValidationError::for_field("title", "No shouting."));
            }
            Ok(())
        })
        .clean(|data| {
            if data.get("published") == Some(&json!(true)) && data.get("body") == Some(&json!("")) {
                return Err(ValidationError::new("Published articles need a body."));
            }
            Ok(())
        });

    let mut form = form_factory(&article_model(), Some(&options), &[])
        .unwrap()
        .bind(payload(json!({"title": "LOUD", "published": true})), None);
    assert!(!form.is_valid());
    let errors = form.errors().clone();
    assert_eq!(errors["title"], vec!["No shouting."]);
    assert_eq!(errors[NON_FIELD_ERRORS], vec!["Published articles need a body."]);
    assert!(!form.cleaned_data().contains_key("title"));
}

#[test]
fn test_clean_hooks_can_rewrite_values() {
    let options = FormOptions::new().clean(|data| {
        if let Some(Value::String(title)) = data.get_mut("title") {
            *title = title.to_uppercase();
        }
        Ok(())
    });
    let mut form = form_factory(&article_model(), Some(&options), &[])
        .unwrap()
        .bind(payload(json!({"title": "quiet"})), None);
    assert!(form.is_valid());
    assert_eq!(form.cleaned_data()["title"], json!("QUIET"));
}

#[tokio::test]
async fn test_save_inserts_then_updates() {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    let model = article_model();
    model.migrate(&db).await.unwrap();

    let mut form = form_factory(&model, None, &[]).unwrap().bind(
        payload(json!({"title": "First", "views": 5, "published": true})),
        None,
    );
    let created = form.save(&db).await.unwrap();
    assert_eq!(created.id, 1);
    assert_eq!(created.get("views"), Some(json!(5)));
    assert_eq!(created.get("published"), Some(json!(true)));

    // Omitted fields with a default keep their stored value
    let mut form = form_factory(&model, None, &[])
        .unwrap()
        .bind(payload(json!({"title": "Renamed"})), Some(created.clone()));
    let updated = form.save(&db).await.unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.get("title"), Some(json!("Renamed")));
    assert_eq!(updated.get("views"), Some(json!(5)));
    // An absent checkbox means false
    assert_eq!(updated.get("published"), Some(json!(false)));
    assert_eq!(form.instance().unwrap().get("title"), Some(json!("Renamed")));
}

#[tokio::test]
async fn test_save_refuses_invalid_form() {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    let model = article_model();
    model.migrate(&db).await.unwrap();

    let mut form = form_factory(&model, None, &[])
        .unwrap()
        .bind(payload(json!({})), None);
    let result = form.save(&db).await;
    assert!(matches!(result, Err(Error::InvalidForm(_))));
}
