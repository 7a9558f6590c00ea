use std::collections::HashMap;

use formwright::{
    FieldDef, FieldType, FormData, RequestContext, ResolvedSchema, RuleSet, RuleSetBuilder,
    RuleSetError, SchemaDocument, enrich_schema, has_permission, path, resolve_schema,
};

fn schema(id: &str) -> ResolvedSchema {
    let doc = SchemaDocument::new(id)
        .kind("person")
        .field(FieldDef::new("name", FieldType::Text))
        .field(FieldDef::new("email", FieldType::Email))
        .field(FieldDef::new("ssn", FieldType::Text))
        .field(FieldDef::new("company", FieldType::Text))
        .field(FieldDef::new("notes", FieldType::Textarea));
    let documents = HashMap::from([(id.to_owned(), doc)]);
    resolve_schema(id, &documents, 8).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::new("user-1", "acme").attribute("account.plan", "free")
}

#[test]
fn dsl_parse_and_enrich() {
    let dsl = r#"
rule hide_ssn on ssn:
    NOT has_permission("pii.view")
    => hide "restricted"

rule lock_email (priority 5) on email:
    account.plan == "free"
    => readonly
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    assert_eq!(rules.len(), 2);

    let enriched = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    let ssn = &enriched.field("ssn").unwrap().runtime;
    assert!(!ssn.visible);
    assert_eq!(ssn.reason.as_deref(), Some("hide_ssn"));
    assert_eq!(ssn.message.as_deref(), Some("restricted"));

    let email = &enriched.field("email").unwrap().runtime;
    assert!(email.visible);
    assert!(!email.editable);
    assert_eq!(email.reason.as_deref(), Some("lock_email"));
}

#[test]
fn dsl_priority_orders_application() {
    let dsl = r#"
rule reveal (priority 10) on ssn:
    has_role("auditor")
    => show

rule conceal (priority 0) on ssn:
    true
    => hide
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    assert_eq!(rules.application_order(), vec!["conceal", "reveal"]);

    let auditor = ctx().role("auditor");
    let enriched = enrich_schema(&schema("signup"), &rules, &auditor, &FormData::new(), &[]);
    assert!(enriched.field("ssn").unwrap().runtime.visible);

    let enriched = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    assert!(!enriched.field("ssn").unwrap().runtime.visible);
}

#[test]
fn dsl_equal_priority_later_wins() {
    let dsl = r#"
rule first on company: true => require
rule second on company: true => optional
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let enriched = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    let company = &enriched.field("company").unwrap().runtime;
    assert!(!company.required);
    assert_eq!(company.reason.as_deref(), Some("second"));
}

#[test]
fn dsl_or_expression() {
    let dsl = r#"
rule r on notes:
    form.kind == "business" OR account.plan == "pro"
    => require
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let s = schema("signup");
    let required = |ctx: &RequestContext, form: &FormData| {
        enrich_schema(&s, &rules, ctx, form, &[])
            .field("notes")
            .unwrap()
            .runtime
            .required
    };

    assert!(required(&ctx(), &FormData::new().set("kind", "business")));
    assert!(required(
        &ctx().attribute("account.plan", "pro"),
        &FormData::new()
    ));
    assert!(!required(&ctx(), &FormData::new().set("kind", "person")));
}

#[test]
fn dsl_not_and_parentheses() {
    let dsl = r#"
rule r on name:
    NOT (form.kind == "business" AND form.opt_in)
    => readonly
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let s = schema("signup");
    let editable = |form: FormData| {
        enrich_schema(&s, &rules, &ctx(), &form, &[])
            .field("name")
            .unwrap()
            .runtime
            .editable
    };

    assert!(editable(FormData::new().set("kind", "business").set("opt_in", true)));
    assert!(!editable(FormData::new().set("kind", "business").set("opt_in", false)));
    assert!(!editable(FormData::new()));
}

#[test]
fn dsl_in_and_exists() {
    let dsl = r#"
rule r on company:
    account.plan in ["pro", "enterprise"] AND exists(form.vat_id)
    => require
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let s = schema("signup");
    let pro = ctx().attribute("account.plan", "pro");

    let with_vat = FormData::new().set("vat_id", "DE123");
    let enriched = enrich_schema(&s, &rules, &pro, &with_vat, &[]);
    assert!(enriched.field("company").unwrap().runtime.required);

    let enriched = enrich_schema(&s, &rules, &pro, &FormData::new(), &[]);
    assert!(!enriched.field("company").unwrap().runtime.required);

    let enriched = enrich_schema(&s, &rules, &ctx(), &with_vat, &[]);
    assert!(!enriched.field("company").unwrap().runtime.required);
}

#[test]
fn dsl_all_comparison_ops() {
    let dsl = r#"
rule r on *:
    a == 1 AND b != 2 AND c > 3 AND d >= 4 AND e < 5 AND f <= 6
    => readonly
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let form_ctx = ctx()
        .attribute("a", 1_i64)
        .attribute("b", 99_i64)
        .attribute("c", 4_i64)
        .attribute("d", 4_i64)
        .attribute("e", 4_i64)
        .attribute("f", 6_i64);
    let enriched = enrich_schema(&schema("signup"), &rules, &form_ctx, &FormData::new(), &[]);
    assert!(enriched.fields().iter().all(|f| !f.runtime.editable));
}

#[test]
fn dsl_type_target() {
    let dsl = r#"
rule r on type:textarea:
    true
    => hide
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let enriched = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    let hidden: Vec<_> = enriched
        .fields()
        .iter()
        .filter(|f| !f.runtime.visible)
        .map(|f| f.field.name.as_str())
        .collect();
    assert_eq!(hidden, vec!["notes"]);
}

#[test]
fn dsl_schema_scope() {
    let dsl = r#"
rule r schema checkout on name:
    true
    => hide
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let signup = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    assert!(signup.field("name").unwrap().runtime.visible);
    let checkout = enrich_schema(&schema("checkout"), &rules, &ctx(), &FormData::new(), &[]);
    assert!(!checkout.field("name").unwrap().runtime.visible);
}

#[test]
fn dsl_comments_are_ignored() {
    let dsl = r#"
# This is a header comment
rule r on name:
    # Field comparison
    account.plan == "free"
    => hide
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let enriched = enrich_schema(&schema("signup"), &rules, &ctx(), &FormData::new(), &[]);
    assert!(!enriched.field("name").unwrap().runtime.visible);
}

#[test]
fn dsl_negative_priority_and_number() {
    let dsl = r#"
rule r (priority -5) on name:
    balance == -5
    => readonly
"#;

    let rules = RuleSet::from_dsl(dsl).unwrap();
    let s = schema("signup");
    let editable = |balance: i64| {
        enrich_schema(&s, &rules, &ctx().attribute("balance", balance), &FormData::new(), &[])
            .field("name")
            .unwrap()
            .runtime
            .editable
    };
    assert!(!editable(-5));
    assert!(editable(5));
}

#[test]
fn dsl_parse_error() {
    let err = RuleSet::from_dsl("rule r on name:\n    ==").unwrap_err();
    assert!(matches!(err, RuleSetError::Parse(_)));
    assert!(err.to_string().starts_with("parse error"), "{err}");
}

#[test]
fn dsl_missing_arrow_is_parse_error() {
    let err = RuleSet::from_dsl("rule r on name: true hide").unwrap_err();
    assert!(matches!(err, RuleSetError::Parse(_)));
}

#[test]
fn dsl_unknown_action_is_parse_error() {
    let err = RuleSet::from_dsl("rule r on name: true => explode").unwrap_err();
    assert!(matches!(err, RuleSetError::Parse(_)));
}

#[test]
fn dsl_compile_error_propagates() {
    let dsl = r#"
rule r on name: true => hide
rule r on email: true => show
"#;

    let err = RuleSet::from_dsl(dsl).unwrap_err();
    assert!(matches!(err, RuleSetError::Compile(_)));
    assert!(err.to_string().contains("duplicate rule id 'r'"));
}

#[test]
fn dsl_matches_builder_api() {
    let dsl = r#"
rule hide_ssn on ssn:
    NOT has_permission("pii.view")
    => hide

rule lock_email (priority 5) on email:
    account.plan == "free"
    => readonly
"#;

    let dsl_rules = RuleSet::from_dsl(dsl).unwrap();
    let builder_rules = RuleSetBuilder::new()
        .rule("hide_ssn", |r| {
            r.on_fields(&["ssn"]).when(!has_permission("pii.view")).hide()
        })
        .rule("lock_email", |r| {
            r.on_fields(&["email"])
                .priority(5)
                .when(path("account.plan").eq("free"))
                .readonly()
        })
        .compile()
        .unwrap();

    assert_eq!(dsl_rules.fingerprint(), builder_rules.fingerprint());

    let s = schema("signup");
    assert_eq!(
        enrich_schema(&s, &dsl_rules, &ctx(), &FormData::new(), &[]),
        enrich_schema(&s, &builder_rules, &ctx(), &FormData::new(), &[]),
    );
}

#[test]
fn dsl_canonical_text_round_trips() {
    let rules = RuleSet::from_file("demos/signup.rules").unwrap();
    let reparsed = RuleSet::from_dsl(&rules.to_dsl()).unwrap();
    assert_eq!(reparsed.fingerprint(), rules.fingerprint());
    assert_eq!(reparsed.to_dsl(), rules.to_dsl());
}

#[test]
fn dsl_from_file() {
    let rules = RuleSet::from_file("demos/signup.rules").unwrap();
    assert_eq!(
        rules.application_order(),
        vec!["hide_ssn", "show_notes", "lock_email_free", "require_company"]
    );
    assert!(rules.malformed_rules().is_empty());

    let report = rules.explain(&schema("signup"), &ctx(), &FormData::new());
    assert_eq!(report.matched(), ["hide_ssn", "lock_email_free"]);
    assert_eq!(report.evaluation_order().len(), 4);
    assert!(report.skipped().is_empty());
}

#[test]
fn dsl_from_missing_file() {
    let err = RuleSet::from_file("demos/does-not-exist.rules").unwrap_err();
    assert!(matches!(err, RuleSetError::Io(_)));
}
