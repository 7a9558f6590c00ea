use std::sync::Arc;

use formwright::{
    EnrichedSchema, FormData, MemoryOverrideStore, MemorySchemaStore, Pipeline, PipelineConfig,
    RequestContext, RuleRegistry, RuleSet, SchemaDocument, TenantOverride,
};

fn print(title: &str, schema: &EnrichedSchema) {
    println!("== {title} ({} / {})", schema.schema_id(), schema.tenant_id());
    for f in schema.fields() {
        let rt = &f.runtime;
        println!(
            "  {:<10} {:<9} visible={:<5} editable={:<5} required={:<5} {}",
            f.field.name,
            f.field.field_type,
            rt.visible,
            rt.editable,
            rt.required,
            f.field.label.as_deref().unwrap_or(""),
        );
    }
    for d in schema.diagnostics() {
        println!("  ! {d}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,formwright=debug".into()),
        )
        .init();

    let config = PipelineConfig::from_file("demos/formwright.toml")?;

    let schemas = MemorySchemaStore::new();
    for name in ["signup", "common", "address"] {
        let text = std::fs::read_to_string(format!("demos/schemas/{name}.json"))?;
        schemas.insert(SchemaDocument::from_json(&text)?);
    }

    let overrides = MemoryOverrideStore::new()
        .with(TenantOverride::new("signup", "acme", "name").label("Full legal name"))
        .with(TenantOverride::new("signup", "acme", "nickname").label("Nick"));

    let rules = RuleSet::from_file("demos/signup.rules")?;
    println!("{rules}");

    let pipeline = Pipeline::builder(Arc::new(schemas))
        .config(config)
        .overrides(Arc::new(overrides))
        .rules(Arc::new(RuleRegistry::new(rules)))
        .build()?;

    let free = RequestContext::new("user-1", "acme").attribute("account.plan", "free");
    let person = FormData::new().set("kind", "person");
    print(
        "free plan, person",
        &*pipeline.get_enriched_schema("signup", &free, &person).await?,
    );

    let staff = RequestContext::new("user-2", "globex")
        .attribute("account.plan", "pro")
        .permission("pii.view");
    let business = FormData::new()
        .set("kind", "business")
        .set("vat_id", "DE123456789")
        .set("opt_in", true);
    print(
        "pro plan with pii.view, business",
        &*pipeline.get_enriched_schema("signup", &staff, &business).await?,
    );

    // Served from the enriched cache.
    pipeline.get_enriched_schema("signup", &free, &person).await?;
    println!("{}", pipeline.cache_stats());
    Ok(())
}
