use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use formwright::{
    FieldDef, FieldType, FormData, MemorySchemaStore, Pipeline, RequestContext, ResolvedSchema,
    RuleRegistry, RuleSet, RuleSetBuilder, SchemaDocument, enrich_schema, has_permission, path,
};

const FIELDS: usize = 20;

fn document() -> SchemaDocument {
    let mut doc = SchemaDocument::new("shared");
    for i in 0..FIELDS {
        let mut def = FieldDef::new(&format!("f{i}"), FieldType::Text);
        if i % 4 == 0 {
            def.permission = Some("pii.view".into());
        }
        doc = doc.field(def);
    }
    doc
}

fn rules() -> RuleSet {
    RuleSetBuilder::new()
        .rule("lock_free", |r| r.when(path("account.plan").eq("free")).readonly())
        .rule("hide_internal", |r| {
            r.on_fields(&["f1", "f2", "f3"])
                .when(!has_permission("staff"))
                .hide()
        })
        .compile()
        .unwrap()
}

fn shared() -> (Arc<ResolvedSchema>, Arc<RuleSet>, RequestContext) {
    let documents = std::collections::HashMap::from([("shared".to_owned(), document())]);
    let schema = formwright::resolve_schema("shared", &documents, 8).unwrap();
    let ctx = RequestContext::new("user", "acme").attribute("account.plan", "free");
    (Arc::new(schema), Arc::new(rules()), ctx)
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let (schema, rules, ctx) = shared();

        group.bench_function(format!("{threads}_threads_uncached"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads as u64;
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let schema = Arc::clone(&schema);
                        let rules = Arc::clone(&rules);
                        let ctx = ctx.clone();
                        thread::spawn(move || {
                            let form = FormData::new();
                            let start = Instant::now();
                            for _ in 0..per_thread {
                                let _ = enrich_schema(&schema, &rules, &ctx, &form, &[]);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                let mut max_elapsed = Duration::ZERO;
                for h in handles {
                    let elapsed = h.join().unwrap();
                    if elapsed > max_elapsed {
                        max_elapsed = elapsed;
                    }
                }
                max_elapsed
            });
        });
    }

    group.finish();
}

fn bench_cached_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap();
    let store = Arc::new(MemorySchemaStore::new().with(document()));
    let pipeline = Pipeline::builder(store)
        .rules(Arc::new(RuleRegistry::new(rules())))
        .build()
        .unwrap();
    let (_, _, ctx) = shared();
    let form = FormData::new();

    runtime
        .block_on(pipeline.get_enriched_schema("shared", &ctx, &form))
        .unwrap();

    c.bench_function("pipeline_cache_hit", |b| {
        b.iter(|| {
            runtime
                .block_on(pipeline.get_enriched_schema("shared", &ctx, &form))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_throughput, bench_cached_pipeline);
criterion_main!(benches);
