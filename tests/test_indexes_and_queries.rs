//! Index engine over a schema-defined kind:
//! 1) Unique schema properties are enforced on create.
//! 2) Boolean indexes order false before true and range-test as documented.
//! 3) String and parameter-typed filters return the expected rows.

use provision_runtime::crypto::Pbkdf2Hasher;
use provision_runtime::{
    Action, Filter, MemoryStore, Param, QueryOptions, Resource, Runtime, RuntimeError,
    SchemaEvaluator, SchemaRegistry,
};
use serde_json::json;
use std::sync::Arc;

fn runtime() -> Result<Runtime, Box<dyn std::error::Error>> {
    let mut schemas = SchemaRegistry::new();
    schemas.register(
        "machines",
        json!({
            "type": "object",
            "required": ["Id", "Name"],
            "properties": {
                "Type": { "type": "string" },
                "Id": { "type": "string" },
                "Name": { "type": "string", "isunique": true },
                "Runnable": { "type": "boolean" },
                "Cores": { "type": "integer", "minimum": 1 },
                "Mac": { "type": "string", "pattern": "^[0-9a-f:]+$" },
                "Endpoint": { "type": "string" },
                "Params": { "type": "object" }
            }
        }),
    )?;
    Ok(Runtime::builder(Arc::new(MemoryStore::new()))
        .schemas(schemas.freeze())
        .hasher(Arc::new(Pbkdf2Hasher::new(10)))
        .build()?)
}

fn keys(items: &[Arc<dyn Resource>]) -> Vec<String> {
    items.iter().map(|i| i.key()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unique_property_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request("machines", Action::Create).await?;

    let m1 = ctx.decode("machines", json!({ "Type": "machines", "Id": "m1", "Name": "alpha" }))?;
    let saved = ctx.create(m1).await?;
    assert!(saved.validation().useable());
    assert_eq!(saved.to_json()?["Endpoint"], "local-endpoint");

    let m2 = ctx.decode("machines", json!({ "Type": "machines", "Id": "m2", "Name": "alpha" }))?;
    match ctx.create(m2).await {
        Err(RuntimeError::Validation { errors, .. }) => {
            assert!(
                errors.iter().any(|e| e == "machines m2 and m1 violate unique constraint on Name"),
                "{errors:?}"
            );
        }
        other => panic!("expected a uniqueness violation, got {other:?}"),
    }

    let m3 = ctx.decode("machines", json!({ "Type": "machines", "Id": "m3", "Name": "beta" }))?;
    ctx.create(m3).await?;

    let again = ctx.decode("machines", json!({ "Type": "machines", "Id": "m1", "Name": "gamma" }))?;
    assert!(matches!(ctx.create(again).await, Err(RuntimeError::Conflict { .. })));
    assert_eq!(keys(&ctx.items("machines")), vec!["m1", "m3"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_schema_violations_are_all_reported() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request("machines", Action::Create).await?;
    let bad = ctx.decode("machines", json!({ "Type": "machines", "Id": "m1", "Cores": 0 }))?;
    let err = ctx.create(bad).await.unwrap_err();
    assert_eq!(err.status_code(), 422);
    let errs = err.violations();
    assert!(
        errs.iter().any(|e| e.contains("Error in value: (root): ") && e.contains("Name")),
        "{errs:?}"
    );
    assert!(
        errs.iter().any(|e| e.contains("Error in value: Cores: ") && e.contains("minimum")),
        "{errs:?}"
    );
    assert!(ctx.items("machines").is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pattern_constraints_block_persistence() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request("machines", Action::Create).await?;
    let bad = ctx.decode(
        "machines",
        json!({ "Type": "machines", "Id": "m1", "Name": "alpha", "Mac": "not a mac" }),
    )?;
    let err = ctx.create(bad).await.unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert!(
        err.violations().iter().any(|e| e.starts_with("Error in value: Mac: ")),
        "{:?}",
        err.violations()
    );
    assert!(ctx.items("machines").is_empty());

    let good = ctx.decode(
        "machines",
        json!({ "Type": "machines", "Id": "m1", "Name": "alpha", "Mac": "00:1a:2b" }),
    )?;
    ctx.create(good).await?;
    Ok(())
}

/// Refuses every value of the `rack` parameter.
struct NoRacks;

impl SchemaEvaluator for NoRacks {
    fn evaluate(&self, _schema: &serde_json::Value, document: &serde_json::Value) -> Vec<String> {
        if document.is_number() {
            vec![format!("rack {document} is not allowed")]
        } else {
            Vec::new()
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parameter_literals_use_the_configured_evaluator() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::builder(Arc::new(MemoryStore::new()))
        .evaluator(Arc::new(NoRacks))
        .hasher(Arc::new(Pbkdf2Hasher::new(10)))
        .build()?;
    let ctx = rt.request("params", Action::Create).await?;
    ctx.create(Box::new(Param::new("rack", json!({ "type": "integer" }))))
        .await?;

    let index = ctx.parameter_index("params", "rack")?;
    match index.parse("3") {
        Err(RuntimeError::Parse { reason, .. }) => assert_eq!(reason, "rack 3 is not allowed"),
        Err(other) => panic!("expected a parse failure, got {other:?}"),
        Ok(_) => panic!("expected a parse failure, got a value"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_boolean_index_order() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request("machines", Action::Create).await?;
    for (id, runnable) in [("a", true), ("b", false), ("c", true)] {
        let m = ctx.decode(
            "machines",
            json!({ "Type": "machines", "Id": id, "Name": id, "Runnable": runnable }),
        )?;
        ctx.create(m).await?;
    }
    // No Runnable field at all: reads as false.
    let unset = ctx.decode("machines", json!({ "Type": "machines", "Id": "d", "Name": "d" }))?;
    ctx.create(unset).await?;

    let indexes = ctx.indexes("machines")?;
    let idx = &indexes["Runnable"];
    let t = idx.parse("true")?;
    let f = idx.parse("false")?;
    assert!(idx.less(f.as_ref(), t.as_ref()));
    assert!(!idx.less(t.as_ref(), f.as_ref()));
    assert!(!idx.less(f.as_ref(), f.as_ref()));
    assert!(!idx.less(t.as_ref(), t.as_ref()));

    let items = ctx.items("machines");
    let (gte_true, gt_true) = idx.tests(t.as_ref());
    let (gte_false, gt_false) = idx.tests(f.as_ref());
    let matching = |test: &dyn Fn(&dyn Resource) -> bool| -> Vec<String> {
        items.iter().filter(|i| test(i.as_ref())).map(|i| i.key()).collect()
    };
    assert_eq!(matching(&*gte_true), vec!["a", "c"]);
    assert_eq!(matching(&*gte_false), vec!["a", "b", "c", "d"]);
    assert!(matching(&*gt_true).is_empty());
    assert_eq!(matching(&*gt_false), vec!["a", "c"]);

    assert!(matches!(idx.parse("maybe"), Err(RuntimeError::Parse { .. })));

    let runnable = ctx.query(
        "machines",
        &[("Runnable".to_string(), Filter::Eq("true".into()))],
        &QueryOptions::default(),
    )?;
    assert_eq!(keys(&runnable), vec!["a", "c"]);
    let idle = ctx.query(
        "machines",
        &[("Runnable".to_string(), Filter::Eq("false".into()))],
        &QueryOptions::default(),
    )?;
    assert_eq!(keys(&idle), vec!["b", "d"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_string_ranges_and_paging() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request("machines", Action::Create).await?;
    for (id, name) in [("m1", "delta"), ("m2", "alpha"), ("m3", "charlie"), ("m4", "bravo")] {
        ctx.create(ctx.decode("machines", json!({ "Type": "machines", "Id": id, "Name": name }))?)
            .await?;
    }

    let by_name = QueryOptions {
        sort: Some("Name".into()),
        ..QueryOptions::default()
    };
    let between = ctx.query(
        "machines",
        &[("Name".to_string(), Filter::Between("bravo".into(), "charlie".into()))],
        &by_name,
    )?;
    assert_eq!(keys(&between), vec!["m4", "m3"]);

    let below = ctx.query("machines", &[("Name".to_string(), Filter::Lt("charlie".into()))], &by_name)?;
    assert_eq!(keys(&below), vec!["m2", "m4"]);

    let not_alpha = ctx.query("machines", &[("Name".to_string(), Filter::Ne("alpha".into()))], &by_name)?;
    assert_eq!(keys(&not_alpha), vec!["m4", "m3", "m1"]);

    let page = ctx.query(
        "machines",
        &[],
        &QueryOptions {
            sort: Some("Name".into()),
            reverse: true,
            offset: 1,
            limit: Some(2),
        },
    )?;
    assert_eq!(keys(&page), vec!["m3", "m4"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parameter_index() -> Result<(), Box<dyn std::error::Error>> {
    let rt = runtime()?;
    let ctx = rt.request_for(["machines", "params"]).await?;
    ctx.create(Box::new(Param::new("rack", json!({ "type": "integer", "minimum": 0 }))))
        .await?;
    for (id, rack) in [("m1", Some(7)), ("m2", None), ("m3", Some(3))] {
        let mut m = ctx.decode("machines", json!({ "Type": "machines", "Id": id, "Name": id }))?;
        if let Some(rack) = rack {
            m.set_param("rack", json!(rack))?;
        }
        ctx.create(m).await?;
    }

    let at_least_three = ctx.query(
        "machines",
        &[("rack".to_string(), Filter::Gte("3".into()))],
        &QueryOptions {
            sort: Some("rack".into()),
            ..QueryOptions::default()
        },
    )?;
    assert_eq!(keys(&at_least_three), vec!["m3", "m1"]);

    // Objects without the parameter sort by its default.
    let all = ctx.query(
        "machines",
        &[],
        &QueryOptions {
            sort: Some("rack".into()),
            ..QueryOptions::default()
        },
    )?;
    assert_eq!(keys(&all), vec!["m2", "m3", "m1"]);

    let bad = ctx.query("machines", &[("rack".to_string(), Filter::Eq("three".into()))], &QueryOptions::default());
    assert!(matches!(bad, Err(RuntimeError::Parse { .. })));
    let negative = ctx.query("machines", &[("rack".to_string(), Filter::Eq("-1".into()))], &QueryOptions::default());
    assert!(matches!(negative, Err(RuntimeError::Parse { .. })));

    match ctx.parameter_index("machines", "nosuch") {
        Err(RuntimeError::NotFound { kind, key }) => {
            assert_eq!(kind, "params");
            assert_eq!(key, "nosuch");
        }
        other => panic!("expected a lookup failure, got {other:?}"),
    }
    Ok(())
}
