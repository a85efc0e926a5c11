// Integration tests for aggregation pipelines
use quarry_core::{Engine, EngineConfig, QuarryError, Value};
use serde_json::json;
use std::sync::Arc;

fn aggregate(engine: &Engine, docs: serde_json::Value, pipeline: serde_json::Value) -> serde_json::Value {
    let docs = docs.as_array().cloned().unwrap_or_default();
    json!(engine.aggregate_json(&docs, &pipeline).unwrap())
}

fn aggregate_err(docs: serde_json::Value, pipeline: serde_json::Value) -> QuarryError {
    let docs = docs.as_array().cloned().unwrap_or_default();
    Engine::new().aggregate_json(&docs, &pipeline).unwrap_err()
}

fn scores() -> serde_json::Value {
    json!([
        {"_id": 1, "quiz": 1, "score": 85},
        {"_id": 2, "quiz": 2, "score": 96},
        {"_id": 3, "quiz": 1, "score": 90}
    ])
}

#[test]
fn test_group_then_sort_end_to_end() {
    let out = aggregate(
        &Engine::new(),
        scores(),
        json!([
            {"$group": {"_id": "$quiz", "avg": {"$avg": "$score"}}},
            {"$sort": {"_id": 1}}
        ]),
    );
    assert_eq!(out, json!([{"_id": 1, "avg": 87.5}, {"_id": 2, "avg": 96}]));
}

#[test]
fn test_average_over_all_documents() {
    let out = aggregate(
        &Engine::new(),
        json!([{"s": 85}, {"s": 90}, {"s": 71}]),
        json!([{"$group": {"_id": null, "avg": {"$avg": "$s"}}}]),
    );
    assert_eq!(out, json!([{"_id": null, "avg": 82}]));
}

#[test]
fn test_empty_match_is_identity() {
    let out = aggregate(&Engine::new(), scores(), json!([{"$match": {}}]));
    assert_eq!(out, scores());
}

#[test]
fn test_sort_keeps_input_order_for_ties() {
    let out = aggregate(
        &Engine::new(),
        scores(),
        json!([{"$sort": {"quiz": 1}}, {"$project": {"_id": 1}}]),
    );
    assert_eq!(out, json!([{"_id": 1}, {"_id": 3}, {"_id": 2}]));
}

#[test]
fn test_group_is_idempotent_on_keys() {
    let engine = Engine::new();
    let once = aggregate(&engine, scores(), json!([{"$group": {"_id": "$quiz"}}]));
    let twice = aggregate(
        &engine,
        scores(),
        json!([{"$group": {"_id": "$quiz"}}, {"$group": {"_id": "$_id"}}]),
    );
    assert_eq!(once, twice);
    assert_eq!(once, json!([{"_id": 1}, {"_id": 2}]));
}

#[test]
fn test_bucket_boundaries_are_half_open() {
    let pipeline = json!([{"$bucket": {"groupBy": "$price", "boundaries": [0, 200, 400]}}]);
    let out = aggregate(&Engine::new(), json!([{"price": 199}, {"price": 200}]), pipeline.clone());
    assert_eq!(out, json!([{"_id": 0, "count": 1}, {"_id": 200, "count": 1}]));

    let err = aggregate_err(json!([{"price": 400}]), pipeline);
    assert!(matches!(err, QuarryError::Validation(_)));
}

#[test]
fn test_unwind_rejects_non_array() {
    let err = aggregate_err(json!([{"tags": "solo"}]), json!([{"$unwind": "$tags"}]));
    assert!(matches!(err, QuarryError::TypeMismatch(_)));
}

#[test]
fn test_project_rejects_mixed_modes() {
    let err = aggregate_err(json!([{"a": 1}]), json!([{"$project": {"a": 1, "b": 0}}]));
    assert!(matches!(err, QuarryError::Validation(_)));
}

#[test]
fn test_unknown_stage_aborts_before_running() {
    let err = aggregate_err(json!([{"a": 1}]), json!([{"$match": {}}, {"$explode": {}}]));
    assert!(matches!(err, QuarryError::UnknownOperator(_)));
}

#[test]
fn test_lookup_through_collection_resolver() {
    let inventory: Vec<Value> = vec![
        Value::from(json!({"sku": "a", "qty": 10})),
        Value::from(json!({"sku": "b", "qty": 0})),
    ];
    let config = EngineConfig::default().with_collection_resolver(Arc::new(move |name: &str| {
        (name == "inventory").then(|| inventory.clone())
    }));
    let engine = Engine::with_config(config);
    let out = aggregate(
        &engine,
        json!([{"_id": 1, "item": "b"}, {"_id": 2, "item": "z"}]),
        json!([{"$lookup": {"from": "inventory", "localField": "item", "foreignField": "sku", "as": "stock"}}]),
    );
    assert_eq!(
        out,
        json!([
            {"_id": 1, "item": "b", "stock": [{"sku": "b", "qty": 0}]},
            {"_id": 2, "item": "z", "stock": []}
        ])
    );

    let docs = [json!({"item": "a"})];
    let err = engine
        .aggregate_json(
            &docs,
            &json!([{"$lookup": {"from": "orders", "localField": "item", "foreignField": "sku", "as": "x"}}]),
        )
        .unwrap_err();
    assert!(matches!(err, QuarryError::Validation(_)));
}

#[test]
fn test_facet_runs_independent_pipelines() {
    let out = aggregate(
        &Engine::new(),
        scores(),
        json!([{"$facet": {
            "byQuiz": [{"$sortByCount": "$quiz"}],
            "best": [{"$sort": {"score": -1}}, {"$limit": 1}, {"$project": {"_id": 1}}]
        }}]),
    );
    assert_eq!(
        out,
        json!([{
            "byQuiz": [{"_id": 1, "count": 2}, {"_id": 2, "count": 1}],
            "best": [{"_id": 2}]
        }])
    );
}

#[test]
fn test_expressions_inside_stages() {
    let out = aggregate(
        &Engine::new(),
        json!([{"_id": 1, "first": "ada", "last": "lovelace", "items": [3, 1, 2]}]),
        json!([{"$project": {
            "_id": 0,
            "name": {"$concat": [{"$toUpper": "$first"}, " ", "$last"]},
            "total": {"$sum": "$items"},
            "big": {"$filter": {"input": "$items", "as": "i", "cond": {"$gte": ["$$i", 2]}}},
            "grade": {"$cond": {"if": {"$gt": [{"$size": "$items"}, 2]}, "then": "many", "else": "few"}}
        }}]),
    );
    assert_eq!(
        out,
        json!([{"name": "ADA lovelace", "total": 6, "big": [3, 2], "grade": "many"}])
    );
}

#[test]
fn test_unwind_group_push_round_trip() {
    let out = aggregate(
        &Engine::new(),
        json!([{"_id": 1, "tags": ["x", "y"]}, {"_id": 2, "tags": ["y"]}]),
        json!([
            {"$unwind": "$tags"},
            {"$group": {"_id": "$tags", "docs": {"$push": "$_id"}}},
            {"$sort": {"_id": 1}}
        ]),
    );
    assert_eq!(out, json!([{"_id": "x", "docs": [1]}, {"_id": "y", "docs": [1, 2]}]));
}

#[test]
fn test_count_and_replace_root() {
    let engine = Engine::new();
    assert_eq!(
        aggregate(&engine, scores(), json!([{"$match": {"quiz": 1}}, {"$count": "n"}])),
        json!([{"n": 2}])
    );
    assert_eq!(
        aggregate(
            &engine,
            json!([{"inner": {"a": 1}}]),
            json!([{"$replaceRoot": {"newRoot": "$inner"}}])
        ),
        json!([{"a": 1}])
    );
}
