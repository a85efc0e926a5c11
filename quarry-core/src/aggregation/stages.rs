// src/aggregation/stages.rs
//! Built-in pipeline stages
//!
//! Every stage is `collection × args → collection`. Arguments are validated
//! before the first document is touched, so a malformed stage fails even on
//! an empty collection. Stages own their input, so the documents they
//! reshape are never visible to another stage.

use super::projection::Projection;
use super::Pipeline;
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::expression::required;
use crate::path::{remove_value, resolve_value, set_value};
use crate::registry::{AccumulatorOperator, Operator};
use crate::value::{Map, Value};
use crate::value_utils::group_by;
use crate::{log_debug, log_warn};
use ahash::AHashMap;
use rand::Rng;
use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) fn builtin() -> Vec<(&'static str, Operator)> {
    vec![
        ("$addFields", Operator::pipeline(add_fields)),
        ("$bucket", Operator::pipeline(bucket)),
        ("$bucketAuto", Operator::pipeline(bucket_auto)),
        ("$count", Operator::pipeline(count)),
        ("$facet", Operator::pipeline(facet)),
        ("$group", Operator::pipeline(group)),
        ("$limit", Operator::pipeline(limit)),
        ("$lookup", Operator::pipeline(lookup)),
        ("$match", Operator::pipeline(match_stage)),
        ("$project", Operator::pipeline(project)),
        ("$redact", Operator::pipeline(redact)),
        ("$replaceRoot", Operator::pipeline(replace_root)),
        ("$replaceWith", Operator::pipeline(replace_with)),
        ("$sample", Operator::pipeline(sample)),
        ("$set", Operator::pipeline(add_fields)),
        ("$skip", Operator::pipeline(skip)),
        ("$sort", Operator::pipeline(sort)),
        ("$sortByCount", Operator::pipeline(sort_by_count)),
        ("$unset", Operator::pipeline(unset)),
        ("$unwind", Operator::pipeline(unwind)),
    ]
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn stage_object<'v>(args: &'v Value, stage: &str) -> Result<&'v Map> {
    args.as_object().ok_or_else(|| {
        QuarryError::Validation(format!("{} requires an object", stage))
    })
}

fn stage_count(args: &Value, stage: &str) -> Result<usize> {
    args.as_usize().ok_or_else(|| {
        QuarryError::Validation(format!("{} requires a non-negative integer", stage))
    })
}

fn defined(value: Value) -> Value {
    if value.is_undefined() {
        Value::Null
    } else {
        value
    }
}

type AccumulatorField = (String, Arc<dyn AccumulatorOperator>, Value);

/// Output fields of `$group`, `$bucket` and `$bucketAuto`
///
/// Each field must be `{"$op": expr}` naming a group operator.
fn accumulator_fields(
    ctx: &Context<'_>,
    spec: &Map,
    skip: Option<&str>,
    stage: &str,
) -> Result<Vec<AccumulatorField>> {
    let mut fields = Vec::with_capacity(spec.len());
    for (field, value) in spec {
        if Some(field.as_str()) == skip {
            continue;
        }
        let (name, arg) = value.as_operator().ok_or_else(|| {
            QuarryError::Validation(format!(
                "{}: field '{}' must be a single accumulator object",
                stage, field
            ))
        })?;
        let operator = ctx
            .tables()
            .group(name)
            .cloned()
            .ok_or_else(|| QuarryError::UnknownOperator(name.to_string()))?;
        fields.push((field.clone(), operator, arg.clone()));
    }
    Ok(fields)
}

/// `output` of the bucket stages, `{count: {$sum: 1}}` when absent
fn bucket_output(ctx: &Context<'_>, output: Option<&Value>, stage: &str) -> Result<Vec<AccumulatorField>> {
    match output {
        Some(spec) => accumulator_fields(ctx, stage_object(spec, stage)?, None, stage),
        None => {
            let mut sum = Map::new();
            sum.insert("$sum".to_string(), Value::from(1));
            let mut spec = Map::new();
            spec.insert("count".to_string(), Value::Object(sum));
            accumulator_fields(ctx, &spec, None, stage)
        }
    }
}

fn accumulate_into(
    ctx: &Context<'_>,
    out: &mut Map,
    fields: &[AccumulatorField],
    members: &[Value],
) -> Result<()> {
    for (field, operator, arg) in fields {
        let value = operator.accumulate(ctx, members, Some(arg))?;
        out.insert(field.clone(), value);
    }
    Ok(())
}

fn keyed_document(
    ctx: &Context<'_>,
    id: Value,
    fields: &[AccumulatorField],
    members: &[Value],
) -> Result<Value> {
    let mut out = Map::new();
    out.insert(ctx.id_key().to_string(), id);
    accumulate_into(ctx, &mut out, fields, members)?;
    Ok(Value::Object(out))
}

// ============================================================================
// FILTERING AND RESHAPING
// ============================================================================

fn match_stage(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let predicate = ctx.compile(args)?;
    if predicate.is_empty() {
        return Ok(collection);
    }
    let mut out = Vec::with_capacity(collection.len());
    for doc in collection {
        if predicate.test(ctx, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn project(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let projection = Projection::parse(ctx, args)?;
    collection
        .iter()
        .map(|doc| projection.apply(ctx, doc))
        .collect()
}

/// `$addFields` / `$set`: computed values are evaluated against the input
/// document; `$$REMOVE` deletes the field
fn add_fields(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$addFields")?;
    let mut out = Vec::with_capacity(collection.len());
    for doc in collection {
        let mut next = doc.clone();
        for (path, expr) in spec {
            let value = ctx.compute(&doc, expr)?;
            if value.is_undefined() {
                remove_value(&mut next, path);
            } else {
                set_value(&mut next, path, value);
            }
        }
        out.push(next);
    }
    Ok(out)
}

fn unset(_ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let paths: Vec<&str> = match args {
        Value::String(path) => vec![path.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    QuarryError::Validation("$unset requires field path strings".to_string())
                })
            })
            .collect::<Result<_>>()?,
        _ => {
            return Err(QuarryError::Validation(
                "$unset requires a string or an array of strings".to_string(),
            ))
        }
    };
    if let Some(bad) = paths.iter().find(|p| p.is_empty() || p.starts_with('$')) {
        return Err(QuarryError::Validation(format!(
            "$unset: invalid field path '{}'",
            bad
        )));
    }
    Ok(collection
        .into_iter()
        .map(|mut doc| {
            for path in &paths {
                remove_value(&mut doc, path);
            }
            doc
        })
        .collect())
}

fn new_root(ctx: &Context<'_>, collection: Vec<Value>, expr: &Value, stage: &str) -> Result<Vec<Value>> {
    collection
        .iter()
        .map(|doc| match ctx.compute(doc, expr)? {
            root @ Value::Object(_) => Ok(root),
            other => Err(QuarryError::TypeMismatch(format!(
                "{} expression must evaluate to an object, got {}",
                stage,
                other.kind().as_str()
            ))),
        })
        .collect()
}

fn replace_root(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$replaceRoot")?;
    let expr = required(spec, "newRoot", "$replaceRoot")?;
    new_root(ctx, collection, expr, "$replaceRoot")
}

fn replace_with(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    new_root(ctx, collection, args, "$replaceWith")
}

// ============================================================================
// $unwind
// ============================================================================

struct UnwindSpec {
    path: String,
    index_field: Option<String>,
    preserve: bool,
}

fn field_path(value: &Value, stage: &str) -> Result<String> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix('$'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            QuarryError::Validation(format!("{} path must be a '$'-prefixed field path", stage))
        })
}

fn parse_unwind(args: &Value) -> Result<UnwindSpec> {
    match args {
        Value::String(_) => Ok(UnwindSpec {
            path: field_path(args, "$unwind")?,
            index_field: None,
            preserve: false,
        }),
        Value::Object(spec) => {
            let path = field_path(required(spec, "path", "$unwind")?, "$unwind")?;
            let index_field = match spec.get("includeArrayIndex") {
                None => None,
                Some(Value::String(name)) if !name.is_empty() && !name.starts_with('$') => {
                    Some(name.clone())
                }
                Some(_) => {
                    return Err(QuarryError::Validation(
                        "$unwind includeArrayIndex must be a field name".to_string(),
                    ))
                }
            };
            let preserve = match spec.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(QuarryError::Validation(
                        "$unwind preserveNullAndEmptyArrays must be a boolean".to_string(),
                    ))
                }
            };
            Ok(UnwindSpec {
                path,
                index_field,
                preserve,
            })
        }
        _ => Err(QuarryError::Validation(
            "$unwind requires a field path or an object".to_string(),
        )),
    }
}

fn unwind(_ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = parse_unwind(args)?;
    let mut out = Vec::with_capacity(collection.len());
    for mut doc in collection {
        match resolve_value(&doc, &spec.path) {
            Value::Array(items) if !items.is_empty() => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut next = doc.clone();
                    set_value(&mut next, &spec.path, item);
                    if let Some(index_field) = &spec.index_field {
                        set_value(&mut next, index_field, Value::from(i));
                    }
                    out.push(next);
                }
            }
            Value::Array(_) => {
                if spec.preserve {
                    if let Some(index_field) = &spec.index_field {
                        set_value(&mut doc, index_field, Value::Null);
                    }
                    out.push(doc);
                }
            }
            nil if nil.is_nil() && spec.preserve => {
                if let Some(index_field) = &spec.index_field {
                    set_value(&mut doc, index_field, Value::Null);
                }
                out.push(doc);
            }
            other => {
                return Err(QuarryError::TypeMismatch(format!(
                    "$unwind: field '{}' must be an array, got {}",
                    spec.path,
                    other.kind().as_str()
                )))
            }
        }
    }
    Ok(out)
}

// ============================================================================
// GROUPING
// ============================================================================

fn group(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$group")?;
    let id_key = ctx.id_key();
    let id_expr = spec.get(id_key).ok_or_else(|| {
        QuarryError::Validation(format!("$group requires an '{}' field", id_key))
    })?;
    let fields = accumulator_fields(ctx, spec, Some(id_key), "$group")?;

    let partitions = group_by(collection, |doc| Ok(defined(ctx.compute(doc, id_expr)?)))?;
    log_debug!("$group formed {} partitions", partitions.len());
    partitions
        .into_iter()
        .map(|(key, members)| keyed_document(ctx, key, &fields, &members))
        .collect()
}

fn sort_by_count(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let mut sum = Map::new();
    sum.insert("$sum".to_string(), Value::from(1));
    let mut group_spec = Map::new();
    group_spec.insert(ctx.id_key().to_string(), args.clone());
    group_spec.insert("count".to_string(), Value::Object(sum));
    let grouped = group(ctx, collection, &Value::Object(group_spec))?;
    sort_documents(ctx, grouped, &[("count".to_string(), true)])
}

fn bucket(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$bucket")?;
    let group_expr = required(spec, "groupBy", "$bucket")?;
    let boundaries = required(spec, "boundaries", "$bucket")?
        .as_array()
        .ok_or_else(|| QuarryError::Validation("$bucket boundaries must be an array".to_string()))?;
    if boundaries.len() < 2 {
        return Err(QuarryError::Validation(
            "$bucket requires at least two boundaries".to_string(),
        ));
    }
    if boundaries
        .windows(2)
        .any(|w| ctx.compare(&w[0], &w[1]) != Ordering::Less)
    {
        return Err(QuarryError::Validation(
            "$bucket boundaries must be sorted in ascending order".to_string(),
        ));
    }
    let default = spec.get("default");
    let fields = bucket_output(ctx, spec.get("output"), "$bucket")?;

    let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); boundaries.len() - 1];
    let mut fallback = Vec::new();
    for doc in collection {
        let value = defined(ctx.compute(&doc, group_expr)?);
        let upper = boundaries.partition_point(|b| ctx.compare(b, &value) != Ordering::Greater);
        if upper >= 1 && upper < boundaries.len() {
            buckets[upper - 1].push(doc);
        } else if default.is_some() {
            fallback.push(doc);
        } else {
            return Err(QuarryError::Validation(format!(
                "$bucket: value {} falls outside the boundaries and no default is given",
                value
            )));
        }
    }

    let mut out = Vec::new();
    for (members, lower) in buckets.iter().zip(boundaries.iter()) {
        if !members.is_empty() {
            out.push(keyed_document(ctx, lower.clone(), &fields, members)?);
        }
    }
    if let (Some(id), false) = (default, fallback.is_empty()) {
        out.push(keyed_document(ctx, id.clone(), &fields, &fallback)?);
    }
    Ok(out)
}

fn bucket_auto(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$bucketAuto")?;
    let group_expr = required(spec, "groupBy", "$bucketAuto")?;
    let wanted = required(spec, "buckets", "$bucketAuto")?
        .as_usize()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            QuarryError::Validation("$bucketAuto buckets must be a positive integer".to_string())
        })?;
    let fields = bucket_output(ctx, spec.get("output"), "$bucketAuto")?;

    let mut keyed = collection
        .into_iter()
        .map(|doc| Ok((defined(ctx.compute(&doc, group_expr)?), doc)))
        .collect::<Result<Vec<(Value, Value)>>>()?;
    if keyed.is_empty() {
        return Ok(Vec::new());
    }
    keyed.sort_by(|a, b| ctx.compare(&a.0, &b.0));

    let size = (keyed.len() + wanted - 1) / wanted;
    let mut groups: Vec<Vec<(Value, Value)>> = Vec::with_capacity(wanted);
    let mut rest = keyed.into_iter().peekable();
    while rest.peek().is_some() {
        let mut members: Vec<(Value, Value)> = rest.by_ref().take(size).collect();
        while let Some((next_key, _)) = rest.peek() {
            let same = members
                .last()
                .map(|(key, _)| ctx.compare(key, next_key) == Ordering::Equal)
                .unwrap_or(false);
            if !same {
                break;
            }
            if let Some(item) = rest.next() {
                members.push(item);
            }
        }
        groups.push(members);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (i, members) in groups.iter().enumerate() {
        let (Some((min, _)), Some((last, _))) = (members.first(), members.last()) else {
            continue;
        };
        let max = groups
            .get(i + 1)
            .and_then(|next| next.first())
            .map(|(key, _)| key)
            .unwrap_or(last);
        let mut bounds = Map::new();
        bounds.insert("min".to_string(), min.clone());
        bounds.insert("max".to_string(), max.clone());
        let docs: Vec<Value> = members.iter().map(|(_, doc)| doc.clone()).collect();
        out.push(keyed_document(ctx, Value::Object(bounds), &fields, &docs)?);
    }
    Ok(out)
}

fn facet(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$facet")?;
    let facets = spec
        .iter()
        .map(|(name, stages)| Ok((name.clone(), Pipeline::parse(ctx, stages)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Map::new();
    for (name, pipeline) in facets {
        let result = pipeline.execute(ctx, collection.clone())?;
        out.insert(name, Value::Array(result));
    }
    Ok(vec![Value::Object(out)])
}

fn count(_ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let name = args
        .as_str()
        .filter(|s| !s.is_empty() && !s.starts_with('$') && !s.contains('.'))
        .ok_or_else(|| {
            QuarryError::Validation(
                "$count requires a non-empty field name without '$' or '.'".to_string(),
            )
        })?;
    let mut out = Map::new();
    out.insert(name.to_string(), Value::from(collection.len()));
    Ok(vec![Value::Object(out)])
}

// ============================================================================
// ORDERING AND WINDOWING
// ============================================================================

fn sort_keys(args: &Value) -> Result<Vec<(String, bool)>> {
    let spec = stage_object(args, "$sort")?;
    if spec.is_empty() {
        return Err(QuarryError::Validation(
            "$sort requires at least one key".to_string(),
        ));
    }
    spec.iter()
        .map(|(path, direction)| match direction.as_i64() {
            Some(1) => Ok((path.clone(), false)),
            Some(-1) => Ok((path.clone(), true)),
            _ => Err(QuarryError::Validation(format!(
                "$sort direction for '{}' must be 1 or -1",
                path
            ))),
        })
        .collect()
}

/// Stable multi-key sort
///
/// Partitions by each key from least to most significant, orders the
/// partitions by key and concatenates them. Each pass keeps the order of the
/// previous one inside a partition, so ties keep their input order.
pub(crate) fn sort_documents(
    ctx: &Context<'_>,
    collection: Vec<Value>,
    keys: &[(String, bool)],
) -> Result<Vec<Value>> {
    let mut current = collection;
    for (path, descending) in keys.iter().rev() {
        let mut partitions = group_by(current, |doc| Ok(resolve_value(doc, path)))?;
        partitions.sort_by(|a, b| {
            let ord = ctx.compare(&a.0, &b.0);
            if *descending {
                ord.reverse()
            } else {
                ord
            }
        });
        current = partitions
            .into_iter()
            .flat_map(|(_, members)| members)
            .collect();
    }
    Ok(current)
}

fn sort(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let keys = sort_keys(args)?;
    sort_documents(ctx, collection, &keys)
}

fn limit(_ctx: &Context<'_>, mut collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let n = stage_count(args, "$limit")?;
    collection.truncate(n);
    Ok(collection)
}

fn skip(_ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let n = stage_count(args, "$skip")?;
    Ok(collection.into_iter().skip(n).collect())
}

/// Uniform draw with replacement
fn sample(_ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$sample")?;
    let size = stage_count(required(spec, "size", "$sample")?, "$sample size")?;
    if collection.is_empty() {
        log_warn!("$sample of {} requested from an empty collection", size);
        return Ok(Vec::new());
    }
    let mut rng = rand::thread_rng();
    Ok((0..size)
        .map(|_| collection[rng.gen_range(0..collection.len())].clone())
        .collect())
}

// ============================================================================
// $lookup
// ============================================================================

/// Join keys of a field value: each element of a non-empty array, otherwise
/// the value itself (missing counts as null)
fn join_keys(value: Value) -> Vec<String> {
    match value {
        Value::Undefined => vec![Value::Null.hash_key()],
        Value::Array(items) if !items.is_empty() => items.iter().map(Value::hash_key).collect(),
        other => vec![other.hash_key()],
    }
}

fn push_unique(slot: &mut Vec<usize>, i: usize) {
    if slot.last() != Some(&i) {
        slot.push(i);
    }
}

fn string_arg<'v>(spec: &'v Map, key: &str) -> Result<&'v str> {
    required(spec, key, "$lookup")?.as_str().ok_or_else(|| {
        QuarryError::Validation(format!("$lookup '{}' must be a string", key))
    })
}

fn lookup(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let spec = stage_object(args, "$lookup")?;
    let local_field = string_arg(spec, "localField")?;
    let foreign_field = string_arg(spec, "foreignField")?;
    let as_field = string_arg(spec, "as")?;
    let foreign = match required(spec, "from", "$lookup")? {
        Value::Array(docs) => docs.clone(),
        Value::String(name) => ctx
            .config()
            .collection_resolver()
            .ok_or_else(|| {
                QuarryError::Validation(format!(
                    "$lookup from '{}' needs a configured collection resolver",
                    name
                ))
            })?
            .resolve(name)
            .ok_or_else(|| QuarryError::Validation(format!("$lookup: unknown collection '{}'", name)))?,
        _ => {
            return Err(QuarryError::Validation(
                "$lookup 'from' must be an array or a collection name".to_string(),
            ))
        }
    };

    // Matching foreign indices per outer document, in foreign order
    let matches: Vec<Vec<usize>> = if foreign.len() <= collection.len() {
        log_debug!("$lookup indexing {} foreign documents", foreign.len());
        let mut index: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (j, doc) in foreign.iter().enumerate() {
            for key in join_keys(resolve_value(doc, foreign_field)) {
                push_unique(index.entry(key).or_default(), j);
            }
        }
        collection
            .iter()
            .map(|doc| {
                let mut hits: Vec<usize> = join_keys(resolve_value(doc, local_field))
                    .iter()
                    .filter_map(|key| index.get(key))
                    .flatten()
                    .copied()
                    .collect();
                hits.sort_unstable();
                hits.dedup();
                hits
            })
            .collect()
    } else {
        log_debug!("$lookup indexing {} local documents", collection.len());
        let mut index: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (i, doc) in collection.iter().enumerate() {
            for key in join_keys(resolve_value(doc, local_field)) {
                push_unique(index.entry(key).or_default(), i);
            }
        }
        let mut hits = vec![Vec::new(); collection.len()];
        for (j, doc) in foreign.iter().enumerate() {
            for key in join_keys(resolve_value(doc, foreign_field)) {
                if let Some(outer) = index.get(&key) {
                    for &i in outer {
                        push_unique(&mut hits[i], j);
                    }
                }
            }
        }
        hits
    };

    Ok(collection
        .into_iter()
        .zip(matches)
        .map(|(mut doc, hits)| {
            let joined = hits.into_iter().map(|j| foreign[j].clone()).collect();
            set_value(&mut doc, as_field, Value::Array(joined));
            doc
        })
        .collect())
}

// ============================================================================
// $redact
// ============================================================================

fn contains_cond(expr: &Value) -> bool {
    match expr {
        Value::Object(map) => map.iter().any(|(k, v)| k == "$cond" || contains_cond(v)),
        Value::Array(items) => items.iter().any(contains_cond),
        _ => false,
    }
}

struct Redaction<'e> {
    expr: &'e Value,
    descends: bool,
}

impl Redaction<'_> {
    fn node(&self, ctx: &Context<'_>, node: Value, root: &Value) -> Result<Option<Value>> {
        let verdict = ctx.evaluate(&node, self.expr, &Env::new(root))?;
        match verdict.as_str() {
            Some("$$KEEP") => Ok(Some(node)),
            Some("$$PRUNE") => Ok(None),
            Some("$$DESCEND") if !self.descends => Ok(Some(node)),
            Some("$$DESCEND") => match node {
                Value::Object(map) => {
                    let mut out = Map::with_capacity(map.len());
                    for (key, value) in map {
                        if let Some(kept) = self.value(ctx, value, root)? {
                            out.insert(key, kept);
                        }
                    }
                    Ok(Some(Value::Object(out)))
                }
                other => Ok(Some(other)),
            },
            _ => Err(QuarryError::Validation(format!(
                "$redact must resolve to $$KEEP, $$PRUNE or $$DESCEND, got {}",
                verdict
            ))),
        }
    }

    fn value(&self, ctx: &Context<'_>, value: Value, root: &Value) -> Result<Option<Value>> {
        match value {
            Value::Object(_) => self.node(ctx, value, root),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(kept) = self.value(ctx, item, root)? {
                        out.push(kept);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            other => Ok(Some(other)),
        }
    }
}

fn redact(ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
    let redaction = Redaction {
        expr: args,
        descends: contains_cond(args),
    };
    let mut out = Vec::with_capacity(collection.len());
    for doc in collection {
        let root = doc.clone();
        if let Some(kept) = redaction.node(ctx, doc, &root)? {
            out.push(kept);
        }
    }
    Ok(out)
}
