//! Exact-key merge of a freshly scraped batch into the persisted collection.
//!
//! Records are matched by natural key only. On a collision, fields are
//! gap-filled: a known value is never replaced by an empty one unless the
//! caller forces the update. Nested collections (episodes) are merged by
//! their composite key and server lists are unioned.

use crate::models::{NaturalKey, NestedSpec, Record, RecordSchema, CREATED_AT};
use crate::normalize::normalize_objects;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Incoming values replace existing ones even when the existing value is non-empty.
    pub force_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Existing,
    Incoming,
}

/// A record left out of the merge because its natural key was unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub side: Side,
    pub index: usize,
    pub missing_field: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Existing records sharing a key with an earlier existing record.
    pub collapsed: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl MergeReport {
    fn absorb(&mut self, other: MergeReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.collapsed += other.collapsed;
        self.skipped.extend(other.skipped);
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<Record>,
    pub report: MergeReport,
}

/// Merges batches of records that share one schema.
pub struct Merger<'a> {
    schema: &'a RecordSchema,
    options: MergeOptions,
}

impl<'a> Merger<'a> {
    pub fn new(schema: &'a RecordSchema, options: MergeOptions) -> Self {
        Self { schema, options }
    }

    /// Merges `incoming` into `existing`. Output order is the order of
    /// `existing` followed by keys first seen in `incoming`.
    pub fn merge(&self, existing: Vec<Record>, incoming: Vec<Record>) -> MergeOutcome {
        self.merge_batches(existing, std::iter::once(incoming))
    }

    /// Folds several batches into `existing`, one after the other. Batches
    /// fetched concurrently must still be reduced through here before saving.
    pub fn merge_batches<I>(&self, existing: Vec<Record>, batches: I) -> MergeOutcome
    where
        I: IntoIterator<Item = Vec<Record>>,
    {
        let mut report = MergeReport::default();
        let mut records: Vec<Record> = Vec::with_capacity(existing.len());
        let mut index: HashMap<NaturalKey, usize> = HashMap::with_capacity(existing.len());

        for (i, record) in existing.into_iter().enumerate() {
            let key = match self.schema.key.extract(&record) {
                Ok(key) => key,
                Err(field) => {
                    report.skipped.push(skipped(Side::Existing, i, field, &record));
                    continue;
                }
            };
            match index.get(&key) {
                Some(&pos) => {
                    warn!("duplicate key {} in existing collection, collapsing", key);
                    self.merge_record(&mut records[pos], &record, false);
                    report.collapsed += 1;
                }
                None => {
                    index.insert(key, records.len());
                    records.push(record);
                }
            }
        }

        for batch in batches {
            let batch_report = self.apply(&mut records, &mut index, batch);
            report.absorb(batch_report);
        }

        for skip in &report.skipped {
            warn!(
                "skipped {:?} record #{} ({}): missing natural key field '{}'",
                skip.side,
                skip.index,
                skip.title.as_deref().unwrap_or("untitled"),
                skip.missing_field
            );
        }

        MergeOutcome { records, report }
    }

    fn apply(
        &self,
        records: &mut Vec<Record>,
        index: &mut HashMap<NaturalKey, usize>,
        batch: Vec<Record>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for (i, record) in batch.into_iter().enumerate() {
            let key = match self.schema.key.extract(&record) {
                Ok(key) => key,
                Err(field) => {
                    report.skipped.push(skipped(Side::Incoming, i, field, &record));
                    continue;
                }
            };
            match index.get(&key) {
                Some(&pos) => {
                    if self.merge_record(&mut records[pos], &record, self.options.force_update) {
                        debug!("updated {}", key);
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                None => {
                    debug!("inserted {}", key);
                    index.insert(key, records.len());
                    records.push(record);
                    report.inserted += 1;
                }
            }
        }
        report
    }

    /// Field-level merge of `source` into `target`. Returns whether `target` changed.
    fn merge_record(&self, target: &mut Record, source: &Record, force: bool) -> bool {
        if !self.schema.track_series_meta {
            return merge_fields(
                target,
                source,
                &self.schema.union_fields,
                &self.schema.nested,
                force,
            );
        }

        // the episode count is derived, so compare whole records instead of
        // trusting per-field change flags
        let before = target.clone();
        merge_fields(
            target,
            source,
            &self.schema.union_fields,
            &self.schema.nested,
            force,
        );
        if let Some(nested) = self.schema.nested.first() {
            let count = target
                .get(&nested.field)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            target.insert("number_of_episodes".into(), Value::from(count));
        }
        *target != before
    }
}

fn skipped(side: Side, index: usize, missing_field: String, record: &Record) -> SkippedRecord {
    let title = ["title", "name", "equipos"]
        .iter()
        .find_map(|f| record.get(*f).and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .map(String::from);
    SkippedRecord {
        side,
        index,
        missing_field,
        title,
    }
}

fn merge_fields(
    target: &mut Record,
    source: &Record,
    union_fields: &[String],
    nested: &[NestedSpec],
    force: bool,
) -> bool {
    let mut changed = false;
    for (field, incoming) in source {
        let Some(current) = target.get_mut(field) else {
            target.insert(field.clone(), incoming.clone());
            changed = true;
            continue;
        };

        // a creation stamp is never moved once set, not even by a forced update
        let write_once = field == CREATED_AT && !is_empty(current);

        if let Some(spec) = nested.iter().find(|n| &n.field == field) {
            changed |= merge_nested(current, incoming, spec, force);
        } else if union_fields.iter().any(|f| f == field) && !force {
            changed |= union_list(current, incoming);
        } else if force && !write_once {
            if current != incoming {
                *current = incoming.clone();
                changed = true;
            }
        } else if is_empty(current) && !is_empty(incoming) {
            *current = incoming.clone();
            changed = true;
        }
    }
    changed
}

/// Merges nested items by composite key, appending items whose key is new.
fn merge_nested(current: &mut Value, incoming: &Value, spec: &NestedSpec, force: bool) -> bool {
    let Value::Array(new_items) = incoming else {
        return false;
    };
    let repaired = repair_list(current);
    let Value::Array(items) = current else {
        if is_empty(current) && !new_items.is_empty() {
            *current = incoming.clone();
            return true;
        }
        warn!("cannot merge into non-list '{}', keeping it", spec.field);
        return false;
    };

    let mut positions: HashMap<NaturalKey, usize> = HashMap::new();
    for (pos, item) in items.iter().enumerate() {
        if let Some(key) = item.as_object().and_then(|o| spec.key.extract(o).ok()) {
            positions.entry(key).or_insert(pos);
        }
    }

    let mut changed = repaired;
    for new_item in new_items {
        let Some(new_obj) = new_item.as_object() else {
            continue;
        };
        match spec.key.extract(new_obj) {
            Ok(key) => match positions.get(&key) {
                Some(&pos) => {
                    if let Some(obj) = items[pos].as_object_mut() {
                        changed |= merge_fields(obj, new_obj, &spec.union_fields, &[], force);
                    }
                }
                None => {
                    positions.insert(key, items.len());
                    items.push(new_item.clone());
                    changed = true;
                }
            },
            // keyless nested items are only kept when not already present
            Err(_) => {
                if !items.contains(new_item) {
                    items.push(new_item.clone());
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Appends items of `incoming` not already in `current`. Items with a `url`
/// are identified by it, others by value.
fn union_list(current: &mut Value, incoming: &Value) -> bool {
    let Value::Array(new_items) = incoming else {
        return false;
    };
    let repaired = repair_list(current);
    let Value::Array(items) = current else {
        if is_empty(current) && !new_items.is_empty() {
            *current = incoming.clone();
            return true;
        }
        warn!("cannot union into a non-list value, keeping it");
        return false;
    };

    let mut seen: HashSet<String> = items.iter().map(identity).collect();
    let mut changed = repaired;
    for item in new_items {
        if seen.insert(identity(item)) {
            items.push(item.clone());
            changed = true;
        }
    }
    changed
}

/// Decodes a list that was persisted as a JSON-encoded string. Returns
/// whether `current` was rewritten.
fn repair_list(current: &mut Value) -> bool {
    if !current.is_string() {
        return false;
    }
    let items = normalize_objects(current);
    if items.is_empty() {
        return false;
    }
    *current = Value::Array(items.into_iter().map(Value::Object).collect());
    true
}

fn identity(item: &Value) -> String {
    match item.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => format!("url:{}", url.trim()),
        _ => format!("value:{}", item),
    }
}

/// Empty or default: `null`, blank text, zero, `false`, `[]`, `{}`.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
