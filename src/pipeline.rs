use crate::config::Config;
use crate::extract::resolve_link;
use crate::flags::FlagTable;
use crate::merge::{MergeOptions, MergeReport, Merger, Side};
use crate::models::{Record, RecordSchema, CREATED_AT};
use crate::normalize::{canonicalize, normalize_collection};
use crate::scraper::Scraper;
use crate::store::{self, SaveReport};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sources: usize,
    pub fetch_errors: usize,
    /// Records that came out of the normalizer.
    pub processed: usize,
    /// Persisted records whose shape had to be repaired on load.
    pub repaired: usize,
    pub merge: MergeReport,
    /// Size of the collection after the merge.
    pub total: usize,
    pub aborted: bool,
    pub save: Option<SaveReport>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary{}", if self.aborted { " (aborted)" } else { "" })?;
        if self.sources > 0 {
            writeln!(f, "  sources:    {} ({} failed)", self.sources, self.fetch_errors)?;
        }
        writeln!(f, "  processed:  {}", self.processed)?;
        writeln!(f, "  inserted:   {}", self.merge.inserted)?;
        writeln!(f, "  updated:    {}", self.merge.updated)?;
        writeln!(f, "  unchanged:  {}", self.merge.unchanged)?;
        writeln!(f, "  skipped:    {}", self.merge.skipped.len())?;
        if self.repaired > 0 {
            writeln!(f, "  repaired:   {}", self.repaired)?;
        }
        writeln!(f, "  errored:    {}", self.fetch_errors)?;
        match &self.save {
            Some(save) => {
                write!(f, "  collection: {} records -> {}", self.total, save.path.display())?;
                if let Some(backup) = &save.backup {
                    write!(f, "\n  backup:     {}", backup.display())?;
                }
            }
            None => write!(f, "  collection: {} records (nothing to write)", self.total)?,
        }
        Ok(())
    }
}

/// Fetch -> extract -> normalize -> merge -> persist for one collection.
pub struct Pipeline {
    config: Config,
    schema: RecordSchema,
    flags: FlagTable,
    merge_options: MergeOptions,
    abort: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let schema = config.schema();
        let flags = config
            .flags_path()
            .map(|p| FlagTable::load(&p))
            .unwrap_or_default();
        let merge_options = MergeOptions {
            force_update: config.force_update,
        };
        Self {
            config,
            schema,
            flags,
            merge_options,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag stops the run after the current fetch; what
    /// was fetched so far is still merged and saved.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Scrapes every configured source in order and persists the result.
    pub async fn run(&self) -> Result<RunSummary> {
        let scraper = Scraper::new(&self.config).context("Failed to build HTTP client")?;
        let mut summary = RunSummary::default();
        let mut batches = Vec::new();

        for (i, source) in self.config.sources.iter().enumerate() {
            if self.abort.load(Ordering::SeqCst) {
                info!("Abort requested, keeping {} fetched batch(es)", batches.len());
                summary.aborted = true;
                break;
            }
            if i > 0 {
                scraper.pause().await;
            }

            summary.sources += 1;
            info!("[{}] fetching {}", source.name, source.url);
            match scraper.fetch_source(source).await {
                Ok(raw) => {
                    let batch = self.prepare(&source.name, Some(&source.url), &raw);
                    info!("[{}] {} records", source.name, batch.len());
                    batches.push(batch);
                }
                Err(e) => {
                    warn!("[{}] skipped: {}", source.name, e);
                    summary.fetch_errors += 1;
                }
            }
        }
        if self.abort.load(Ordering::SeqCst) {
            summary.aborted = true;
        }

        self.commit(batches, summary)
    }

    /// Merges an already-scraped JSON file into the collection.
    pub fn merge_file(&self, incoming: &Path) -> Result<RunSummary> {
        let text = fs::read_to_string(incoming)
            .with_context(|| format!("Failed to read {}", incoming.display()))?;
        // unparseable input counts as an empty batch, like any malformed upstream data
        let raw = serde_json::from_str::<Value>(&text).unwrap_or_else(|e| {
            warn!("{} is not valid JSON: {}", incoming.display(), e);
            Value::Null
        });
        let batch = self.prepare("file", None, &raw);
        self.commit(vec![batch], RunSummary::default())
    }

    /// Normalizes a raw batch and fills derived fields. Server and channel
    /// links are resolved against `page_url` when the batch came from a page.
    pub fn prepare(&self, source: &str, page_url: Option<&str>, raw: &Value) -> Vec<Record> {
        let mut records = normalize_collection(raw, &self.schema);
        let now = chrono::Utc::now().to_rfc3339();
        for record in records.iter_mut() {
            if let Some(base) = page_url {
                resolve_links(record, &self.schema, base);
            }
            if !self.flags.is_empty() {
                self.flags
                    .annotate(source, record, &self.config.flag_code_field, "flag");
            }
            if self.schema.track_series_meta {
                stamp_series(record, &self.schema, &now);
            }
        }
        records
    }

    /// Reduces all batches into the persisted collection in one pass and
    /// writes it back. Only persistence failures are returned as errors.
    pub fn commit(&self, batches: Vec<Vec<Record>>, mut summary: RunSummary) -> Result<RunSummary> {
        let path = self.config.collection_path();
        let existing = self.load_canonical(&path, &mut summary);
        summary.processed += batches.iter().map(Vec::len).sum::<usize>();

        let merger = Merger::new(&self.schema, self.merge_options);
        let outcome = merger.merge_batches(existing, batches);
        let report = &outcome.report;

        let dropped_existing = report
            .skipped
            .iter()
            .any(|s| s.side == Side::Existing);
        let changed = report.inserted > 0
            || report.updated > 0
            || report.collapsed > 0
            || summary.repaired > 0
            || dropped_existing;

        summary.total = outcome.records.len();
        if changed || !path.exists() {
            let saved = store::save(&path, &outcome.records, self.config.save_options())
                .with_context(|| format!("Failed to save collection to {}", path.display()))?;
            summary.save = Some(saved);
        } else {
            info!("No changes for {}", path.display());
        }
        summary.merge = outcome.report;
        Ok(summary)
    }

    /// Rewrites the collection file in canonical shape, keeping the
    /// configured backup retention.
    pub fn normalize_file(&self) -> Result<(usize, SaveReport)> {
        let path = self.config.collection_path();
        let raw = Value::Array(store::load(&path).into_iter().map(Value::Object).collect());
        let normalized = normalize_collection(&raw, &self.schema);
        let saved = store::save(&path, &normalized, self.config.save_options())
            .with_context(|| format!("Failed to save {}", path.display()))?;
        Ok((normalized.len(), saved))
    }

    /// Loads the persisted collection and gives every record its canonical
    /// shape, so lists stored as JSON strings can still be merged into.
    fn load_canonical(&self, path: &Path, summary: &mut RunSummary) -> Vec<Record> {
        let mut records = store::load(path);
        for record in records.iter_mut() {
            let canonical = canonicalize(record.clone(), &self.schema);
            if canonical != *record {
                summary.repaired += 1;
                *record = canonical;
            }
        }
        if summary.repaired > 0 {
            warn!("Repaired {} malformed records in {}", summary.repaired, path.display());
        }
        records
    }
}

fn resolve_links(record: &mut Record, schema: &RecordSchema, base: &str) {
    for field in &schema.union_fields {
        if let Some(items) = record.get_mut(field) {
            resolve_list(items, base);
        }
    }
    for nested in &schema.nested {
        let Some(Value::Array(items)) = record.get_mut(&nested.field) else {
            continue;
        };
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            for field in &nested.union_fields {
                if let Some(servers) = item.get_mut(field) {
                    resolve_list(servers, base);
                }
            }
        }
    }
}

fn resolve_list(items: &mut Value, base: &str) {
    let Value::Array(items) = items else {
        return;
    };
    for item in items.iter_mut() {
        let Some(Value::String(url)) = item.get_mut("url") else {
            continue;
        };
        if let Some(resolved) = resolve_link(base, url) {
            *url = resolved;
        }
    }
}

fn stamp_series(record: &mut Record, schema: &RecordSchema, now: &str) {
    let missing_stamp = record
        .get(CREATED_AT)
        .and_then(Value::as_str)
        .map_or(true, str::is_empty);
    if missing_stamp {
        record.insert(CREATED_AT.into(), Value::String(now.to_string()));
    }
    if let Some(nested) = schema.nested.first() {
        let count = record
            .get(&nested.field)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        record.insert("number_of_episodes".into(), Value::from(count));
    }
}
