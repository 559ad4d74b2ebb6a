use crate::models::Record;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Source name used for entries shared by every source.
pub const ANY_SOURCE: &str = "*";

/// League/flag image lookup, loaded from a JSON file of the form
/// `{"<source>": {"<code>": "<flag url>"}}` instead of living in code.
#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    entries: HashMap<String, HashMap<String, String>>,
}

impl FlagTable {
    /// Loads the table. A missing or malformed file gives an empty table.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Flag table {} unavailable: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<HashMap<String, HashMap<String, String>>>(&content) {
            Ok(raw) => {
                let table = Self::from_entries(raw);
                info!("Loaded {} flag entries from {}", table.len(), path.display());
                table
            }
            Err(e) => {
                warn!("Flag table {} is malformed: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Codes are matched case-insensitively.
    pub fn from_entries(raw: HashMap<String, HashMap<String, String>>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(source, codes)| {
                let codes = codes
                    .into_iter()
                    .map(|(code, url)| (code.trim().to_lowercase(), url))
                    .collect();
                (source, codes)
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up `code` for `source`, then in the shared `*` section.
    pub fn lookup(&self, source: &str, code: &str) -> Option<&str> {
        let code = code.trim().to_lowercase();
        [source, ANY_SOURCE]
            .iter()
            .filter_map(|s| self.entries.get(*s))
            .find_map(|codes| codes.get(&code))
            .map(String::as_str)
    }

    /// Fills `target_field` from the code in `code_field` when the record has
    /// no value there yet. Returns whether the record changed.
    pub fn annotate(&self, source: &str, record: &mut Record, code_field: &str, target_field: &str) -> bool {
        let has_target = record
            .get(target_field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if has_target {
            return false;
        }
        let Some(code) = record.get(code_field).and_then(Value::as_str) else {
            return false;
        };
        match self.lookup(source, code) {
            Some(flag) => {
                let flag = flag.to_string();
                record.insert(target_field.to_string(), Value::String(flag));
                true
            }
            None => false,
        }
    }
}
