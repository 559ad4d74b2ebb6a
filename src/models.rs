use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A scraped media item: a flat JSON object whose field set depends on the
/// kind of collection (movie, series, sports fixture).
pub type Record = Map<String, Value>;

/// First-seen timestamp. Set once and never overwritten by a merge.
pub const CREATED_AT: &str = "created_at";

/// Stable identity of a record across scraper runs.
///
/// Scalar parts are canonicalized to strings so that `287231` and `"287231"`
/// name the same entity, which is how the upstream sites mix them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(Vec<String>);

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

/// Names the field(s) that make up a record's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub fields: Vec<String>,
}

impl KeySpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma-separated list such as `season,episode`.
    pub fn parse(spec: &str) -> Option<Self> {
        let fields: Vec<String> = spec
            .split(',')
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect();
        if fields.is_empty() {
            None
        } else {
            Some(Self { fields })
        }
    }

    /// Extracts the key from a record. Every part must be a non-empty string
    /// or a number; anything else makes the key unusable.
    pub fn extract(&self, record: &Record) -> Result<NaturalKey, String> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match record.get(field).and_then(key_part) {
                Some(part) => parts.push(part),
                None => return Err(field.clone()),
            }
        }
        Ok(NaturalKey(parts))
    }
}

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => {
            // 1.0 and 1 collapse to the same key
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

/// Shape of the default value a canonical field takes when it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    List,
    Number,
    /// Present but allowed to be null (e.g. an external catalog id).
    Nullable,
    /// A list of objects that goes through the raw-value normalizer.
    Objects,
}

impl FieldKind {
    pub fn default_value(self) -> Value {
        match self {
            FieldKind::Text => Value::String(String::new()),
            FieldKind::List | FieldKind::Objects => Value::Array(Vec::new()),
            FieldKind::Number => Value::from(0),
            FieldKind::Nullable => Value::Null,
        }
    }
}

/// A nested ordered sub-collection (e.g. episodes inside a series) and the
/// composite key that identifies its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedSpec {
    pub field: String,
    pub key: KeySpec,
    /// List fields of a nested item merged as a union (server lists).
    pub union_fields: Vec<String>,
}

/// Everything the normalizer and merge engine need to know about one kind of
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub key: KeySpec,
    pub fields: Vec<(String, FieldKind)>,
    pub nested: Vec<NestedSpec>,
    pub union_fields: Vec<String>,
    /// Stamp `created_at` and `number_of_episodes` the way the series files do.
    pub track_series_meta: bool,
}

impl RecordSchema {
    /// A schema that only knows its key: no defaults, no nesting.
    pub fn keyed(key: KeySpec) -> Self {
        Self {
            key,
            fields: Vec::new(),
            nested: Vec::new(),
            union_fields: Vec::new(),
            track_series_meta: false,
        }
    }

    pub fn with_key(mut self, key: KeySpec) -> Self {
        self.key = key;
        self
    }
}

/// Collection presets matching the JSON files the scrapers publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Movies,
    Series,
    Events,
    Custom,
}

impl MediaKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "movies" | "movie" | "peliculas" => Some(Self::Movies),
            "series" | "tv" | "anime" => Some(Self::Series),
            "events" | "fixtures" | "eventos" => Some(Self::Events),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Returns the canonical schema for this kind. `Custom` keys on `id`
    /// until the caller supplies its own key.
    pub fn schema(self) -> RecordSchema {
        match self {
            MediaKind::Movies => RecordSchema {
                key: KeySpec::new(["tmdb_id"]),
                fields: vec![
                    ("tmdb_id".into(), FieldKind::Nullable),
                    ("title".into(), FieldKind::Text),
                    ("year".into(), FieldKind::Text),
                    ("servers".into(), FieldKind::Objects),
                    ("poster_url".into(), FieldKind::Text),
                    ("backdrop_url".into(), FieldKind::Text),
                    ("genres_spanish".into(), FieldKind::List),
                    ("overview".into(), FieldKind::Text),
                    ("rating".into(), FieldKind::Number),
                ],
                nested: Vec::new(),
                union_fields: vec!["servers".into()],
                track_series_meta: false,
            },
            MediaKind::Series => RecordSchema {
                key: KeySpec::new(["tmdb_id"]),
                fields: vec![
                    ("tmdb_id".into(), FieldKind::Nullable),
                    ("title".into(), FieldKind::Text),
                    ("year".into(), FieldKind::Text),
                    ("overview".into(), FieldKind::Text),
                    ("rating".into(), FieldKind::Number),
                    ("genres".into(), FieldKind::List),
                    ("episodios".into(), FieldKind::Objects),
                ],
                nested: vec![NestedSpec {
                    field: "episodios".into(),
                    key: KeySpec::new(["season", "episode"]),
                    union_fields: vec!["servidores".into(), "servers".into()],
                }],
                union_fields: Vec::new(),
                track_series_meta: true,
            },
            MediaKind::Events => RecordSchema {
                key: KeySpec::new(["equipos", "hora_utc"]),
                fields: vec![
                    ("equipos".into(), FieldKind::Text),
                    ("liga".into(), FieldKind::Text),
                    ("hora_utc".into(), FieldKind::Text),
                    ("canales".into(), FieldKind::Objects),
                ],
                nested: Vec::new(),
                union_fields: vec!["canales".into()],
                track_series_meta: false,
            },
            MediaKind::Custom => RecordSchema::keyed(KeySpec::new(["id"])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn numeric_and_string_ids_share_a_key() {
        let spec = KeySpec::new(["tmdb_id"]);
        let a = spec.extract(&record(json!({"tmdb_id": 287231}))).unwrap();
        let b = spec.extract(&record(json!({"tmdb_id": " 287231 "}))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn composite_key_needs_every_part() {
        let spec = KeySpec::parse("season, episode").unwrap();
        assert_eq!(spec.fields, vec!["season", "episode"]);

        let key = spec.extract(&record(json!({"season": 1, "episode": 2}))).unwrap();
        assert_eq!(key.to_string(), "1|2");

        let missing = spec.extract(&record(json!({"season": 1, "episode": null})));
        assert_eq!(missing, Err("episode".to_string()));
    }

    #[test]
    fn empty_and_structured_values_are_not_keys() {
        let spec = KeySpec::new(["id"]);
        assert!(spec.extract(&record(json!({"id": ""}))).is_err());
        assert!(spec.extract(&record(json!({"id": [1]}))).is_err());
        assert!(spec.extract(&record(json!({"id": true}))).is_err());
        assert!(spec.extract(&record(json!({}))).is_err());
    }

    #[test]
    fn media_kind_names() {
        assert_eq!(MediaKind::parse("Peliculas"), Some(MediaKind::Movies));
        assert_eq!(MediaKind::parse("anime"), Some(MediaKind::Series));
        assert_eq!(MediaKind::parse("unknown"), None);
        assert!(KeySpec::parse(" , ").is_none());
    }
}
