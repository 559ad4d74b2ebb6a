use catalog_sync::config::Config;
use catalog_sync::merge::{MergeOptions, Merger};
use catalog_sync::models::{KeySpec, MediaKind, Record, RecordSchema};
use catalog_sync::normalize::normalize_objects;
use catalog_sync::pipeline::Pipeline;
use catalog_sync::store::{self, SaveOptions};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

fn records(value: Value) -> Vec<Record> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_object().cloned().expect("object"))
        .collect()
}

fn to_value(records: &[Record]) -> Value {
    Value::Array(records.iter().cloned().map(Value::Object).collect())
}

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("catalog-sync-it-{}-{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn movie_schema() -> RecordSchema {
    let mut schema = RecordSchema::keyed(KeySpec::new(["id"]));
    schema.union_fields = vec!["servers".into()];
    schema
}

fn existing_batch() -> Vec<Record> {
    records(json!([
        {"id": 1, "title": "A", "year": "", "servers": []},
        {"id": 2, "title": "B", "year": "2001", "servers": [{"url": "b1"}]},
        {"id": 3, "title": "", "rating": 0}
    ]))
}

fn incoming_batch() -> Vec<Record> {
    records(json!([
        {"id": 1, "title": "", "year": "1999", "servers": [{"url": "x"}]},
        {"id": 3, "title": "C", "rating": 8.1},
        {"id": 4, "title": "D"},
        {"id": "2", "title": "B2", "servers": [{"url": "b1"}, {"url": "b2"}]},
        {"title": "no key"}
    ]))
}

#[test]
fn merging_twice_equals_merging_once() {
    let schema = movie_schema();
    for force_update in [false, true] {
        let merger = Merger::new(&schema, MergeOptions { force_update });
        let once = merger.merge(existing_batch(), incoming_batch());
        let twice = merger.merge(once.records.clone(), incoming_batch());
        assert_eq!(to_value(&once.records), to_value(&twice.records), "force={force_update}");
        assert_eq!(twice.report.inserted, 0);
        assert_eq!(twice.report.updated, 0);
    }
}

#[test]
fn known_values_survive_empty_incoming_values() {
    let schema = movie_schema();
    let merger = Merger::new(&schema, MergeOptions::default());
    let out = merger.merge(existing_batch(), incoming_batch());
    let by_id = |id: i64| {
        out.records
            .iter()
            .find(|r| r["id"] == json!(id))
            .cloned()
            .unwrap()
    };

    assert_eq!(by_id(1)["title"], json!("A"));
    assert_eq!(by_id(1)["year"], json!("1999"));
    assert_eq!(by_id(2)["title"], json!("B"));
    assert_eq!(by_id(2)["servers"], json!([{"url": "b1"}, {"url": "b2"}]));
    assert_eq!(by_id(3)["title"], json!("C"));
    assert_eq!(by_id(3)["rating"], json!(8.1));
    assert_eq!(out.report.skipped.len(), 1);
}

#[test]
fn output_never_repeats_a_key() {
    let schema = movie_schema();
    let merger = Merger::new(&schema, MergeOptions::default());
    let mut existing = existing_batch();
    existing.extend(existing_batch());
    let out = merger.merge_batches(existing, vec![incoming_batch(), incoming_batch()]);

    let keys: Vec<_> = out
        .records
        .iter()
        .map(|r| schema.key.extract(r).unwrap())
        .collect();
    let unique: HashSet<_> = keys.iter().cloned().collect();
    assert_eq!(keys.len(), unique.len());
    assert_eq!(keys.len(), 4);
}

#[test]
fn scenario_gap_fill() {
    let schema = movie_schema();
    let out = Merger::new(&schema, MergeOptions::default()).merge(
        records(json!([{"id": 1, "title": "A", "servers": []}])),
        records(json!([{"id": 1, "title": "", "servers": [{"url": "x"}]}])),
    );
    assert_eq!(out.records[0]["title"], json!("A"));
    assert_eq!(out.records[0]["servers"], json!([{"url": "x"}]));
}

#[test]
fn scenario_insert_into_empty() {
    let schema = movie_schema();
    let out = Merger::new(&schema, MergeOptions::default())
        .merge(Vec::new(), records(json!([{"id": 7, "title": "New"}])));
    assert_eq!(to_value(&out.records), json!([{"id": 7, "title": "New"}]));
}

#[test]
fn scenario_servers_from_strings() {
    assert_eq!(
        to_value(&normalize_objects(&json!(r#"[{"url":"a"}]"#))),
        json!([{"url": "a"}])
    );
    assert!(normalize_objects(&json!("not json")).is_empty());
}

#[test]
fn scenario_missing_collection_file() {
    let dir = scratch("missing");
    assert!(store::load(&dir.join("absent.json")).is_empty());
}

#[test]
fn save_then_load_round_trips() {
    let dir = scratch("roundtrip");
    let path = dir.join("peliculas.json");
    let collection = records(json!([
        {"tmdb_id": 1, "title": "Ñandú", "servers": [{"url": "x", "quality": "HD"}], "rating": 7.5},
        {"tmdb_id": 2, "title": "", "servers": [], "genres_spanish": ["Drama"], "extra": null}
    ]));
    store::save(&path, &collection, SaveOptions::default()).unwrap();
    assert_eq!(store::load(&path), collection);
}

#[test]
fn scenario_episode_across_two_runs() {
    let dir = scratch("episodes");
    let config = Config {
        collection_path: dir.join("series.json").to_string_lossy().into_owned(),
        kind: MediaKind::Series,
        ..Config::default()
    };
    let path = config.collection_path();
    let incoming = dir.join("incoming.json");
    let pipeline = Pipeline::new(config);

    fs::write(
        &incoming,
        json!([{
            "tmdb_id": 55,
            "title": "Serie",
            "episodios": [{"season": 1, "episode": 1, "servidores": [{"url": "s1"}]}]
        }])
        .to_string(),
    )
    .unwrap();
    let first = pipeline.merge_file(&incoming).unwrap();
    assert_eq!(first.merge.inserted, 1);

    fs::write(
        &incoming,
        json!([{
            "tmdb_id": "55",
            "title": "",
            "episodios": [{"season": 1, "episode": 1, "servidores": "[{\"url\":\"s1\"},{\"url\":\"s2\"}]"}]
        }])
        .to_string(),
    )
    .unwrap();
    let second = pipeline.merge_file(&incoming).unwrap();
    assert_eq!(second.merge.updated, 1);
    assert!(second.save.as_ref().unwrap().backup.is_some());

    let saved = store::load(&path);
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["title"], json!("Serie"));
    let episodes = saved[0]["episodios"].as_array().unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0]["servidores"], json!([{"url": "s1"}, {"url": "s2"}]));
    assert_eq!(saved[0]["number_of_episodes"], json!(1));
}

#[test]
fn events_merge_channels_by_fixture() {
    let schema = MediaKind::Events.schema();
    let merger = Merger::new(&schema, MergeOptions::default());
    let out = merger.merge(
        records(json!([{"equipos": "Boca vs River", "hora_utc": "2026-10-18T20:00:00Z", "canales": [{"url": "c1"}]}])),
        records(json!([
            {"equipos": "Boca vs River", "hora_utc": "2026-10-18T20:00:00Z", "canales": [{"url": "c1"}, {"url": "c2"}]},
            {"equipos": "Boca vs River", "hora_utc": "", "canales": [{"url": "c3"}]}
        ])),
    );
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0]["canales"], json!([{"url": "c1"}, {"url": "c2"}]));
    assert_eq!(out.report.skipped.len(), 1);
    assert_eq!(out.report.skipped[0].missing_field, "hora_utc");
}

#[test]
fn episodes_stored_as_a_string_still_gain_new_episodes() {
    let dir = scratch("string-episodes");
    let config = Config {
        collection_path: dir.join("series.json").to_string_lossy().into_owned(),
        kind: MediaKind::Series,
        ..Config::default()
    };
    let path = config.collection_path();
    fs::write(
        &path,
        json!([{"tmdb_id": 1, "title": "Show", "episodios": "[{\"season\":1,\"episode\":1}]"}]).to_string(),
    )
    .unwrap();

    let incoming = dir.join("incoming.json");
    fs::write(
        &incoming,
        json!([{"tmdb_id": 1, "episodios": [{"season": 1, "episode": 2}]}]).to_string(),
    )
    .unwrap();
    let summary = Pipeline::new(config).merge_file(&incoming).unwrap();
    assert_eq!(summary.repaired, 1);

    let saved = store::load(&path);
    let episodes = saved[0]["episodios"].as_array().unwrap();
    let numbers: Vec<_> = episodes.iter().map(|e| e["episode"].clone()).collect();
    assert_eq!(numbers, vec![json!(1), json!(2)]);
    assert_eq!(saved[0]["number_of_episodes"], json!(2));
    assert_eq!(saved[0]["title"], json!("Show"));
}
