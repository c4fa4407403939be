use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::demo;
use super::model::{Datapoint, Experiment, Value};

// ---------------------------------------------------------------------------
// Fetch outcome
// ---------------------------------------------------------------------------

/// Outcome of handing a source to a fetcher that may not recognize it.
///
/// `DoesNotApply` is an expected condition: the dispatcher moves on to the
/// next fetcher. `Internal` aborts dispatch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetcher does not apply: {0}")]
    DoesNotApply(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type FetchResult = Result<Experiment, FetchError>;

/// A fetcher converts one source format into an [`Experiment`]. Pure: no
/// state is kept between invocations.
pub type Fetcher = fn(&str) -> FetchResult;

/// All fetchers, in dispatch order.
pub const FETCHERS: &[(&str, Fetcher)] = &[
    ("demo", demo::load_demo),
    ("csv", load_csv),
    ("json", load_json),
    ("log", load_log),
];

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolve a source locator by trying each fetcher in turn.
///
/// "Does not apply" from one fetcher is swallowed and the next one is tried;
/// internal errors propagate immediately.
pub fn load_uri(uri: &str) -> FetchResult {
    for (name, fetcher) in FETCHERS {
        match fetcher(uri) {
            Ok(xp) => {
                debug!("fetcher '{name}' handled '{uri}' ({} rows)", xp.len());
                return Ok(xp);
            }
            Err(FetchError::DoesNotApply(reason)) => {
                debug!("fetcher '{name}' skipped '{uri}': {reason}");
            }
            Err(err) => return Err(err),
        }
    }
    Err(FetchError::DoesNotApply(format!(
        "no fetcher recognizes '{uri}'"
    )))
}

/// Read a file, mapping "file not found" to `DoesNotApply` and any other
/// I/O failure to an internal error.
fn read_source(path: &Path) -> Result<String, FetchError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
            FetchError::DoesNotApply(format!("no such file: {}", path.display())),
        ),
        Err(err) => Err(FetchError::Internal(
            anyhow::Error::new(err).context(format!("reading {}", path.display())),
        )),
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// CSV fetcher
// ---------------------------------------------------------------------------

/// Load a `.csv` file with a header row. Each data row becomes one
/// datapoint; cell types are inferred per value (int, float, bool, string;
/// empty → null). A `uid` / `from_uid` column is hoisted onto the datapoint.
pub fn load_csv(uri: &str) -> FetchResult {
    let path = Path::new(uri);
    if !has_extension(path, "csv") {
        return Err(FetchError::DoesNotApply(format!("not a .csv path: {uri}")));
    }
    let text = read_source(path)?;

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(|s| s.to_string()).collect(),
        Err(err) => {
            return Err(FetchError::DoesNotApply(format!(
                "cannot read CSV headers: {err}"
            )))
        }
    };

    let mut rows: Vec<BTreeMap<String, Value>> = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(err) => {
                return Err(FetchError::DoesNotApply(format!(
                    "CSV row {row_no} unparsable: {err}"
                )))
            }
        };
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), Value::infer(cell)))
            .collect();
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(FetchError::DoesNotApply(format!("no data rows in {uri}")));
    }
    Ok(Experiment::from_rows(rows))
}

// ---------------------------------------------------------------------------
// JSON fetcher
// ---------------------------------------------------------------------------

/// Load a `.json` file holding an array of objects,
/// `[{ "metric": 1.0, ... }, ...]`. Each object becomes one datapoint.
pub fn load_json(uri: &str) -> FetchResult {
    let path = Path::new(uri);
    if !has_extension(path, "json") {
        return Err(FetchError::DoesNotApply(format!("not a .json path: {uri}")));
    }
    let text = read_source(path)?;

    let root: JsonValue = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(err) => {
            return Err(FetchError::DoesNotApply(format!(
                "cannot parse JSON: {err}"
            )))
        }
    };
    let records = match root.as_array() {
        Some(arr) if !arr.is_empty() => arr,
        _ => {
            return Err(FetchError::DoesNotApply(format!(
                "expected a non-empty top-level JSON array in {uri}"
            )))
        }
    };

    let mut rows: Vec<BTreeMap<String, Value>> = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = match rec.as_object() {
            Some(o) => o,
            None => {
                return Err(FetchError::DoesNotApply(format!(
                    "row {i} is not a JSON object"
                )))
            }
        };
        rows.push(
            obj.iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        );
    }

    Ok(Experiment::from_rows(rows))
}

// ---------------------------------------------------------------------------
// Log-text fetcher
// ---------------------------------------------------------------------------

/// Key whose value identifies one training iteration across tags.
const ITERATION_KEY: &str = "epoch";

/// Load a training log file and extract its per-epoch metric records.
pub fn load_log(uri: &str) -> FetchResult {
    let text = read_source(Path::new(uri))?;
    load_log_text(&text)
}

/// Extract metric records from raw training-log text.
///
/// Lines of interest carry `| INFO |` followed by `<tag> | {<json>}`, e.g.
///
/// ```text
/// 2020-04-22 07:41:45 | INFO | train | {"epoch": 1, "train_loss": "1.607"}
/// 2020-04-22 07:41:47 | INFO | test | {"epoch": 1, "test_loss": "1.596"}
/// ```
///
/// Keys gain a `<tag>_` prefix unless they already start with the tag.
/// Records sharing the same `epoch` value collapse into a single datapoint
/// (the `train` and `test` lines above become one row); rows come out in
/// order of first appearance of each epoch, each linked to the previous one
/// via `from_uid`. Unstructured lines, malformed JSON, and records without
/// an `epoch` are skipped. No epoch records at all → does not apply.
pub fn load_log_text(text: &str) -> FetchResult {
    let mut index: BTreeMap<Value, usize> = BTreeMap::new();
    let mut rows: Vec<BTreeMap<String, Value>> = Vec::new();
    let mut epochs: Vec<Value> = Vec::new();

    for line in text.lines() {
        let Some((tag, obj)) = parse_metric_line(line) else {
            continue;
        };
        let Some(epoch_json) = obj.get(ITERATION_KEY) else {
            debug!("skipping '{tag}' record without '{ITERATION_KEY}' key");
            continue;
        };
        let epoch = Value::from_json(epoch_json);

        let idx = *index.entry(epoch.clone()).or_insert_with(|| {
            rows.push(BTreeMap::from([(
                ITERATION_KEY.to_string(),
                epoch.clone(),
            )]));
            epochs.push(epoch.clone());
            rows.len() - 1
        });

        for (key, val) in &obj {
            if key == ITERATION_KEY {
                continue;
            }
            let column = if key.starts_with(tag) {
                key.clone()
            } else {
                format!("{tag}_{key}")
            };
            rows[idx].insert(column, Value::from_json(val));
        }
    }

    if rows.is_empty() {
        return Err(FetchError::DoesNotApply(
            "no epoch records found in log text".to_string(),
        ));
    }

    let mut datapoints = Vec::with_capacity(rows.len());
    for (i, values) in rows.into_iter().enumerate() {
        let mut dp = Datapoint::new(epochs[i].to_string(), values);
        if i > 0 {
            dp = dp.with_parent(epochs[i - 1].to_string());
        }
        datapoints.push(dp);
    }
    Ok(Experiment::from_datapoints(datapoints))
}

/// Pick the `<tag>` and embedded JSON object out of one log line.
/// Returns `None` for unstructured or malformed lines.
fn parse_metric_line(line: &str) -> Option<(&str, serde_json::Map<String, JsonValue>)> {
    let info = line.find("| INFO |")?;
    let rest = &line[info + "| INFO |".len()..];

    let (tag, payload) = rest.split_once('|')?;
    let tag = tag.trim();
    if tag.is_empty()
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }

    let payload = payload.trim();
    if !payload.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<JsonValue>(payload) {
        Ok(JsonValue::Object(obj)) => Some((tag, obj)),
        Ok(_) => None,
        Err(err) => {
            debug!("skipping line with malformed JSON payload: {err}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    // -- CSV --

    #[test]
    fn csv_yields_one_datapoint_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("name,kcal,protein\n");
        for i in 0..7637 {
            content.push_str(&format!("food_{i},{},{:.1}\n", i % 900, (i % 50) as f64 / 2.0));
        }
        let path = write_fixture(&dir, "nutrients.csv", &content);

        let xp = load_csv(&path).unwrap().validate().unwrap();
        assert_eq!(xp.len(), 7637);
        assert_eq!(
            xp.column_names,
            vec!["kcal".to_string(), "name".to_string(), "protein".to_string()]
        );
        assert_eq!(xp.datapoints[0].values["kcal"], Value::Integer(0));
    }

    #[test]
    fn csv_missing_file_does_not_apply() {
        let err = load_csv("file_does_not_exist.csv").unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn csv_wrong_extension_does_not_apply() {
        let err = load_csv("something_else").unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn csv_ragged_rows_do_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "bad.csv", "a,b\n1,2\n1,2,3,4\n");
        let err = load_csv(&path).unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn csv_header_only_does_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "empty.csv", "a,b\n");
        let err = load_csv(&path).unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    // -- JSON --

    #[test]
    fn json_objects_become_datapoints_with_null_fill() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "xp.json",
            r#"[{"id": 1, "metric": 1.0, "param": "abc"},
                {"id": 2, "metric": 1.0, "param": "abc", "option": "def"}]"#,
        );

        let xp = load_json(&path).unwrap().validate().unwrap();
        assert_eq!(xp.len(), 2);
        assert_eq!(
            xp.column_names,
            vec![
                "id".to_string(),
                "metric".to_string(),
                "option".to_string(),
                "param".to_string()
            ]
        );
        // `option` only exists in the second object; the first row carries
        // an explicit null.
        assert_eq!(xp.datapoints[0].values["option"], Value::Null);
        assert_eq!(xp.datapoints[1].values["option"], Value::String("def".into()));
    }

    #[test]
    fn json_malformed_does_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "bad.json", "{not json");
        let err = load_json(&path).unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn json_non_array_does_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "obj.json", r#"{"id": 1}"#);
        let err = load_json(&path).unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn json_missing_file_does_not_apply() {
        let err = load_json("something_else").unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    // -- Log text --

    fn sample_log(epochs: usize) -> String {
        let mut log = String::from(
            "2024-03-02 07:41:19 | INFO | runner.tasks.setup | Loaded train with #samples: 4800\n",
        );
        for epoch in 1..=epochs {
            log.push_str(&format!(
                "2024-03-02 07:41:45 | INFO | train | {{\"epoch\": {epoch}, \"train_loss\": \"{:.3}\", \"train_accuracy\": {:.2}}}\n",
                1.7 - epoch as f64 * 0.02,
                30.0 + epoch as f64,
            ));
            log.push_str(&format!(
                "2024-03-02 07:41:47 | INFO | test | {{\"epoch\": {epoch}, \"test_loss\": \"{:.3}\", \"test_accuracy\": {:.2}}}\n",
                1.6 - epoch as f64 * 0.02,
                33.0 + epoch as f64,
            ));
            log.push_str(
                "2024-03-02 07:41:55 | INFO | runner.checkpoint | saved checkpoint (writing took 7.6 seconds)\n",
            );
        }
        log
    }

    #[test]
    fn log_merges_tags_sharing_an_epoch() {
        let mut log = sample_log(10);
        // An extra tag on the last epoch merges into the existing row.
        log.push_str(
            "2024-03-02 07:47:12 | INFO | valid | {\"epoch\": 10, \"valid_loss\": \"1.481\", \"valid_accuracy\": 49.83}\n",
        );
        // Malformed JSON must be skipped, not fatal.
        log.push_str("2024-03-02 07:47:13 | INFO | valid | {\"epoch\": 11, broken\n");

        let xp = load_log_text(&log).unwrap().validate().unwrap();
        assert_eq!(xp.len(), 10);

        let last = xp.datapoints.last().unwrap();
        assert_eq!(last.values["epoch"], Value::Integer(10));
        assert_eq!(last.values["valid_loss"], Value::String("1.481".into()));
        assert_eq!(last.values["valid_accuracy"], Value::Float(49.83));
        assert!(last.values.contains_key("train_loss"));
        assert!(last.values.contains_key("test_loss"));

        // Rows chain to the previous epoch.
        assert_eq!(xp.datapoints[0].from_uid, None);
        assert_eq!(xp.datapoints[9].from_uid.as_deref(), Some("9"));
    }

    #[test]
    fn log_keys_already_prefixed_are_kept() {
        let log = "x | INFO | train | {\"epoch\": 1, \"train_loss\": 0.5, \"wall\": 12}\n";
        let xp = load_log_text(log).unwrap();
        let dp = &xp.datapoints[0];
        assert!(dp.values.contains_key("train_loss"));
        assert!(dp.values.contains_key("train_wall"));
    }

    #[test]
    fn log_without_epoch_records_does_not_apply() {
        let log = "plain progress line\n\
                   2024-03-02 | INFO | train | {\"step\": 5, \"loss\": 0.1}\n";
        let err = load_log_text(log).unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn log_fetcher_is_deterministic() {
        let log = sample_log(4);
        assert_eq!(load_log_text(&log).unwrap(), load_log_text(&log).unwrap());
    }

    // -- Dispatcher --

    #[test]
    fn dispatcher_falls_through_to_the_matching_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "xp.json", r#"[{"id": 1}]"#);
        let xp = load_uri(&path).unwrap().validate().unwrap();
        assert_eq!(xp.len(), 1);
    }

    #[test]
    fn dispatcher_reports_does_not_apply_for_unknown_sources() {
        let err = load_uri("no_fetcher_handles_this").unwrap_err();
        assert!(matches!(err, FetchError::DoesNotApply(_)));
    }

    #[test]
    fn fetchers_are_idempotent_on_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "xp.csv", "a,b\n1,x\n2,y\n");
        assert_eq!(load_csv(&path).unwrap(), load_csv(&path).unwrap());
    }
}
