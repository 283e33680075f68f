//! In-memory datasource over a fixed record set.
//!
//! Records come either inline from configuration:
//!
//! ```toml
//! [datasources.people]
//! type = "memory"
//! records = [
//!     { id = "1", name = "alice", city = "Amsterdam" },
//!     { id = "2", name = "bob", city = "Berlin" },
//! ]
//! ```
//!
//! or from a JSON-lines file (`path = "people.jsonl"`), one object per
//! line. Nested objects are flattened into dotted field paths. A string
//! or numeric `id` key becomes the record id; otherwise the position in
//! the set is used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use trawl_core::{
    Datasource, DatasourceError, Field, Fields, Record, SearchOptions, SearchResponse,
};

use crate::flatten::{flatten, type_name};

/// Type name under which the memory datasource registers.
pub const KIND: &str = "memory";

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Options of a `memory` datasource table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryOptions {
    /// Inline records.
    #[serde(default)]
    pub records: Vec<Value>,
    /// JSON-lines file with additional records.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Capacity of the item stream handed to the search consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Datasource searching a fixed set of records.
#[derive(Debug, Clone)]
pub struct MemoryDatasource {
    records: Arc<Vec<Record>>,
    channel_capacity: usize,
}

impl MemoryDatasource {
    /// Creates a datasource over `records`.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Builds the datasource from its configuration options.
    pub fn from_options(options: MemoryOptions) -> Result<Self, DatasourceError> {
        let mut documents = options.records;
        if let Some(path) = &options.path {
            documents.extend(read_json_lines(path)?);
        }

        let mut records = Vec::with_capacity(documents.len());
        for (position, document) in documents.into_iter().enumerate() {
            let Value::Object(object) = document else {
                return Err(DatasourceError::Internal(format!(
                    "record {position} is not an object"
                )));
            };
            records.push(to_record(position, object));
        }

        Ok(Self {
            records: Arc::new(records),
            channel_capacity: options.channel_capacity.max(1),
        })
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the datasource holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_json_lines(path: &Path) -> Result<Vec<Value>, DatasourceError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DatasourceError::Connection(format!("failed to read {}: {e}", path.display()))
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                DatasourceError::Internal(format!("{}:{}: {e}", path.display(), n + 1))
            })
        })
        .collect()
}

fn to_record(position: usize, mut object: Map<String, Value>) -> Record {
    let id = match object.remove("id") {
        Some(Value::String(id)) => id,
        Some(Value::Number(id)) => id.to_string(),
        Some(other) => {
            object.insert("id".to_string(), other);
            position.to_string()
        }
        None => position.to_string(),
    };
    Record::new(id, flatten(&object))
}

/// Case-insensitive substring match over the string values of a record.
fn record_matches(fields: &Fields, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    fields.values().any(|value| match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(elements) => elements
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.to_lowercase().contains(needle)),
        _ => false,
    })
}

fn normalize_query(query: &str) -> String {
    let query = query.trim();
    if query == "*" {
        String::new()
    } else {
        query.to_lowercase()
    }
}

#[async_trait]
impl Datasource for MemoryDatasource {
    fn kind(&self) -> &str {
        KIND
    }

    fn search(&self, scope: CancellationToken, options: SearchOptions) -> SearchResponse {
        let (tx, response) = SearchResponse::channel(self.channel_capacity);
        let records = Arc::clone(&self.records);
        let needle = normalize_query(&options.query);
        let from = options.from;
        let size = options.size.unwrap_or(usize::MAX);

        tokio::spawn(async move {
            let hits = records
                .iter()
                .filter(|record| record_matches(&record.fields, &needle))
                .skip(from)
                .take(size);

            let mut sent = 0usize;
            for record in hits {
                tokio::select! {
                    biased;
                    () = scope.cancelled() => {
                        debug!(sent, "memory search cancelled");
                        return;
                    }
                    delivered = tx.item(record.clone()) => {
                        if !delivered {
                            return;
                        }
                        sent += 1;
                    }
                }
            }
            debug!(sent, query = %needle, "memory search exhausted");
        });

        response
    }

    async fn get_fields(&self, _scope: CancellationToken) -> Result<Vec<Field>, DatasourceError> {
        let mut paths: BTreeMap<&str, &'static str> = BTreeMap::new();
        for record in &*self.records {
            for (path, value) in &record.fields {
                paths.entry(path.as_str()).or_insert_with(|| type_name(value));
            }
        }
        Ok(paths
            .into_iter()
            .map(|(path, kind)| Field::new(path, kind))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn people() -> MemoryDatasource {
        MemoryDatasource::from_options(MemoryOptions {
            records: vec![
                json!({"id": "1", "name": "Alice", "city": "Amsterdam"}),
                json!({"id": 2, "name": "Bob", "address": {"city": "Berlin"}}),
                json!({"name": "Carol", "tags": ["admin", "ops"]}),
            ],
            path: None,
            channel_capacity: 4,
        })
        .unwrap()
    }

    async fn collect(ds: &MemoryDatasource, options: SearchOptions) -> Vec<Record> {
        let (mut items, _errors) = ds.search(CancellationToken::new(), options).into_parts();
        let mut out = Vec::new();
        while let Some(record) = items.recv().await {
            out.push(record);
        }
        out
    }

    fn query(q: &str) -> SearchOptions {
        SearchOptions {
            query: q.to_string(),
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_record_ids_and_flattening() {
        let ds = people();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.records[0].id, "1");
        assert_eq!(ds.records[1].id, "2");
        assert_eq!(ds.records[1].fields["address.city"], "Berlin");
        assert_eq!(ds.records[2].id, "2");
        assert!(!ds.records[0].fields.contains_key("id"));
    }

    #[test]
    fn test_non_object_record_rejected() {
        let result = MemoryDatasource::from_options(MemoryOptions {
            records: vec![json!("nope")],
            ..MemoryOptions::default()
        });
        assert!(matches!(result, Err(DatasourceError::Internal(_))));
    }

    #[tokio::test]
    async fn test_search_case_insensitive() {
        let ds = people();
        let hits = collect(&ds, query("BERLIN")).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");

        let hits = collect(&ds, query("adm")).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fields["name"], "Carol");
    }

    #[tokio::test]
    async fn test_wildcard_and_paging() {
        let ds = people();
        assert_eq!(collect(&ds, query("*")).await.len(), 3);
        assert_eq!(collect(&ds, query("")).await.len(), 3);

        let page = collect(
            &ds,
            SearchOptions {
                query: "*".into(),
                from: 1,
                size: Some(1),
                ..SearchOptions::default()
            },
        )
        .await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "2");
    }

    #[tokio::test]
    async fn test_cancelled_search_closes_streams() {
        let records = (0..1000)
            .map(|i| Record::new(i.to_string(), Fields::new()))
            .collect();
        let ds = MemoryDatasource::new(records);
        let scope = CancellationToken::new();
        let (mut items, mut errors) = ds.search(scope.clone(), query("")).into_parts();

        assert!(items.recv().await.is_some());
        scope.cancel();

        let mut drained = 0;
        while items.recv().await.is_some() {
            drained += 1;
        }
        assert!(drained < 999);
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_get_fields_union() {
        let fields = people().get_fields(CancellationToken::new()).await.unwrap();
        let paths: Vec<_> = fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["address.city", "city", "name", "tags"]);
        assert_eq!(fields[3].kind, "array");
    }

    #[tokio::test]
    async fn test_json_lines_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "text": "hello world"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": "b", "text": "goodbye"}}"#).unwrap();

        let ds = MemoryDatasource::from_options(MemoryOptions {
            path: Some(file.path().to_path_buf()),
            ..MemoryOptions::default()
        })
        .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(collect(&ds, query("hello")).await[0].id, "a");
    }

    #[test]
    fn test_missing_file() {
        let result = MemoryDatasource::from_options(MemoryOptions {
            path: Some("/nonexistent/trawl.jsonl".into()),
            ..MemoryOptions::default()
        });
        assert!(matches!(result, Err(DatasourceError::Connection(_))));
    }
}
