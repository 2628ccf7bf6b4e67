//! Elasticsearch REST client for the incident mirror.
//!
//! Only the handful of endpoints the engine needs are wrapped: cluster
//! ping, index existence/creation/deletion, `_bulk`, alias management, and
//! `_search` with a `geo_distance` filter.

use async_trait::async_trait;
use crime_radius_incident_models::Coordinate;
use serde_json::{Map, Value, json};

use crate::{BulkOutcome, IndexDocument, IndexError, SearchBackend};

/// Default cluster URL.
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Default alias the engine reads from.
pub const DEFAULT_INDEX: &str = "sf-crimes";

/// Maximum length of an error body kept in [`IndexError::Status`].
const ERROR_BODY_LEN: usize = 500;

/// Talks to an Elasticsearch cluster over HTTP.
#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticsearchBackend {
    /// Creates a client for the cluster at `base_url`.
    ///
    /// Request deadlines are enforced by the engine, not the client.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(3))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The cluster URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

/// Passes successful responses through, turning anything else into
/// [`IndexError::Status`].
async fn check(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LEN {
        let mut end = ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(IndexError::Status {
        operation,
        status,
        body,
    })
}

/// Index settings and mapping for incident documents.
#[must_use]
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "location": { "type": "geo_point" },
                "incident_category": { "type": "keyword" },
                "incident_datetime": { "type": "date" },
                "incident_description": { "type": "text" },
                "latitude": { "type": "float" },
                "longitude": { "type": "float" }
            }
        }
    })
}

/// Builds the NDJSON body of a `_bulk` request.
///
/// # Errors
///
/// Returns [`IndexError::Malformed`] if a document cannot be serialized.
pub fn bulk_body(documents: &[IndexDocument]) -> Result<String, IndexError> {
    let mut body = String::new();
    for doc in documents {
        let action = json!({ "index": { "_id": doc.id } });
        for line in [action.to_string(), encode_source(&doc.source)?] {
            body.push_str(&line);
            body.push('\n');
        }
    }
    Ok(body)
}

fn encode_source(source: &Map<String, Value>) -> Result<String, IndexError> {
    serde_json::to_string(source).map_err(|e| IndexError::Malformed {
        message: format!("unencodable document: {e}"),
    })
}

/// Counts accepted and rejected items in a `_bulk` response.
///
/// # Errors
///
/// Returns [`IndexError::Malformed`] if the response has no `items` array.
pub fn parse_bulk_response(body: &Value) -> Result<BulkOutcome, IndexError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Malformed {
            message: "bulk response missing 'items' array".to_string(),
        })?;

    let mut outcome = BulkOutcome::default();
    for item in items {
        let result = item.get("index").unwrap_or(item);
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if result.get("error").is_some() || !(200..300).contains(&status) {
            outcome.failed += 1;
        } else {
            outcome.indexed += 1;
        }
    }
    Ok(outcome)
}

/// Builds a `_search` body that filters on distance from `center`.
#[must_use]
pub fn geo_distance_query(center: Coordinate, radius_miles: f64, size: usize) -> Value {
    json!({
        "size": size,
        "query": {
            "bool": {
                "filter": {
                    "geo_distance": {
                        "distance": format!("{radius_miles}mi"),
                        "location": {
                            "lat": center.latitude,
                            "lon": center.longitude
                        }
                    }
                }
            }
        }
    })
}

/// Extracts `_id` and `_source` from each search hit.
///
/// # Errors
///
/// Returns [`IndexError::Malformed`] if the response lacks `hits.hits` or a
/// hit lacks an `_id` or object `_source`.
pub fn parse_hits(body: &Value) -> Result<Vec<IndexDocument>, IndexError> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Malformed {
            message: "search response missing 'hits.hits' array".to_string(),
        })?;

    hits.iter()
        .map(|hit| {
            let id = hit.get("_id").and_then(Value::as_str);
            let source = hit.get("_source").and_then(Value::as_object);
            match (id, source) {
                (Some(id), Some(source)) => Ok(IndexDocument {
                    id: id.to_string(),
                    source: source.clone(),
                }),
                _ => Err(IndexError::Malformed {
                    message: "search hit missing '_id' or '_source'".to_string(),
                }),
            }
        })
        .collect()
}

/// Names of the indices an alias lookup reported.
fn alias_targets(body: &Value) -> Vec<String> {
    body.as_object()
        .map(|indices| indices.keys().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn ping(&self) -> Result<(), IndexError> {
        let response = self.client.get(&self.base_url).send().await?;
        check(response, "ping").await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, IndexError> {
        let response = self.client.head(self.url(name)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, "index exists").await?;
        Ok(true)
    }

    async fn create_index(&self, index: &str) -> Result<(), IndexError> {
        let response = self
            .client
            .put(self.url(index))
            .json(&index_mapping())
            .send()
            .await?;
        check(response, "create index").await?;
        log::info!("Created search index {index} with geo_point mapping");
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<BulkOutcome, IndexError> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let response = self
            .client
            .post(self.url(&format!("{index}/_bulk")))
            .query(&[("refresh", "wait_for")])
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(documents)?)
            .send()
            .await?;
        let body: Value = check(response, "bulk").await?.json().await?;
        parse_bulk_response(&body)
    }

    async fn point_alias(&self, alias: &str, index: &str) -> Result<Vec<String>, IndexError> {
        let response = self
            .client
            .get(self.url(&format!("_alias/{alias}")))
            .send()
            .await?;
        let previous = if response.status() == reqwest::StatusCode::NOT_FOUND {
            Vec::new()
        } else {
            let body: Value = check(response, "get alias").await?.json().await?;
            alias_targets(&body)
        };

        let mut actions: Vec<Value> = previous
            .iter()
            .filter(|old| *old != index)
            .map(|old| json!({ "remove": { "index": old, "alias": alias } }))
            .collect();
        actions.push(json!({ "add": { "index": index, "alias": alias } }));

        let response = self
            .client
            .post(self.url("_aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        check(response, "update aliases").await?;

        Ok(previous.into_iter().filter(|old| old != index).collect())
    }

    async fn delete_index(&self, index: &str) -> Result<(), IndexError> {
        let response = self.client.delete(self.url(index)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "delete index").await?;
        Ok(())
    }

    async fn geo_distance(
        &self,
        index: &str,
        center: Coordinate,
        radius_miles: f64,
        size: usize,
    ) -> Result<Vec<IndexDocument>, IndexError> {
        let response = self
            .client
            .post(self.url(&format!("{index}/_search")))
            .json(&geo_distance_query(center, radius_miles, size))
            .send()
            .await?;
        let body: Value = check(response, "search").await?.json().await?;
        parse_hits(&body)
    }
}
