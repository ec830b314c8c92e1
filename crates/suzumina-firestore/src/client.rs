//! Firestore REST client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::value::{record_from_rest, record_to_rest};
use crate::{DEFAULT_DATABASE, Document, DocumentStore, Filter, Query, StoreError, WriteOp};

/// Where the client gets its bearer token from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A fixed access token.
    Static(String),
    /// The local emulator, which accepts the `owner` token.
    Emulator,
    /// `gcloud auth print-access-token`, fetched once and cached.
    Gcloud,
}

/// Client for the Firestore v1 REST API.
pub struct FirestoreClient {
    http: Client,
    base_url: String,
    project_id: String,
    token_source: TokenSource,
    token: Arc<RwLock<Option<String>>>,
}

impl FirestoreClient {
    /// Production API root.
    pub const PRODUCTION_URL: &'static str = "https://firestore.googleapis.com/v1";

    /// Create a client for the given API root (ending in `/v1`).
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token_source: TokenSource,
    ) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            token_source,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Client for the production API.
    pub fn production(project_id: impl Into<String>, token_source: TokenSource) -> Self {
        Self::new(Self::PRODUCTION_URL, project_id, token_source)
    }

    /// Client for a local emulator at `host:port`.
    pub fn emulator(host: &str, project_id: impl Into<String>) -> Self {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/v1", host.trim_end_matches('/'))
        } else {
            format!("http://{}/v1", host)
        };
        Self::new(base, project_id, TokenSource::Emulator)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resource name of the database's document root.
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, DEFAULT_DATABASE
        )
    }

    /// Full resource name of a document.
    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_root(), collection, id)
    }

    /// Get a bearer token for the next request.
    async fn access_token(&self) -> Result<String, StoreError> {
        match &self.token_source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Emulator => Ok("owner".to_string()),
            TokenSource::Gcloud => {
                if let Some(token) = self.token.read().await.as_ref() {
                    return Ok(token.clone());
                }

                let output = Command::new("gcloud")
                    .args(["auth", "print-access-token"])
                    .output()
                    .await
                    .map_err(|e| StoreError::Auth(format!("failed to run gcloud: {}", e)))?;

                if !output.status.success() {
                    return Err(StoreError::Auth(format!(
                        "gcloud auth print-access-token failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }

                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if token.is_empty() {
                    return Err(StoreError::Auth("gcloud returned an empty token".to_string()));
                }

                debug!("obtained access token from gcloud");
                *self.token.write().await = Some(token.clone());
                Ok(token)
            }
        }
    }

    /// Build the `structuredQuery` body for a collection query.
    fn structured_query(&self, collection: &str, query: &Query) -> Value {
        let mut structured = Map::new();
        structured.insert("from".into(), json!([{ "collectionId": collection }]));

        match &query.filter {
            Some(Filter::NotNull(field)) => {
                // Inequality filters must be ordered on the filtered field first,
                // so filtered queries are left unordered and uncursored.
                structured.insert(
                    "where".into(),
                    json!({
                        "unaryFilter": {
                            "op": "IS_NOT_NULL",
                            "field": { "fieldPath": quote_field_path(field) }
                        }
                    }),
                );
            }
            None => {
                structured.insert(
                    "orderBy".into(),
                    json!([{ "field": { "fieldPath": "__name__" }, "direction": "ASCENDING" }]),
                );
                if let Some(cursor) = &query.start_after {
                    structured.insert(
                        "startAt".into(),
                        json!({
                            "values": [{ "referenceValue": self.document_name(collection, cursor) }],
                            "before": false
                        }),
                    );
                }
            }
        }

        if let Some(limit) = query.limit {
            structured.insert("limit".into(), json!(limit));
        }

        json!({ "structuredQuery": Value::Object(structured) })
    }

    /// Encode one write for `documents:commit`.
    fn encode_write(&self, write: &WriteOp) -> Value {
        match write {
            WriteOp::Merge {
                collection,
                id,
                fields,
            } => {
                let mask: Vec<String> = fields.keys().map(|k| quote_field_path(k)).collect();
                json!({
                    "update": {
                        "name": self.document_name(collection, id),
                        "fields": record_to_rest(fields)
                    },
                    "updateMask": { "fieldPaths": mask }
                })
            }
            // A masked field that is absent from `fields` is deleted.
            WriteOp::DeleteField {
                collection,
                id,
                field,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": {}
                },
                "updateMask": { "fieldPaths": [quote_field_path(field)] },
                "currentDocument": { "exists": true }
            }),
        }
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, StoreError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", token))
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                StoreError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Some(api_error) = parse_api_error(&text) {
                return Err(StoreError::Api {
                    status: api_error.status.unwrap_or_else(|| status.to_string()),
                    message: api_error.message,
                });
            }

            return Err(StoreError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}/{}:runQuery", self.base_url, self.documents_root());
        let body = self.structured_query(collection, query);

        let items: Vec<RunQueryItem> = self.post(&url, &body).await?;

        // Items without a document only carry a read time (empty result).
        let documents = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|doc| {
                let id = doc
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(&doc.name)
                    .to_string();
                Ok(Document::new(id, record_from_rest(&doc.fields)?))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        debug!(collection, returned = documents.len(), "ran query");
        Ok(documents)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }

        let url = format!("{}/{}:commit", self.base_url, self.documents_root());
        let encoded: Vec<Value> = writes.iter().map(|w| self.encode_write(w)).collect();
        let _: Value = self.post(&url, &json!({ "writes": encoded })).await?;

        info!(writes = writes.len(), "committed write batch");
        Ok(())
    }
}

/// Quote a top-level field name for use in a field path.
///
/// Simple names (letters, digits, underscores, not starting with a digit)
/// are used as-is; anything else is wrapped in backticks.
pub fn quote_field_path(field: &str) -> String {
    let simple = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// One element of a `runQuery` response stream.
#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<RestDocument>,
}

/// A document as returned by the REST API.
#[derive(Debug, Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Error payload returned by Google APIs.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

/// Errors arrive either as an object or, for streamed queries, as a one-element array.
fn parse_api_error(text: &str) -> Option<ApiError> {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(text) {
        return Some(envelope.error);
    }
    serde_json::from_str::<Vec<ApiErrorEnvelope>>(text)
        .ok()
        .and_then(|mut items| items.pop())
        .map(|envelope| envelope.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldValue, RawRecord};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RUN_QUERY_PATH: &str = "/v1/projects/test-project/databases/(default)/documents:runQuery";
    const COMMIT_PATH: &str = "/v1/projects/test-project/databases/(default)/documents:commit";

    fn client(server: &MockServer) -> FirestoreClient {
        FirestoreClient::new(
            format!("{}/v1", server.uri()),
            "test-project",
            TokenSource::Static("test-token".to_string()),
        )
    }

    #[test]
    fn test_emulator_base_url() {
        let client = FirestoreClient::emulator("localhost:8080", "demo");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
        assert_eq!(client.project_id(), "demo");
    }

    #[test]
    fn test_quote_field_path() {
        assert_eq!(quote_field_path("_v2Migration"), "_v2Migration");
        assert_eq!(quote_field_path("title"), "title");
        assert_eq!(quote_field_path("1st"), "`1st`");
        assert_eq!(quote_field_path("has-dash"), "`has-dash`");
    }

    #[test]
    fn test_structured_query_with_cursor() {
        let client = FirestoreClient::new("http://x/v1", "p", TokenSource::Emulator);
        let body = client.structured_query("videos", &Query::page(100).start_after(Some("v9".into())));

        assert_eq!(
            body,
            json!({
                "structuredQuery": {
                    "from": [{ "collectionId": "videos" }],
                    "orderBy": [{ "field": { "fieldPath": "__name__" }, "direction": "ASCENDING" }],
                    "startAt": {
                        "values": [{ "referenceValue": "projects/p/databases/(default)/documents/videos/v9" }],
                        "before": false
                    },
                    "limit": 100
                }
            })
        );
    }

    #[test]
    fn test_structured_query_with_filter_is_unordered() {
        let client = FirestoreClient::new("http://x/v1", "p", TokenSource::Emulator);
        let body = client.structured_query("videos", &Query::not_null("_v2Migration"));
        let structured = &body["structuredQuery"];

        assert!(structured.get("orderBy").is_none());
        assert!(structured["where"].get("fieldFilter").is_none());
        assert_eq!(
            structured["where"],
            json!({
                "unaryFilter": {
                    "op": "IS_NOT_NULL",
                    "field": { "fieldPath": "_v2Migration" }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_not_null_query_sends_unary_filter() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(RUN_QUERY_PATH))
            .and(body_partial_json(json!({
                "structuredQuery": {
                    "from": [{ "collectionId": "audioButtons" }],
                    "where": {
                        "unaryFilter": {
                            "op": "IS_NOT_NULL",
                            "field": { "fieldPath": "_v2Migration" }
                        }
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "document": {
                    "name": "projects/test-project/databases/(default)/documents/audioButtons/b1",
                    "fields": { "_v2Migration": { "mapValue": { "fields": {} } } }
                },
                "readTime": "2024-01-01T00:00:00Z"
            }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let docs = client(&mock_server)
            .query("audioButtons", &Query::not_null("_v2Migration"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "b1");
    }

    #[test]
    fn test_delete_field_write_has_precondition() {
        let client = FirestoreClient::new("http://x/v1", "p", TokenSource::Emulator);
        let write = client.encode_write(&WriteOp::DeleteField {
            collection: "videos".into(),
            id: "v1".into(),
            field: "_v2Migration".into(),
        });

        assert_eq!(write["updateMask"]["fieldPaths"], json!(["_v2Migration"]));
        assert_eq!(write["update"]["fields"], json!({}));
        assert_eq!(write["currentDocument"]["exists"], json!(true));
    }

    #[tokio::test]
    async fn test_query_decodes_documents() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(RUN_QUERY_PATH))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "structuredQuery": { "from": [{ "collectionId": "videos" }], "limit": 2 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "document": {
                        "name": "projects/test-project/databases/(default)/documents/videos/v1",
                        "fields": { "title": { "stringValue": "T" } }
                    },
                    "readTime": "2024-01-01T00:00:00Z"
                },
                {
                    "document": {
                        "name": "projects/test-project/databases/(default)/documents/videos/v2"
                    },
                    "readTime": "2024-01-01T00:00:00Z"
                }
            ])))
            .mount(&mock_server)
            .await;

        let docs = client(&mock_server)
            .query("videos", &Query::page(2))
            .await
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "v1");
        assert_eq!(docs[0].get("title"), Some(&FieldValue::from("T")));
        assert_eq!(docs[1].id, "v2");
        assert!(docs[1].data().is_none());
    }

    #[tokio::test]
    async fn test_query_with_only_read_time_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(RUN_QUERY_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "readTime": "2024-01-01T00:00:00Z" }])),
            )
            .mount(&mock_server)
            .await;

        let docs = client(&mock_server)
            .query("videos", &Query::page(10))
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_commit_sends_merge_with_mask() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMMIT_PATH))
            .and(body_partial_json(json!({
                "writes": [{
                    "update": {
                        "name": "projects/test-project/databases/(default)/documents/videos/v1",
                        "fields": { "flag": { "booleanValue": true } }
                    },
                    "updateMask": { "fieldPaths": ["flag"] }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "writeResults": [{}],
                "commitTime": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut fields = RawRecord::new();
        fields.insert("flag".into(), FieldValue::Bool(true));

        client(&mock_server)
            .commit(vec![WriteOp::Merge {
                collection: "videos".into(),
                id: "v1".into(),
                fields,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_commit_makes_no_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        client(&mock_server).commit(vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_error_surfaces_api_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COMMIT_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": 404,
                    "message": "no entity to update",
                    "status": "NOT_FOUND"
                }
            })))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .commit(vec![WriteOp::DeleteField {
                collection: "videos".into(),
                id: "ghost".into(),
                field: "_v2Migration".into(),
            }])
            .await
            .unwrap_err();

        match err {
            StoreError::Api { status, message } => {
                assert_eq!(status, "NOT_FOUND");
                assert_eq!(message, "no entity to update");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_error_in_stream_form() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(RUN_QUERY_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!([{
                "error": { "code": 403, "message": "denied", "status": "PERMISSION_DENIED" }
            }])))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .query("videos", &Query::page(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Api { ref status, .. } if status == "PERMISSION_DENIED"));
    }
}
