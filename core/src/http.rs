//! Request descriptors and raw response values.
//!
//! # Design
//! `HttpRequest` describes one call as plain data: method, path (possibly
//! still templated), ordered query entries, an optional entity with its
//! content type, and the per-call knobs the transport and the task monitor
//! read (timeout, forced task redirect, download directory). Building one
//! never touches the network; only `Transport::send` does.
//!
//! `HttpResponse` is the buffered outcome of a non-download call, kept as
//! data so status classification and task-redirect detection stay pure.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Timeout applied to a descriptor when none is set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-type tag carried by a request entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Json,
    JsonPatch,
    TextPlain,
    MultipartFormData,
    OctetStream,
}

impl ContentType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::JsonPatch => "application/json-patch+json",
            ContentType::TextPlain => "text/plain",
            ContentType::MultipartFormData => "multipart/form-data",
            ContentType::OctetStream => "application/octet-stream",
        }
    }

    /// Match a `Content-Type` header value, ignoring parameters and case.
    pub fn from_header(value: &str) -> Option<Self> {
        let mime = value.split(';').next().unwrap_or_default().trim();
        [
            ContentType::Json,
            ContentType::JsonPatch,
            ContentType::TextPlain,
            ContentType::MultipartFormData,
            ContentType::OctetStream,
        ]
        .into_iter()
        .find(|ct| ct.mime_type().eq_ignore_ascii_case(mime))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A file upload with the descriptive text parts the appliance expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file: PathBuf,
    pub name: String,
    pub description: String,
}

/// Request body before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A single JSON value, encoded with the codec's object rule.
    Object(Value),
    /// A batch (e.g. PATCH operations), encoded with the codec's array rule.
    Array(Vec<Value>),
    Text(String),
    /// A bare file, sent as one multipart part.
    File(PathBuf),
    Upload(FileUpload),
}

impl Entity {
    /// Arrays become `Entity::Array`, everything else `Entity::Object`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Entity::Array(items),
            other => Entity::Object(other),
        }
    }
}

/// Ordered query entries with unique keys.
///
/// Inserting an existing key replaces its value in place, so the first
/// insertion fixes the position and the last write fixes the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: QueryParams,
    pub body: Option<Entity>,
    pub content_type: ContentType,
    /// Upper bound for task convergence triggered by this request.
    pub timeout: Duration,
    /// Treat any successful response as a task reference.
    pub force_task_redirect: bool,
    /// Overrides the configured download directory for octet-stream replies.
    pub download_dir: Option<PathBuf>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: QueryParams::new(),
            body: None,
            content_type: ContentType::Json,
            timeout: DEFAULT_TIMEOUT,
            force_task_redirect: false,
            download_dir: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn with_body(mut self, entity: Entity, content_type: ContentType) -> Self {
        self.body = Some(entity);
        self.content_type = content_type;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn forcing_task_redirect(mut self) -> Self {
        self.force_task_redirect = true;
        self
    }

    /// First `{...}` region still present in the path, if any.
    pub fn unresolved_placeholder(&self) -> Option<&str> {
        first_placeholder(&self.path).map(|(start, end)| &self.path[start..end])
    }
}

/// Byte range of the first `{...}` region in `text`, braces included.
pub(crate) fn first_placeholder(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let end = text[start..].find('}')? + start + 1;
    Some((start, end))
}

/// A buffered HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_keeps_insertion_order() {
        let mut query = QueryParams::new();
        query.insert("start", "0");
        query.insert("count", "10");
        query.insert("filter", "name='a'");
        let keys: Vec<&str> = query.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["start", "count", "filter"]);
    }

    #[test]
    fn query_last_write_wins_in_place() {
        let mut query = QueryParams::new();
        query.insert("filter", "name='a'");
        query.insert("count", "10");
        query.insert("filter", "name='b'");
        assert_eq!(query.len(), 2);
        assert_eq!(query.get("filter"), Some("name='b'"));
        let first = query.iter().next().unwrap();
        assert_eq!(first, ("filter", "name='b'"));
    }

    #[test]
    fn new_request_defaults() {
        let req = HttpRequest::new(HttpMethod::Delete, "/rest/fcoe-networks/1");
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.timeout, DEFAULT_TIMEOUT);
        assert!(!req.force_task_redirect);
        assert!(req.body.is_none());
        assert!(req.query.is_empty());
        assert_eq!(req.content_type, ContentType::Json);
    }

    #[test]
    fn unresolved_placeholder_is_reported() {
        let req = HttpRequest::get("/rest/fcoe-networks/{resourceId}/settings");
        assert_eq!(req.unresolved_placeholder(), Some("{resourceId}"));
        let req = HttpRequest::get("/rest/fcoe-networks/abc");
        assert_eq!(req.unresolved_placeholder(), None);
    }

    #[test]
    fn entity_from_value_splits_arrays() {
        assert!(matches!(Entity::from_value(json!([1, 2])), Entity::Array(items) if items.len() == 2));
        assert!(matches!(Entity::from_value(json!({"a": 1})), Entity::Object(_)));
    }

    #[test]
    fn content_type_from_header_ignores_parameters() {
        assert_eq!(
            ContentType::from_header("application/octet-stream; charset=binary"),
            Some(ContentType::OctetStream)
        );
        assert_eq!(ContentType::from_header("Application/JSON"), Some(ContentType::Json));
        assert_eq!(ContentType::from_header("image/png"), None);
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 202,
            headers: vec![("Location".to_string(), "/rest/tasks/1".to_string())],
            body: String::new(),
        };
        assert_eq!(response.header("location"), Some("/rest/tasks/1"));
        assert_eq!(response.header("content-type"), None);
    }
}
