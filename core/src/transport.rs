//! Executes request descriptors against one appliance.
//!
//! # Design
//! `Transport::send` is the only place that performs network I/O. It
//! resolves the URL, decorates the request with the appliance headers,
//! encodes the entity, runs the round-trip on the shared pool and turns the
//! outcome into a `Reply`:
//!
//! - `Reply::Final` carries the payload (a JSON/text body, or the path of a
//!   downloaded file).
//! - `Reply::Redirect` carries the path of a task the caller must GET next.
//!   The transport never follows it itself; the dispatcher decides.
//!
//! Status classification and redirect detection live in the pure
//! `interpret` function so they are testable without a socket.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{decode_body, Codec, JsonCodec};
use crate::config::ClientConfig;
use crate::error::{ErrorKind, Result, SdkError};
use crate::http::{ContentType, Entity, HttpMethod, HttpRequest, HttpResponse};
use crate::multipart::{upload_file_name, MultipartBody, MultipartForm, FILE_FIELD};
use crate::pool::ConnectionPool;
use crate::types::ApplianceVersion;

/// Header carrying the session token.
pub const AUTH_HEADER: &str = "Auth";
/// Header carrying the REST API version.
pub const API_VERSION_HEADER: &str = "X-Api-Version";
/// Header naming a bare-file upload.
pub const UPLOAD_FILE_NAME_HEADER: &str = "uploadfilename";

const VERSION_PATH: &str = "/rest/version";

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Body(String),
    File(PathBuf),
}

/// Outcome of one round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Final(Payload),
    /// The call answered with a task reference; GET this path next.
    Redirect(String),
}

/// An encoded entity ready to send.
#[derive(Debug)]
enum RequestBody {
    Bytes(Vec<u8>),
    Multipart(MultipartBody),
}

impl RequestBody {
    fn len(&self) -> u64 {
        match self {
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::Multipart(body) => body.len(),
        }
    }
}

/// Blocking transport bound to one appliance and one credential set.
#[derive(Clone)]
pub struct Transport {
    config: Arc<ClientConfig>,
    pool: ConnectionPool,
    codec: Arc<dyn Codec>,
    base: Url,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base", &self.base.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(config: ClientConfig, pool: ConnectionPool) -> Result<Self> {
        Self::with_codec(config, pool, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: ClientConfig, pool: ConnectionPool, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        let base = base_url(&config.host)?;
        Ok(Self {
            config: Arc::new(config),
            pool,
            codec,
            base,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Host label used in error context and logs.
    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or(&self.config.host)
    }

    /// Perform one round-trip for `request`.
    pub fn send(&self, request: &HttpRequest) -> Result<Reply> {
        self.send_inner(request)
            .map_err(|e| e.with_host(self.host().to_string()))
    }

    /// `GET /rest/version`.
    pub fn appliance_version(&self) -> Result<ApplianceVersion> {
        match self.send(&HttpRequest::get(VERSION_PATH))? {
            Reply::Final(Payload::Body(body)) => decode_body(self.codec(), &body),
            _ => Err(SdkError::no_response().with_host(self.host().to_string())),
        }
    }

    /// Fail when the configured API version is newer than the appliance's.
    pub fn check_api_version(&self) -> Result<ApplianceVersion> {
        let version = self.appliance_version()?;
        let configured = self.config.api_version.value();
        if configured > version.current_version {
            return Err(SdkError::from(ErrorKind::ApiVersionMismatch {
                configured,
                current: version.current_version,
            })
            .with_host(self.host().to_string()));
        }
        Ok(version)
    }

    fn send_inner(&self, request: &HttpRequest) -> Result<Reply> {
        if let Some(placeholder) = request.unresolved_placeholder() {
            return Err(SdkError::malformed_operation(format!(
                "unresolved placeholder {placeholder} in {}",
                request.path
            )));
        }

        let url = self.resolve(request)?;
        let mut headers = self.default_headers();
        let body = self.encode_body(request, &mut headers)?;

        debug!(
            method = %request.method,
            url = %url,
            body_bytes = body.as_ref().map(RequestBody::len).unwrap_or(0),
            "sending request"
        );

        let _permit = self.pool.acquire(self.host());
        let mut response = self.round_trip(request.method, url.as_str(), &headers, body)?;

        let status = response.status().as_u16();
        let response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let is_download = (200..300).contains(&status)
            && header(&response_headers, "content-type")
                .and_then(ContentType::from_header)
                == Some(ContentType::OctetStream);
        if is_download {
            let target = self.download_target(request, &response_headers)?;
            let mut reader = response.into_body().into_reader();
            let written = save_stream(&mut reader, &target)?;
            info!(path = %target.display(), bytes = written, "download saved");
            return Ok(Reply::Final(Payload::File(target)));
        }

        let body = if status == 204 {
            "{}".to_string()
        } else {
            response
                .body_mut()
                .with_config()
                .limit(u64::MAX)
                .read_to_string()
                .map_err(|e| unreachable_error(&url, e))?
        };

        let reply = interpret(
            HttpResponse {
                status,
                headers: response_headers,
                body,
            },
            request.force_task_redirect,
        );
        if let Err(err) = &reply {
            warn!(
                method = %request.method,
                url = %url,
                status,
                error = err.kind().label(),
                "request failed"
            );
        }
        reply
    }

    fn resolve(&self, request: &HttpRequest) -> Result<Url> {
        let mut url = self.base.join(&request.path).map_err(|e| {
            SdkError::from(ErrorKind::BadRequest {
                message: format!("invalid path {}: {e}", request.path),
            })
        })?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query.iter() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), ContentType::Json.mime_type().to_string()),
            ("Accept-Language".to_string(), "en_US".to_string()),
            (API_VERSION_HEADER.to_string(), self.config.api_version.to_string()),
        ];
        if let Some(token) = self.config.auth_token.as_deref() {
            if !token.trim().is_empty() {
                headers.push((AUTH_HEADER.to_string(), token.to_string()));
            }
        }
        headers
    }

    fn encode_body(&self, request: &HttpRequest, headers: &mut Vec<(String, String)>) -> Result<Option<RequestBody>> {
        let Some(entity) = &request.body else {
            return Ok(None);
        };

        let (content_type, body) = match (request.content_type, entity) {
            (ContentType::Json | ContentType::JsonPatch, Entity::Object(value)) => (
                request.content_type.mime_type().to_string(),
                RequestBody::Bytes(self.codec.to_json(value)?.into_bytes()),
            ),
            (ContentType::Json | ContentType::JsonPatch, Entity::Array(values)) => (
                request.content_type.mime_type().to_string(),
                RequestBody::Bytes(self.codec.to_json_array(values)?.into_bytes()),
            ),
            (ContentType::TextPlain, Entity::Text(text)) => (
                ContentType::TextPlain.mime_type().to_string(),
                RequestBody::Bytes(text.clone().into_bytes()),
            ),
            (ContentType::MultipartFormData, Entity::Upload(upload)) => {
                let mut form = MultipartForm::new();
                form.add_file(FILE_FIELD, &upload.file)?;
                form.add_text("name", &upload.name);
                form.add_text("description", &upload.description);
                let (content_type, body) = form.finish();
                (content_type, RequestBody::Multipart(body))
            }
            (ContentType::MultipartFormData, Entity::File(path)) => {
                let mut form = MultipartForm::new();
                form.add_file(FILE_FIELD, path)?;
                headers.push((UPLOAD_FILE_NAME_HEADER.to_string(), upload_file_name(path)?));
                let (content_type, body) = form.finish();
                (content_type, RequestBody::Multipart(body))
            }
            (content_type, _) => {
                return Err(ErrorKind::UnsupportedEntity {
                    content_type: content_type.mime_type().to_string(),
                }
                .into())
            }
        };

        headers.push(("Content-Type".to_string(), content_type));
        Ok(Some(body))
    }

    fn round_trip(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<RequestBody>,
    ) -> Result<ureq::http::Response<ureq::Body>> {
        let agent = self.pool.agent();
        let result = match method {
            HttpMethod::Get => with_headers(agent.get(url), headers).call(),
            HttpMethod::Delete => with_headers(agent.delete(url), headers).call(),
            HttpMethod::Post => send_with_body(with_headers(agent.post(url), headers), body),
            HttpMethod::Put => send_with_body(with_headers(agent.put(url), headers), body),
            HttpMethod::Patch => send_with_body(with_headers(agent.patch(url), headers), body),
        };
        result.map_err(|e| unreachable_error(url, e))
    }

    fn download_target(&self, request: &HttpRequest, headers: &[(String, String)]) -> Result<PathBuf> {
        let dir = request
            .download_dir
            .as_deref()
            .or(self.config.download_dir.as_deref())
            .ok_or_else(|| SdkError::invalid_argument("no download directory configured"))?;
        if !dir.is_dir() {
            return Err(SdkError::invalid_argument(format!(
                "download directory {} does not exist",
                dir.display()
            )));
        }

        let name = header(headers, "content-disposition")
            .and_then(disposition_file_name)
            .or_else(|| {
                request
                    .path
                    .rsplit('/')
                    .find(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .map(|name| sanitize_file_name(&name))
            .ok_or_else(|| SdkError::invalid_argument("download has no file name"))?;
        Ok(dir.join(name))
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send_with_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: Option<RequestBody>,
) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(RequestBody::Bytes(bytes)) => builder.send(&bytes[..]),
        // Unknown up front to ureq, so this goes out chunked.
        Some(RequestBody::Multipart(form)) => builder.send(ureq::SendBody::from_owned_reader(form)),
        None => builder.send_empty(),
    }
}

fn unreachable_error(url: impl std::fmt::Display, err: ureq::Error) -> SdkError {
    warn!(url = %url, error = %err, "appliance unreachable");
    ErrorKind::ApplianceUnreachable {
        status: None,
        reason: err.to_string(),
    }
    .into()
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn save_stream(reader: &mut impl io::Read, target: &Path) -> Result<u64> {
    let mut file = File::create(target)
        .map_err(|e| SdkError::io(format!("cannot create {}: {e}", target.display())))?;
    io::copy(reader, &mut file)
        .map_err(|e| SdkError::io(format!("cannot write {}: {e}", target.display())))
}

/// Parse `host` into a base URL, defaulting the scheme to `https`.
pub fn base_url(host: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Url::parse(&raw).map_err(|e| SdkError::invalid_argument(format!("invalid host {host}: {e}")))
}

/// Classify a buffered response and detect task references.
pub fn interpret(response: HttpResponse, force_task_redirect: bool) -> Result<Reply> {
    classify_status(&response)?;

    let location = response.header("location");
    if force_task_redirect {
        let location = location.ok_or_else(SdkError::no_response)?;
        return Ok(Reply::Redirect(task_path(location)));
    }
    if response.status == 202 && response.body.trim().is_empty() {
        if let Some(location) = location {
            return Ok(Reply::Redirect(task_path(location)));
        }
    }
    Ok(Reply::Final(Payload::Body(response.body)))
}

/// Map a status code to success or its error kind.
pub fn classify_status(response: &HttpResponse) -> Result<()> {
    let status = response.status;
    let kind = match status {
        200..=299 => return Ok(()),
        400 => ErrorKind::BadRequest {
            message: error_message(&response.body),
        },
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::ResourceNotFound,
        405 => ErrorKind::MethodNotAllowed,
        409 | 412 | 415 | 500 | 503 => ErrorKind::InternalServerError {
            status,
            message: error_message(&response.body),
        },
        other => ErrorKind::ApplianceUnreachable {
            status: Some(other),
            reason: format!("unexpected HTTP status {other}"),
        },
    };
    Err(kind.into())
}

/// Portion of a Location value from `/rest` onward.
pub fn task_path(location: &str) -> String {
    match location.find("/rest") {
        Some(index) => location[index..].to_string(),
        None => location.to_string(),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn disposition_file_name(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let (key, name) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = name.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Replace characters that are unsafe in local file names with `.`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ',' | ':' | '/' | '\\' => '.',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str, headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    fn kind_of(status: u16) -> ErrorKind {
        interpret(response(status, "", &[]), false)
            .unwrap_err()
            .into_kind()
    }

    #[test]
    fn status_table() {
        assert!(matches!(kind_of(400), ErrorKind::BadRequest { .. }));
        assert!(matches!(kind_of(401), ErrorKind::Unauthorized));
        assert!(matches!(kind_of(403), ErrorKind::Forbidden));
        assert!(matches!(kind_of(404), ErrorKind::ResourceNotFound));
        assert!(matches!(kind_of(405), ErrorKind::MethodNotAllowed));
        for status in [409, 412, 415, 500, 503] {
            assert!(matches!(
                kind_of(status),
                ErrorKind::InternalServerError { status: s, .. } if s == status
            ));
        }
        for status in [302, 418, 502, 504] {
            assert!(matches!(
                kind_of(status),
                ErrorKind::ApplianceUnreachable { status: Some(s), .. } if s == status
            ));
        }
    }

    #[test]
    fn error_message_comes_from_json_body() {
        let err = interpret(response(400, r#"{"message": "vlan taken"}"#, &[]), false).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::BadRequest { message } if message == "vlan taken"));
    }

    #[test]
    fn accepted_with_location_redirects() {
        let reply = interpret(
            response(202, "", &[("Location", "https://10.0.0.1/rest/tasks/T1")]),
            false,
        )
        .unwrap();
        assert_eq!(reply, Reply::Redirect("/rest/tasks/T1".to_string()));
    }

    #[test]
    fn accepted_with_body_is_final() {
        let reply = interpret(
            response(202, r#"{"uri": "/rest/tasks/T2"}"#, &[("Location", "/rest/tasks/T1")]),
            false,
        )
        .unwrap();
        assert!(matches!(reply, Reply::Final(Payload::Body(_))));
    }

    #[test]
    fn forced_redirect_needs_location() {
        let reply = interpret(response(200, "{}", &[("location", "/rest/tasks/T9")]), true).unwrap();
        assert_eq!(reply, Reply::Redirect("/rest/tasks/T9".to_string()));

        let err = interpret(response(200, "{}", &[]), true).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoResponse));
    }

    #[test]
    fn not_found_never_redirects() {
        let err = interpret(response(404, "", &[("Location", "/rest/tasks/T1")]), true).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ResourceNotFound));
    }

    #[test]
    fn task_path_strips_scheme_and_host() {
        assert_eq!(task_path("https://appliance:8443/rest/tasks/A"), "/rest/tasks/A");
        assert_eq!(task_path("/rest/tasks/A"), "/rest/tasks/A");
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("a:b,c.txt"), "a.b.c.txt");
        assert_eq!(sanitize_file_name("..\\x/y"), "...x.y");
    }

    #[test]
    fn disposition_filename_is_extracted() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="support:dump,1.sdmp""#),
            Some("support:dump,1.sdmp".to_string())
        );
        assert_eq!(disposition_file_name("attachment"), None);
    }

    #[test]
    fn host_without_scheme_defaults_to_https() {
        assert_eq!(base_url("10.0.0.1").unwrap().as_str(), "https://10.0.0.1/");
        assert_eq!(base_url("http://127.0.0.1:8080/").unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    fn transport() -> Transport {
        let config = ClientConfig::builder("10.0.0.1")
            .auth_token("tok")
            .build()
            .unwrap();
        let pool = ConnectionPool::new(&config);
        Transport::new(config, pool).unwrap()
    }

    #[test]
    fn url_keeps_query_order_and_encodes_values() {
        let request = HttpRequest::get("/rest/fcoe-networks")
            .with_query("start", "0")
            .with_query("filter", "name='a b'");
        let url = transport().resolve(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://10.0.0.1/rest/fcoe-networks?start=0&filter=name%3D%27a+b%27"
        );
    }

    #[test]
    fn default_headers_carry_version_and_token() {
        let headers = transport().default_headers();
        assert_eq!(header(&headers, "x-api-version"), Some("300"));
        assert_eq!(header(&headers, "auth"), Some("tok"));
        assert_eq!(header(&headers, "accept-language"), Some("en_US"));
    }

    #[test]
    fn blank_token_is_not_sent() {
        let config = ClientConfig::builder("10.0.0.1").auth_token("  ").build().unwrap();
        let pool = ConnectionPool::new(&config);
        let headers = Transport::new(config, pool).unwrap().default_headers();
        assert_eq!(header(&headers, "auth"), None);
    }

    #[test]
    fn entity_and_content_type_mismatch_is_unsupported() {
        let request = HttpRequest::new(HttpMethod::Post, "/rest/things")
            .with_body(Entity::Text("x".to_string()), ContentType::Json);
        let err = transport().encode_body(&request, &mut Vec::new()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedEntity { .. }));

        let request = HttpRequest::new(HttpMethod::Post, "/rest/things")
            .with_body(Entity::Object(serde_json::json!({})), ContentType::OctetStream);
        let err = transport().encode_body(&request, &mut Vec::new()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedEntity { .. }));
    }

    #[test]
    fn text_body_is_sent_verbatim_as_text_plain() {
        let request = HttpRequest::new(HttpMethod::Post, "/rest/fc-sans/managed-sans/san-1/notes")
            .with_body(Entity::Text("line one\nline \"two\"".to_string()), ContentType::TextPlain);
        let mut headers = Vec::new();
        let body = transport().encode_body(&request, &mut headers).unwrap();

        match body {
            Some(RequestBody::Bytes(bytes)) => assert_eq!(bytes, b"line one\nline \"two\""),
            other => panic!("expected raw bytes, got {other:?}"),
        }
        assert_eq!(header(&headers, "content-type"), Some("text/plain"));
    }

    #[test]
    fn bare_file_upload_adds_file_name_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, b"firmware").unwrap();
        let request = HttpRequest::new(HttpMethod::Post, "/rest/firmware-bundles")
            .with_body(Entity::File(path), ContentType::MultipartFormData);
        let mut headers = Vec::new();
        let body = transport().encode_body(&request, &mut headers).unwrap();
        assert!(matches!(body, Some(RequestBody::Multipart(_))));
        assert_eq!(header(&headers, UPLOAD_FILE_NAME_HEADER), Some("fw.bin"));
        assert!(header(&headers, "content-type")
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn unresolved_placeholder_is_rejected_before_io() {
        let err = transport()
            .send(&HttpRequest::get("/rest/fcoe-networks/{resourceId}"))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
        assert_eq!(err.context().host.as_deref(), Some("10.0.0.1"));
    }
}
