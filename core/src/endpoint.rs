//! Declared operations and the binder that turns them into requests.
//!
//! # Design
//! A `ResourceApi` is a table of `Endpoint`s under one base URI, built once
//! through registration calls (`searchable()`, `creatable()`, ...) and then
//! shared read-only. Each endpoint lists the role of every positional
//! argument; `Endpoint::bind` walks roles and arguments together and yields a
//! fully resolved `HttpRequest` plus the convergence settings the call asked
//! for. Binding is pure: no I/O, no blocking.
//!
//! Mappings that do not fit a simple role (building a name filter out of a
//! value object, for example) go through a `RequestInterceptor` that sees the
//! bound request and the raw arguments.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SdkError};
use crate::http::{first_placeholder, ContentType, Entity, HttpMethod, HttpRequest};
use crate::task::{ConvergenceMode, TaskOptions};

/// Query key used by name filters.
pub const FILTER_KEY: &str = "filter";

/// `filter` entry selecting resources by exact name.
pub fn filter_by_name(name: &str) -> (&'static str, String) {
    (FILTER_KEY, format!("name='{name}'"))
}

/// Role of one positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Replaces `{name}` in the URI.
    Path(&'static str),
    /// Adds a query entry; the argument fills the first `{...}` of the
    /// template, or is the value itself when there is no template.
    Query {
        key: &'static str,
        template: Option<&'static str>,
    },
    /// Becomes the request entity.
    Body(ContentType),
    /// Convergence timeout for task-returning calls.
    Timeout,
    /// Sync/async convergence choice.
    Mode,
    /// Only read by the endpoint's interceptor.
    Unbound,
}

/// Shape of what an operation resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Resource,
    Collection,
    Task,
    Text,
    File,
    Nothing,
}

/// A positional argument supplied to a declared operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Json(Value),
    Entity(Entity),
    Timeout(Duration),
    Mode(ConvergenceMode),
}

impl Arg {
    /// String form used for path and query substitution.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Arg::Str(s) => Some(s.clone()),
            Arg::Json(Value::String(s)) => Some(s.clone()),
            Arg::Json(v @ (Value::Number(_) | Value::Bool(_))) => Some(v.to_string()),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Arg::Str(_) => "string",
            Arg::Json(_) => "json",
            Arg::Entity(_) => "entity",
            Arg::Timeout(_) => "timeout",
            Arg::Mode(_) => "mode",
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<Uuid> for Arg {
    fn from(value: Uuid) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Json(value)
    }
}

impl From<Entity> for Arg {
    fn from(value: Entity) -> Self {
        Arg::Entity(value)
    }
}

impl From<PathBuf> for Arg {
    fn from(value: PathBuf) -> Self {
        Arg::Entity(Entity::File(value))
    }
}

impl From<Duration> for Arg {
    fn from(value: Duration) -> Self {
        Arg::Timeout(value)
    }
}

impl From<ConvergenceMode> for Arg {
    fn from(value: ConvergenceMode) -> Self {
        Arg::Mode(value)
    }
}

/// Rewrites a bound request before dispatch.
pub trait RequestInterceptor: Send + Sync + fmt::Debug {
    fn intercept(&self, request: HttpRequest, params: &[Param], args: &[Arg]) -> Result<HttpRequest>;
}

/// Adds a `filter=name='...'` entry built from the first `Unbound` argument
/// (or the first argument when none is unbound).
///
/// The argument may be a plain string or a value object carrying the name in
/// a `value` or `name` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterByName;

impl RequestInterceptor for FilterByName {
    fn intercept(&self, mut request: HttpRequest, params: &[Param], args: &[Arg]) -> Result<HttpRequest> {
        let index = params
            .iter()
            .position(|p| *p == Param::Unbound)
            .unwrap_or(0);
        let arg = args
            .get(index)
            .ok_or_else(|| SdkError::invalid_argument("name filter needs an argument"))?;

        let name = match arg {
            Arg::Json(Value::Object(fields)) => fields
                .get("value")
                .or_else(|| fields.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            other => other.as_text(),
        }
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SdkError::invalid_argument("name filter value is missing"))?;

        let (key, value) = filter_by_name(&name);
        request.query.insert(key, value);
        Ok(request)
    }
}

/// One declared operation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: &'static str,
    pub method: HttpMethod,
    /// Suffix appended to the API's base URI; may hold `{placeholders}`.
    pub uri: &'static str,
    pub params: Vec<Param>,
    pub returns: ReturnKind,
    pub force_task_redirect: bool,
    pub interceptor: Option<Arc<dyn RequestInterceptor>>,
}

/// Result of binding: the request plus how to converge a returned task.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCall {
    pub request: HttpRequest,
    pub mode: ConvergenceMode,
}

impl Endpoint {
    pub fn new(name: &'static str, method: HttpMethod, uri: &'static str, returns: ReturnKind) -> Self {
        Self {
            name,
            method,
            uri,
            params: Vec::new(),
            returns,
            force_task_redirect: false,
            interceptor: None,
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn intercept(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn force_task_redirect(mut self) -> Self {
        self.force_task_redirect = true;
        self
    }

    /// Resolve this endpoint under `base_uri` with `args`.
    pub fn bind(&self, base_uri: &str, args: &[Arg]) -> Result<BoundCall> {
        if args.len() != self.params.len() {
            return Err(SdkError::invalid_argument(format!(
                "{} expects {} argument(s), got {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }

        let template = format!("{base_uri}{}", self.uri);
        let mut path = self.resolve_path(&template, args)?;
        if path.is_empty() {
            path = "/".to_string();
        }

        let mut request = HttpRequest::new(self.method, path);
        request.force_task_redirect = self.force_task_redirect;
        let mut mode = ConvergenceMode::default();
        let mut has_body = false;

        for (param, arg) in self.params.iter().zip(args) {
            match *param {
                Param::Path(_) | Param::Unbound => {}
                Param::Query { key, template } => {
                    let value = self.text_arg(param, arg)?;
                    let value = match template {
                        Some(template) => fill_first_placeholder(template, &value),
                        None => value,
                    };
                    request.query.insert(key, value);
                }
                Param::Body(content_type) => {
                    if has_body {
                        return Err(SdkError::malformed_operation(format!(
                            "{} declares more than one body parameter",
                            self.name
                        )));
                    }
                    has_body = true;
                    request.body = Some(body_entity(self.name, arg)?);
                    request.content_type = content_type;
                }
                Param::Timeout => match arg {
                    Arg::Timeout(timeout) => request.timeout = *timeout,
                    other => return Err(self.wrong_arg(param, other)),
                },
                Param::Mode => match arg {
                    Arg::Mode(m) => mode = *m,
                    other => return Err(self.wrong_arg(param, other)),
                },
            }
        }

        if let Some(interceptor) = &self.interceptor {
            request = interceptor.intercept(request, &self.params, args)?;
        }

        Ok(BoundCall { request, mode })
    }

    fn resolve_path(&self, template: &str, args: &[Arg]) -> Result<String> {
        for placeholder in placeholders(template) {
            let declared = self
                .params
                .iter()
                .any(|p| matches!(p, Param::Path(name) if *name == placeholder));
            if !declared {
                return Err(SdkError::malformed_operation(format!(
                    "{}: placeholder {{{placeholder}}} has no path parameter",
                    self.name
                )));
            }
        }

        let mut path = template.to_string();
        for (param, arg) in self.params.iter().zip(args) {
            if let Param::Path(name) = param {
                let placeholder = format!("{{{name}}}");
                if !template.contains(&placeholder) {
                    return Err(SdkError::malformed_operation(format!(
                        "{}: path parameter {name} has no placeholder in {template}",
                        self.name
                    )));
                }
                let value = self.text_arg(param, arg)?;
                if value.is_empty() {
                    return Err(SdkError::invalid_argument(format!(
                        "{}: {name} must not be empty",
                        self.name
                    )));
                }
                path = path.replacen(&placeholder, &value, 1);
            }
        }
        Ok(path)
    }

    fn text_arg(&self, param: &Param, arg: &Arg) -> Result<String> {
        arg.as_text().ok_or_else(|| self.wrong_arg(param, arg))
    }

    fn wrong_arg(&self, param: &Param, arg: &Arg) -> SdkError {
        SdkError::invalid_argument(format!(
            "{}: {} argument does not fit {param:?}",
            self.name,
            arg.kind()
        ))
    }
}

fn body_entity(operation: &str, arg: &Arg) -> Result<Entity> {
    match arg {
        Arg::Entity(entity) => Ok(entity.clone()),
        Arg::Json(Value::Null) => Err(SdkError::invalid_argument(format!(
            "{operation}: body must not be null"
        ))),
        Arg::Json(value) => Ok(Entity::from_value(value.clone())),
        Arg::Str(text) => Ok(Entity::Text(text.clone())),
        other => Err(SdkError::invalid_argument(format!(
            "{operation}: {} argument cannot be a body",
            other.kind()
        ))),
    }
}

/// Names of every `{...}` placeholder in `template`, in order.
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut offset = 0;
    while let Some((start, end)) = first_placeholder(&template[offset..]) {
        names.push(&template[offset + start + 1..offset + end - 1]);
        offset += end;
    }
    names
}

fn fill_first_placeholder(template: &str, value: &str) -> String {
    match first_placeholder(template) {
        Some((start, end)) => format!("{}{value}{}", &template[..start], &template[end..]),
        None => template.to_string(),
    }
}

/// The operation table for one resource type.
#[derive(Debug, Clone)]
pub struct ResourceApi {
    base_uri: &'static str,
    endpoints: HashMap<&'static str, Endpoint>,
}

impl ResourceApi {
    pub fn new(base_uri: &'static str) -> Self {
        Self {
            base_uri,
            endpoints: HashMap::new(),
        }
    }

    pub fn base_uri(&self) -> &'static str {
        self.base_uri
    }

    /// Last segment of the base URI, e.g. `fcoe-networks`.
    pub fn resource_kind(&self) -> &'static str {
        self.base_uri.rsplit('/').find(|s| !s.is_empty()).unwrap_or(self.base_uri)
    }

    /// Add or replace an endpoint.
    pub fn register(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.insert(endpoint.name, endpoint);
        self
    }

    pub fn endpoint(&self, name: &str) -> Result<&Endpoint> {
        self.endpoints.get(name).ok_or_else(|| {
            SdkError::malformed_operation(format!("{} declares no operation {name}", self.base_uri))
        })
    }

    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.endpoints.keys().copied()
    }

    /// Bind `operation` with `args`.
    pub fn bind(&self, operation: &str, args: &[Arg]) -> Result<BoundCall> {
        self.endpoint(operation)?.bind(self.base_uri, args)
    }

    /// `get(id)`, `get_all()` and `get_by_name(name)`.
    pub fn searchable(self) -> Self {
        self.register(
            Endpoint::new("get", HttpMethod::Get, "/{resourceId}", ReturnKind::Resource)
                .param(Param::Path("resourceId")),
        )
        .register(Endpoint::new("get_all", HttpMethod::Get, "", ReturnKind::Collection))
        .register(
            Endpoint::new("get_by_name", HttpMethod::Get, "", ReturnKind::Collection).param(
                Param::Query {
                    key: FILTER_KEY,
                    template: Some("name='{name}'"),
                },
            ),
        )
    }

    /// `create(resource, timeout, mode)`.
    pub fn creatable(self) -> Self {
        self.register(
            Endpoint::new("create", HttpMethod::Post, "", ReturnKind::Task)
                .param(Param::Body(ContentType::Json))
                .param(Param::Timeout)
                .param(Param::Mode),
        )
    }

    /// `update(id, resource, timeout, mode)`.
    pub fn updatable(self) -> Self {
        self.register(
            Endpoint::new("update", HttpMethod::Put, "/{resourceId}", ReturnKind::Task)
                .param(Param::Path("resourceId"))
                .param(Param::Body(ContentType::Json))
                .param(Param::Timeout)
                .param(Param::Mode),
        )
    }

    /// `patch(id, operations, timeout, mode)`.
    pub fn patchable(self) -> Self {
        self.register(
            Endpoint::new("patch", HttpMethod::Patch, "/{resourceId}", ReturnKind::Task)
                .param(Param::Path("resourceId"))
                .param(Param::Body(ContentType::Json))
                .param(Param::Timeout)
                .param(Param::Mode),
        )
    }

    /// `delete(id, timeout, mode)`.
    pub fn deletable(self) -> Self {
        self.register(
            Endpoint::new("delete", HttpMethod::Delete, "/{resourceId}", ReturnKind::Task)
                .param(Param::Path("resourceId"))
                .param(Param::Timeout)
                .param(Param::Mode),
        )
    }
}

/// Arguments for the timeout/mode pair that task endpoints end with.
pub fn task_args(options: TaskOptions) -> [Arg; 2] {
    [Arg::Timeout(options.timeout), Arg::Mode(options.mode)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn networks() -> ResourceApi {
        ResourceApi::new("/rest/fcoe-networks")
            .searchable()
            .creatable()
            .updatable()
            .patchable()
            .deletable()
    }

    #[test]
    fn get_substitutes_path_placeholder() {
        let call = networks().bind("get", &["abc-123".into()]).unwrap();
        assert_eq!(call.request.method, HttpMethod::Get);
        assert_eq!(call.request.path, "/rest/fcoe-networks/abc-123");
        assert!(call.request.unresolved_placeholder().is_none());
    }

    #[test]
    fn get_all_targets_base_uri() {
        let call = networks().bind("get_all", &[]).unwrap();
        assert_eq!(call.request.path, "/rest/fcoe-networks");
        assert!(call.request.query.is_empty());
    }

    #[test]
    fn get_by_name_adds_one_filter() {
        let call = networks().bind("get_by_name", &["san-a".into()]).unwrap();
        assert_eq!(call.request.query.len(), 1);
        assert_eq!(call.request.query.get("filter"), Some("name='san-a'"));
    }

    #[test]
    fn create_binds_body_timeout_and_mode() {
        let body = json!({"name": "net", "vlanId": 10});
        let call = networks()
            .bind(
                "create",
                &[
                    body.clone().into(),
                    Duration::from_secs(5).into(),
                    ConvergenceMode::Async.into(),
                ],
            )
            .unwrap();
        assert_eq!(call.request.method, HttpMethod::Post);
        assert_eq!(call.request.body, Some(Entity::Object(body)));
        assert_eq!(call.request.content_type, ContentType::Json);
        assert_eq!(call.request.timeout, Duration::from_secs(5));
        assert_eq!(call.mode, ConvergenceMode::Async);
    }

    #[test]
    fn patch_body_is_an_array_entity() {
        let ops = json!([{"op": "replace", "path": "/name", "value": "x"}]);
        let [timeout, mode] = task_args(TaskOptions::default());
        let call = networks()
            .bind("patch", &["id-1".into(), ops.into(), timeout, mode])
            .unwrap();
        assert!(matches!(call.request.body, Some(Entity::Array(ref items)) if items.len() == 1));
        assert_eq!(call.request.method, HttpMethod::Patch);
    }

    #[test]
    fn arity_mismatch_is_invalid_argument() {
        let err = networks().bind("get", &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn empty_path_argument_is_invalid() {
        let err = networks().bind("get", &["".into()]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn null_body_is_invalid() {
        let [timeout, mode] = task_args(TaskOptions::default());
        let err = networks()
            .bind("create", &[Value::Null.into(), timeout, mode])
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn placeholder_without_role_is_malformed() {
        let api = ResourceApi::new("/rest/enclosures").register(Endpoint::new(
            "settings",
            HttpMethod::Get,
            "/{resourceId}/settings",
            ReturnKind::Resource,
        ));
        let err = api.bind("settings", &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
    }

    #[test]
    fn role_without_placeholder_is_malformed() {
        let api = ResourceApi::new("/rest/enclosures").register(
            Endpoint::new("settings", HttpMethod::Get, "/settings", ReturnKind::Resource)
                .param(Param::Path("resourceId")),
        );
        let err = api.bind("settings", &["x".into()]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
    }

    #[test]
    fn two_body_roles_are_malformed() {
        let api = ResourceApi::new("/rest/things").register(
            Endpoint::new("odd", HttpMethod::Post, "", ReturnKind::Nothing)
                .param(Param::Body(ContentType::Json))
                .param(Param::Body(ContentType::TextPlain)),
        );
        let err = api
            .bind("odd", &[json!({}).into(), "text".into()])
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
    }

    #[test]
    fn unknown_operation_is_malformed() {
        let err = networks().bind("reboot", &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
    }

    #[test]
    fn multiple_path_params_each_replace_first_occurrence() {
        let api = ResourceApi::new("/rest/logical-interconnects").register(
            Endpoint::new("port", HttpMethod::Get, "/{id}/ports/{portId}", ReturnKind::Resource)
                .param(Param::Path("id"))
                .param(Param::Path("portId")),
        );
        let call = api.bind("port", &["li-1".into(), json!(7).into()]).unwrap();
        assert_eq!(call.request.path, "/rest/logical-interconnects/li-1/ports/7");
    }

    #[test]
    fn multiple_query_roles_produce_independent_entries() {
        let api = ResourceApi::new("/rest/alerts").register(
            Endpoint::new("page", HttpMethod::Get, "", ReturnKind::Collection)
                .param(Param::Query { key: "start", template: None })
                .param(Param::Query { key: "count", template: None })
                .param(Param::Query { key: "sort", template: Some("{field}:desc") }),
        );
        let call = api
            .bind("page", &[json!(0).into(), json!(25).into(), "created".into()])
            .unwrap();
        let entries: Vec<(&str, &str)> = call.request.query.iter().collect();
        assert_eq!(
            entries,
            vec![("start", "0"), ("count", "25"), ("sort", "created:desc")]
        );
    }

    #[test]
    fn interceptor_builds_filter_from_value_object() {
        let api = ResourceApi::new("/rest/sas-interconnect-types").register(
            Endpoint::new("get_by_name", HttpMethod::Get, "", ReturnKind::Collection)
                .param(Param::Unbound)
                .intercept(FilterByName),
        );
        let call = api
            .bind("get_by_name", &[json!({"value": "Synergy 12Gb SAS"}).into()])
            .unwrap();
        assert_eq!(call.request.query.get("filter"), Some("name='Synergy 12Gb SAS'"));
    }

    #[test]
    fn interceptor_filter_stays_unique_alongside_declared_roles() {
        let api = ResourceApi::new("/rest/switch-types").register(
            Endpoint::new("get_by_name", HttpMethod::Get, "", ReturnKind::Collection)
                .param(Param::Query { key: "filter", template: Some("name='{name}'") })
                .param(Param::Query { key: "count", template: None })
                .param(Param::Unbound)
                .intercept(FilterByName),
        );
        let call = api
            .bind("get_by_name", &["ignored".into(), json!(5).into(), "Cisco".into()])
            .unwrap();
        let filters: Vec<_> = call.request.query.iter().filter(|(k, _)| *k == "filter").collect();
        assert_eq!(filters, vec![("filter", "name='Cisco'")]);
    }

    #[test]
    fn interceptor_rejects_missing_name() {
        let api = ResourceApi::new("/rest/switch-types").register(
            Endpoint::new("get_by_name", HttpMethod::Get, "", ReturnKind::Collection)
                .param(Param::Unbound)
                .intercept(FilterByName),
        );
        let err = api.bind("get_by_name", &[json!({}).into()]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn force_task_redirect_flag_is_carried() {
        let api = ResourceApi::new("/rest/fc-sans/managed-sans").register(
            Endpoint::new("issues", HttpMethod::Post, "/{id}/issues", ReturnKind::Task)
                .param(Param::Path("id"))
                .force_task_redirect(),
        );
        let call = api.bind("issues", &["san-1".into()]).unwrap();
        assert!(call.request.force_task_redirect);
    }

    #[test]
    fn resource_kind_is_last_segment() {
        assert_eq!(networks().resource_kind(), "fcoe-networks");
        assert_eq!(ResourceApi::new("/rest/fc-sans/managed-sans/").resource_kind(), "managed-sans");
    }
}
