//! The single call path behind every declared operation.
//!
//! # Design
//! `Dispatcher::invoke` composes the three stages: the binder resolves the
//! operation into a request, the transport performs it (following at most
//! one task-redirect hop), and the task monitor converges any task the
//! operation returns. Errors from any stage pass through unchanged apart
//! from the operation name and resource kind being attached as context.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::codec::{decode, Codec};
use crate::endpoint::{Arg, ResourceApi, ReturnKind};
use crate::error::{ErrorKind, Result, SdkError};
use crate::http::HttpRequest;
use crate::task::{TaskMonitor, TaskResource, TaskSource};
use crate::transport::{task_path, Payload, Reply, Transport};

/// What an operation resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Body(Value),
    Task(TaskResource),
    Text(String),
    File(PathBuf),
    Nothing,
}

impl Resolved {
    /// Shape a body (or a task snapshot) into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Resolved::Body(value) => decode(value),
            Resolved::Task(task) => decode(crate::codec::encode(&task)?),
            Resolved::Text(text) => decode(Value::String(text)),
            Resolved::File(_) | Resolved::Nothing => Err(SdkError::no_response()),
        }
    }
}

/// Runs declared operations against one appliance.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: Transport,
    monitor: TaskMonitor,
}

impl Dispatcher {
    pub fn new(transport: Transport) -> Self {
        let config = transport.config();
        let monitor = TaskMonitor::new(config.poll_interval(), config.warning_policy);
        Self { transport, monitor }
    }

    pub fn with_monitor(transport: Transport, monitor: TaskMonitor) -> Self {
        Self { transport, monitor }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    /// Bind `operation` of `api` with `args`, execute it and resolve the result.
    pub fn invoke(&self, api: &ResourceApi, operation: &str, args: &[Arg]) -> Result<Resolved> {
        self.invoke_inner(api, operation, args)
            .map_err(|e| e.with_operation(operation).with_resource(api.resource_kind()))
    }

    /// `invoke` then shape the result into `T`.
    pub fn invoke_as<T: DeserializeOwned>(&self, api: &ResourceApi, operation: &str, args: &[Arg]) -> Result<T> {
        self.invoke(api, operation, args)?
            .into_typed()
            .map_err(|e| e.with_operation(operation).with_resource(api.resource_kind()))
    }

    /// `invoke` an operation declared to return a task.
    pub fn invoke_task(&self, api: &ResourceApi, operation: &str, args: &[Arg]) -> Result<TaskResource> {
        match self.invoke(api, operation, args)? {
            Resolved::Task(task) => Ok(task),
            _ => Err(SdkError::malformed_operation(format!("{operation} does not return a task"))
                .with_operation(operation)
                .with_resource(api.resource_kind())),
        }
    }

    fn invoke_inner(&self, api: &ResourceApi, operation: &str, args: &[Arg]) -> Result<Resolved> {
        let endpoint = api.endpoint(operation)?;
        let call = endpoint.bind(api.base_uri(), args)?;
        debug!(
            operation,
            method = %call.request.method,
            path = %call.request.path,
            "dispatching"
        );
        let payload = self.execute(&call.request)?;

        match endpoint.returns {
            ReturnKind::Task => {
                let task = decode_task(self.transport.codec(), body_of(&payload)?)?;
                let task = self
                    .monitor
                    .converge(self, task, call.mode, call.request.timeout)?;
                Ok(Resolved::Task(task))
            }
            ReturnKind::Resource | ReturnKind::Collection => {
                let body = body_of(&payload)?;
                if body.trim().is_empty() {
                    return Err(SdkError::no_response());
                }
                Ok(Resolved::Body(self.transport.codec().from_json(body)?))
            }
            ReturnKind::Text => match payload {
                Payload::Body(text) => Ok(Resolved::Text(text)),
                Payload::File(path) => Ok(Resolved::File(path)),
            },
            ReturnKind::File => match payload {
                Payload::File(path) => Ok(Resolved::File(path)),
                Payload::Body(_) => Err(SdkError::no_response()),
            },
            ReturnKind::Nothing => Ok(Resolved::Nothing),
        }
    }

    /// Send `request`, following a single task redirect.
    pub fn execute(&self, request: &HttpRequest) -> Result<Payload> {
        match self.transport.send(request)? {
            Reply::Final(payload) => Ok(payload),
            Reply::Redirect(path) => {
                debug!(task_path = %path, "following task reference");
                match self.transport.send(&HttpRequest::get(path))? {
                    Reply::Final(payload) => Ok(payload),
                    Reply::Redirect(again) => Err(SdkError::from(ErrorKind::InternalServerError {
                        status: 202,
                        message: format!("task redirect loop at {again}"),
                    })
                    .with_host(self.transport.host().to_string())),
                }
            }
        }
    }
}

impl TaskSource for Dispatcher {
    fn fetch_task(&self, uri: &str) -> Result<TaskResource> {
        let payload = self.execute(&HttpRequest::get(task_path(uri)))?;
        decode_task(self.transport.codec(), body_of(&payload)?)
    }
}

/// A body without `taskState` is not a task, whatever else it carries.
fn decode_task(codec: &dyn Codec, body: &str) -> Result<TaskResource> {
    if body.trim().is_empty() {
        return Err(SdkError::no_response());
    }
    let value = codec.from_json(body)?;
    if value.get("taskState").is_none() {
        debug!("body has no taskState, not polling it");
        return Err(SdkError::no_response());
    }
    decode(value)
}

fn body_of(payload: &Payload) -> Result<&str> {
    match payload {
        Payload::Body(body) => Ok(body),
        Payload::File(_) => Err(SdkError::no_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::ClientConfig;
    use crate::pool::ConnectionPool;

    fn dispatcher() -> Dispatcher {
        let config = ClientConfig::builder("127.0.0.1:9").build().unwrap();
        let pool = ConnectionPool::new(&config);
        Dispatcher::new(Transport::new(config, pool).unwrap())
    }

    #[test]
    fn monitor_follows_config() {
        let config = ClientConfig::builder("h")
            .poll_interval(std::time::Duration::from_millis(150))
            .build()
            .unwrap();
        let pool = ConnectionPool::new(&config);
        let dispatcher = Dispatcher::new(Transport::new(config, pool).unwrap());
        assert_eq!(dispatcher.monitor().interval(), std::time::Duration::from_millis(150));
    }

    #[test]
    fn binder_errors_carry_operation_and_resource() {
        let api = ResourceApi::new("/rest/fcoe-networks").searchable();
        let err = dispatcher().invoke(&api, "get", &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
        assert_eq!(err.context().operation.as_deref(), Some("get"));
        assert_eq!(err.context().resource.as_deref(), Some("fcoe-networks"));
    }

    #[test]
    fn plain_resource_body_is_not_a_task() {
        let err = decode_task(&JsonCodec, r#"{"uri": "/rest/fcoe-networks/1", "name": "san-a"}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoResponse));
        assert!(matches!(decode_task(&JsonCodec, "").unwrap_err().kind(), ErrorKind::NoResponse));

        let task = decode_task(&JsonCodec, r#"{"uri": "/rest/tasks/T1", "taskState": "Running"}"#).unwrap();
        assert_eq!(task.task_state, crate::task::TaskState::Running);
    }

    #[test]
    fn resolved_body_shapes_into_type() {
        let value: std::collections::HashMap<String, u32> =
            Resolved::Body(serde_json::json!({"a": 1})).into_typed().unwrap();
        assert_eq!(value["a"], 1);
        assert!(Resolved::Nothing.into_typed::<Value>().is_err());
    }
}
