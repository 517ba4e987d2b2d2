//! Typed facade over a resource's operation table.
//!
//! # Design
//! `ResourceClient` borrows a `Dispatcher` and a `ResourceApi` and carries
//! no state of its own. Each method turns typed inputs into positional
//! `Arg`s, invokes the matching declared operation and shapes the result,
//! so the typed surface and the declared table can never drift apart: a
//! method whose operation is not registered fails with
//! `MalformedOperation` instead of sending anything.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::encode;
use crate::dispatcher::{Dispatcher, Resolved};
use crate::endpoint::{task_args, Arg, ResourceApi};
use crate::error::{Result, SdkError};
use crate::http::{Entity, FileUpload};
use crate::task::{TaskOptions, TaskResource};
use crate::types::{Patch, ResourceCollection};

/// Standard operations on one resource type, typed as `T`.
#[derive(Debug)]
pub struct ResourceClient<'a, T> {
    dispatcher: &'a Dispatcher,
    api: &'a ResourceApi,
    _resource: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceClient<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceClient<'_, T> {}

impl<'a, T> ResourceClient<'a, T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(dispatcher: &'a Dispatcher, api: &'a ResourceApi) -> Self {
        Self {
            dispatcher,
            api,
            _resource: PhantomData,
        }
    }

    pub fn api(&self) -> &'a ResourceApi {
        self.api
    }

    pub fn get(&self, id: &str) -> Result<T> {
        self.dispatcher.invoke_as(self.api, "get", &[id.into()])
    }

    pub fn get_all(&self) -> Result<ResourceCollection<T>> {
        self.dispatcher.invoke_as(self.api, "get_all", &[])
    }

    /// Members whose name equals `name`.
    pub fn get_by_name(&self, name: &str) -> Result<Vec<T>> {
        let page: ResourceCollection<T> = self.dispatcher.invoke_as(self.api, "get_by_name", &[name.into()])?;
        Ok(page.members)
    }

    pub fn create(&self, resource: &T, options: TaskOptions) -> Result<TaskResource> {
        let [timeout, mode] = task_args(options);
        self.task("create", vec![self.body(resource)?, timeout, mode])
    }

    pub fn update(&self, id: &str, resource: &T, options: TaskOptions) -> Result<TaskResource> {
        let [timeout, mode] = task_args(options);
        self.task("update", vec![id.into(), self.body(resource)?, timeout, mode])
    }

    pub fn patch(&self, id: &str, operations: &[Patch], options: TaskOptions) -> Result<TaskResource> {
        if operations.is_empty() {
            return Err(SdkError::invalid_argument("patch needs at least one operation")
                .with_operation("patch")
                .with_resource(self.api.resource_kind()));
        }
        let [timeout, mode] = task_args(options);
        let ops = encode(operations)?;
        self.task("patch", vec![id.into(), ops.into(), timeout, mode])
    }

    pub fn delete(&self, id: &str, options: TaskOptions) -> Result<TaskResource> {
        let [timeout, mode] = task_args(options);
        self.task("delete", vec![id.into(), timeout, mode])
    }

    /// Upload `file` with a name and description.
    pub fn upload(&self, file: &Path, name: &str, description: &str, options: TaskOptions) -> Result<TaskResource> {
        let upload = FileUpload {
            file: file.to_path_buf(),
            name: name.to_string(),
            description: description.to_string(),
        };
        let [timeout, mode] = task_args(options);
        self.task("upload", vec![Entity::Upload(upload).into(), timeout, mode])
    }

    /// Download the file behind `id` into the configured directory.
    pub fn download(&self, id: &str) -> Result<PathBuf> {
        match self.dispatcher.invoke(self.api, "download", &[id.into()])? {
            Resolved::File(path) => Ok(path),
            _ => Err(SdkError::no_response()
                .with_operation("download")
                .with_resource(self.api.resource_kind())),
        }
    }

    /// Invoke any other declared operation by name.
    pub fn call(&self, operation: &str, args: &[Arg]) -> Result<Resolved> {
        self.dispatcher.invoke(self.api, operation, args)
    }

    fn task(&self, operation: &str, args: Vec<Arg>) -> Result<TaskResource> {
        self.dispatcher.invoke_task(self.api, operation, &args)
    }

    fn body(&self, resource: &T) -> Result<Arg> {
        Ok(Arg::Json(encode(resource)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;
    use crate::pool::ConnectionPool;
    use crate::transport::Transport;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Network {
        name: String,
    }

    fn dispatcher() -> Dispatcher {
        let config = ClientConfig::builder("127.0.0.1:9").build().unwrap();
        let pool = ConnectionPool::new(&config);
        Dispatcher::new(Transport::new(config, pool).unwrap())
    }

    #[test]
    fn empty_patch_is_rejected_before_io() {
        let dispatcher = dispatcher();
        let api = ResourceApi::new("/rest/fcoe-networks").patchable();
        let client: ResourceClient<Network> = ResourceClient::new(&dispatcher, &api);
        let err = client.patch("id", &[], TaskOptions::default()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
        assert_eq!(err.context().resource.as_deref(), Some("fcoe-networks"));
    }

    #[test]
    fn unregistered_operation_is_malformed() {
        let dispatcher = dispatcher();
        let api = ResourceApi::new("/rest/switch-types").searchable();
        let client: ResourceClient<Network> = ResourceClient::new(&dispatcher, &api);
        let network = Network { name: "n".to_string() };
        let err = client.create(&network, TaskOptions::default()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedOperation { .. }));
        assert_eq!(err.context().operation.as_deref(), Some("create"));
    }
}
