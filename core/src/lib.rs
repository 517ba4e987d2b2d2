//! Declarative, blocking client engine for the appliance REST API.
//!
//! # Overview
//! Resource operations are declared as data (`ResourceApi` tables of
//! `Endpoint`s) and executed through one call path:
//! binder → transport → task convergence. Long-running calls answer with a
//! task resource; the engine either returns it at once or polls it to a
//! terminal state, depending on the caller's `TaskOptions`.
//!
//! # Design
//! - `HttpRequest` is plain data; binding never touches the network.
//! - `Transport` owns all I/O and returns a tagged `Reply`, leaving the
//!   single task-redirect hop to the `Dispatcher`.
//! - `ConnectionPool` is the only shared mutable state and is injected,
//!   never global. Operation tables in `catalog` are built once and shared.
//! - Every failure is an `SdkError` with a closed `ErrorKind`.
//! - Configuration arrives as a `ClientConfig`; `config::load_from_env` and
//!   `config::load_from_file` are conveniences, not requirements.

pub mod catalog;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod multipart;
pub mod pool;
pub mod task;
pub mod transport;
pub mod types;

pub use client::ResourceClient;
pub use codec::{Codec, JsonCodec};
pub use config::{ApiVersion, ClientConfig};
pub use dispatcher::{Dispatcher, Resolved};
pub use endpoint::{Arg, BoundCall, Endpoint, FilterByName, Param, RequestInterceptor, ResourceApi, ReturnKind};
pub use error::{ErrorContext, ErrorKind, Result, SdkError};
pub use http::{ContentType, Entity, FileUpload, HttpMethod, HttpRequest, HttpResponse};
pub use pool::ConnectionPool;
pub use task::{ConvergenceMode, TaskMonitor, TaskOptions, TaskResource, TaskState, WarningPolicy};
pub use transport::{Payload, Reply, Transport};
pub use types::{ApplianceVersion, Patch, ResourceCollection};
