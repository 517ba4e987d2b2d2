//! Operation tables for the resources this crate knows about.
//!
//! Each table is built on first use and shared for the life of the process.

use std::sync::OnceLock;

use crate::endpoint::{Endpoint, FilterByName, Param, ResourceApi, ReturnKind};
use crate::http::{ContentType, HttpMethod};

pub fn fcoe_networks() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| {
        ResourceApi::new("/rest/fcoe-networks")
            .searchable()
            .creatable()
            .updatable()
            .patchable()
            .deletable()
    })
}

pub fn switch_types() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| ResourceApi::new("/rest/switch-types").searchable())
}

/// Name lookups take a value object (`{"value": "..."}`) rather than a
/// plain string.
pub fn sas_interconnect_types() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| {
        ResourceApi::new("/rest/sas-interconnect-types")
            .searchable()
            .register(
                Endpoint::new("get_by_name", HttpMethod::Get, "", ReturnKind::Collection)
                    .param(Param::Unbound)
                    .intercept(FilterByName),
            )
    })
}

pub fn artifact_bundles() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| {
        ResourceApi::new("/rest/artifact-bundles")
            .searchable()
            .deletable()
            .register(
                Endpoint::new("upload", HttpMethod::Post, "", ReturnKind::Task)
                    .param(Param::Body(ContentType::MultipartFormData))
                    .param(Param::Timeout)
                    .param(Param::Mode),
            )
            .register(
                Endpoint::new("download", HttpMethod::Get, "/download/{resourceId}", ReturnKind::File)
                    .param(Param::Path("resourceId")),
            )
    })
}

/// The appliance answers the issues report with a plain resource body and
/// the task in `Location`, so that call forces the task redirect.
pub fn managed_sans() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| {
        ResourceApi::new("/rest/fc-sans/managed-sans")
            .searchable()
            .updatable()
            .register(
                Endpoint::new("create_issues_report", HttpMethod::Post, "/{resourceId}/issues", ReturnKind::Task)
                    .param(Param::Path("resourceId"))
                    .param(Param::Timeout)
                    .param(Param::Mode)
                    .force_task_redirect(),
            )
            .register(
                Endpoint::new("endpoints_csv", HttpMethod::Post, "/{resourceId}/endpoints", ReturnKind::Text)
                    .param(Param::Path("resourceId")),
            )
    })
}

pub fn tasks() -> &'static ResourceApi {
    static API: OnceLock<ResourceApi> = OnceLock::new();
    API.get_or_init(|| ResourceApi::new("/rest/tasks").searchable())
}
