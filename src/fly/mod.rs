//! Fly.io Machines API implementation of the control plane.

mod client;

use reqwest::Method;
use serde::Deserialize;

use crate::config::{ConfigError, FlyConfig};
use crate::control_plane::{
    ApiFailure, ApiFuture, App, ControlPlane, Machine, MachineId, Volume,
};
use crate::descriptors::{AppCreate, MachineCreate, VolumeCreate};

pub use client::{ApiResponse, FlyClient};

#[derive(Deserialize)]
struct AppList {
    #[serde(default)]
    apps: Vec<App>,
}

/// Control plane backed by the Fly.io Machines API.
#[derive(Clone, Debug)]
pub struct FlyControlPlane {
    client: FlyClient,
}

impl FlyControlPlane {
    /// Builds a control plane from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is incomplete; nothing
    /// is sent to the network in that case.
    pub fn new(config: &FlyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: FlyClient::new(config)?,
        })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: FlyClient) -> Self {
        Self { client }
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &FlyClient {
        &self.client
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiFailure> {
        self.client.request(Method::GET, path, None).await?.decode()
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<(), ApiFailure> {
        self.client.request(method, path, None).await.map(|_| ())
    }
}

impl ControlPlane for FlyControlPlane {
    fn get_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Option<App>> {
        Box::pin(async move {
            match self.fetch(&format!("/v1/apps/{app_name}")).await {
                Ok(app) => Ok(Some(app)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn list_apps<'a>(&'a self, org_slug: &'a str) -> ApiFuture<'a, Vec<App>> {
        Box::pin(async move {
            let list: AppList = self.fetch(&format!("/v1/apps?org_slug={org_slug}")).await?;
            Ok(list.apps)
        })
    }

    fn create_app<'a>(&'a self, request: &'a AppCreate) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .request_json(Method::POST, "/v1/apps", request)
                .await
                .map(|_| ())
        })
    }

    fn delete_app<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.send_empty(Method::DELETE, &format!("/v1/apps/{app_name}"))
                .await
        })
    }

    fn list_volumes<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Volume>> {
        Box::pin(async move { self.fetch(&format!("/v1/apps/{app_name}/volumes")).await })
    }

    fn create_volume<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a VolumeCreate,
    ) -> ApiFuture<'a, Volume> {
        Box::pin(async move {
            self.client
                .request_json(
                    Method::POST,
                    &format!("/v1/apps/{app_name}/volumes"),
                    request,
                )
                .await?
                .decode()
        })
    }

    fn list_machines<'a>(&'a self, app_name: &'a str) -> ApiFuture<'a, Vec<Machine>> {
        Box::pin(async move { self.fetch(&format!("/v1/apps/{app_name}/machines")).await })
    }

    fn create_machine<'a>(
        &'a self,
        app_name: &'a str,
        request: &'a MachineCreate,
    ) -> ApiFuture<'a, Machine> {
        Box::pin(async move {
            self.client
                .request_json(
                    Method::POST,
                    &format!("/v1/apps/{app_name}/machines"),
                    request,
                )
                .await?
                .decode()
        })
    }

    fn start_machine<'a>(
        &'a self,
        app_name: &'a str,
        machine_id: &'a MachineId,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.send_empty(
                Method::POST,
                &format!("/v1/apps/{app_name}/machines/{machine_id}/start"),
            )
            .await
        })
    }

    fn stop_machine<'a>(
        &'a self,
        app_name: &'a str,
        machine_id: &'a MachineId,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.send_empty(
                Method::POST,
                &format!("/v1/apps/{app_name}/machines/{machine_id}/stop"),
            )
            .await
        })
    }
}
