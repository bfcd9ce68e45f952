//! Compute instance API

use converge::Context;
use serde::{Deserialize, Serialize};

use super::common::{Ack, ApiList, ApiQueryParams};
use super::{ApiError, Client};

pub const CHARGE_PREPAID: &str = "PREPAID";
pub const CHARGE_POSTPAID: &str = "POSTPAID";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub zone: String,
    pub instance_type: String,
    pub image_id: String,
    pub status: String,
    #[serde(default)]
    pub deletion_protection: bool,
    #[serde(default = "default_charge_type")]
    pub charge_type: String,
    /// Expiry of a prepaid instance, `%Y-%m-%d %H:%M:%S` UTC.
    #[serde(default)]
    pub expired_time: Option<String>,
}

fn default_charge_type() -> String {
    CHARGE_POSTPAID.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub zone: String,
    pub instance_type: String,
    pub image_id: String,
    pub deletion_protection: bool,
    pub client_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateInstanceResponse {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyInstanceAttributesRequest {
    pub name: String,
    pub description: Option<String>,
    pub deletion_protection: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeInstanceRequest {
    pub instance_type: String,
}

pub struct InstancesApi<'a> {
    client: &'a Client,
}

impl<'a> InstancesApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// GET /v1/instances?name={name}
    pub async fn list_by_name(&self, ctx: &Context, name: &str) -> Result<Vec<Instance>, ApiError> {
        let params = ApiQueryParams::new().add("name", name);
        let list: ApiList<Instance> = self
            .client
            .get_with_params(ctx, "/v1/instances", &params)
            .await?;
        Ok(list.items)
    }

    /// GET /v1/instances/{instance_id}
    pub async fn get(&self, ctx: &Context, instance_id: &str) -> Result<Instance, ApiError> {
        self.client
            .get(ctx, &format!("/v1/instances/{}", instance_id))
            .await
    }

    /// POST /v1/instances
    pub async fn create(
        &self,
        ctx: &Context,
        request: &CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ApiError> {
        self.client.post(ctx, "/v1/instances", request).await
    }

    /// PUT /v1/instances/{instance_id}
    pub async fn modify_attributes(
        &self,
        ctx: &Context,
        instance_id: &str,
        request: &ModifyInstanceAttributesRequest,
    ) -> Result<Ack, ApiError> {
        self.client
            .put(ctx, &format!("/v1/instances/{}", instance_id), request)
            .await
    }

    /// POST /v1/instances/{instance_id}/resize
    pub async fn resize(
        &self,
        ctx: &Context,
        instance_id: &str,
        request: &ResizeInstanceRequest,
    ) -> Result<Ack, ApiError> {
        self.client
            .post(ctx, &format!("/v1/instances/{}/resize", instance_id), request)
            .await
    }

    /// POST /v1/instances/{instance_id}/isolate
    pub async fn isolate(&self, ctx: &Context, instance_id: &str) -> Result<Ack, ApiError> {
        self.client
            .post(
                ctx,
                &format!("/v1/instances/{}/isolate", instance_id),
                &serde_json::json!({}),
            )
            .await
    }

    /// DELETE /v1/instances/{instance_id}
    pub async fn terminate(&self, ctx: &Context, instance_id: &str) -> Result<Ack, ApiError> {
        self.client
            .delete(ctx, &format!("/v1/instances/{}", instance_id))
            .await
    }
}
