//! Instance packet filter API

use converge::Context;
use serde::{Deserialize, Serialize};

use super::common::{Ack, ApiList, Protocol, RuleAction};
use super::{ApiError, Client};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PacketFilter {
    pub filter_id: String,
    pub instance_id: String,
    pub protocol: Protocol,
    pub port_range: String,
    pub cidr: String,
    pub action: RuleAction,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePacketFilterRequest {
    pub protocol: Protocol,
    pub port_range: String,
    pub cidr: String,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub client_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePacketFilterResponse {
    pub filter_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyPacketFilterRequest {
    pub cidr: String,
    pub action: RuleAction,
    pub description: Option<String>,
}

pub struct PacketFiltersApi<'a> {
    client: &'a Client,
}

impl<'a> PacketFiltersApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    fn base_path(instance_id: &str) -> String {
        format!("/v1/instances/{}/packet-filters", instance_id)
    }

    /// GET /v1/instances/{instance_id}/packet-filters
    pub async fn list(&self, ctx: &Context, instance_id: &str) -> Result<Vec<PacketFilter>, ApiError> {
        let list: ApiList<PacketFilter> = self
            .client
            .get(ctx, &Self::base_path(instance_id))
            .await?;
        Ok(list.items)
    }

    /// GET /v1/instances/{instance_id}/packet-filters/{filter_id}
    pub async fn get(
        &self,
        ctx: &Context,
        instance_id: &str,
        filter_id: &str,
    ) -> Result<PacketFilter, ApiError> {
        self.client
            .get(ctx, &format!("{}/{}", Self::base_path(instance_id), filter_id))
            .await
    }

    /// POST /v1/instances/{instance_id}/packet-filters
    pub async fn create(
        &self,
        ctx: &Context,
        instance_id: &str,
        request: &CreatePacketFilterRequest,
    ) -> Result<CreatePacketFilterResponse, ApiError> {
        self.client
            .post(ctx, &Self::base_path(instance_id), request)
            .await
    }

    /// PUT /v1/instances/{instance_id}/packet-filters/{filter_id}
    pub async fn modify(
        &self,
        ctx: &Context,
        instance_id: &str,
        filter_id: &str,
        request: &ModifyPacketFilterRequest,
    ) -> Result<Ack, ApiError> {
        self.client
            .put(
                ctx,
                &format!("{}/{}", Self::base_path(instance_id), filter_id),
                request,
            )
            .await
    }

    /// DELETE /v1/instances/{instance_id}/packet-filters/{filter_id}
    pub async fn delete(
        &self,
        ctx: &Context,
        instance_id: &str,
        filter_id: &str,
    ) -> Result<Ack, ApiError> {
        self.client
            .delete(ctx, &format!("{}/{}", Self::base_path(instance_id), filter_id))
            .await
    }
}
