//! `cloud_packet_filter`: per-instance packet filter rules
//!
//! Filters take effect synchronously. A filter is identified by its
//! instance and its own id, so the handle has two parts
//! (`ins-1234#filter-5`).

use async_trait::async_trait;
use converge::{Context, Observation, ResourceHandle, ResourceKind, Synchronous};

use crate::api::common::{validate_id, Protocol, RuleAction};
use crate::api::packet_filters::{
    CreatePacketFilterRequest, ModifyPacketFilterRequest, PacketFilter,
};
use crate::api::{ApiError, Client};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFilterSpec {
    pub instance_id: String,
    pub protocol: Protocol,
    pub port_range: String,
    pub cidr: String,
    pub action: RuleAction,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFilterGroup {
    /// CIDR, action and description.
    Rule,
}

pub struct PacketFilterKind {
    client: Client,
}

impl PacketFilterKind {
    pub const TYPE_NAME: &'static str = "cloud_packet_filter";

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn ids(handle: &ResourceHandle) -> (&str, &str) {
    (
        handle.part(0).unwrap_or_default(),
        handle.part(1).unwrap_or_default(),
    )
}

#[async_trait]
impl ResourceKind for PacketFilterKind {
    type Desired = PacketFilterSpec;
    type Observed = PacketFilter;
    type State = Synchronous;
    type Group = PacketFilterGroup;
    type Error = ApiError;

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn handle_parts(&self) -> usize {
        2
    }

    async fn find_existing(
        &self,
        ctx: Context,
        desired: &PacketFilterSpec,
    ) -> Result<Option<Vec<String>>, ApiError> {
        let filters = self
            .client
            .packet_filters()
            .list(&ctx, &desired.instance_id)
            .await?;
        Ok(filters
            .into_iter()
            .find(|f| f.protocol == desired.protocol && f.port_range == desired.port_range)
            .map(|f| vec![f.instance_id, f.filter_id]))
    }

    async fn create(
        &self,
        ctx: Context,
        desired: &PacketFilterSpec,
        client_token: &str,
    ) -> Result<Vec<String>, ApiError> {
        let request = CreatePacketFilterRequest {
            protocol: desired.protocol,
            port_range: desired.port_range.clone(),
            cidr: desired.cidr.clone(),
            action: desired.action,
            description: desired.description.clone(),
            client_token: client_token.to_string(),
        };
        let created = self
            .client
            .packet_filters()
            .create(&ctx, &desired.instance_id, &request)
            .await?;
        Ok(vec![
            validate_id(&desired.instance_id)?,
            validate_id(&created.filter_id)?,
        ])
    }

    async fn read(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> Result<Option<PacketFilter>, ApiError> {
        let (instance_id, filter_id) = ids(handle);
        let filter = self
            .client
            .packet_filters()
            .get(&ctx, instance_id, filter_id)
            .await?;
        Ok(Some(filter))
    }

    async fn status(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> Result<Observation<Synchronous>, ApiError> {
        Ok(match self.read(ctx, handle).await? {
            Some(_) => Observation::Present(Synchronous::Available),
            None => Observation::Absent,
        })
    }

    fn changed_groups(
        &self,
        observed: &PacketFilter,
        desired: &PacketFilterSpec,
    ) -> Vec<PacketFilterGroup> {
        if observed.cidr != desired.cidr
            || observed.action != desired.action
            || observed.description != desired.description
        {
            vec![PacketFilterGroup::Rule]
        } else {
            Vec::new()
        }
    }

    fn immutable_changes(
        &self,
        observed: &PacketFilter,
        desired: &PacketFilterSpec,
    ) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if observed.instance_id != desired.instance_id {
            changed.push("instance_id");
        }
        if observed.protocol != desired.protocol {
            changed.push("protocol");
        }
        if observed.port_range != desired.port_range {
            changed.push("port_range");
        }
        changed
    }

    async fn apply(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
        group: &PacketFilterGroup,
        desired: &PacketFilterSpec,
    ) -> Result<(), ApiError> {
        let (instance_id, filter_id) = ids(handle);
        match group {
            PacketFilterGroup::Rule => {
                let request = ModifyPacketFilterRequest {
                    cidr: desired.cidr.clone(),
                    action: desired.action,
                    description: desired.description.clone(),
                };
                self.client
                    .packet_filters()
                    .modify(&ctx, instance_id, filter_id, &request)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, ctx: Context, handle: &ResourceHandle) -> Result<(), ApiError> {
        let (instance_id, filter_id) = ids(handle);
        self.client
            .packet_filters()
            .delete(&ctx, instance_id, filter_id)
            .await?;
        Ok(())
    }
}
