//! `cloud_instance`: compute instances
//!
//! Instances provision asynchronously (`PENDING`/`CREATING` to `RUNNING`) and
//! must be isolated before they can be terminated. A resize is asynchronous
//! too and briefly takes the instance back to `PENDING`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;
use converge::{
    lifecycle_states, Context, Lifecycle, LifecycleState, Observation, ResourceHandle,
    ResourceKind,
};

use crate::api::common::validate_id;
use crate::api::instances::{
    CreateInstanceRequest, Instance, ModifyInstanceAttributesRequest, ResizeInstanceRequest,
    CHARGE_PREPAID,
};
use crate::api::{ApiError, Client};
use crate::config::DEFAULT_SETTLE_DELAY;

/// Format of `expired_time` on prepaid instances.
pub const EXPIRED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

lifecycle_states! {
    pub enum InstanceState {
        Pending => "PENDING",
        Creating => "CREATING",
        Running => "RUNNING",
        Stopped => "STOPPED",
        CreateFailed => "CREATE_FAILED",
        Isolating => "ISOLATING",
        Isolated => "ISOLATED",
        Terminating => "TERMINATING",
    }
}

impl LifecycleState for InstanceState {
    fn can_transition_to(&self, next: &Self) -> bool {
        use InstanceState::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Creating | Running | CreateFailed)
                    | (Creating, Running | CreateFailed)
                    | (Running, Pending | Stopped | Isolating | Terminating)
                    | (Stopped, Pending | Running | Isolating | Terminating)
                    | (Isolating, Isolated)
                    | (Isolated, Running | Terminating)
                    | (CreateFailed, Terminating)
            )
    }
}

/// Declared attributes of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub description: Option<String>,
    pub zone: String,
    pub instance_type: String,
    pub image_id: String,
    pub deletion_protection: bool,
}

impl InstanceSpec {
    pub fn new(
        name: impl Into<String>,
        zone: impl Into<String>,
        instance_type: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            zone: zone.into(),
            instance_type: instance_type.into(),
            image_id: image_id.into(),
            deletion_protection: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_deletion_protection(mut self, enabled: bool) -> Self {
        self.deletion_protection = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceGroup {
    /// Name, description and deletion protection.
    Attributes,
    /// Instance type; applied by an asynchronous resize.
    Spec,
}

pub struct InstanceKind {
    client: Client,
    settle: Duration,
}

impl InstanceKind {
    pub const TYPE_NAME: &'static str = "cloud_instance";

    pub fn new(client: Client) -> Self {
        Self {
            client,
            settle: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Time the status endpoint needs to reflect a create or resize.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

fn instance_id(handle: &ResourceHandle) -> &str {
    handle.part(0).unwrap_or_default()
}

fn parse_state(instance: &Instance) -> Result<InstanceState, ApiError> {
    instance
        .status
        .parse()
        .map_err(|e: converge::UnknownState| {
            ApiError::Parse(format!("instance {}: {}", instance.instance_id, e))
        })
}

/// Refuse deletion of protected instances and of prepaid instances that have
/// not expired yet.
pub fn ensure_deletable(instance: &Instance, now: NaiveDateTime) -> Result<(), ApiError> {
    if instance.deletion_protection {
        return Err(ApiError::Refused(format!(
            "instance {} has deletion protection enabled",
            instance.instance_id
        )));
    }

    if instance.charge_type != CHARGE_PREPAID {
        return Ok(());
    }
    let Some(expired_time) = instance.expired_time.as_deref() else {
        return Ok(());
    };
    let expires_at = NaiveDateTime::parse_from_str(expired_time, EXPIRED_TIME_FORMAT)
        .map_err(|e| ApiError::Parse(format!("invalid expired_time {:?}: {}", expired_time, e)))?;
    if expires_at > now {
        return Err(ApiError::Refused(format!(
            "prepaid instance {} cannot be deleted before it expires at {}",
            instance.instance_id, expired_time
        )));
    }
    Ok(())
}

#[async_trait]
impl ResourceKind for InstanceKind {
    type Desired = InstanceSpec;
    type Observed = Instance;
    type State = InstanceState;
    type Group = InstanceGroup;
    type Error = ApiError;

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn handle_parts(&self) -> usize {
        1
    }

    fn lifecycle(&self) -> Lifecycle<InstanceState> {
        Lifecycle {
            ready: vec![InstanceState::Running],
            failed: vec![InstanceState::CreateFailed],
            quiesced: vec![InstanceState::Isolated],
            deleted: Vec::new(),
            deletes_async: true,
            absent_tolerance: 3,
            settle: self.settle,
        }
    }

    async fn find_existing(
        &self,
        ctx: Context,
        desired: &InstanceSpec,
    ) -> Result<Option<Vec<String>>, ApiError> {
        let found = self
            .client
            .instances()
            .list_by_name(&ctx, &desired.name)
            .await?;
        Ok(found
            .into_iter()
            .find(|i| i.name == desired.name && i.status != InstanceState::Terminating.as_str())
            .map(|i| vec![i.instance_id]))
    }

    async fn create(
        &self,
        ctx: Context,
        desired: &InstanceSpec,
        client_token: &str,
    ) -> Result<Vec<String>, ApiError> {
        let request = CreateInstanceRequest {
            name: desired.name.clone(),
            description: desired.description.clone(),
            zone: desired.zone.clone(),
            instance_type: desired.instance_type.clone(),
            image_id: desired.image_id.clone(),
            deletion_protection: desired.deletion_protection,
            client_token: client_token.to_string(),
        };
        let created = self.client.instances().create(&ctx, &request).await?;
        Ok(vec![validate_id(&created.instance_id)?])
    }

    async fn read(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> Result<Option<Instance>, ApiError> {
        let instance = self
            .client
            .instances()
            .get(&ctx, instance_id(handle))
            .await?;
        Ok(Some(instance))
    }

    async fn status(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> Result<Observation<InstanceState>, ApiError> {
        let instance = self
            .client
            .instances()
            .get(&ctx, instance_id(handle))
            .await?;
        Ok(Observation::Present(parse_state(&instance)?))
    }

    fn changed_groups(&self, observed: &Instance, desired: &InstanceSpec) -> Vec<InstanceGroup> {
        let mut groups = Vec::new();
        if observed.name != desired.name
            || observed.description != desired.description
            || observed.deletion_protection != desired.deletion_protection
        {
            groups.push(InstanceGroup::Attributes);
        }
        if observed.instance_type != desired.instance_type {
            groups.push(InstanceGroup::Spec);
        }
        groups
    }

    fn immutable_changes(&self, observed: &Instance, desired: &InstanceSpec) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if observed.zone != desired.zone {
            changed.push("zone");
        }
        if observed.image_id != desired.image_id {
            changed.push("image_id");
        }
        changed
    }

    fn group_is_async(&self, group: &InstanceGroup) -> bool {
        *group == InstanceGroup::Spec
    }

    async fn apply(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
        group: &InstanceGroup,
        desired: &InstanceSpec,
    ) -> Result<(), ApiError> {
        let api = self.client.instances();
        match group {
            InstanceGroup::Attributes => {
                let request = ModifyInstanceAttributesRequest {
                    name: desired.name.clone(),
                    description: desired.description.clone(),
                    deletion_protection: desired.deletion_protection,
                };
                api.modify_attributes(&ctx, instance_id(handle), &request)
                    .await?;
            }
            InstanceGroup::Spec => {
                let request = ResizeInstanceRequest {
                    instance_type: desired.instance_type.clone(),
                };
                api.resize(&ctx, instance_id(handle), &request).await?;
            }
        }
        Ok(())
    }

    async fn check_deletable(&self, ctx: Context, handle: &ResourceHandle) -> Result<(), ApiError> {
        let instance = self
            .client
            .instances()
            .get(&ctx, instance_id(handle))
            .await?;
        ensure_deletable(&instance, chrono::Utc::now().naive_utc())
    }

    async fn quiesce(&self, ctx: Context, handle: &ResourceHandle) -> Result<(), ApiError> {
        self.client
            .instances()
            .isolate(&ctx, instance_id(handle))
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: Context, handle: &ResourceHandle) -> Result<(), ApiError> {
        self.client
            .instances()
            .terminate(&ctx, instance_id(handle))
            .await?;
        Ok(())
    }
}
