//! `cloud_security_rule`: rules of a security policy
//!
//! All rules of a policy share one ordered list on the control plane, so
//! every mutation of this kind runs under the kind's action lock. Action and
//! description are changed by separate calls.

use async_trait::async_trait;
use converge::{Context, Observation, ResourceHandle, ResourceKind, Synchronous};

use crate::api::common::{validate_id, Protocol, RuleAction};
use crate::api::security_rules::{CreateSecurityRuleRequest, SecurityRule};
use crate::api::{ApiError, Client};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRuleSpec {
    pub policy_id: String,
    pub protocol: Protocol,
    pub port: String,
    pub cidr: String,
    pub action: RuleAction,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityRuleGroup {
    Action,
    Description,
}

pub struct SecurityRuleKind {
    client: Client,
}

impl SecurityRuleKind {
    pub const TYPE_NAME: &'static str = "cloud_security_rule";

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
impl ResourceKind for SecurityRuleKind {
    type Desired = SecurityRuleSpec;
    type Observed = SecurityRule;
    type State = Synchronous;
    type Group = SecurityRuleGroup;
    type Error = ApiError;

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn handle_parts(&self) -> usize {
        2
    }

    fn serialized(&self) -> bool {
        true
    }

    async fn find_existing(
        &self,
        ctx: Context,
        desired: &SecurityRuleSpec,
    ) -> Result<Option<Vec<String>>, ApiError> {
        let rules = self
            .client
            .security_rules()
            .list(&ctx, &desired.policy_id)
            .await?;
        Ok(rules
            .into_iter()
            .find(|r| {
                r.protocol == desired.protocol && r.port == desired.port && r.cidr == desired.cidr
            })
            .map(|r| vec![r.policy_id, r.rule_id]))
    }

    async fn create(
        &self,
        ctx: Context,
        desired: &SecurityRuleSpec,
        client_token: &str,
    ) -> Result<Vec<String>, ApiError> {
        let request = CreateSecurityRuleRequest {
            protocol: desired.protocol,
            port: desired.port.clone(),
            cidr: desired.cidr.clone(),
            action: desired.action,
            description: desired.description.clone(),
            client_token: client_token.to_string(),
        };
        let created = self
            .client
            .security_rules()
            .create(&ctx, &desired.policy_id, &request)
            .await?;
        Ok(vec![
            validate_id(&desired.policy_id)?,
            validate_id(&created.rule_id)?,
        ])
    }

    async fn read(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
    ) -> Result<Option<SecurityRule>, ApiError> {
        let (policy_id, rule_id) = ids(handle);
        let rule = self
            .client
            .security_rules()
            .get(&ctx, policy_id, rule_id)
            .await?;
        Ok(Some(rule))
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
        observed: &SecurityRule,
        desired: &SecurityRuleSpec,
    ) -> Vec<SecurityRuleGroup> {
        let mut groups = Vec::new();
        if observed.action != desired.action {
            groups.push(SecurityRuleGroup::Action);
        }
        if observed.description != desired.description {
            groups.push(SecurityRuleGroup::Description);
        }
        groups
    }

    fn immutable_changes(
        &self,
        observed: &SecurityRule,
        desired: &SecurityRuleSpec,
    ) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if observed.policy_id != desired.policy_id {
            changed.push("policy_id");
        }
        if observed.protocol != desired.protocol {
            changed.push("protocol");
        }
        if observed.port != desired.port {
            changed.push("port");
        }
        if observed.cidr != desired.cidr {
            changed.push("cidr");
        }
        changed
    }

    async fn apply(
        &self,
        ctx: Context,
        handle: &ResourceHandle,
        group: &SecurityRuleGroup,
        desired: &SecurityRuleSpec,
    ) -> Result<(), ApiError> {
        let (policy_id, rule_id) = ids(handle);
        let api = self.client.security_rules();
        match group {
            SecurityRuleGroup::Action => {
                api.set_action(&ctx, policy_id, rule_id, desired.action)
                    .await?;
            }
            SecurityRuleGroup::Description => {
                api.set_description(&ctx, policy_id, rule_id, &desired.description)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, ctx: Context, handle: &ResourceHandle) -> Result<(), ApiError> {
        let (policy_id, rule_id) = ids(handle);
        self.client
            .security_rules()
            .delete(&ctx, policy_id, rule_id)
            .await?;
        Ok(())
    }
}
