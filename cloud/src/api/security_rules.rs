//! Security policy rule API
//!
//! The rules of one policy form a single ordered list on the control plane.
//! Concurrent mutations of the same list are rejected with
//! `FailedOperation.TaskConflict`.

use converge::Context;
use serde::{Deserialize, Serialize};

use super::common::{Ack, ApiList, Protocol, RuleAction};
use super::{ApiError, Client};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecurityRule {
    pub rule_id: String,
    pub policy_id: String,
    pub protocol: Protocol,
    pub port: String,
    pub cidr: String,
    pub action: RuleAction,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSecurityRuleRequest {
    pub protocol: Protocol,
    pub port: String,
    pub cidr: String,
    pub action: RuleAction,
    pub description: String,
    pub client_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSecurityRuleResponse {
    pub rule_id: String,
}

pub struct SecurityRulesApi<'a> {
    client: &'a Client,
}

impl<'a> SecurityRulesApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    fn base_path(policy_id: &str) -> String {
        format!("/v1/security-policies/{}/rules", policy_id)
    }

    /// GET /v1/security-policies/{policy_id}/rules
    pub async fn list(&self, ctx: &Context, policy_id: &str) -> Result<Vec<SecurityRule>, ApiError> {
        let list: ApiList<SecurityRule> =
            self.client.get(ctx, &Self::base_path(policy_id)).await?;
        Ok(list.items)
    }

    /// GET /v1/security-policies/{policy_id}/rules/{rule_id}
    pub async fn get(
        &self,
        ctx: &Context,
        policy_id: &str,
        rule_id: &str,
    ) -> Result<SecurityRule, ApiError> {
        self.client
            .get(ctx, &format!("{}/{}", Self::base_path(policy_id), rule_id))
            .await
    }

    /// POST /v1/security-policies/{policy_id}/rules
    pub async fn create(
        &self,
        ctx: &Context,
        policy_id: &str,
        request: &CreateSecurityRuleRequest,
    ) -> Result<CreateSecurityRuleResponse, ApiError> {
        self.client
            .post(ctx, &Self::base_path(policy_id), request)
            .await
    }

    /// PUT /v1/security-policies/{policy_id}/rules/{rule_id}/action
    pub async fn set_action(
        &self,
        ctx: &Context,
        policy_id: &str,
        rule_id: &str,
        action: RuleAction,
    ) -> Result<Ack, ApiError> {
        self.client
            .put(
                ctx,
                &format!("{}/{}/action", Self::base_path(policy_id), rule_id),
                &serde_json::json!({ "action": action }),
            )
            .await
    }

    /// PUT /v1/security-policies/{policy_id}/rules/{rule_id}/description
    pub async fn set_description(
        &self,
        ctx: &Context,
        policy_id: &str,
        rule_id: &str,
        description: &str,
    ) -> Result<Ack, ApiError> {
        self.client
            .put(
                ctx,
                &format!("{}/{}/description", Self::base_path(policy_id), rule_id),
                &serde_json::json!({ "description": description }),
            )
            .await
    }

    /// DELETE /v1/security-policies/{policy_id}/rules/{rule_id}
    pub async fn delete(
        &self,
        ctx: &Context,
        policy_id: &str,
        rule_id: &str,
    ) -> Result<Ack, ApiError> {
        self.client
            .delete(ctx, &format!("{}/{}", Self::base_path(policy_id), rule_id))
            .await
    }
}
