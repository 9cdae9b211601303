// Jaskier Shared Pattern -- tenant gate
//! Two-layer tenant isolation gate (spec §4.6), grounded in the Python
//! source's `TenantIsolationMiddleware` (`middleware/tenant.py`). Replaces
//! its "tenant_id bound on the DB session" anti-pattern (spec §9) with an
//! explicit `FilterScope` value threaded as a parameter — it is never a
//! process-wide global.

use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{FilterScope, Principal, Role, TenantMembership};

/// Consumed, not implemented, by the core — the repository is the only
/// thing that resolves a membership row (spec §4.6 repository contract).
#[async_trait::async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn membership(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Option<TenantMembership>, OrchestratorError>;
}

pub struct TenantGate<'a> {
    lookup: &'a dyn MembershipLookup,
}

impl<'a> TenantGate<'a> {
    pub fn new(lookup: &'a dyn MembershipLookup) -> Self {
        Self { lookup }
    }

    /// Fails with `AuthorizationFailure` unless `principal.user_id` has an
    /// accepted membership for `requested_tenant_id` (spec §3
    /// `TenantMembership` invariant: accepted_at non-null grants access).
    pub async fn authorize(
        &self,
        principal: &Principal,
        requested_tenant_id: Uuid,
    ) -> Result<(Uuid, Role), OrchestratorError> {
        let membership = self
            .lookup
            .membership(principal.user_id, requested_tenant_id)
            .await?;

        match membership {
            Some(m) if m.grants_access() => Ok((requested_tenant_id, m.role)),
            _ => Err(OrchestratorError::AuthorizationFailure(format!(
                "user {} has no accepted membership for tenant {}",
                principal.user_id, requested_tenant_id
            ))),
        }
    }

    /// Builds the `FilterScope` bound to one data-plane operation. Callers
    /// thread the returned value explicitly through repository calls —
    /// there is no ambient/global variant (spec §5 shared-resource policy).
    pub fn scope(tenant_id: Uuid, user_id: Uuid) -> FilterScope {
        FilterScope { tenant_id, user_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FakeLookup {
        membership: Option<TenantMembership>,
    }

    #[async_trait::async_trait]
    impl MembershipLookup for FakeLookup {
        async fn membership(&self, _user_id: Uuid, _tenant_id: Uuid) -> Result<Option<TenantMembership>, OrchestratorError> {
            Ok(self.membership.clone())
        }
    }

    fn principal() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            claims: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn authorize_succeeds_for_accepted_membership() {
        let p = principal();
        let lookup = FakeLookup {
            membership: Some(TenantMembership {
                user_id: p.user_id,
                tenant_id: Uuid::new_v4(),
                role: Role::Admin,
                accepted_at: Some(Utc::now()),
            }),
        };
        let gate = TenantGate::new(&lookup);
        let (_, role) = gate.authorize(&p, Uuid::new_v4()).await.unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[tokio::test]
    async fn authorize_rejects_pending_membership() {
        let p = principal();
        let lookup = FakeLookup {
            membership: Some(TenantMembership {
                user_id: p.user_id,
                tenant_id: Uuid::new_v4(),
                role: Role::Member,
                accepted_at: None,
            }),
        };
        let gate = TenantGate::new(&lookup);
        assert!(gate.authorize(&p, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn authorize_rejects_missing_membership() {
        let p = principal();
        let lookup = FakeLookup { membership: None };
        let gate = TenantGate::new(&lookup);
        assert!(gate.authorize(&p, Uuid::new_v4()).await.is_err());
    }
}
