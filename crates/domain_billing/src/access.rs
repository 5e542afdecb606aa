//! Access guard
//!
//! Identity and JWT issuance live in the surrounding web layer; what
//! arrives here is an authenticated caller with a role and scope. The
//! tenant self-only rule ("a tenant may only pay their own invoices") is
//! enforced directly by the payment processor; wider manager/admin scope
//! resolution goes through the `AccessGuard` trait so transports can plug
//! in their own scope source.

use core_kernel::{PropertyId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tenant,
    Manager,
    Admin,
}

/// An authenticated caller identity, as consumed from the access layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    /// Authenticated user
    pub user_id: UserId,
    /// Caller role
    pub role: Role,
    /// The caller's own tenant, when the caller is a tenant
    pub tenant_id: Option<TenantId>,
    /// Properties the caller manages, when the caller is a manager
    pub managed_property_ids: Vec<PropertyId>,
}

impl Caller {
    /// A tenant caller acting for themselves
    pub fn tenant(user_id: UserId, tenant_id: TenantId) -> Self {
        Self {
            user_id,
            role: Role::Tenant,
            tenant_id: Some(tenant_id),
            managed_property_ids: Vec::new(),
        }
    }

    /// A property manager with a managed-property scope
    pub fn manager(user_id: UserId, managed_property_ids: Vec<PropertyId>) -> Self {
        Self {
            user_id,
            role: Role::Manager,
            tenant_id: None,
            managed_property_ids,
        }
    }

    /// An unrestricted admin
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            tenant_id: None,
            managed_property_ids: Vec::new(),
        }
    }
}

/// Policy predicate consulted for manager/admin scope
pub trait AccessGuard: Send + Sync {
    /// Whether the caller's scope covers the given tenant
    fn allows_tenant(&self, caller: &Caller, tenant_id: TenantId) -> bool;
}

/// Scope guard backed by a tenant-to-property mapping
///
/// Admins are unrestricted; managers are restricted to tenants of their
/// managed properties; tenants fall back to the self-only rule.
#[derive(Debug, Default)]
pub struct PropertyScopeGuard {
    tenant_properties: HashMap<TenantId, PropertyId>,
}

impl PropertyScopeGuard {
    /// Creates an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers which property a tenant lives in
    pub fn assign_tenant(&mut self, tenant_id: TenantId, property_id: PropertyId) {
        self.tenant_properties.insert(tenant_id, property_id);
    }
}

impl AccessGuard for PropertyScopeGuard {
    fn allows_tenant(&self, caller: &Caller, tenant_id: TenantId) -> bool {
        match caller.role {
            Role::Admin => true,
            Role::Manager => self
                .tenant_properties
                .get(&tenant_id)
                .is_some_and(|property| caller.managed_property_ids.contains(property)),
            Role::Tenant => caller.tenant_id == Some(tenant_id),
        }
    }
}
