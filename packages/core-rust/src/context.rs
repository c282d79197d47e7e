use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::Principal;

/// Per-request context carrying identity, locale, and tracing information.
///
/// Created once per inbound request and read-only afterwards. Clones share
/// the same underlying data, so handing a carrier to a worker never
/// invalidates the creator's copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ContextData", into = "ContextData")]
pub struct ContextCarrier {
    data: Arc<ContextData>,
}

/// Plain field storage behind a [`ContextCarrier`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    /// Correlation id propagated across service hops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Bearer token forwarded to downstream calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Authenticated principal, if the request is authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Free-form entries not covered by the named fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

impl ContextCarrier {
    /// The carrier observed when nothing has been installed.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self.data == ContextData::default()
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.data.correlation_id.as_deref()
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.data.auth_token.as_deref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.data.user_id.as_deref()
    }

    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.data.organization_id.as_deref()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.data.principal.as_ref()
    }

    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.data.locale.as_deref()
    }

    #[must_use]
    pub fn baggage(&self, key: &str) -> Option<&str> {
        self.data.baggage.get(key).map(String::as_str)
    }

    /// Read-only view of every field.
    #[must_use]
    pub fn data(&self) -> &ContextData {
        &self.data
    }

    /// Returns `true` if both carriers share the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl From<ContextData> for ContextCarrier {
    fn from(data: ContextData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl From<ContextCarrier> for ContextData {
    fn from(carrier: ContextCarrier) -> Self {
        Arc::unwrap_or_clone(carrier.data)
    }
}

/// Builder for [`ContextCarrier`]. The carrier is frozen by [`ContextBuilder::build`].
#[derive(Debug, Default)]
pub struct ContextBuilder {
    data: ContextData,
}

impl ContextBuilder {
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.data.correlation_id = Some(id.into());
        self
    }

    /// Sets a fresh random correlation id.
    #[must_use]
    pub fn generated_correlation_id(self) -> Self {
        self.correlation_id(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.data.auth_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.data.user_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.data.organization_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn principal(mut self, principal: Principal) -> Self {
        self.data.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.data.locale = Some(locale.into());
        self
    }

    #[must_use]
    pub fn baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.baggage.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn build(self) -> ContextCarrier {
        ContextCarrier::from(self.data)
    }
}
