use crate::core::{OrderBy, SortDirection, TenantKey};
use crate::store::FilterExpr;
use std::collections::BTreeSet;

/// What a feature tells the synchronizer about its table.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPolicy {
    pub table: String,
    pub id_field: String,
    pub created_at_field: String,
    /// Column compared against the tenant key.
    pub tenant_field: String,
    pub order: SortDirection,
    /// Always ANDed into the scope, e.g. `ativa = true`.
    pub base_filter: Option<FilterExpr>,
    /// Update events touching only these fields are patched in place
    /// instead of triggering a refetch. Empty means "always refetch".
    pub silent_fields: BTreeSet<String>,
    /// Server-owned columns that local edits must not touch.
    pub immutable_fields: BTreeSet<String>,
}

impl CollectionPolicy {
    pub fn new(table: impl Into<String>, tenant_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_field: "uid".to_string(),
            created_at_field: "created_at".to_string(),
            tenant_field: tenant_field.into(),
            order: SortDirection::Descending,
            base_filter: None,
            silent_fields: BTreeSet::new(),
            immutable_fields: BTreeSet::new(),
        }
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn created_at_field(mut self, field: impl Into<String>) -> Self {
        self.created_at_field = field.into();
        self
    }

    pub fn order(mut self, direction: SortDirection) -> Self {
        self.order = direction;
        self
    }

    pub fn base_filter(mut self, filter: FilterExpr) -> Self {
        self.base_filter = Some(match self.base_filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn silent_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.silent_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn immutable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Tenant equality AND base filter AND optional secondary filter.
    pub fn scope_filter(&self, tenant: &TenantKey, secondary: Option<&FilterExpr>) -> FilterExpr {
        let mut filter = FilterExpr::eq(self.tenant_field.clone(), tenant.as_str());
        if let Some(base) = &self.base_filter {
            filter = filter.and(base.clone());
        }
        filter.and_opt(secondary)
    }

    pub fn order_by(&self) -> OrderBy {
        OrderBy {
            field: self.created_at_field.clone(),
            direction: self.order,
        }
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        field == self.id_field
            || field == self.created_at_field
            || field == self.tenant_field
            || self.immutable_fields.contains(field)
    }

    pub fn is_silent_change(&self, changed: &BTreeSet<String>) -> bool {
        !self.silent_fields.is_empty() && changed.is_subset(&self.silent_fields)
    }
}
