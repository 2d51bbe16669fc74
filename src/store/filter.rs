use crate::core::{Row, compare_values, render_scalar, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Predicate descriptor shared by queries and change-feed subscriptions.
///
/// Kept declarative so the same value can be shipped to a remote backend
/// (`to_query_pairs`) and evaluated locally against change events (`matches`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    And(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(field.into(), values)
    }

    /// Logical AND, flattening nested conjunctions.
    pub fn and(self, other: FilterExpr) -> Self {
        let mut parts = Vec::new();
        for expr in [self, other] {
            match expr {
                Self::And(inner) => parts.extend(inner),
                leaf => parts.push(leaf),
            }
        }
        Self::And(parts)
    }

    pub fn and_opt(self, other: Option<&FilterExpr>) -> Self {
        match other {
            Some(other) => self.and(other.clone()),
            None => self,
        }
    }

    /// Evaluates the predicate against a row. A missing column never matches.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq(field, expected) => row
                .get(field)
                .is_some_and(|actual| values_equal(actual, expected)),
            Self::Gte(field, bound) => row.get(field).is_some_and(|actual| {
                matches!(
                    compare_values(actual, bound),
                    Some(Ordering::Greater | Ordering::Equal)
                )
            }),
            Self::Lte(field, bound) => row.get(field).is_some_and(|actual| {
                matches!(
                    compare_values(actual, bound),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }),
            Self::In(field, options) => row
                .get(field)
                .is_some_and(|actual| options.iter().any(|option| values_equal(actual, option))),
            Self::And(parts) => parts.iter().all(|part| part.matches(row)),
        }
    }

    /// PostgREST query parameters, one pair per leaf.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        self.collect_pairs(&mut pairs);
        pairs
    }

    fn collect_pairs(&self, pairs: &mut Vec<(String, String)>) {
        match self {
            Self::Eq(field, value) => pairs.push((field.clone(), format!("eq.{}", render_scalar(value)))),
            Self::Gte(field, value) => {
                pairs.push((field.clone(), format!("gte.{}", render_scalar(value))))
            }
            Self::Lte(field, value) => {
                pairs.push((field.clone(), format!("lte.{}", render_scalar(value))))
            }
            Self::In(field, values) => {
                let joined = values.iter().map(render_scalar).collect::<Vec<_>>().join(",");
                pairs.push((field.clone(), format!("in.({joined})")));
            }
            Self::And(parts) => {
                for part in parts {
                    part.collect_pairs(pairs);
                }
            }
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .to_query_pairs()
            .into_iter()
            .map(|(field, op)| format!("{field}={op}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        f.write_str(&rendered)
    }
}
