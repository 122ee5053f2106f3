//! Predicate queries over business tables.
//!
//! Queries are plain data so they can travel to the remote store on the wire
//! and be compiled to SQL by the local store. The operator set is exactly
//! what journal replay and the calling services need: comparisons, set
//! membership, pattern match, null checks, ordering, limit/offset.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single predicate over one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Field equals value.
    Eq {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field does not equal value.
    Ne {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is strictly greater than value.
    Gt {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is greater than or equal to value.
    Gte {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is strictly less than value.
    Lt {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is less than or equal to value.
    Lte {
        /// Field name.
        field: String,
        /// Comparison value.
        value: Value,
    },
    /// Field is one of the listed values.
    In {
        /// Field name.
        field: String,
        /// Allowed values.
        values: Vec<Value>,
    },
    /// Field matches an SQL `LIKE` pattern (`%` and `_` wildcards).
    Like {
        /// Field name.
        field: String,
        /// The pattern.
        pattern: String,
    },
    /// Field is null or absent.
    IsNull {
        /// Field name.
        field: String,
    },
}

impl Filter {
    /// The field this predicate constrains.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. }
            | Self::Ne { field, .. }
            | Self::Gt { field, .. }
            | Self::Gte { field, .. }
            | Self::Lt { field, .. }
            | Self::Lte { field, .. }
            | Self::In { field, .. }
            | Self::Like { field, .. }
            | Self::IsNull { field } => field,
        }
    }
}

/// Sort direction for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Ascending by field.
    Asc(String),
    /// Descending by field.
    Desc(String),
}

impl SortOrder {
    /// The field this ordering sorts by.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Asc(field) | Self::Desc(field) => field,
        }
    }
}

/// A complete query: conjunction of filters plus ordering and paging.
///
/// All filters are combined with AND; disjunction is expressed with
/// [`Filter::In`] where the engine needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Predicates, all of which must hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Ordering, applied in sequence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<SortOrder>,
    /// Maximum number of rows to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Number of rows to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Query {
    /// Creates an empty query matching all rows.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Shorthand for an equality filter.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(Filter::Eq {
            field: field.into(),
            value,
        })
    }

    /// Adds an ordering.
    #[must_use]
    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order.push(order);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}
