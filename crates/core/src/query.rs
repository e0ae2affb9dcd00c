use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::ids::RecordId;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
        }
    }

    /// Accepts `latest` as an alias of `newest`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "newest" | "latest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "price_asc" => Ok(Self::PriceAsc),
            "price_desc" => Ok(Self::PriceDesc),
            _ => Err(CoreError::Validation(format!("unknown sort order: {s}"))),
        }
    }

    pub fn is_price(&self) -> bool {
        matches!(self, Self::PriceAsc | Self::PriceDesc)
    }
}

/// Pagination, filter and sort for a list call.
///
/// `limit` and `offset` are signed so out-of-range input coming from a caller
/// is reported instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub category_ids: BTreeSet<RecordId>,
    pub sort: SortOrder,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: i64::from(DEFAULT_LIMIT),
            offset: 0,
            category_ids: BTreeSet::new(),
            sort: SortOrder::default(),
        }
    }
}

impl ListParams {
    pub fn page(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_categories(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.category_ids.extend(ids);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.limit < 1 || self.limit > i64::from(MAX_LIMIT) {
            return Err(CoreError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.offset < 0 {
            return Err(CoreError::Validation(format!(
                "offset must be non-negative, got {}",
                self.offset
            )));
        }
        Ok(())
    }
}
