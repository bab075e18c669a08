//! Calibration scopes and their canonical storage keys.
//!
//! Canonical keys never contain NULLs:
//!   Global             → ("__GLOBAL__", "__GLOBAL__")
//!   Brand(b)           → (b, "__ALL__")
//!   BrandCanton(b, c)  → (b, c)

use crate::types::{BrandKey, CantonKey, TimeSeriesRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const GLOBAL_KEY: &str = "__GLOBAL__";
pub const ALL_KEY: &str = "__ALL__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Global,
    Brand,
    BrandCanton,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Global      => "global",
            ScopeLevel::Brand       => "brand",
            ScopeLevel::BrandCanton => "brand_canton",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global"       => Some(ScopeLevel::Global),
            "brand"        => Some(ScopeLevel::Brand),
            "brand_canton" => Some(ScopeLevel::BrandCanton),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum ScopeKey {
    Global,
    Brand { brand: BrandKey },
    BrandCanton { brand: BrandKey, canton: CantonKey },
}

/// Storage key of a scope: `(scope_level, scope_key1, scope_key2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalScope {
    pub level: ScopeLevel,
    pub key1:  String,
    pub key2:  String,
}

impl ScopeKey {
    pub fn brand(brand: impl Into<String>) -> Self {
        ScopeKey::Brand { brand: brand.into() }
    }

    pub fn brand_canton(brand: impl Into<String>, canton: impl Into<String>) -> Self {
        ScopeKey::BrandCanton { brand: brand.into(), canton: canton.into() }
    }

    pub fn level(&self) -> ScopeLevel {
        match self {
            ScopeKey::Global            => ScopeLevel::Global,
            ScopeKey::Brand { .. }      => ScopeLevel::Brand,
            ScopeKey::BrandCanton { .. } => ScopeLevel::BrandCanton,
        }
    }

    pub fn canonical(&self) -> CanonicalScope {
        let (key1, key2) = match self {
            ScopeKey::Global => (GLOBAL_KEY.to_string(), GLOBAL_KEY.to_string()),
            ScopeKey::Brand { brand } => (brand.clone(), ALL_KEY.to_string()),
            ScopeKey::BrandCanton { brand, canton } => (brand.clone(), canton.clone()),
        };
        CanonicalScope { level: self.level(), key1, key2 }
    }

    /// Inverse of `canonical`. Keys of a global scope are ignored.
    pub fn from_canonical(level: ScopeLevel, key1: &str, key2: &str) -> Self {
        match level {
            ScopeLevel::Global      => ScopeKey::Global,
            ScopeLevel::Brand       => ScopeKey::brand(key1),
            ScopeLevel::BrandCanton => ScopeKey::brand_canton(key1, key2),
        }
    }

    /// True when `row` belongs to this scope's working dataset.
    pub fn matches(&self, row: &TimeSeriesRow) -> bool {
        match self {
            ScopeKey::Global => true,
            ScopeKey::Brand { brand } => row.brand == *brand,
            ScopeKey::BrandCanton { brand, canton } => row.brand == *brand && row.canton == *canton,
        }
    }

    pub fn filter(&self, rows: &[TimeSeriesRow]) -> Vec<TimeSeriesRow> {
        rows.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => write!(f, "global"),
            ScopeKey::Brand { brand } => write!(f, "brand:{brand}"),
            ScopeKey::BrandCanton { brand, canton } => write!(f, "brand_canton:{brand}:{canton}"),
        }
    }
}

/// Brands and cantons available for scope pickers.
#[derive(Debug, Clone, Default)]
pub struct ScopeCatalog {
    pairs: BTreeSet<(BrandKey, CantonKey)>,
}

impl ScopeCatalog {
    pub fn from_rows(rows: &[TimeSeriesRow]) -> Self {
        Self {
            pairs: rows.iter().map(|r| (r.brand.clone(), r.canton.clone())).collect(),
        }
    }

    /// Sorted distinct brands.
    pub fn brands(&self) -> Vec<BrandKey> {
        let set: BTreeSet<&BrandKey> = self.pairs.iter().map(|(b, _)| b).collect();
        set.into_iter().cloned().collect()
    }

    /// Sorted distinct cantons across all brands.
    pub fn cantons(&self) -> Vec<CantonKey> {
        let set: BTreeSet<&CantonKey> = self.pairs.iter().map(|(_, c)| c).collect();
        set.into_iter().cloned().collect()
    }

    /// Sorted cantons with data for `brand`, or every canton when it has none.
    pub fn cantons_for(&self, brand: &str) -> Vec<CantonKey> {
        let own: Vec<CantonKey> = self
            .pairs
            .iter()
            .filter(|(b, _)| b == brand)
            .map(|(_, c)| c.clone())
            .collect();
        if own.is_empty() { self.cantons() } else { own }
    }
}
