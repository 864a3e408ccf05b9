//! Regional classification of geocoded addresses.
//!
//! Reverse geocoders fill the country-code field inconsistently, so the check
//! is two-tier: country code first, localized country name second.

use breezy_core::LocationConfig;

use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionClassifier {
    codes: Vec<String>,
    names: Vec<String>,
}

impl Default for RegionClassifier {
    fn default() -> Self {
        Self::new(["CN"], ["中国", "中國", "China"])
    }
}

impl RegionClassifier {
    pub fn new<C, N>(codes: C, names: N) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        Self::new(config.region_codes.iter().cloned(), config.region_names.iter().cloned())
    }

    /// Code match is case-insensitive, name match is exact. With neither
    /// field present the address is classified as outside the region.
    pub fn classify(&self, address: &Address) -> bool {
        if let Some(code) = non_blank(address.country_code.as_deref()) {
            return self.codes.iter().any(|c| c.eq_ignore_ascii_case(code));
        }

        if let Some(name) = non_blank(address.country.as_deref()) {
            return self.names.iter().any(|n| n == name);
        }

        false
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
