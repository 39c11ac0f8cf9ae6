//! Capability adapter.
//!
//! Every surface declares which filter keys it can honor. Before a surface
//! issues a request, [`adapt`] reduces the canonical `{filters, enabled}`
//! pair to that subset and reports every enabled key it had to drop, so the
//! UI can tell the operator which of their filters are not in effect here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::filters::{EnabledSet, FilterKey, FilterSpec};

/// A page or component that issues filtered requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Dashboard,
    MapExplorer,
    PointRenderer,
    Wardriving,
    Analytics,
}

impl Surface {
    pub const ALL: [Surface; 5] = [
        Surface::Dashboard,
        Surface::MapExplorer,
        Surface::PointRenderer,
        Surface::Wardriving,
        Surface::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Dashboard => "dashboard",
            Surface::MapExplorer => "map_explorer",
            Surface::PointRenderer => "point_renderer",
            Surface::Wardriving => "wardriving",
            Surface::Analytics => "analytics",
        }
    }

    /// The fixed capability table for this surface.
    pub fn capabilities(&self) -> CapabilityDeclaration {
        let everything_but = |excluded: &[FilterKey]| -> BTreeSet<FilterKey> {
            FilterKey::ALL
                .into_iter()
                .filter(|key| !excluded.contains(key))
                .collect()
        };

        let supported = match self {
            Surface::Dashboard | Surface::MapExplorer => everything_but(&[FilterKey::NetworkId]),
            Surface::PointRenderer => everything_but(&[
                FilterKey::NetworkId,
                FilterKey::ObservationCountMin,
                FilterKey::ObservationCountMax,
                FilterKey::StationaryConfidenceMin,
                FilterKey::StationaryConfidenceMax,
            ]),
            Surface::Wardriving => [
                FilterKey::Ssid,
                FilterKey::Bssid,
                FilterKey::Manufacturer,
                FilterKey::RadioTypes,
                FilterKey::FrequencyBands,
                FilterKey::EncryptionTypes,
                FilterKey::Timeframe,
                FilterKey::BoundingBox,
                FilterKey::RadiusFilter,
            ]
            .into_iter()
            .collect(),
            Surface::Analytics => everything_but(&[FilterKey::NetworkId, FilterKey::BoundingBox]),
        };

        CapabilityDeclaration { supported }
    }
}

/// The immutable set of keys a surface supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDeclaration {
    supported: BTreeSet<FilterKey>,
}

impl CapabilityDeclaration {
    pub fn new(keys: impl IntoIterator<Item = FilterKey>) -> Self {
        Self {
            supported: keys.into_iter().collect(),
        }
    }

    pub fn supports(&self, key: FilterKey) -> bool {
        self.supported.contains(&key)
    }

    pub fn supported(&self) -> impl Iterator<Item = FilterKey> + '_ {
        self.supported.iter().copied()
    }
}

/// Result of reducing a canonical filter state to one surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptedFilters {
    pub filters_for_page: FilterSpec,
    pub enabled_for_page: EnabledSet,
    /// Keys the operator enabled that this surface cannot honor.
    pub ignored_keys: Vec<FilterKey>,
}

/// Reduce `{filters, enabled}` to what `capability` supports.
///
/// Pure and deterministic. Values of disabled keys are not carried over, and
/// an enabled but unsupported key ends up disabled and listed in
/// `ignored_keys`. Adapting an already adapted result changes nothing.
pub fn adapt(
    filters: &FilterSpec,
    enabled: &EnabledSet,
    capability: &CapabilityDeclaration,
) -> AdaptedFilters {
    let mut adapted = AdaptedFilters::default();

    for (key, on) in enabled.iter() {
        if !on {
            adapted.enabled_for_page.set(key, false);
            continue;
        }

        if capability.supports(key) {
            adapted.enabled_for_page.set(key, true);
            if let Some(value) = filters.get(key) {
                adapted.filters_for_page.insert(key, value.clone());
            }
        } else {
            adapted.enabled_for_page.set(key, false);
            adapted.ignored_keys.push(key);
        }
    }

    adapted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterValue;

    fn sample() -> (FilterSpec, EnabledSet) {
        let filters = FilterSpec::new()
            .with(FilterKey::Ssid, FilterValue::text("corp"))
            .with(FilterKey::RssiMin, -70.0)
            .with(FilterKey::ThreatScoreMin, 40.0)
            .with(FilterKey::StationaryConfidenceMin, 0.5)
            .with(FilterKey::NetworkId, FilterValue::text("abc"));
        let enabled = EnabledSet::new()
            .enable(FilterKey::Ssid)
            .disable(FilterKey::RssiMin)
            .enable(FilterKey::ThreatScoreMin)
            .enable(FilterKey::StationaryConfidenceMin)
            .enable(FilterKey::NetworkId);
        (filters, enabled)
    }

    #[test]
    fn test_unsupported_enabled_keys_are_dropped_and_reported() {
        let (filters, enabled) = sample();
        let adapted = adapt(&filters, &enabled, &Surface::PointRenderer.capabilities());

        assert_eq!(
            adapted.ignored_keys,
            vec![FilterKey::NetworkId, FilterKey::StationaryConfidenceMin]
        );
        assert!(!adapted.enabled_for_page.is_enabled(FilterKey::StationaryConfidenceMin));
        assert!(!adapted.filters_for_page.contains(FilterKey::StationaryConfidenceMin));
        assert!(adapted.enabled_for_page.is_enabled(FilterKey::ThreatScoreMin));
        assert_eq!(adapted.filters_for_page.number(FilterKey::ThreatScoreMin), Some(40.0));
    }

    #[test]
    fn test_disabled_values_are_not_copied() {
        let (filters, enabled) = sample();
        let adapted = adapt(&filters, &enabled, &Surface::Dashboard.capabilities());

        assert!(!adapted.enabled_for_page.is_enabled(FilterKey::RssiMin));
        assert!(!adapted.filters_for_page.contains(FilterKey::RssiMin));
    }

    #[test]
    fn test_adaptation_is_idempotent() {
        let (filters, enabled) = sample();
        for surface in Surface::ALL {
            let capability = surface.capabilities();
            let first = adapt(&filters, &enabled, &capability);
            let second = adapt(&first.filters_for_page, &first.enabled_for_page, &capability);

            assert_eq!(second.filters_for_page, first.filters_for_page, "{surface:?}");
            assert_eq!(second.enabled_for_page, first.enabled_for_page, "{surface:?}");
            assert!(second.ignored_keys.is_empty(), "{surface:?}");
        }
    }

    #[test]
    fn test_wardriving_surface_is_narrow() {
        let capability = Surface::Wardriving.capabilities();
        assert!(capability.supports(FilterKey::Ssid));
        assert!(capability.supports(FilterKey::BoundingBox));
        assert!(!capability.supports(FilterKey::ThreatScoreMin));
        assert!(!capability.supports(FilterKey::RssiMin));
        assert_eq!(capability.supported().count(), 9);
    }

    #[test]
    fn test_no_surface_supports_network_id() {
        for surface in Surface::ALL {
            assert!(!surface.capabilities().supports(FilterKey::NetworkId));
        }
        assert!(!Surface::Analytics.capabilities().supports(FilterKey::BoundingBox));
    }
}
