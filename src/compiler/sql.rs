//! Derived per-observation columns and vocabulary-to-class tables.
//!
//! The expressions read `obs_raw` rows aliased `r`, where `caps` is already
//! upper-cased and `frequency` is in MHz.

/// Radio class: the recorded type when it is known, otherwise inferred from
/// frequency and capability strings.
pub(crate) const RADIO_CLASS_EXPR: &str = "CASE
            WHEN r.radio_type IN ('W', 'E', 'B', 'L', 'N', 'G') THEN r.radio_type
            WHEN r.frequency BETWEEN 2412 AND 2484
              OR r.frequency BETWEEN 5000 AND 5900
              OR r.frequency BETWEEN 5925 AND 7125 THEN 'W'
            WHEN r.caps LIKE '%WPA%' OR r.caps LIKE '%WEP%' OR r.caps LIKE '%WPS%'
              OR r.caps LIKE '%RSN%' OR r.caps LIKE '%ESS%'
              OR r.caps LIKE '%CCMP%' OR r.caps LIKE '%TKIP%' THEN 'W'
            WHEN r.caps LIKE '%BLE%' OR r.caps LIKE '%BTLE%' OR r.caps LIKE '%LOW ENERGY%' THEN 'E'
            WHEN r.caps LIKE '%BLUETOOTH%' THEN 'B'
            WHEN r.caps LIKE '%LTE%' OR r.caps LIKE '%EARFCN%' OR r.caps LIKE '%3GPP%' THEN 'L'
            ELSE '?'
        END";

/// Security class derived from the capability string.
///
/// Classes: `OPEN`, `WEP`, `WPA`, `WPA2`, `WPA2-E`, `WPA3`, `WPA3-SAE`,
/// `WPA3-OWE`, `WPA3-E`, `WPS`, `Unknown`.
pub(crate) const SECURITY_CLASS_EXPR: &str = "CASE
            WHEN r.caps = '' THEN 'OPEN'
            WHEN r.caps LIKE '%WEP%' THEN 'WEP'
            WHEN TRIM(r.caps) IN ('[ESS]', '[IBSS]') THEN 'OPEN'
            WHEN r.caps LIKE '%RSN-OWE%' THEN 'WPA3-OWE'
            WHEN r.caps LIKE '%RSN-SAE%' THEN 'WPA3-SAE'
            WHEN (r.caps LIKE '%WPA3%' OR r.caps LIKE '%SAE%')
             AND (r.caps LIKE '%EAP%' OR r.caps LIKE '%MGT%') THEN 'WPA3-E'
            WHEN r.caps LIKE '%WPA3%' OR r.caps LIKE '%SAE%' THEN 'WPA3'
            WHEN (r.caps LIKE '%WPA2%' OR r.caps LIKE '%RSN%')
             AND (r.caps LIKE '%EAP%' OR r.caps LIKE '%MGT%') THEN 'WPA2-E'
            WHEN r.caps LIKE '%WPA2%' OR r.caps LIKE '%RSN%' THEN 'WPA2'
            WHEN r.caps LIKE '%WPA%' THEN 'WPA'
            WHEN r.caps LIKE '%WPS%' THEN 'WPS'
            WHEN r.caps LIKE '%CCMP%' OR r.caps LIKE '%TKIP%' OR r.caps LIKE '%AES%' THEN 'WPA2'
            ELSE 'Unknown'
        END";

/// Wi-Fi channel number from frequency, NULL outside the Wi-Fi bands.
pub(crate) const CHANNEL_EXPR: &str = "CASE
            WHEN r.frequency = 2484 THEN 14
            WHEN r.frequency BETWEEN 2412 AND 2483 THEN CAST((r.frequency - 2412) / 5 AS INTEGER) + 1
            WHEN r.frequency BETWEEN 5000 AND 5900 THEN CAST((r.frequency - 5000) / 5 AS INTEGER)
            WHEN r.frequency BETWEEN 5925 AND 7125 THEN CAST((r.frequency - 5925) / 5 AS INTEGER)
            ELSE NULL
        END";

pub(crate) fn encryption_classes(value: &str) -> &'static [&'static str] {
    match value {
        "OPEN" => &["OPEN"],
        "WEP" => &["WEP"],
        "WPA" => &["WPA"],
        "WPA2" => &["WPA2", "WPA2-E"],
        "WPA3" => &["WPA3", "WPA3-SAE", "WPA3-OWE", "WPA3-E"],
        _ => &[],
    }
}

pub(crate) fn auth_method_classes(value: &str) -> &'static [&'static str] {
    match value {
        "PSK" => &["WPA", "WPA2", "WPA3", "WPA3-SAE"],
        "Enterprise" => &["WPA2-E", "WPA3-E"],
        "SAE" => &["WPA3", "WPA3-SAE"],
        "OWE" => &["WPA3-OWE"],
        "None" => &["OPEN"],
        _ => &[],
    }
}

pub(crate) fn insecure_flag_classes(value: &str) -> &'static [&'static str] {
    match value {
        "open" => &["OPEN"],
        "wep" => &["WEP"],
        "wps" => &["WPS"],
        "deprecated" => &["WEP", "WPS"],
        _ => &[],
    }
}

pub(crate) fn security_flag_classes(value: &str) -> &'static [&'static str] {
    match value {
        "insecure" => &["OPEN", "WEP", "WPS"],
        "deprecated" => &["WEP"],
        "enterprise" => &["WPA2-E", "WPA3-E"],
        "personal" => &["WPA", "WPA2", "WPA3", "WPA3-SAE"],
        "unknown" => &["Unknown"],
        _ => &[],
    }
}

/// Stored threat level code for a threat category.
pub(crate) fn threat_level_code(category: &str) -> Option<&'static str> {
    match category {
        "critical" => Some("CRITICAL"),
        "high" => Some("HIGH"),
        "medium" => Some("MED"),
        "low" => Some("LOW"),
        _ => None,
    }
}
