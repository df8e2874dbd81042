//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::json;

use rrs_core::{Address, Keypair};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random address.
pub fn address() -> impl Strategy<Value = Address> {
    keypair().prop_map(|kp| kp.address())
}

/// Generate one non-blank description without separators.
pub fn description() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ._-]{0,40}".prop_map(|s| s.trim().to_string())
}

/// Generate a `*`-separated list and the entries it holds.
pub fn star_list(max: usize) -> impl Strategy<Value = (String, Vec<String>)> {
    prop::collection::vec(description(), 1..=max).prop_map(|entries| (entries.join("*"), entries))
}

/// Generate issue document text of any problem type.
pub fn issue_text() -> impl Strategy<Value = String> {
    let kind = prop_oneof![
        Just("errors"),
        Just("warnings"),
        Just("unresponded_devices"),
        Just("something_else"),
    ];
    let source = prop_oneof![Just(""), Just("devices"), Just("zigbee")];
    prop_oneof![
        description().prop_map(|d| json!({ "description": d }).to_string()),
        (kind, star_list(4), source).prop_map(|(kind, (raw, _), source)| {
            json!({
                "description": { "type": kind, "description": raw, "source": source }
            })
            .to_string()
        }),
    ]
}
