use keel_core::model::Version;
use proptest::prelude::*;

/// Dotted numeric versions with an occasional prerelease tag.
pub fn arb_version() -> impl Strategy<Value = Version> + Clone {
    (
        prop::collection::vec(0u64..20, 1..4),
        prop::option::of(prop::sample::select(vec!["alpha", "beta", "rc1", "pre.2"])),
    )
        .prop_map(|(parts, pre)| {
            let mut raw = parts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            if let Some(tag) = pre {
                raw.push('-');
                raw.push_str(tag);
            }
            Version::parse(&raw).unwrap()
        })
}

/// Numeric versions without prerelease tags.
pub fn arb_release() -> impl Strategy<Value = Version> + Clone {
    prop::collection::vec(0u64..20, 1..4).prop_map(|parts| {
        let raw = parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Version::parse(&raw).unwrap()
    })
}
