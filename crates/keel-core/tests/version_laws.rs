use keel_core::model::{PackageReference, Version, VersionRange};
use proptest::prelude::*;
use std::cmp::Ordering;

#[path = "generators.rs"]
mod generators;
use generators::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn ordering_is_antisymmetric(a in arb_version(), b in arb_version()) {
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn ordering_is_transitive(a in arb_version(), b in arb_version(), c in arb_version()) {
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
    }

    #[test]
    fn equal_versions_hash_alike(a in arb_release()) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let padded = Version::parse(&format!("{a}.0")).unwrap();
        prop_assert_eq!(a.cmp(&padded), Ordering::Equal);

        let hash = |v: &Version| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        prop_assert_eq!(hash(&a), hash(&padded));
    }

    #[test]
    fn prerelease_sorts_before_its_release(a in arb_release()) {
        let pre = Version::parse(&format!("{a}-rc1")).unwrap();
        prop_assert!(pre < a);
    }

    #[test]
    fn half_open_range_matches_comparisons(lo in arb_release(), hi in arb_release(), v in arb_release()) {
        let range = VersionRange::parse(&format!("[>={lo} <{hi}]")).unwrap();
        prop_assert_eq!(range.contains(&v), v >= lo && v < hi);
    }

    #[test]
    fn reference_display_round_trips(v in arb_version(), rrev in "[a-f0-9]{8}") {
        let text = format!("pkg/{v}@user/stable#{rrev}");
        let parsed = PackageReference::parse(&text).unwrap();
        prop_assert_eq!(parsed.to_string(), text);
    }
}
