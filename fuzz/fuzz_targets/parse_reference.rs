#![no_main]

use keel_core::model::{PackageReference, Requirement, RequirementKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(reference) = PackageReference::parse(input) {
        let reparsed = PackageReference::parse(&reference.to_string())
            .expect("a displayed reference parses");
        assert_eq!(reparsed, reference);
    }
    let _ = Requirement::parse(input, RequirementKind::Require);
});
