#![no_main]

use keel_core::model::{Version, VersionExpr};
use libfuzzer_sys::fuzz_target;

// Input: a version expression, a newline, then a version to test against it.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (expr, version) = input.split_once('\n').unwrap_or((input, "1.0"));
    let (Ok(expr), Ok(version)) = (VersionExpr::parse(expr), Version::parse(version)) else {
        return;
    };
    let _ = expr.contains(&version);
});
