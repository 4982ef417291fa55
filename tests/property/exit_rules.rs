use std::collections::BTreeSet;

use proptest::prelude::*;

use procmux::ExitRule;
use procmux::exit::is_success;

proptest! {
    #[test]
    fn code_set_membership(codes in proptest::collection::btree_set(-20i32..256, 1..6), code in -20i32..256) {
        let rule = ExitRule::codes(codes.iter().copied());
        prop_assert_eq!(rule.is_success(code), codes.contains(&code));
    }

    #[test]
    fn pattern_matches_the_decimal_form(codes in proptest::collection::btree_set(0i32..256, 1..4), code in 0i32..256) {
        let alternatives = codes.iter().map(i32::to_string).collect::<Vec<_>>().join("|");
        let rule = ExitRule::pattern(&format!("^({alternatives})$")).unwrap();
        prop_assert_eq!(rule.is_success(code), codes.contains(&code));
    }

    #[test]
    fn default_rule_is_zero_only(code in -64i32..256) {
        prop_assert_eq!(is_success(code, None), code == 0);
    }
}

#[test]
fn empty_code_set_falls_back_to_zero() {
    let rule = ExitRule::codes(BTreeSet::new());
    assert!(rule.is_success(0));
    assert!(!rule.is_success(1));
}
