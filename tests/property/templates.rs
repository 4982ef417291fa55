use std::collections::BTreeMap;

use proptest::prelude::*;

use procmux::command::{Arg, CommandBuilder, quote};

fn word() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,12}"
}

proptest! {
    #[test]
    fn positional_slots_are_all_filled(words in proptest::collection::vec(word(), 1..8)) {
        let template = format!("cmd{}", " %s".repeat(words.len()));
        let args = words.iter().map(Arg::from).collect();

        let built = CommandBuilder::new().build(&template, args).unwrap();

        prop_assert_eq!(built.command, format!("cmd {}", words.join(" ")));
        prop_assert!(built.warnings.is_empty());
        prop_assert!(built.residual.is_empty());
    }

    #[test]
    fn named_slots_use_the_map(values in proptest::collection::btree_map("[a-z]{1,6}", word(), 1..6)) {
        let template = values
            .keys()
            .map(|k| format!("%({k})s"))
            .collect::<Vec<_>>()
            .join(" ");
        let map: BTreeMap<String, Arg> =
            values.iter().map(|(k, v)| (k.clone(), Arg::from(v))).collect();

        let built = CommandBuilder::new()
            .build(&format!("echo {template}"), vec![Arg::Map(map)])
            .unwrap();

        let expected = values.values().cloned().collect::<Vec<_>>().join(" ");
        prop_assert_eq!(built.command, format!("echo {expected}"));
        prop_assert!(built.warnings.is_empty());
    }

    #[test]
    fn missing_positional_values_warn_instead_of_failing(given in 0usize..4, extra in 1usize..4) {
        let slots = given + extra;
        let template = format!("run{}", " %s".repeat(slots));
        let args = (0..given).map(|n| Arg::from(n as i64)).collect();

        let built = CommandBuilder::new().build(&template, args).unwrap();

        prop_assert_eq!(built.warnings.len(), extra);
        prop_assert!(!built.command.contains('%'));
    }

    #[test]
    fn quoted_values_split_back_to_one_word(value in "[ -~]{0,40}") {
        let quoted = quote(&value).unwrap();
        let words = shlex::split(&quoted).unwrap();
        prop_assert_eq!(words, vec![value]);
    }
}
