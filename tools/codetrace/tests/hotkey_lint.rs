use codetrace::hotkeys::{action_for_key, replay_controls_legend, REPLAY_BINDINGS};

fn legend_keys(legend: &str) -> Vec<char> {
    legend
        .split_whitespace()
        .filter_map(|token| match token {
            "space" => Some(' '),
            _ if token.len() == 1 => token.chars().next(),
            _ => None,
        })
        .collect()
}

#[test]
fn linter_hotkeys_advertised_in_ui_must_have_behavior() {
    let advertised = legend_keys(&replay_controls_legend());

    for binding in REPLAY_BINDINGS {
        assert!(
            advertised.contains(&binding.key),
            "binding `{}` missing from legend",
            binding.key
        );
    }
    for key in advertised {
        assert!(
            action_for_key(key).is_some(),
            "advertised hotkey `{key}` has no application behavior"
        );
    }
}

#[test]
fn linter_bindings_are_unique() {
    let mut keys = REPLAY_BINDINGS.iter().map(|b| b.key).collect::<Vec<_>>();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), REPLAY_BINDINGS.len());
}
