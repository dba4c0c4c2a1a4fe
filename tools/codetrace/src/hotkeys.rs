use crate::replay::playback::Playback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub key: char,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayAction {
    TogglePlay,
    StepBack,
    StepForward,
    Restart,
    Quit,
}

pub const REPLAY_BINDINGS: [HotkeyBinding; 5] = [
    HotkeyBinding {
        key: ' ',
        action: "play/pause",
    },
    HotkeyBinding {
        key: 'h',
        action: "back",
    },
    HotkeyBinding {
        key: 'l',
        action: "forward",
    },
    HotkeyBinding {
        key: '0',
        action: "restart",
    },
    HotkeyBinding {
        key: 'q',
        action: "quit",
    },
];

pub fn replay_controls_legend() -> String {
    format_bindings("Keys: ", &REPLAY_BINDINGS)
}

pub fn action_for_key(key: char) -> Option<ReplayAction> {
    match key {
        ' ' => Some(ReplayAction::TogglePlay),
        'h' => Some(ReplayAction::StepBack),
        'l' => Some(ReplayAction::StepForward),
        '0' => Some(ReplayAction::Restart),
        'q' => Some(ReplayAction::Quit),
        _ => None,
    }
}

/// Apply one action. Returns `true` when the viewer should close.
pub fn apply_action(playback: &mut Playback, action: ReplayAction, step_percent: f64) -> bool {
    match action {
        ReplayAction::TogglePlay => {
            playback.toggle_play();
        }
        ReplayAction::StepBack => {
            playback.step_back(step_percent);
        }
        ReplayAction::StepForward => {
            playback.step_forward(step_percent);
        }
        ReplayAction::Restart => {
            playback.seek(0.0);
        }
        ReplayAction::Quit => {
            playback.stop();
            return true;
        }
    }
    false
}

/// Apply each bound key in `keys` in order, ignoring unbound ones and
/// stopping at quit. Returns `true` if quit was pressed.
pub fn apply_keys(playback: &mut Playback, keys: &str, step_percent: f64) -> bool {
    keys.chars()
        .filter_map(action_for_key)
        .any(|action| apply_action(playback, action, step_percent))
}

fn key_label(key: char) -> String {
    match key {
        ' ' => "space".to_string(),
        other => other.to_string(),
    }
}

fn format_bindings(prefix: &str, bindings: &[HotkeyBinding]) -> String {
    let parts = bindings
        .iter()
        .map(|binding| format!("{} {}", key_label(binding.key), binding.action))
        .collect::<Vec<_>>();
    format!("{prefix}{}", parts.join("  "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::playback::PlaybackState;

    #[test]
    fn every_binding_maps_to_an_action() {
        for binding in REPLAY_BINDINGS {
            assert!(action_for_key(binding.key).is_some(), "{binding:?}");
        }
        assert_eq!(action_for_key('x'), None);
        assert_eq!(
            replay_controls_legend(),
            "Keys: space play/pause  h back  l forward  0 restart  q quit"
        );
    }

    #[test]
    fn keys_drive_the_playback_and_stop_at_quit() {
        let mut playback = Playback::default();
        assert!(!apply_keys(&mut playback, "lllhz", 10.0));
        assert_eq!(playback.progress(), 20.0);

        assert!(!apply_keys(&mut playback, " ", 10.0));
        assert_eq!(playback.state(), PlaybackState::Playing);

        assert!(apply_keys(&mut playback, "0ql", 10.0));
        assert_eq!(playback.progress(), 0.0);
        assert_eq!(playback.state(), PlaybackState::Idle);
    }
}
