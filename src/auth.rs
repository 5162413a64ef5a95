use std::collections::{BTreeMap, BTreeSet};

pub const LAYER_SHELL: &str = "zwlr_layer_shell_v1";
pub const SCREENCOPY: &str = "zwlr_screencopy_manager_v1";
pub const VIRTUAL_POINTER: &str = "zwlr_virtual_pointer_manager_v1";
pub const VIRTUAL_KEYBOARD: &str = "zwp_virtual_keyboard_manager_v1";
pub const INPUT_METHOD: &str = "zwp_input_method_manager_v2";

/// Which snaps may bind each restricted protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthModel {
    snaps_for_protocols: BTreeMap<String, BTreeSet<String>>,
}

impl AuthModel {
    pub fn new<'a>(protocols_for_snaps: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let mut snaps_for_protocols: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (snap, protocols) in protocols_for_snaps {
            for protocol in protocols {
                snaps_for_protocols
                    .entry((*protocol).to_owned())
                    .or_default()
                    .insert(snap.to_owned());
            }
        }
        Self {
            snaps_for_protocols,
        }
    }

    /// Grants for the companion snaps of the kiosk shell.
    pub fn builtin() -> Self {
        Self::new([
            (
                "ubuntu-frame-osk",
                &[LAYER_SHELL, VIRTUAL_KEYBOARD, INPUT_METHOD][..],
            ),
            (
                "ubuntu-frame-vnc",
                &[SCREENCOPY, VIRTUAL_POINTER, VIRTUAL_KEYBOARD][..],
            ),
            ("ubuntu-frame", &[SCREENCOPY][..]),
        ])
    }

    pub fn snaps_for(&self, protocol: &str) -> Option<&BTreeSet<String>> {
        self.snaps_for_protocols.get(protocol)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.snaps_for_protocols.keys().map(String::as_str)
    }

    pub fn is_allowed(
        &self,
        protocol: &str,
        snap_name: &str,
        preferences: &ExtensionPreferences,
    ) -> bool {
        if let Some(preference) = preferences.preference(protocol) {
            return preference;
        }
        self.snaps_for(protocol)
            .is_none_or(|snaps| snaps.contains(snap_name))
    }
}

/// Operator overrides from `--add-wayland-extensions` and
/// `--drop-wayland-extensions`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionPreferences {
    added: BTreeSet<String>,
    dropped: BTreeSet<String>,
}

impl ExtensionPreferences {
    /// Both lists are colon separated.
    pub fn from_lists(added: &str, dropped: &str) -> Self {
        let split = |list: &str| {
            list.split(':')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect::<BTreeSet<_>>()
        };
        Self {
            added: split(added),
            dropped: split(dropped),
        }
    }

    /// Dropping wins over adding.
    pub fn preference(&self, protocol: &str) -> Option<bool> {
        if self.dropped.contains(protocol) {
            Some(false)
        } else if self.added.contains(protocol) {
            Some(true)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_is_reversed_per_protocol() {
        let model = AuthModel::new([("my-snap", &[SCREENCOPY, LAYER_SHELL][..])]);

        assert_eq!(model.protocols().count(), 2);
        let snaps = model.snaps_for(SCREENCOPY).expect("screencopy entry");
        assert_eq!(snaps.len(), 1);
        assert!(snaps.contains("my-snap"));
        assert!(model.snaps_for(LAYER_SHELL).is_some_and(|s| s.contains("my-snap")));
    }

    #[test]
    fn shared_protocols_collect_every_snap() {
        let model = AuthModel::builtin();
        let keyboard = model.snaps_for(VIRTUAL_KEYBOARD).expect("keyboard entry");
        assert!(keyboard.contains("ubuntu-frame-osk"));
        assert!(keyboard.contains("ubuntu-frame-vnc"));
        assert_eq!(model.snaps_for(SCREENCOPY).map(BTreeSet::len), Some(2));
    }

    #[test]
    fn restricted_protocols_are_limited_to_their_snaps() {
        let model = AuthModel::builtin();
        let prefs = ExtensionPreferences::default();

        assert!(model.is_allowed(LAYER_SHELL, "ubuntu-frame-osk", &prefs));
        assert!(!model.is_allowed(LAYER_SHELL, "some-app", &prefs));
        assert!(!model.is_allowed(LAYER_SHELL, "", &prefs));
        assert!(model.is_allowed("wl_compositor", "", &prefs));
    }

    #[test]
    fn user_preferences_win() {
        let model = AuthModel::builtin();
        let prefs = ExtensionPreferences::from_lists(
            "zwlr_layer_shell_v1:",
            "zwlr_screencopy_manager_v1",
        );

        assert!(model.is_allowed(LAYER_SHELL, "some-app", &prefs));
        assert!(!model.is_allowed(SCREENCOPY, "ubuntu-frame-vnc", &prefs));
    }

    #[test]
    fn dropping_beats_adding() {
        let prefs = ExtensionPreferences::from_lists("a:b", "b");
        assert_eq!(prefs.preference("a"), Some(true));
        assert_eq!(prefs.preference("b"), Some(false));
        assert_eq!(prefs.preference("c"), None);
    }
}
