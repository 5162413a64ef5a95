//! The display configuration file: per-output routing attributes and exact
//! application placements, grouped in named layouts.
//!
//! ```yaml
//! layouts:
//!   default:
//!     cards:
//!     - HDMI-A-1:
//!         snap-name: kiosk-app
//!       DP-1:
//!         surface-title: Dashboard
//!     applications:
//!     - snap-name: keyboard
//!       position: [0, 800]
//!       size: [1280, 224]
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
};

use serde_yaml::Value;
use tracing::{debug, error, info, warn};

use crate::{
    output::{OutputInfo, SNAP_NAME, SURFACE_TITLE},
    policy::LayoutMetadata,
};

const ATTRIBUTES: &[&str] = &[SURFACE_TITLE, SNAP_NAME];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayConfig {
    path: PathBuf,
    layout: String,
    /// Attributes by output name.
    outputs: HashMap<String, BTreeMap<String, String>>,
    metadata: LayoutMetadata,
}

impl DisplayConfig {
    /// Reads `layout` from the file at `path`. A missing or malformed file is
    /// an empty configuration.
    pub fn load(path: &Path, layout: &str) -> Self {
        let mut config = Self {
            path: path.to_owned(),
            layout: layout.to_owned(),
            ..Self::default()
        };
        config.reload();
        config
    }

    /// Parses `text` as the contents of a display configuration file.
    pub fn from_yaml_str(text: &str, layout: &str) -> Self {
        let mut config = Self {
            layout: layout.to_owned(),
            ..Self::default()
        };
        config.apply_document(text);
        config
    }

    /// Re-reads the file, replacing everything previously loaded.
    pub fn reload(&mut self) {
        self.outputs.clear();
        self.metadata = LayoutMetadata::default();

        match fs::read_to_string(&self.path) {
            Ok(text) => {
                self.apply_document(&text);
                info!(
                    path = %self.path.display(),
                    layout = %self.layout,
                    outputs = self.outputs.len(),
                    applications = self.metadata.rules().len(),
                    "loaded display configuration"
                );
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no display configuration");
            }
            Err(err) => {
                error!(path = %self.path.display(), "failed to read display configuration: {err}");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &str {
        &self.layout
    }

    pub fn layout_metadata(&self) -> &LayoutMetadata {
        &self.metadata
    }

    pub fn attributes_for(&self, output_name: &str) -> Option<&BTreeMap<String, String>> {
        self.outputs.get(output_name)
    }

    /// Replaces the routing attributes of `output` with the configured ones.
    pub fn apply_attributes(&self, mut output: OutputInfo) -> OutputInfo {
        for key in ATTRIBUTES {
            output.attributes.remove(*key);
        }
        if let Some(attributes) = self.outputs.get(&output.name) {
            output
                .attributes
                .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        output
    }

    fn apply_document(&mut self, text: &str) {
        let document: Value = match serde_yaml::from_str(text) {
            Ok(document) => document,
            Err(err) => {
                error!("malformed display configuration: {err}");
                return;
            }
        };
        if document.is_null() {
            return;
        }

        let Some(layout) = document
            .get("layouts")
            .and_then(|layouts| layouts.get(self.layout.as_str()))
        else {
            warn!(layout = %self.layout, "display configuration has no such layout");
            return;
        };

        if let Some(cards) = layout.get("cards") {
            self.outputs = parse_cards(cards);
        }
        if let Some(applications) = layout.get("applications") {
            self.metadata = LayoutMetadata::from_yaml(applications);
        }
    }
}

fn parse_cards(cards: &Value) -> HashMap<String, BTreeMap<String, String>> {
    let mut outputs = HashMap::new();
    let Some(cards) = cards.as_sequence() else {
        error!("'cards' must be a sequence");
        return outputs;
    };

    for card in cards {
        let Some(card) = card.as_mapping() else {
            continue;
        };
        for (name, settings) in card {
            // Card level keys such as `card-id` are scalars.
            let (Some(name), Some(settings)) = (name.as_str(), settings.as_mapping()) else {
                continue;
            };

            let attributes: BTreeMap<String, String> = ATTRIBUTES
                .iter()
                .filter_map(|key| {
                    let value = settings.get(*key)?;
                    match value.as_str() {
                        Some(value) => Some(((*key).to_owned(), value.to_owned())),
                        None => {
                            error!(output = name, key, "output attribute must be a string");
                            None
                        }
                    }
                })
                .collect();
            if !attributes.is_empty() {
                outputs.insert(name.to_owned(), attributes);
            }
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use smithay::utils::Rectangle;

    use super::*;
    use crate::output::OutputId;

    const CONFIG: &str = r#"
layouts:
  default:
    cards:
    - card-id: 0
      HDMI-A-1:
        snap-name: kiosk-app
        orientation: normal
      DP-1:
        surface-title: Dashboard
    applications:
    - snap-name: keyboard
      position: [0, 800]
      size: [1280, 224]
  side-by-side:
    cards:
    - HDMI-A-1:
        surface-title: Left
"#;

    fn output(name: &str) -> OutputInfo {
        OutputInfo::new(OutputId(1), name, Rectangle::new((0, 0).into(), (800, 600).into()))
    }

    #[test]
    fn cards_attach_attributes_by_output_name() {
        let config = DisplayConfig::from_yaml_str(CONFIG, "default");

        let hdmi = config.apply_attributes(output("HDMI-A-1"));
        assert_eq!(hdmi.attribute(SNAP_NAME), Some("kiosk-app"));
        assert_eq!(hdmi.attribute(SURFACE_TITLE), None);
        assert_eq!(hdmi.attributes.get("orientation"), None);

        let dp = config.apply_attributes(output("DP-1"));
        assert_eq!(dp.attribute(SURFACE_TITLE), Some("Dashboard"));

        assert!(config.apply_attributes(output("eDP-1")).attributes.is_empty());
    }

    #[test]
    fn applications_become_layout_metadata() {
        let config = DisplayConfig::from_yaml_str(CONFIG, "default");
        let rules = config.layout_metadata().rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].snap_name.as_deref(), Some("keyboard"));
        assert_eq!(rules[0].position, (0, 800).into());
        assert_eq!(rules[0].size, (1280, 224).into());
    }

    #[test]
    fn the_selected_layout_replaces_old_attributes() {
        let config = DisplayConfig::from_yaml_str(CONFIG, "side-by-side");
        let hdmi = output("HDMI-A-1").with_attribute(SNAP_NAME, "stale");
        let hdmi = config.apply_attributes(hdmi);
        assert_eq!(hdmi.attribute(SNAP_NAME), None);
        assert_eq!(hdmi.attribute(SURFACE_TITLE), Some("Left"));
        assert!(config.layout_metadata().is_empty());
    }

    #[test]
    fn unknown_layouts_and_garbage_are_empty() {
        assert_eq!(
            DisplayConfig::from_yaml_str(CONFIG, "missing"),
            DisplayConfig::from_yaml_str("", "missing")
        );
        let garbage = DisplayConfig::from_yaml_str("layouts: [: nope", "default");
        assert!(garbage.attributes_for("HDMI-A-1").is_none());
        assert!(garbage.layout_metadata().is_empty());
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.display");

        let mut config = DisplayConfig::load(&path, "default");
        assert!(config.attributes_for("DP-1").is_none());

        fs::write(&path, CONFIG).expect("write config");
        config.reload();
        assert_eq!(
            config
                .attributes_for("DP-1")
                .and_then(|attributes| attributes.get(SURFACE_TITLE))
                .map(String::as_str),
            Some("Dashboard")
        );

        fs::remove_file(&path).expect("remove config");
        config.reload();
        assert!(config.attributes_for("DP-1").is_none());
    }
}
