use crate::{
    output::{OutputId, OutputInfo, SNAP_NAME, SURFACE_TITLE},
    policy::WindowSpecification,
};

/// Routes windows to outputs by surface title or snap name, as tagged on
/// the outputs themselves.
#[derive(Clone, Debug, Default)]
pub struct PlacementMapping {
    surface_titles: Vec<(String, OutputId)>,
    snap_names: Vec<(String, OutputId)>,
}

impl PlacementMapping {
    pub fn set_output_for_surface(&self, spec: &mut WindowSpecification, title: &str) -> bool {
        assign(&self.surface_titles, spec, title)
    }

    pub fn set_output_for_snap(&self, spec: &mut WindowSpecification, snap_name: &str) -> bool {
        assign(&self.snap_names, spec, snap_name)
    }

    pub fn output_for_surface(&self, title: &str) -> Option<OutputId> {
        lookup(&self.surface_titles, title)
    }

    pub fn output_for_snap(&self, snap_name: &str) -> Option<OutputId> {
        lookup(&self.snap_names, snap_name)
    }

    /// Whether either identity of a window has an output route.
    pub fn is_mapped(&self, title: Option<&str>, snap_name: &str) -> bool {
        self.output_for_snap(snap_name).is_some()
            || title.is_some_and(|title| self.output_for_surface(title).is_some())
    }

    pub fn update(&mut self, output: &OutputInfo) {
        self.clear(output.id);

        if let Some(title) = output.attribute(SURFACE_TITLE) {
            self.surface_titles.push((title.to_owned(), output.id));
        }
        if let Some(snap_name) = output.attribute(SNAP_NAME) {
            self.snap_names.push((snap_name.to_owned(), output.id));
        }

        tracing::debug!(
            output = %output.name,
            surface_title = output.attribute(SURFACE_TITLE),
            snap_name = output.attribute(SNAP_NAME),
            "placement mapping updated"
        );
    }

    pub fn clear(&mut self, output: OutputId) {
        self.surface_titles.retain(|(_, id)| *id != output);
        self.snap_names.retain(|(_, id)| *id != output);
    }

    pub fn references(&self, output: OutputId) -> bool {
        self.surface_titles
            .iter()
            .chain(&self.snap_names)
            .any(|(_, id)| *id == output)
    }

    pub fn len(&self) -> usize {
        self.surface_titles.len() + self.snap_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lookup(entries: &[(String, OutputId)], key: &str) -> Option<OutputId> {
    if key.is_empty() {
        return None;
    }
    entries
        .iter()
        .find(|(candidate, _)| candidate == key)
        .map(|(_, id)| *id)
}

fn assign(entries: &[(String, OutputId)], spec: &mut WindowSpecification, key: &str) -> bool {
    let Some(output) = lookup(entries, key) else {
        return false;
    };
    spec.output_id = Some(output);
    true
}

#[cfg(test)]
mod tests {
    use smithay::utils::Rectangle;

    use super::*;

    fn tagged(id: u32, title: Option<&str>, snap: Option<&str>) -> OutputInfo {
        let mut info = OutputInfo::new(
            OutputId(id),
            format!("out-{id}"),
            Rectangle::new((0, 0).into(), (800, 600).into()),
        );
        if let Some(title) = title {
            info = info.with_attribute(SURFACE_TITLE, title);
        }
        if let Some(snap) = snap {
            info = info.with_attribute(SNAP_NAME, snap);
        }
        info
    }

    #[test]
    fn update_is_idempotent() {
        let mut mapping = PlacementMapping::default();
        let output = tagged(1, Some("Dashboard"), Some("kiosk"));

        mapping.update(&output);
        mapping.update(&output);

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.output_for_surface("Dashboard"), Some(OutputId(1)));
        assert_eq!(mapping.output_for_snap("kiosk"), Some(OutputId(1)));
    }

    #[test]
    fn update_replaces_entries_for_the_same_output() {
        let mut mapping = PlacementMapping::default();
        mapping.update(&tagged(1, Some("Old"), None));
        mapping.update(&tagged(1, Some("New"), None));

        assert_eq!(mapping.output_for_surface("Old"), None);
        assert_eq!(mapping.output_for_surface("New"), Some(OutputId(1)));
    }

    #[test]
    fn clear_purges_every_entry_of_an_output() {
        let mut mapping = PlacementMapping::default();
        mapping.update(&tagged(1, Some("Left"), Some("left-snap")));
        mapping.update(&tagged(2, Some("Right"), None));

        mapping.clear(OutputId(1));

        assert!(!mapping.references(OutputId(1)));
        assert_eq!(mapping.output_for_snap("left-snap"), None);
        assert_eq!(mapping.output_for_surface("Right"), Some(OutputId(2)));
    }

    #[test]
    fn first_match_wins_and_writes_the_spec() {
        let mut mapping = PlacementMapping::default();
        mapping.update(&tagged(1, Some("Shared"), None));
        mapping.update(&tagged(2, Some("Shared"), None));

        let mut spec = WindowSpecification::default();
        assert!(mapping.set_output_for_surface(&mut spec, "Shared"));
        assert_eq!(spec.output_id, Some(OutputId(1)));

        let mut untouched = WindowSpecification::default();
        assert!(!mapping.set_output_for_snap(&mut untouched, "Shared"));
        assert_eq!(untouched.output_id, None);
    }

    #[test]
    fn empty_keys_never_match() {
        let mut mapping = PlacementMapping::default();
        mapping.update(&tagged(1, Some(""), Some("")));
        assert!(mapping.is_empty());
        assert!(!mapping.is_mapped(Some(""), ""));
    }
}
