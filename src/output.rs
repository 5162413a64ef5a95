use std::collections::BTreeMap;

use smithay::utils::{Logical, Rectangle, Transform};

/// Output attribute routing windows by their surface title.
pub const SURFACE_TITLE: &str = "surface-title";
/// Output attribute routing windows by their snap instance name.
pub const SNAP_NAME: &str = "snap-name";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

/// A physical display as seen by the window management policy.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputInfo {
    pub id: OutputId,
    pub name: String,
    pub extents: Rectangle<i32, Logical>,
    pub transform: Transform,
    pub scale: f64,
    pub attributes: BTreeMap<String, String>,
}

impl OutputInfo {
    pub fn new(id: OutputId, name: impl Into<String>, extents: Rectangle<i32, Logical>) -> Self {
        Self {
            id,
            name: name.into(),
            extents,
            transform: Transform::Normal,
            scale: 1.0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    /// Non-empty attribute value, if set.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub u32);

/// Usable area of the display: output extents minus exclusive reservations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub extents: Rectangle<i32, Logical>,
}

/// Attached outputs in the order the host reported them.
#[derive(Clone, Debug, Default)]
pub struct OutputRegistry {
    outputs: Vec<OutputInfo>,
}

impl OutputRegistry {
    pub fn insert(&mut self, output: OutputInfo) {
        if let Some(existing) = self.outputs.iter_mut().find(|o| o.id == output.id) {
            *existing = output;
        } else {
            self.outputs.push(output);
        }
    }

    pub fn remove(&mut self, id: OutputId) -> Option<OutputInfo> {
        let index = self.outputs.iter().position(|o| o.id == id)?;
        Some(self.outputs.remove(index))
    }

    pub fn get(&self, id: OutputId) -> Option<&OutputInfo> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.get(id).is_some()
    }

    pub fn nth(&self, index: usize) -> Option<&OutputInfo> {
        self.outputs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputInfo> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
