use serde_yaml::Value;
use smithay::utils::{Logical, Point, Size};

use crate::policy::{WindowSpecification, WindowState};

/// Exact placement for one application, keyed by exactly one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementRule {
    pub snap_name: Option<String>,
    pub surface_title: Option<String>,
    pub position: Point<i32, Logical>,
    pub size: Size<i32, Logical>,
}

impl PlacementRule {
    fn matches(&self, title: Option<&str>, snap_name: &str) -> bool {
        self.snap_name.as_deref() == Some(snap_name)
            || title.is_some_and(|title| self.surface_title.as_deref() == Some(title))
    }
}

/// The `applications` section of a display layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayoutMetadata {
    rules: Vec<PlacementRule>,
}

impl LayoutMetadata {
    pub fn new(rules: Vec<PlacementRule>) -> Self {
        Self { rules }
    }

    /// Parses a sequence of rules. Malformed rules are logged and dropped.
    pub fn from_yaml(node: &Value) -> Self {
        let Some(entries) = node.as_sequence() else {
            if !node.is_null() {
                tracing::error!("'applications' must be a sequence; ignoring layout metadata");
            }
            return Self::default();
        };

        let rules = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match parse_rule(entry) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::error!(index, "dropping application layout rule: {err}");
                    None
                }
            })
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> &[PlacementRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn try_layout(
        &self,
        spec: &mut WindowSpecification,
        title: Option<&str>,
        snap_name: &str,
    ) -> bool {
        let Some(rule) = self.rules.iter().find(|rule| rule.matches(title, snap_name)) else {
            return false;
        };

        spec.state = Some(WindowState::Restored);
        spec.top_left = Some(rule.position);
        spec.size = Some(rule.size);
        true
    }
}

fn parse_rule(node: &Value) -> Result<PlacementRule, String> {
    if !node.is_mapping() {
        return Err("rule must be a mapping".to_owned());
    }

    let snap_name = string_field(node, "snap-name")?;
    let surface_title = string_field(node, "surface-title")?;
    match (&snap_name, &surface_title) {
        (Some(_), Some(_)) => {
            return Err("rule must not set both 'snap-name' and 'surface-title'".to_owned());
        }
        (None, None) => {
            return Err("rule must set one of 'snap-name' or 'surface-title'".to_owned());
        }
        _ => {}
    }

    let (x, y) = try_parse_vec2(node, "position")?;
    let (w, h) = try_parse_vec2(node, "size")?;

    Ok(PlacementRule {
        snap_name,
        surface_title,
        position: Point::from((x, y)),
        size: Size::from((w, h)),
    })
}

fn string_field(node: &Value, field: &str) -> Result<Option<String>, String> {
    match node.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(format!("'{field}' must be a string")),
    }
}

fn try_parse_vec2(node: &Value, field: &str) -> Result<(i32, i32), String> {
    let Some(value) = node.get(field) else {
        return Err(format!("'{field}' is required"));
    };
    let Some(items) = value.as_sequence() else {
        return Err(format!("'{field}' must be a sequence of two integers"));
    };
    if items.len() != 2 {
        return Err(format!(
            "'{field}' must have a length of 2, but has length {}",
            items.len()
        ));
    }

    let component = |item: &Value| {
        item.as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| format!("'{field}' must contain integers"))
    };
    Ok((component(&items[0])?, component(&items[1])?))
}
