use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::output::OutputId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowType {
    #[default]
    Normal,
    Utility,
    Dialog,
    Freestyle,
    Menu,
    Tip,
    Satellite,
    InputMethod,
    Decoration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowState {
    #[default]
    Restored,
    Maximized,
    Fullscreen,
    Minimized,
    Hidden,
    Attached,
}

/// Stacking band. Variants are ordered bottom to top.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DepthLayer {
    Background,
    Below,
    #[default]
    Application,
    AlwaysOnTop,
    Above,
    Overlay,
}

/// A requested or rewritten window configuration. Unset fields leave the
/// committed value alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowSpecification {
    pub window_type: Option<WindowType>,
    pub state: Option<WindowState>,
    pub parent: Option<WindowId>,
    pub top_left: Option<Point<i32, Logical>>,
    pub size: Option<Size<i32, Logical>>,
    pub output_id: Option<OutputId>,
    pub depth_layer: Option<DepthLayer>,
    pub name: Option<String>,
}

impl WindowSpecification {
    pub fn touches_placement(&self) -> bool {
        self.state.is_some() || self.top_left.is_some() || self.size.is_some()
    }

    pub fn rectangle(&self) -> Option<Rectangle<i32, Logical>> {
        Some(Rectangle::new(self.top_left?, self.size?))
    }
}

/// Identity of the client owning a window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub pid: Option<i32>,
    pub snap_name: String,
}

impl AppInfo {
    pub fn new(pid: Option<i32>, snap_name: impl Into<String>) -> Self {
        Self {
            pid,
            snap_name: snap_name.into(),
        }
    }

    pub fn is_own_process(&self) -> bool {
        self.pid
            .is_some_and(|pid| u32::try_from(pid).is_ok_and(|pid| pid == std::process::id()))
    }
}

/// Committed state of a window, owned by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub window_type: WindowType,
    pub state: WindowState,
    pub parent: Option<WindowId>,
    pub depth_layer: DepthLayer,
    pub name: String,
    pub top_left: Point<i32, Logical>,
    pub size: Size<i32, Logical>,
    pub output_id: Option<OutputId>,
    pub app: AppInfo,
}

impl WindowInfo {
    pub fn new(id: WindowId, app: AppInfo) -> Self {
        Self {
            id,
            window_type: WindowType::Normal,
            state: WindowState::Restored,
            parent: None,
            depth_layer: DepthLayer::Application,
            name: String::new(),
            top_left: Point::from((0, 0)),
            size: Size::from((0, 0)),
            output_id: None,
            app,
        }
    }

    pub fn extents(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.top_left, self.size)
    }

    /// User-facing windows: counted and reported to observers.
    pub fn is_application(&self) -> bool {
        matches!(
            self.depth_layer,
            DepthLayer::Application | DepthLayer::AlwaysOnTop
        ) && self.state != WindowState::Attached
    }

    pub fn apply(&mut self, spec: &WindowSpecification) {
        if let Some(window_type) = spec.window_type {
            self.window_type = window_type;
        }
        if let Some(state) = spec.state {
            self.state = state;
        }
        if spec.parent.is_some() {
            self.parent = spec.parent;
        }
        if let Some(top_left) = spec.top_left {
            self.top_left = top_left;
        }
        if let Some(size) = spec.size {
            self.size = size;
        }
        if spec.output_id.is_some() {
            self.output_id = spec.output_id;
        }
        if let Some(depth_layer) = spec.depth_layer {
            self.depth_layer = depth_layer;
        }
        if let Some(name) = &spec.name {
            self.name.clone_from(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_and_attached_windows_are_not_applications() {
        let mut info = WindowInfo::new(WindowId(1), AppInfo::default());
        assert!(info.is_application());

        info.depth_layer = DepthLayer::AlwaysOnTop;
        assert!(info.is_application());

        info.depth_layer = DepthLayer::Background;
        assert!(!info.is_application());

        info.depth_layer = DepthLayer::Application;
        info.state = WindowState::Attached;
        assert!(!info.is_application());
    }

    #[test]
    fn apply_only_overwrites_set_fields() {
        let mut info = WindowInfo::new(WindowId(7), AppInfo::default());
        info.name = "kept".into();
        info.apply(&WindowSpecification {
            state: Some(WindowState::Fullscreen),
            size: Some((640, 480).into()),
            ..Default::default()
        });

        assert_eq!(info.state, WindowState::Fullscreen);
        assert_eq!(info.size, Size::from((640, 480)));
        assert_eq!(info.name, "kept");
        assert_eq!(info.top_left, Point::from((0, 0)));
    }

    #[test]
    fn own_process_is_detected_by_pid() {
        let own = AppInfo::new(Some(std::process::id() as i32), "");
        let other = AppInfo::new(Some(std::process::id() as i32 + 1), "");
        assert!(own.is_own_process());
        assert!(!other.is_own_process());
        assert!(!AppInfo::default().is_own_process());
    }
}
