use smithay::utils::{Logical, Point};

use crate::{
    output::Zone,
    policy::{AppInfo, WindowId, WindowInfo, WindowSpecification},
};

/// Commands and queries the host compositor offers to the policy.
pub trait WindowManagerTools {
    /// The host's default (floating) placement for a new window.
    fn canonical_placement(
        &self,
        app: &AppInfo,
        requested: &WindowSpecification,
    ) -> WindowSpecification;

    /// Fills in `top_left` and `size` for the state in `spec`, on the output
    /// it names, else the window's output, else the active zone.
    fn place_and_size_for_state(&self, spec: &mut WindowSpecification, info: Option<&WindowInfo>);

    fn active_zone(&self) -> Option<Zone>;

    fn window_ids(&self) -> Vec<WindowId>;

    fn info_for(&self, window: WindowId) -> Option<WindowInfo>;

    fn modify_window(&mut self, window: WindowId, spec: &WindowSpecification);

    fn window_at(&self, cursor: Point<f64, Logical>) -> Option<WindowId>;

    fn select_active_window(&mut self, window: Option<WindowId>);
}
