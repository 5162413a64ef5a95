use smithay::utils::{Logical, Rectangle};

type Rect = Rectangle<i32, Logical>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Surfaced,
    Hidden,
}

/// Result of an output update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changed<K> {
    /// The updated output is surfaced and must be redrawn.
    pub redraw: bool,
    /// A hidden output that can now be surfaced.
    pub promoted: Option<K>,
}

/// Which outputs get a fullscreen surface.
///
/// An output overlapping the area already covered (mirrors, clones) is
/// queued as hidden and promoted once the overlap goes away.
#[derive(Clone, Debug)]
pub struct SurfaceTable<K> {
    surfaced: Vec<(K, Rect)>,
    hidden: Vec<(K, Rect)>,
}

impl<K> Default for SurfaceTable<K> {
    fn default() -> Self {
        Self {
            surfaced: Vec::new(),
            hidden: Vec::new(),
        }
    }
}

impl<K: Copy + Eq> SurfaceTable<K> {
    pub fn output_new(&mut self, key: K, extents: Rect) -> Disposition {
        if self.overlaps_display_area(extents) {
            self.hidden.push((key, extents));
            Disposition::Hidden
        } else {
            self.surfaced.push((key, extents));
            Disposition::Surfaced
        }
    }

    pub fn output_changed(&mut self, key: K, extents: Rect) -> Changed<K> {
        let mut redraw = false;
        if let Some(entry) = self.surfaced.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = extents;
            redraw = true;
        } else if let Some(entry) = self.hidden.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = extents;
        }

        Changed {
            redraw,
            promoted: self.promote(),
        }
    }

    /// Forgets the output; returns a hidden output promoted in its place.
    pub fn output_gone(&mut self, key: K) -> Option<K> {
        let before = self.hidden.len();
        self.hidden.retain(|(k, _)| *k != key);
        if self.hidden.len() == before {
            self.surfaced.retain(|(k, _)| *k != key);
        }
        self.promote()
    }

    pub fn is_surfaced(&self, key: K) -> bool {
        self.surfaced.iter().any(|(k, _)| *k == key)
    }

    pub fn is_hidden(&self, key: K) -> bool {
        self.hidden.iter().any(|(k, _)| *k == key)
    }

    pub fn surfaced(&self) -> impl Iterator<Item = K> + '_ {
        self.surfaced.iter().map(|(k, _)| *k)
    }

    fn promote(&mut self) -> Option<K> {
        let index = self
            .hidden
            .iter()
            .position(|(_, extents)| !self.overlaps_display_area(*extents))?;
        let entry = self.hidden.remove(index);
        self.surfaced.push(entry);
        Some(entry.0)
    }

    fn overlaps_display_area(&self, extents: Rect) -> bool {
        let bounding = self
            .surfaced
            .iter()
            .map(|(_, rect)| *rect)
            .reduce(|a, b| a.merge(b));
        bounding.is_some_and(|bounding| bounding.overlaps(extents))
    }
}
