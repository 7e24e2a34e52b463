//! In-memory spatial index for geofence candidate lookup
//!
//! Divides the world into square cells of roughly `cell_m` meters (fixed
//! degree size derived at the equator). Every fence registers the cells its
//! circle's bounding box covers; a candidate query takes the cell containing
//! the position plus its 8 neighbours, so the result is a superset of every
//! fence that could contain the position, for any accuracy margin up to one
//! cell.
//!
//! Uses DashMap for lock-free concurrent access: the evaluation pipeline
//! reads candidates while store writes maintain registrations. The index is
//! rebuilt from the geofence table on startup and kept current by every
//! fence write thereafter.

use dashmap::DashMap;

use waymark_core::domain::newtypes::{Latitude, Longitude, ReminderId};
use waymark_core::domain::Geofence;

/// Meters per degree of latitude (and of longitude at the equator)
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Fences whose bounding box would span at least this many cells per axis
/// skip cell registration and join every candidate set instead, keeping
/// registration bounded for pathological radii.
const MAX_SPAN_CELLS: i64 = 32;

/// A square cell in the fixed degree grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridCell {
    x: i64,
    y: i64,
}

/// Cell-based candidate index over registered geofences
///
/// The index may over-approximate (candidates whose circle turns out not to
/// contain the position) but never misses a fence whose circle could.
pub struct GridIndex {
    cell_deg: f64,
    /// cell -> fences overlapping it
    by_cell: DashMap<GridCell, Vec<ReminderId>>,
    /// fence -> registered cells (reverse lookup for re-registration)
    by_reminder: DashMap<ReminderId, Vec<GridCell>>,
    /// fences too large for cell registration; always candidates
    oversized: DashMap<ReminderId, ()>,
}

impl GridIndex {
    /// Creates an empty index with the given cell edge length in meters
    pub fn new(cell_m: u32) -> Self {
        Self {
            cell_deg: f64::from(cell_m.max(1)) / METERS_PER_DEGREE,
            by_cell: DashMap::new(),
            by_reminder: DashMap::new(),
            oversized: DashMap::new(),
        }
    }

    /// Registers a fence, replacing any previous registration for the same
    /// reminder
    pub fn insert(&self, fence: &Geofence) {
        let id = *fence.reminder_id();
        self.remove(&id);

        match self.covering_cells(fence) {
            Some(cells) => {
                for cell in &cells {
                    self.by_cell.entry(*cell).or_default().push(id);
                }
                self.by_reminder.insert(id, cells);
            }
            None => {
                self.oversized.insert(id, ());
            }
        }
    }

    /// Drops a fence from the index
    pub fn remove(&self, id: &ReminderId) {
        if let Some((_, cells)) = self.by_reminder.remove(id) {
            for cell in cells {
                if let Some(mut ids) = self.by_cell.get_mut(&cell) {
                    ids.retain(|other| other != id);
                }
                self.by_cell.remove_if(&cell, |_, ids| ids.is_empty());
            }
        }
        self.oversized.remove(id);
    }

    /// Candidate reminder ids near a position
    ///
    /// Returns the fences registered in the containing cell and its 8
    /// neighbours, plus every oversized fence, deduplicated.
    pub fn candidates(&self, latitude: Latitude, longitude: Longitude) -> Vec<ReminderId> {
        let center = self.cell(latitude.degrees(), longitude.degrees());

        let mut ids: Vec<ReminderId> = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                let cell = GridCell {
                    x: center.x + dx,
                    y: center.y + dy,
                };
                if let Some(cell_ids) = self.by_cell.get(&cell) {
                    ids.extend(cell_ids.iter().copied());
                }
            }
        }
        for entry in self.oversized.iter() {
            ids.push(*entry.key());
        }

        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Removes every registration
    pub fn clear(&self) {
        self.by_cell.clear();
        self.by_reminder.clear();
        self.oversized.clear();
    }

    /// Number of registered fences
    pub fn len(&self) -> usize {
        self.by_reminder.len() + self.oversized.len()
    }

    /// Whether no fence is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, latitude: f64, longitude: f64) -> GridCell {
        GridCell {
            x: (longitude / self.cell_deg).floor() as i64,
            y: (latitude / self.cell_deg).floor() as i64,
        }
    }

    /// Cells covered by the fence circle's bounding box, or `None` when the
    /// fence is too large to register cell by cell
    fn covering_cells(&self, fence: &Geofence) -> Option<Vec<GridCell>> {
        let lat = fence.latitude().degrees();
        let lon = fence.longitude().degrees();
        let radius = fence.radius().meters();

        let lat_margin = radius / METERS_PER_DEGREE;
        // Longitude degrees shrink with latitude; clamp the scale so the
        // margin stays finite near the poles.
        let lon_scale = fence.latitude().radians().cos().max(0.01);
        let lon_margin = radius / (METERS_PER_DEGREE * lon_scale);

        let min = self.cell(lat - lat_margin, lon - lon_margin);
        let max = self.cell(lat + lat_margin, lon + lon_margin);
        if max.x - min.x >= MAX_SPAN_CELLS || max.y - min.y >= MAX_SPAN_CELLS {
            return None;
        }

        let mut cells = Vec::with_capacity(((max.x - min.x + 1) * (max.y - min.y + 1)) as usize);
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                cells.push(GridCell { x, y });
            }
        }
        Some(cells)
    }
}

impl std::fmt::Debug for GridIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridIndex")
            .field("cell_deg", &self.cell_deg)
            .field("fences", &self.len())
            .field("cells", &self.by_cell.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use waymark_core::domain::TriggerOn;

    use super::*;

    fn fence_at(lat: f64, lon: f64, radius_m: f64) -> Geofence {
        Geofence::new(ReminderId::new(), lat, lon, radius_m, TriggerOn::Both, false).unwrap()
    }

    fn coords(lat: f64, lon: f64) -> (Latitude, Longitude) {
        (Latitude::new(lat).unwrap(), Longitude::new(lon).unwrap())
    }

    #[test]
    fn test_insert_and_candidates() {
        let index = GridIndex::new(1000);
        let fence = fence_at(52.52, 13.405, 100.0);

        index.insert(&fence);
        assert_eq!(index.len(), 1);

        let (lat, lon) = coords(52.52, 13.405);
        let candidates = index.candidates(lat, lon);
        assert_eq!(candidates, vec![*fence.reminder_id()]);
    }

    #[test]
    fn test_far_position_yields_no_candidates() {
        let index = GridIndex::new(1000);
        index.insert(&fence_at(52.52, 13.405, 100.0));

        // Paris is far outside the Berlin fence's neighbourhood
        let (lat, lon) = coords(48.8566, 2.3522);
        assert!(index.candidates(lat, lon).is_empty());
    }

    #[test]
    fn test_candidate_within_one_cell_margin() {
        let index = GridIndex::new(1000);
        let fence = fence_at(0.0, 0.0, 100.0);
        index.insert(&fence);

        // A position ~900 m north is in a neighbouring cell but still
        // within the one-cell lookup margin.
        let (lat, lon) = coords(900.0 / METERS_PER_DEGREE, 0.0);
        let candidates = index.candidates(lat, lon);
        assert_eq!(candidates, vec![*fence.reminder_id()]);
    }

    #[test]
    fn test_large_fence_spans_multiple_cells() {
        let index = GridIndex::new(1000);
        let fence = fence_at(0.0, 0.0, 5_000.0);
        index.insert(&fence);

        // 4 km east of center: inside the bounding box cells
        let (lat, lon) = coords(0.0, 4_000.0 / METERS_PER_DEGREE);
        assert_eq!(index.candidates(lat, lon), vec![*fence.reminder_id()]);
    }

    #[test]
    fn test_oversized_fence_always_candidate() {
        let index = GridIndex::new(100);
        // 50 km radius over 100 m cells exceeds the span limit
        let fence = fence_at(0.0, 0.0, 50_000.0);
        index.insert(&fence);
        assert_eq!(index.len(), 1);

        let (lat, lon) = coords(45.0, 90.0);
        assert_eq!(index.candidates(lat, lon), vec![*fence.reminder_id()]);
    }

    #[test]
    fn test_reinsert_moves_registration() {
        let index = GridIndex::new(1000);
        let reminder_id = ReminderId::new();
        let first =
            Geofence::new(reminder_id, 52.52, 13.405, 100.0, TriggerOn::Both, false).unwrap();
        index.insert(&first);

        let moved =
            Geofence::new(reminder_id, 48.8566, 2.3522, 100.0, TriggerOn::Both, false).unwrap();
        index.insert(&moved);
        assert_eq!(index.len(), 1);

        let (old_lat, old_lon) = coords(52.52, 13.405);
        assert!(index.candidates(old_lat, old_lon).is_empty());

        let (new_lat, new_lon) = coords(48.8566, 2.3522);
        assert_eq!(index.candidates(new_lat, new_lon), vec![reminder_id]);
    }

    #[test]
    fn test_remove() {
        let index = GridIndex::new(1000);
        let fence = fence_at(52.52, 13.405, 100.0);
        index.insert(&fence);

        index.remove(fence.reminder_id());
        assert!(index.is_empty());

        let (lat, lon) = coords(52.52, 13.405);
        assert!(index.candidates(lat, lon).is_empty());

        // Removing again is a no-op
        index.remove(fence.reminder_id());
    }

    #[test]
    fn test_clear() {
        let index = GridIndex::new(1000);
        index.insert(&fence_at(52.52, 13.405, 100.0));
        index.insert(&fence_at(48.8566, 2.3522, 100.0));
        assert_eq!(index.len(), 2);

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_overlapping_fences_both_returned() {
        let index = GridIndex::new(1000);
        let near = fence_at(52.5200, 13.4050, 100.0);
        let close_by = fence_at(52.5210, 13.4060, 150.0);
        index.insert(&near);
        index.insert(&close_by);

        let (lat, lon) = coords(52.5205, 13.4055);
        let candidates = index.candidates(lat, lon);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.contains(near.reminder_id()));
        assert!(candidates.contains(close_by.reminder_id()));
    }

    #[test]
    fn test_concurrent_insert_and_candidates() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(GridIndex::new(1000));

        let mut handles = vec![];
        for i in 0..8 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    let lat = f64::from(i) * 0.5;
                    let lon = f64::from(j) * 0.5;
                    index.insert(&fence_at(lat, lon, 200.0));
                    let (lat, lon) = coords(lat, lon);
                    assert!(!index.candidates(lat, lon).is_empty());
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Thread should complete");
        }

        assert_eq!(index.len(), 8 * 50);
    }
}
