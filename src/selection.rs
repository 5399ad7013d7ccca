use crate::domain::SensorId;

use std::sync::{Arc, Mutex, PoisonError};

/// Which sensor the operator is looking at. At most one at a time.
#[derive(Clone, Default)]
pub struct Selection {
    selected: Arc<Mutex<Option<SensorId>>>,
}

impl Selection {
    pub fn get(&self) -> Option<SensorId> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the active sensor. Returns false when `sensor` was already
    /// selected, in which case nothing changes.
    pub fn select(&self, sensor: Option<SensorId>) -> bool {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        if *selected == sensor {
            return false;
        }
        *selected = sensor;
        true
    }

    /// Clear the selection only if it still points at `sensor`.
    pub fn clear_if(&self, sensor: SensorId) -> bool {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        if *selected != Some(sensor) {
            return false;
        }
        *selected = None;
        true
    }
}
