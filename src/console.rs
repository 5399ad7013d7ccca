//! ==============================================================================
//! console.rs - session facade: selection, derived state, light commands
//! ==============================================================================
//!
//! purpose:
//!     owns the one query cache and the one selection of a session, and is
//!     the only thing the view talks to. cloning a console clones handles,
//!     not state.
//!
//! responsibilities:
//!     - fetch the sensor list and the selected sensor's readings via the cache
//!     - derive last reading / light status from the cached history
//!     - toggle the selected sensor's light and reconcile the cache with the
//!       gateway's answer (never with a local guess)
//!
//! relationships:
//!     - uses: cache.rs, selection.rs, gateway.rs (Gateway trait)
//!     - used by: main.rs (terminal view)
//!
//! ==============================================================================

use crate::cache::{QueryCache, QueryData, QueryEntry, QueryKey, QueryStatus};
use crate::domain::{LightAck, LightStatus, Reading, ReadingsWindow, SensorId};
use crate::error::{ClientError, Precondition, Result};
use crate::gateway::Gateway;
use crate::selection::Selection;

use std::sync::Arc;
use tokio::sync::watch;

/// Everything the view needs for one render.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsoleSnapshot {
    pub selected: Option<SensorId>,
    pub sensors: QueryEntry,
    /// `None` when nothing is selected
    pub readings: Option<QueryEntry>,
    pub light: LightStatus,
}

impl ConsoleSnapshot {
    pub fn last_reading(&self) -> Option<&Reading> {
        self.readings.as_ref().and_then(|entry| entry.last_reading())
    }
}

pub struct Console<G> {
    gateway: Arc<G>,
    cache: QueryCache,
    selection: Selection,
}

impl<G> Clone for Console<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            cache: self.cache.clone(),
            selection: self.selection.clone(),
        }
    }
}

impl<G: Gateway> Console<G> {
    pub fn new(gateway: G, cache: QueryCache) -> Self {
        Self {
            gateway: Arc::new(gateway),
            cache,
            selection: Selection::default(),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Receives a new revision after any cache or selection change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cache.subscribe()
    }

    pub fn selected(&self) -> Option<SensorId> {
        self.selection.get()
    }

    // ==========================================================================
    // selection
    // ==========================================================================

    /// Change the active sensor. Moving onto a sensor marks its readings
    /// stale, so the next read revalidates them while the old data stays
    /// visible. Selecting the current sensor again does nothing.
    pub fn select(&self, sensor: Option<SensorId>) -> bool {
        if !self.selection.select(sensor) {
            return false;
        }

        match sensor {
            Some(id) => {
                tracing::info!(sensor = %id, "selected sensor");
                self.cache.invalidate(QueryKey::Readings(id));
            }
            None => tracing::info!("cleared selection"),
        }
        self.cache.notify();
        true
    }

    // ==========================================================================
    // reads
    // ==========================================================================

    pub async fn sensors(&self) -> QueryEntry {
        let gateway = &*self.gateway;
        self.cache
            .get_or_fetch(QueryKey::Sensors, move || async move {
                gateway.fetch_sensor_list().await.map(QueryData::Sensors)
            })
            .await
    }

    pub async fn refresh_sensors(&self) -> QueryEntry {
        self.cache.invalidate(QueryKey::Sensors);
        self.sensors().await
    }

    /// Readings of the selected sensor, fetched when stale. `None` when no
    /// sensor is selected.
    ///
    /// The fetch is bound to the sensor selected at call time: if the
    /// selection moves on before it lands, the result still goes to that
    /// sensor's entry and nowhere else.
    pub async fn selected_readings(&self) -> Option<QueryEntry> {
        let sensor = self.selection.get()?;
        let gateway = &*self.gateway;
        let entry = self
            .cache
            .get_or_fetch(QueryKey::Readings(sensor), move || async move {
                gateway
                    .fetch_readings(sensor, ReadingsWindow::default())
                    .await
                    .map(QueryData::Readings)
            })
            .await;
        Some(entry)
    }

    /// Invalidate and refetch the selected sensor's readings.
    pub async fn refresh_selected(&self) -> Option<QueryEntry> {
        let sensor = self.selection.get()?;
        self.cache.invalidate(QueryKey::Readings(sensor));
        self.selected_readings().await
    }

    /// Latest reading of the selected sensor straight from the gateway.
    /// Not cached: light state is only ever derived from the readings history.
    pub async fn peek_latest(&self) -> Result<Option<Reading>> {
        let sensor = self.selection.get().ok_or(Precondition::NoSelection)?;
        self.gateway.fetch_latest_reading(sensor).await
    }

    // ==========================================================================
    // derived state
    // ==========================================================================

    pub fn last_reading(&self) -> Option<Reading> {
        let sensor = self.selection.get()?;
        self.cache
            .peek(QueryKey::Readings(sensor))
            .last_reading()
            .cloned()
    }

    pub fn light_status(&self) -> LightStatus {
        LightStatus::from_last_reading(self.last_reading().as_ref())
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        let selected = self.selection.get();
        let readings = selected.map(|id| self.cache.peek(QueryKey::Readings(id)));
        let light = LightStatus::from_last_reading(readings.as_ref().and_then(|e| e.last_reading()));

        ConsoleSnapshot {
            selected,
            sensors: self.cache.peek(QueryKey::Sensors),
            readings,
            light,
        }
    }

    // ==========================================================================
    // commands
    // ==========================================================================

    /// Flip the selected sensor's light.
    ///
    /// Requires a selection whose readings are loaded; the desired state is
    /// the opposite of the last reading's. The gateway's answer is merged into
    /// the cached history, also when a refetch is in flight or failed while
    /// the command was out. On any failure the cache is left as it was.
    pub async fn toggle_light(&self) -> Result<LightAck> {
        let sensor = self.selection.get().ok_or(Precondition::NoSelection)?;
        let key = QueryKey::Readings(sensor);

        let desired = {
            let entry = self.cache.peek(key);
            match (entry.status, entry.last_reading()) {
                (QueryStatus::Success, Some(last)) => !last.light_on,
                _ => return Err(Precondition::ReadingsNotLoaded(sensor).into()),
            }
        };

        tracing::info!(%sensor, desired, "toggling light");
        match self.gateway.set_light_state(sensor, desired).await {
            Ok(LightAck::Reading(reading)) => {
                if !self.cache.merge_reading(sensor, reading.clone()) {
                    // entry went away while the command was out
                    self.cache.invalidate(key);
                }
                Ok(LightAck::Reading(reading))
            }
            Ok(ack) => {
                // no timestamp to merge by; refetch the history instead
                self.cache.invalidate(key);
                Ok(ack)
            }
            Err(ClientError::Conflict(gone)) => {
                tracing::warn!(sensor = %gone, "sensor no longer exists");
                self.selection.clear_if(sensor);
                self.cache.invalidate(key);
                self.cache.invalidate(QueryKey::Sensors);
                Err(ClientError::Conflict(gone))
            }
            Err(e) => {
                tracing::warn!(%sensor, "light command failed: {}", e);
                Err(e)
            }
        }
    }
}
