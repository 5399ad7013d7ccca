//! Client-side data synchronization for a fleet of environmental sensors.
//!
//! A [`Console`] fetches the sensor list and per-sensor readings from a REST
//! gateway, keeps them in a keyed [`QueryCache`], derives the selected
//! sensor's last reading and light status from that cache, and toggles the
//! selected sensor's light while keeping the cache consistent with the
//! gateway's answer.

pub mod cache;
pub mod config;
pub mod console;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod selection;

pub use cache::{QueryCache, QueryData, QueryEntry, QueryKey, QueryStatus, RetryPolicy};
pub use config::ConsoleConfig;
pub use console::{Console, ConsoleSnapshot};
pub use domain::{LightAck, LightStatus, Reading, ReadingsWindow, SensorId};
pub use error::{ClientError, Precondition};
pub use gateway::{Gateway, HttpGateway};
