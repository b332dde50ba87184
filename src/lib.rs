//! An indoor positioning engine: a particle filter that fuses BLE beacon
//! scans, accelerometer-derived pedestrian motion, and device attitude
//! against a pre-trained radio-propagation model and a per-floor walkable
//! area map.
//!
//! The streaming entry point is [`frontend::Engine`]. Everything upstream
//! of it (the building map, sensors, beacon table, observation/system
//! models, particle filter core) is usable on its own for testing or for a
//! caller that wants finer control than the front-end's lifecycle state
//! machine gives.

pub mod beacons;
pub mod error;
pub mod filter;
pub mod floor_monitor;
pub mod frontend;
pub mod geometry;
pub mod map;
pub mod model;
pub mod particle;
pub mod resampler;
pub mod rng;
pub mod sensors;
pub mod status;
pub mod status_initializer;
pub mod system_model;

pub use error::{Diagnostic, ModelError, ModelLoadError, ModelTrainError};
pub use frontend::{Engine, EngineParameters, LocalizeMode, ModelBundle, ModelBundleSource};
pub use status::{LifecycleState, Status, StatusSink};
