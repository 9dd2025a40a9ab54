//! Shared vocabulary for the spikefuse monitor: cycle and sibling
//! identifiers, buffered event records, and the parameter records consumed
//! through the key/value configuration interface.

pub mod event;
pub mod glossary;
pub mod params;
pub mod status;

pub use event::{BufferedEvent, DeliveryClass, SegmentToggle, SpikeEvent, UnitSpike};
pub use glossary::{Cycle, NodeId, SiblingIndex};
pub use params::{
    ActiveWindow, FuseParams, KEY_FREQUENCY_THRESH, KEY_LENGTH_THRESH, KEY_N_CONNECTED_NEURONS,
    KEY_ORIGIN, KEY_START, KEY_STOP, RuntimeFacts,
};
pub use status::{StatusDict, read_f64, read_i64, read_opt_i64, status_dict};
