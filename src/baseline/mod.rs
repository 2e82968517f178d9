//! Statistical baselines of "normal" resolver behaviour.
//!
//! # Architecture
//! - `types.rs`: the five baselines and the immutable [`BaselineSet`]
//! - `trainer.rs`: computes a complete set from a training window
//!
//! A trained set is never mutated. Retraining builds a new set and the
//! engine swaps it in behind a single reference.

pub mod trainer;
pub mod types;

pub use trainer::{train, TrainingParams, CLIENT_STDDEV_FRACTION, MIN_TRAINING_RECORDS};
pub use types::{
    BaselineSet, ClientBaseline, ClientProfile, DomainBaseline, QueryVolumeBaseline,
    ResponseTimeBaseline, TimePatternBaseline,
};
