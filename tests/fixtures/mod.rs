//! Test fixtures for sighting-projector.
//!
//! Provides:
//! - Utrecht-area event groups (real coordinates, fictional names)
//! - Scripted directions and registry doubles with call counting

pub mod event_groups;

pub use event_groups::*;
