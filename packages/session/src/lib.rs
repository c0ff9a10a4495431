#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Chat session controller for the public-safety assistant.
//!
//! Owns the transcript and the hazard-reporting state machine, dispatches
//! slash-commands vs. free text, and orchestrates the external
//! collaborators (assistant engine, geocoder, map renderer, document
//! store, device geolocation) through injectable async ports so the whole
//! controller unit-tests without any I/O.

pub mod command;
pub mod controller;
pub mod ports;

pub use command::Command;
pub use controller::{CategoryChoice, SelectionPurpose, Session, SessionPorts, UserInput};
