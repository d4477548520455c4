//! dv, a terminal data visualizer for CSV files.
//!
//! [`engine`] holds the analysis functions and has no dependency on the terminal. The other
//! modules form the application: [`loader`] reads files, [`model`] owns the state, [`ui`] draws
//! it and [`controller`] turns key presses into [`domain::Message`]s.

pub mod controller;
pub mod domain;
pub mod engine;
pub mod inputter;
pub mod loader;
pub mod model;
pub mod ui;
