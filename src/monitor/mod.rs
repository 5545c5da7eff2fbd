//! Runtime driving a check-up session.

mod controller;

pub use controller::{CheckupController, ControlError, ControllerConfig};
