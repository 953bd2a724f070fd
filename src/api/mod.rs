//! HTTP surface: the scheduler-extender wire protocol plus liveness/version
//! routes.

mod rest;

pub use rest::{router, AppState};
