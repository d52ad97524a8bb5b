//! Policy resolver — effective scaling limits for "now".
//!
//! A base [`ScalingPolicy`] plus an ordered list of time-windowed
//! overrides resolves to the limits in force at a given UTC instant.
//! Resolution is pure and infallible; malformed override windows are
//! rejected earlier, when the overrides are built from config, and
//! surface as warnings rather than errors.

mod resolver;
mod window;

pub use resolver::{PolicyOverride, Resolver, ScalingPolicy, build_overrides};
pub use window::{TimeWindow, WindowParseError};
