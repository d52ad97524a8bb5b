//! The scaling control loop.
//!
//! One strictly sequential loop per managed group: evaluate the
//! up/down conditions, consult the policy resolver for the limits in
//! force, resize the instance group, and — on scale-down — drain the
//! victim node before its VM is deleted. At most one scaling or
//! draining operation is ever in flight because the loop blocks on
//! each step.
//!
//! Running two controller processes against the same group is
//! undefined behavior; deployment must guarantee a single instance.

mod controller;

pub use controller::{Controller, ControllerTiming, StepOutcome};
