//! Engine tests
//!
//! Programs are written as real module text, linked, and driven reaction by
//! reaction against a `SimulatedDevice` and a `MemoryLog`.

mod helpers;

mod binding_tests;
mod preemption_tests;
mod registry_tests;
