//! Co-simulation for fxgen.
//!
//! [`behavioral`] provides a pure-software stand-in for a running design,
//! driven through the same [`fxgen_backend_core::SimHandle`] handshake a
//! real RTL simulator would expose. [`verify`] runs the verification state
//! machine over any handle and compares hardware output words against the
//! independently computed reference in the check region.

pub mod behavioral;
pub mod verify;

pub use behavioral::BehavioralSim;
pub use verify::{
    run, FloatCheck, Mismatch, RunState, Strictness, VerifyError, VerifyOptions, VerifyReport,
};
