//! # imager-python-probe
//!
//! Operator tool for triaging the embedded Python runtime.
//!
//! The probe boots the interpreter host exactly as the imager does, prints
//! the effective module search path, and checks that the scripted modules
//! the pipeline delegates to can be imported and resolved.

pub mod config;
pub mod probe;
