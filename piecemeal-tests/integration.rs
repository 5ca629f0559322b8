//! Integration tests for Piecemeal
//!
//! These tests drive the full read → coalesce → transport → cache →
//! resolve pipeline against the simulated HTTP range server, covering
//! the end-to-end behavior no single module test can: coalescing
//! windows, padding floors, multipart fan-out, and failure propagation.

#[path = "integration/read_pipeline.rs"]
mod read_pipeline;

#[path = "integration/delivery_modes.rs"]
mod delivery_modes;

#[path = "integration/failure_paths.rs"]
mod failure_paths;
