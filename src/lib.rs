//! fpga-bench library
//!
//! Host-side orchestration for timed data-movement experiments on FPGA
//! accelerators, plus a two-participant relay protocol for end-to-end data
//! integrity checks between boards.

pub mod bench;
pub mod config;
pub mod device;
pub mod relay;
