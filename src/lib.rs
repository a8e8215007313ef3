//! Safe-move engine for organizing media files into date folders.
//!
//! A plan of `folder -> files` is turned into `FileOperation`s with fixed,
//! collision-free destinations, then each file is copied, verified and only
//! then removed from its source. Progress is written to a resume record after
//! every file so an interrupted run can be continued with `picsort resume`.

pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fsops;
pub mod logging;
pub mod model;
pub mod mover;
pub mod orchestrator;
pub mod preview;
pub mod reporter;
pub mod resolve;
pub mod scan;
pub mod shutdown;
pub mod store;
pub mod validate;
