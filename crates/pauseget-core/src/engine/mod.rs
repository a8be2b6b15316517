//! Transfer engine - the heart of pauseget
//!
//! This module implements a pausable, resumable single-file download:
//! - Best-effort HEAD probe for the resource size
//! - One streaming attempt at a time on a worker task
//! - Byte-range resume from the exact on-disk length
//! - Cumulative progress across resume cycles
//! - Lock-free pause/resume flags shared with the controller

mod attempt;
mod client;
mod outcome;
mod probe;
mod progress;
mod transfer;

pub use client::*;
pub use probe::probe;
pub use progress::{cumulative_percent, NoProgress, ProgressSink};
pub use transfer::*;
