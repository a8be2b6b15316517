//! pauseget Core - Transfer Engine
//!
//! This crate provides the download engine for pauseget: a single HTTP(S)
//! resource fetched to a local file, with pause and resume from the exact
//! byte offset already written.
//!
//! ```no_run
//! # async fn demo() -> Result<(), pauseget_core::TransferError> {
//! use pauseget_core::Transfer;
//!
//! let transfer = Transfer::new(
//!     "https://example.com/big.iso",
//!     "big.iso",
//!     |percent: u8| println!("{percent}%"),
//! )?;
//! let mut events = transfer.subscribe();
//! transfer.start();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;

pub use engine::*;
pub use error::*;

pub use pauseget_types::{AttemptOutcome, ProbeInfo, TransferConfig, TransferEvent, TransferState};
