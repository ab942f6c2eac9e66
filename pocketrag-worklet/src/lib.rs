//! # pocketrag-worklet
//!
//! A bidirectional byte channel between the host and an isolated script
//! runtime running on its own thread.
//!
//! The isolated side is a sandboxed Lua 5.4 VM. Scripts talk back through a
//! global `IPC` table:
//!
//! ```lua
//! IPC.on('data', function(msg)
//!   IPC.write('pong: ' .. msg)
//! end)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocketrag_worklet::Worklet;
//!
//! # async fn example() -> pocketrag_worklet::Result<()> {
//! let worklet = Worklet::start(
//!     "/app.lua",
//!     "IPC.on('data', function(m) IPC.write('pong: ' .. m) end)",
//! )
//! .await?;
//! worklet.write(&b"ping"[..])?;
//! assert_eq!(&worklet.recv().await?[..], b"pong: ping");
//! worklet.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - `write` never blocks on the peer
//! - messages arrive in send order, in both directions
//! - nothing is dropped because a handler was registered late
//! - after `stop`, writes fail with [`ChannelError::ChannelClosed`]; after a
//!   script error they fail with [`ChannelError::PeerUnavailable`]

pub mod error;
mod runtime;
pub mod worklet;

pub use error::{ChannelError, Result};
pub use worklet::{Worklet, WorkletState};
