//! # iterm2-client
//!
//! Multiplexed RPC client for the iTerm2 automation socket.
//!
//! Many concurrent callers share one WebSocket connection. Each call gets a
//! unique correlation ID, is written by a single writer task in submission
//! order, and is woken exactly once when the matching response arrives.
//!
//! ## Architecture
//!
//! - **Handshake**: pre-shared `ITERM2_COOKIE`, falling back to one
//!   AppleScript cookie/key request
//! - **Send path**: callers -> writer queue -> one write per message
//! - **Receive path**: read loop -> codec -> call registry -> waiting caller
//!
//! ## Example
//!
//! ```ignore
//! use iterm2_client::codec::{MsgPackCodec, Request, Response};
//! use iterm2_client::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> iterm2_client::Result<()> {
//!     let conn = ClientBuilder::new()
//!         .app_name("my-plugin")
//!         .connect(MsgPackCodec::<Request<String>, Response<String>>::new())
//!         .await?;
//!
//!     let reply = conn.call(Request::new("ping".to_string())).await?;
//!     println!("{:?}", reply);
//!
//!     conn.close().await
//! }
//! ```

pub mod codec;
pub mod control;
pub mod error;
pub mod registry;
pub mod transport;
pub mod writer;

mod client;

pub use client::{ClientBuilder, Connection, ConnectionConfig, Payload};
pub use error::{Result, RpcError};
