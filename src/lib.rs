//! Shared stream buffers for scripting a text game client.
//!
//! A [`session::GameSession`] reads game server output over telnet and
//! publishes each line into a [`stream::StreamBuffer`], classified by channel.
//! Any number of scripts subscribe to the buffer and read independently.

pub mod config;
pub mod error;
pub mod session;
pub mod stream;
pub mod version;
