//! # Postbox - shared-state coordination for a networked audio postbox
//!
//! A postbox is a small appliance that fetches short audio messages from a remote
//! service, waits for someone to trigger it, plays the message, and reports it as
//! heard. When its WiFi goes away for good it raises a local configuration portal so a
//! user can hand it new credentials, and it falls back to the old ones if those do
//! not work.
//!
//! ## Features
//!
//! - **One shared record**: every component coordinates through a single persisted
//!   [`state::DeviceState`], written atomically and updated under a file lock.
//! - **Explicit lifecycle**: messages move `Idle → Pending → Playing → Listened → Idle`
//!   through checked transitions; illegal flag combinations are reported, never
//!   silently normalized.
//! - **Self-recovery**: sustained connectivity loss engages a captive portal once per
//!   episode, and new credentials are verified and rolled back if they fail.
//! - **Independent components**: run as four processes or as four tasks in one,
//!   with identical behavior.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use postbox::config::Config;
//! use postbox::storage::StateStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = StateStore::open(&config.device.state_file)?;
//!     println!("message lifecycle: {:?}", store.read().lifecycle());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`state`] - the coordination record, lifecycle and connectivity views
//! - [`storage`] - atomic persistence and locked read-modify-write
//! - [`monitor`] - connectivity probing and captive-portal control
//! - [`recovery`] - credential rewrite, verification and rollback
//! - [`ingest`] - remote polling, payload download, acknowledgment
//! - [`playback`] - trigger sensing and payload playback
//! - [`lights`] - LED feedback patterns
//! - [`config`] - configuration loading and validation
//! - [`validation`] - checks on credentials and remote input
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐
//!  │ monitor  │  │  ingest  │  │ playback │  │  lights  │
//!  └────┬─────┘  └────┬─────┘  └────┬─────┘  └────┬─────┘
//!       │ connectivity│ message     │ playing      │ read-only
//!       └─────────────┴──────┬──────┴──────────────┘
//!                     ┌──────┴──────┐
//!                     │ StateStore  │ ← state.json, atomic replace
//!                     └─────────────┘
//! ```
//!
//! Each field of the record has one writing component, so components never need to
//! talk to each other directly.

pub mod command;
pub mod config;
pub mod ingest;
pub mod lights;
pub mod logutil;
pub mod monitor;
pub mod playback;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod storage;
pub mod validation;
