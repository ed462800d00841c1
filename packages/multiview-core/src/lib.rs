//! Multiview Core - shared library for the multiview IPTV tuner.
//!
//! This crate provides the stream-session supervisor that sits at the heart
//! of a personal-LAN "multiview TV tuner": it compiles a declarative layout
//! into a transcoder invocation, owns the lifecycle of that external encoder
//! process, and fans its MPEG-TS output out to an unbounded set of HTTP
//! clients with bounded, drop-consumer backpressure.
//!
//! # Architecture
//!
//! The crate is organized into several modules, leaves first:
//!
//! - [`catalog`]: channel catalog (M3U-backed, refreshable)
//! - [`layout`]: pure layout-to-argv compiler and encoder-profile resolution
//! - [`encoder`]: owns one spawned transcoder child process
//! - [`broadcaster`]: fans out encoder output to client sinks
//! - [`supervisor`]: owns session mode, current/last layout, serializes transitions
//! - [`bootstrap`]: composition root wiring the above together
//! - [`api`]: HTTP control and streaming endpoints
//! - [`error`]: centralized error types
//! - [`state`]: application configuration
//! - [`protocol_constants`]: shared numeric and string constants

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod broadcaster;
pub mod catalog;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod protocol_constants;
pub mod state;
pub mod supervisor;

pub use api::{start_server, AppState, ServerError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use broadcaster::{Broadcaster, SinkHandle, SinkId};
pub use catalog::{Catalog, Channel};
pub use encoder::EncoderHandle;
pub use error::{ErrorCode, MultiviewError, MultiviewResult};
pub use layout::{resolve_encoder_profile, CustomSlot, EncoderProfile, LayoutConfig, LayoutKind};
pub use state::Config;
pub use supervisor::{EncodeEnvironment, Mode, StatusSnapshot, Supervisor};
