//! castcore - shared library for the cast streaming server.
//!
//! This crate holds the ranged HTTP streaming server, session/device model,
//! and device backends (UPnP, Chromecast, VLC, Kodi, web) behind a common
//! `BlockSource`/`DeviceFinder` abstraction. It is consumed by the
//! `cast-server` binary.
//!
//! # Architecture
//!
//! - [`runtime`]: task-spawning abstraction for async runtime independence
//! - [`context`]: network configuration and URL building
//! - [`state`]: core application configuration
//! - [`block_source`]: remote document/message store interface
//! - [`device`]: device backends and discovery
//! - [`session`]: playing-session lifecycle and admission tracking
//! - [`api`]: HTTP router and server startup
//! - [`error`]: centralized error type
//! - [`bootstrap`]: composition root wiring everything into `AppState`

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod block_source;
pub mod bootstrap;
pub mod callback;
pub mod context;
pub mod debounce;
pub mod device;
pub mod error;
pub mod protocol_constants;
pub mod range;
pub mod runtime;
pub mod session;
pub mod state;
pub mod token;

pub use api::{start_server, AppState, ServerError};
pub use bootstrap::bootstrap_services;
pub use context::{NetworkContext, NetworkError, UrlBuilder};
pub use error::{CastError, CastResult, ErrorCode};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, DeviceConfig};
