//! HTTP surface of the Meridian media API.
//!
//! This crate assembles the workspace into a service:
//! - [`MeridianConfig`] layered configuration and [`init_tracing`]
//! - [`Runtime`] connects the KV, Postgres, object cache, render pipeline,
//!   browser pool, fetchers, quota gate and moderation service
//! - [`router`] exposes the fetch, media, Discord, admin and Spotify routes
//! - [`RealtimeBus`] carries snipe deletions between bot accounts
//!
//! ```no_run
//! use meridian_server::{MeridianConfig, Runtime};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> meridian_error::MeridianResult<()> {
//! let config = MeridianConfig::load()?;
//! let runtime = Runtime::start(config).await?;
//! let _tasks = runtime.spawn_background(CancellationToken::new());
//! let app = runtime.router();
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bio;
mod bus;
mod config;
mod error;
#[cfg(feature = "discord")]
mod gateway;
mod routes;
pub mod spotify;
mod startup;
mod state;
mod telemetry;

pub use bio::{BIO_CHANNEL, BioLookup, BioRequest, response_key};
pub use bus::{
    ACK_TIMEOUT, BusConnection, BusPayload, DeletionConfirmation, LOOPBACK_ACCOUNT, OpCode,
    RealtimeBus, SnipeAck, SnipeDeleteRequest, WebsocketMessage, ack_key,
};
pub use config::{
    DatabaseConfig, DiscordConfig, KvConfig, LogFormat, LoggingConfig, MediaConfig,
    MeridianConfig, ServerConfig, SpotifyConfig,
};
pub use error::{ApiFailure, ErrorBody};
#[cfg(feature = "discord")]
pub use gateway::{ModerationHandler, spawn_gateway};
pub use routes::{ClientIp, DEFAULT_ROUTE_TIMEOUT, router};
pub use spotify::{SpotifyOAuth, TokenRecord};
pub use startup::Runtime;
pub use state::AppState;
pub use telemetry::init_tracing;
