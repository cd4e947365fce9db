//! Protocol and coordination engine for HomeMatic / HomeMatic-IP backends.
//!
//! A [`central::Central`] owns one or more [`central::client::Client`]s,
//! each a dual XML-RPC/JSON-RPC connection to one interface of a CCU-class
//! backend (BidCos-RF, HmIP-RF, ...). Backend-pushed events arrive over an
//! embedded callback server ([`transport::callback_server`]) and are
//! applied to a [`model::device::Device`]/[`model::entity::Entity`] graph,
//! fanning out to host-registered subscribers via
//! [`central::dispatch::SubscriptionMap`].
//!
//! # Usage
//!
//! Build a [`config::CentralConfig`], hand it to [`central::Central::new`]
//! along with a [`caches::visibility::ParameterVisibilityCache`] and a
//! [`model::custom::RecipeTable`], then call
//! [`central::Central::start`]:
//!
//! ```no_run
//! # async {
//! use homematic_core::{
//!     caches::visibility::ParameterVisibilityCache,
//!     central::Central,
//!     config::CentralConfigBuilder,
//!     model::custom::RecipeTable,
//! };
//!
//! let config = CentralConfigBuilder::new()
//!     .name("ccu-living-room")
//!     .host("192.168.1.10")
//!     .credentials("Admin", "secret")
//!     .build()?;
//!
//! let central = std::sync::Arc::new(Central::new(
//!     config,
//!     ParameterVisibilityCache::new(),
//!     RecipeTable::default(),
//! )?);
//! central.start().await?;
//! # Result::<(), homematic_core::error::Error>::Ok(())
//! # };
//! ```
//!
//! The model is an arena-and-indices design (spec §9): `Device`/`Entity`
//! hold only the keys (`interface_id`, `Address`) they need to look
//! themselves back up in `Central`'s maps, never an owning pointer into it,
//! so there is no `Central` ↔ `Device` ↔ `Entity` ↔ `Central` reference
//! cycle to reason about.

#![warn(missing_docs)]

/// Device and channel address parsing.
pub mod address;
/// On-disk and in-memory caches: device/paramset descriptions, dynamic
/// device details, and the parameter visibility policy.
pub mod caches;
/// `Central`, the per-backend orchestrator, its client pool, connection
/// checker, and event dispatch.
pub mod central;
/// `CentralConfig`/`InterfaceConfig` and their validating builder.
pub mod config;
/// The live TCP/session state a `Client` tracks per interface.
pub mod connection;
/// The crate-wide error hierarchy.
pub mod error;
/// The "homematic event bus": KEYPRESS/IMPULSE/DEVICE_ERROR/INTERFACE
/// records forwarded to the host.
pub mod events;
/// Anonymized device-definition export and startup table validation.
pub mod export;
/// System variables and programs ("the hub").
pub mod hub;
/// Background-task spawning and graceful shutdown.
pub mod looper;
/// `Device`/`Entity`, parameter metadata, and custom-entity recipes.
pub mod model;
/// Misc support functions shared by both transports.
pub mod support;
/// XML-RPC and JSON-RPC clients, and the embedded callback server.
pub mod transport;
/// Backend value representation and conversion.
pub mod value;

pub use crate::address::Address;
pub use crate::central::Central;
pub use crate::config::{CentralConfig, CentralConfigBuilder, InterfaceConfig};
pub use crate::error::{Error, Result};
pub use crate::value::Value;
