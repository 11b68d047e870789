//! # Soma
//!
//! A configuration-tree engine for monitoring deployments, usable both as a
//! standalone binary and as a library.
//!
//! Every repository is owned by a single tree-keeper task. Requests reach
//! it through the guide post, which creates a job per mutation; committed
//! trees produce check instances whose rollout the workflow engine drives
//! through the monitoring systems.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use soma::config::SomaConfig;
//! use soma::server::{AppState, create_router};
//! use soma::store::{SqliteStore, Store};
//!
//! let config = SomaConfig::load("soma.toml".as_ref())?;
//! let store = SqliteStore::new(&config.database.path)?;
//! store.initialize()?;
//!
//! let state = AppState::start(config, Arc::new(store)).await?;
//! let router = create_router(state);
//! // Serve with axum...
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod forest;
pub mod guidepost;
pub mod jobs;
pub mod reaper;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod tree;
pub mod treekeeper;
pub mod types;
pub mod workflow;
