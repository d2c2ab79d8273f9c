//! Background Jobs for the Coherence API
//!
//! - `reconcile`: scheduled reconciliation sweep
//!
//! # Usage
//!
//! ```ignore
//! use coherence_api::jobs::reconcile_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(reconcile_task(reconciler, sweep_config, metrics, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod reconcile;

pub use reconcile::{reconcile_task, ReconcileJobMetrics, ReconcileJobSnapshot};
