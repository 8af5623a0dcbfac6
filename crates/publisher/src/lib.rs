//! Publisher Session Core
//!
//! Publisher-side media session state machine: takes a remote participant
//! (e.g. a student sitting an exam) from "disconnected" to "actively
//! publishing N independent streams" (camera video, camera audio, screen
//! video, screen audio) to a media-routing server.
//!
//! # Architecture
//!
//! ```text
//! SessionController (one per session)
//! ├── SignalingChannel (control connection to the routing server)
//! ├── MediaEngine (capabilities, send transport creation)
//! └── TransportSession (the single outgoing transport)
//!     ├── connect negotiation (single-flight)
//!     └── ProducerLease per StreamKind (at most one Negotiating/Active)
//!         └── track from a CaptureHandle (Stream Capture Adapter)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Pairing table**: camera audio requires camera video; closing camera
//!   video closes its audio. Checked centrally before any negotiation.
//! - **Reserve before negotiate**: every kind of an operation reserves its
//!   slot up front, so duplicate and pairing violations have no side effects.
//! - **No partial state**: a failed operation closes the leases it created.
//! - **Only signaling loss is global**: every other error is local to the
//!   operation that hit it.
//!
//! # Modules
//!
//! - [`session`] - Session controller, transport session, leases
//! - [`media`] - Stream kinds, pairing rules, negotiation payloads
//! - [`signaling`] - Signaling channel trait and HTTP implementation
//! - [`engine`] - Media engine traits
//! - [`capture`] - Stream capture adapter
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics

pub mod capture;
pub mod config;
pub mod engine;
pub mod errors;
pub mod media;
pub mod observability;
pub mod session;
pub mod signaling;

pub use errors::PublisherError;
pub use session::SessionController;
