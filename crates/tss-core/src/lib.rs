//! # TSS Core
//!
//! Coordinator for threshold-signature ceremonies run through an untrusted
//! relay.
//!
//! This crate drives a native MPC library through:
//! - Distributed Key Generation
//! - Key Resharing and Migration
//! - Distributed Signing
//!
//! ## Ceremony Overview
//!
//! Every ceremony runs the same state machine. The initiator uploads an
//! encrypted setup message, every party builds a native session from it, an
//! outbox pump and an inbox pump exchange encrypted envelopes until the native
//! session completes, and the party waits for the rest of the committee before
//! handing back its share. Failed attempts are retried from scratch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{Keygen, SessionRunner};
//!
//! let runner = SessionRunner::new(transport, params, CeremonyConfig::default());
//! let key_share = runner.run(&Keygen::new(engine)).await?;
//! ```

pub mod ceremony;
pub mod codec;
pub mod committee;
pub mod error;
pub mod native;
pub mod session;
pub mod transport;
pub mod types;

pub use ceremony::{sign_messages, Ceremony, Keygen, Migrate, Reshare, Sign};
pub use error::{Error, Result};
pub use session::{CeremonyConfig, SessionParams, SessionRunner};
pub use types::{
    require_key_share, EcdsaSignature, Envelope, KeyShare, KeyShareStore, PartyId, SessionId,
    SetupKey, Signature, SignatureRecord, SignatureScheme, TssAction,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
