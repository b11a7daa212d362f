//! BiDi protocol message types.
//!
//! This module defines the wire format spoken between the local end
//! (this crate) and the remote end (the controlled browser).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`CommandRequest`] | Local → Remote | Command request |
//! | [`CommandResponse`] | Remote → Local | Command response |
//! | [`EventMessage`] | Remote → Local | Unsolicited event |
//!
//! # Command Naming
//!
//! Commands and events follow `module.methodName` format:
//!
//! - `session.subscribe`
//! - `browsingContext.navigate`
//! - `emulation.setGeolocationOverride`
//! - `log.entryAdded`

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions organized by module.
pub mod command;

/// Event message types.
pub mod event;

/// Request/response envelopes and inbound classification.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    BrowsingContextCommand, Command, CreateContextKind, EmulationCommand,
    GeolocationCoordinates, PermissionDescriptor, PermissionState, PermissionsCommand,
    ReadinessState, SessionCommand,
};
pub use event::{
    ConsoleLogEntry, EventKind, EventMessage, Header, HeaderValue, LogLevel, RequestData,
    ResponseData, SessionEvent,
};
pub use message::{CommandRequest, CommandResponse, IncomingMessage, ResponseType};
