//! Session lifecycle and the public operation surface.
//!
//! # Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`Session`] | Lifecycle, subscriptions, bounded waits |
//! | [`BrowsingContext`] | Context navigation and close |
//! | emulation | Geolocation and permission overrides |

// ============================================================================
// Submodules
// ============================================================================

/// Browsing context handles.
pub mod context;

/// Session lifecycle and waits.
pub mod core;

/// Emulation and permission overrides.
pub mod emulation;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{BrowsingContext, NavigationResult};
pub use core::Session;

// ============================================================================
// Tests
// ============================================================================
