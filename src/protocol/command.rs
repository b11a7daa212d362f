//! Command definitions organized by BiDi module.
//!
//! Commands follow the `module.methodName` format of the WebDriver BiDi
//! protocol.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `session` | Handshake, teardown, event subscription |
//! | `browsingContext` | Context creation, navigation, close |
//! | `emulation` | Geolocation override |
//! | `permissions` | Permission grants |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::ContextId;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by module.
///
/// This enum wraps module-specific command enums for unified serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Session module commands.
    Session(SessionCommand),
    /// BrowsingContext module commands.
    BrowsingContext(BrowsingContextCommand),
    /// Emulation module commands.
    Emulation(EmulationCommand),
    /// Permissions module commands.
    Permissions(PermissionsCommand),
}

// ============================================================================
// Session Commands
// ============================================================================

/// Session module commands for handshake and event subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum SessionCommand {
    /// Open a new session.
    #[serde(rename = "session.new")]
    New {
        /// Capability negotiation payload.
        capabilities: Value,
    },

    /// End the session.
    #[serde(rename = "session.end")]
    End {},

    /// Subscribe to event delivery for the listed event methods.
    #[serde(rename = "session.subscribe")]
    Subscribe {
        /// Event method names (`module.eventName`).
        events: Vec<String>,
    },

    /// Unsubscribe from event delivery for the listed event methods.
    #[serde(rename = "session.unsubscribe")]
    Unsubscribe {
        /// Event method names (`module.eventName`).
        events: Vec<String>,
    },
}

// ============================================================================
// BrowsingContext Commands
// ============================================================================

/// BrowsingContext module commands for context lifecycle and navigation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowsingContextCommand {
    /// Create a new browsing context.
    #[serde(rename = "browsingContext.create")]
    Create {
        /// Surface to create.
        #[serde(rename = "type")]
        kind: CreateContextKind,
    },

    /// Navigate a context to a URL.
    #[serde(rename = "browsingContext.navigate")]
    Navigate {
        /// Target context.
        context: ContextId,
        /// URL to navigate to.
        url: String,
        /// Readiness state to wait for before the command completes.
        wait: ReadinessState,
    },

    /// Close a browsing context.
    #[serde(rename = "browsingContext.close")]
    Close {
        /// Context to close.
        context: ContextId,
    },
}

/// Kind of browsing context to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateContextKind {
    /// A tab in an existing window.
    Tab,
    /// A new top-level window.
    Window,
}

/// Navigation readiness state the remote end waits for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// Return as soon as navigation starts.
    None,
    /// Wait for `DOMContentLoaded`.
    Interactive,
    /// Wait for the load event.
    #[default]
    Complete,
}

// ============================================================================
// Emulation Commands
// ============================================================================

/// Emulation module commands for environment overrides.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum EmulationCommand {
    /// Apply or clear a geolocation override on the listed contexts.
    ///
    /// `coordinates: None` serializes as `null`, which clears the
    /// override per the BiDi emulation module.
    #[serde(rename = "emulation.setGeolocationOverride")]
    SetGeolocationOverride {
        /// Coordinates to present, or `None` to clear.
        coordinates: Option<GeolocationCoordinates>,
        /// Contexts the override applies to.
        contexts: Vec<ContextId>,
    },
}

/// Geolocation coordinates presented to the controlled browser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeolocationCoordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Accuracy in meters (remote default applies when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl GeolocationCoordinates {
    /// Creates coordinates without an accuracy hint.
    #[inline]
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    /// Sets the accuracy in meters.
    #[inline]
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

// ============================================================================
// Permissions Commands
// ============================================================================

/// Permissions module commands.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum PermissionsCommand {
    /// Set the state of a permission for an origin.
    #[serde(rename = "permissions.setPermission")]
    SetPermission {
        /// Permission being set.
        descriptor: PermissionDescriptor,
        /// State to apply.
        state: PermissionState,
        /// Origin the grant is scoped to.
        origin: String,
    },
}

/// Identifies a permission by name, e.g. `"geolocation"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDescriptor {
    /// Permission name.
    pub name: String,
}

impl PermissionDescriptor {
    /// Creates a descriptor for the named permission.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// State of a permission grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Permission is granted without prompting.
    Granted,
    /// Permission is denied without prompting.
    Denied,
    /// The user is prompted (browser default).
    Prompt,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_navigate_serialization() {
        let command = Command::BrowsingContext(BrowsingContextCommand::Navigate {
            context: ContextId::new("ctx-1"),
            url: "https://example.com".to_string(),
            wait: ReadinessState::Complete,
        });

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["method"], "browsingContext.navigate");
        assert_eq!(value["params"]["context"], "ctx-1");
        assert_eq!(value["params"]["wait"], "complete");
    }

    #[test]
    fn test_session_end_has_empty_params() {
        let command = Command::Session(SessionCommand::End {});
        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["method"], "session.end");
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn test_subscribe_serialization() {
        let command = Command::Session(SessionCommand::Subscribe {
            events: vec!["log.entryAdded".to_string()],
        });

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["method"], "session.subscribe");
        assert_eq!(value["params"]["events"][0], "log.entryAdded");
    }

    #[test]
    fn test_geolocation_override_serialization() {
        let command = Command::Emulation(EmulationCommand::SetGeolocationOverride {
            coordinates: Some(GeolocationCoordinates::new(37.7749, -122.4194)),
            contexts: vec![ContextId::new("ctx-1"), ContextId::new("ctx-2")],
        });

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["method"], "emulation.setGeolocationOverride");
        assert_eq!(value["params"]["coordinates"]["latitude"], 37.7749);
        // No accuracy hint: the key must be absent, not null.
        assert!(value["params"]["coordinates"].get("accuracy").is_none());
        assert_eq!(value["params"]["contexts"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_clear_geolocation_serializes_null() {
        let command = Command::Emulation(EmulationCommand::SetGeolocationOverride {
            coordinates: None,
            contexts: vec![ContextId::new("ctx-1")],
        });

        let value = serde_json::to_value(&command).expect("serialize");
        assert!(value["params"]["coordinates"].is_null());
    }

    #[test]
    fn test_set_permission_serialization() {
        let command = Command::Permissions(PermissionsCommand::SetPermission {
            descriptor: PermissionDescriptor::new("geolocation"),
            state: PermissionState::Granted,
            origin: "https://example.com".to_string(),
        });

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["method"], "permissions.setPermission");
        assert_eq!(value["params"]["descriptor"]["name"], "geolocation");
        assert_eq!(value["params"]["state"], "granted");
        assert_eq!(value["params"]["origin"], "https://example.com");
    }

    #[test]
    fn test_with_accuracy() {
        let coords = GeolocationCoordinates::new(0.0, 0.0).with_accuracy(5.0);
        let value = serde_json::to_value(coords).expect("serialize");
        assert_eq!(value["accuracy"], 5.0);
    }
}
