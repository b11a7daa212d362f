//! Scoped emulation and permission overrides.
//!
//! Overrides are applied remotely first and recorded locally only on
//! success, so the local bookkeeping never claims state the remote end
//! rejected. One command covers all listed contexts; either the whole
//! override applies or none of it does.

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ContextId;
use crate::protocol::{
    Command, CommandRequest, EmulationCommand, GeolocationCoordinates, PermissionDescriptor,
    PermissionState, PermissionsCommand,
};

use super::core::Session;

// ============================================================================
// Geolocation
// ============================================================================

impl Session {
    /// Applies a geolocation override to the listed contexts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for out-of-range coordinates
    /// or an empty context list. On a remote rejection no local state
    /// changes.
    pub async fn set_geolocation_override(
        &self,
        coordinates: GeolocationCoordinates,
        contexts: &[ContextId],
    ) -> Result<()> {
        self.ensure_open()?;
        validate_coordinates(&coordinates)?;
        if contexts.is_empty() {
            return Err(Error::invalid_argument("no contexts for geolocation override"));
        }

        let request = CommandRequest::new(Command::Emulation(
            EmulationCommand::SetGeolocationOverride {
                coordinates: Some(coordinates),
                contexts: contexts.to_vec(),
            },
        ));
        self.inner.connection.send(request).await?;

        let mut overrides = self.inner.geolocation.lock();
        for context in contexts {
            overrides.insert(context.clone(), coordinates);
        }
        debug!(
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            contexts = contexts.len(),
            "Geolocation override applied"
        );
        Ok(())
    }

    /// Clears the geolocation override on the listed contexts, restoring
    /// the browser's real position source.
    pub async fn clear_geolocation_override(&self, contexts: &[ContextId]) -> Result<()> {
        self.ensure_open()?;
        if contexts.is_empty() {
            return Err(Error::invalid_argument("no contexts for geolocation override"));
        }

        let request = CommandRequest::new(Command::Emulation(
            EmulationCommand::SetGeolocationOverride {
                coordinates: None,
                contexts: contexts.to_vec(),
            },
        ));
        self.inner.connection.send(request).await?;

        let mut overrides = self.inner.geolocation.lock();
        for context in contexts {
            overrides.remove(context);
        }
        debug!(contexts = contexts.len(), "Geolocation override cleared");
        Ok(())
    }

    /// Returns the override active on a context, if any.
    #[must_use]
    pub fn active_geolocation_override(
        &self,
        context: &ContextId,
    ) -> Option<GeolocationCoordinates> {
        self.inner.geolocation.lock().get(context).copied()
    }
}

// ============================================================================
// Permissions
// ============================================================================

impl Session {
    /// Sets the state of a named permission for an origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `origin` is not a valid
    /// URL origin.
    pub async fn set_permission(
        &self,
        name: &str,
        state: PermissionState,
        origin: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let origin = parse_origin(origin)?;

        let request = CommandRequest::new(Command::Permissions(
            PermissionsCommand::SetPermission {
                descriptor: PermissionDescriptor::new(name),
                state,
                origin: origin.clone(),
            },
        ));
        self.inner.connection.send(request).await?;

        self.inner
            .permissions
            .lock()
            .insert((origin.clone(), name.to_string()), state);
        debug!(permission = name, %origin, ?state, "Permission applied");
        Ok(())
    }

    /// Returns the last state applied for a permission on an origin.
    ///
    /// `None` means this session never set it; the browser default
    /// applies.
    #[must_use]
    pub fn permission_state(&self, name: &str, origin: &str) -> Option<PermissionState> {
        let origin = parse_origin(origin).ok()?;
        self.inner
            .permissions
            .lock()
            .get(&(origin, name.to_string()))
            .copied()
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_coordinates(coordinates: &GeolocationCoordinates) -> Result<()> {
    if !coordinates.latitude.is_finite() || coordinates.latitude.abs() > 90.0 {
        return Err(Error::invalid_argument(format!(
            "latitude out of range: {}",
            coordinates.latitude
        )));
    }
    if !coordinates.longitude.is_finite() || coordinates.longitude.abs() > 180.0 {
        return Err(Error::invalid_argument(format!(
            "longitude out of range: {}",
            coordinates.longitude
        )));
    }
    if let Some(accuracy) = coordinates.accuracy
        && (!accuracy.is_finite() || accuracy < 0.0)
    {
        return Err(Error::invalid_argument(format!(
            "accuracy out of range: {accuracy}"
        )));
    }
    Ok(())
}

/// Normalizes an origin string through URL parsing so equivalent
/// spellings key the same bookkeeping entry.
fn parse_origin(origin: &str) -> Result<String> {
    let url = url::Url::parse(origin)
        .map_err(|e| Error::invalid_argument(format!("bad origin {origin:?}: {e}")))?;
    let parsed = url.origin();
    if !parsed.is_tuple() {
        return Err(Error::invalid_argument(format!("opaque origin {origin:?}")));
    }
    Ok(parsed.ascii_serialization())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(validate_coordinates(&GeolocationCoordinates::new(90.0, 180.0)).is_ok());
        assert!(validate_coordinates(&GeolocationCoordinates::new(90.1, 0.0)).is_err());
        assert!(validate_coordinates(&GeolocationCoordinates::new(0.0, -180.5)).is_err());
        assert!(validate_coordinates(&GeolocationCoordinates::new(f64::NAN, 0.0)).is_err());
        assert!(
            validate_coordinates(&GeolocationCoordinates::new(0.0, 0.0).with_accuracy(-1.0))
                .is_err()
        );
    }

    #[test]
    fn test_origin_normalization() {
        assert_eq!(
            parse_origin("https://example.com/some/path").expect("origin"),
            "https://example.com"
        );
        assert_eq!(
            parse_origin("https://example.com:8443").expect("origin"),
            "https://example.com:8443"
        );
        assert!(parse_origin("not an origin").is_err());
        assert!(parse_origin("data:text/plain,x").is_err());
    }
}
