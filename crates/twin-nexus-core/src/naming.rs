//! Name validation and sanitization.
//!
//! Model and resource names arrive from southbound payloads and can be
//! anything: URLs, digit-led device serials, reserved words. The registry
//! keys descriptors by the requested display name but mints a sanitized
//! identifier for the structural type, keeping the original string as
//! display metadata so round-trips are lossless.

use crate::error::NexusError;

/// Sanitize a raw name into a safe internal identifier.
///
/// Every character outside `[A-Za-z0-9_]` becomes an underscore and a
/// leading digit is prefixed with one. The result is deterministic, so the
/// same display name always maps to the same identifier.
///
/// # Errors
///
/// Returns [`NexusError::EmptyName`] if the trimmed input is empty.
pub fn sanitize(raw: &str) -> Result<String, NexusError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NexusError::EmptyName);
    }
    let mut ident = String::with_capacity(trimmed.len() + 1);
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                ident.push('_');
            }
            ident.push(c);
        } else {
            ident.push('_');
        }
    }
    Ok(ident)
}

/// Sanitize a name into a type identifier with an upper-case first letter.
///
/// # Errors
///
/// Returns [`NexusError::EmptyName`] if the trimmed input is empty.
pub fn type_ident(raw: &str) -> Result<String, NexusError> {
    Ok(first_to_upper(&sanitize(raw)?))
}

/// Construct the unique structural type name for a service within a model.
///
/// Service types of all models share one namespace, so the type name is the
/// concatenation of the capitalized model and service identifiers.
///
/// # Errors
///
/// Returns [`NexusError::EmptyName`] if either part is blank.
pub fn service_type_name(model: &str, service: &str) -> Result<String, NexusError> {
    Ok(format!("{}{}", type_ident(model)?, type_ident(service)?))
}

fn first_to_upper(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize("temperature").unwrap(), "temperature");
        assert_eq!(sanitize("sensor_1").unwrap(), "sensor_1");
    }

    #[test]
    fn strange_names_become_safe_identifiers() {
        // Inputs real device factories have produced
        for raw in ["123Test", "http://test.de/asldjkhasdlj", "123$.final/-", "protected"] {
            let ident = sanitize(raw).unwrap();
            assert!(!ident.is_empty());
            assert!(!ident.chars().next().unwrap().is_ascii_digit());
            assert!(ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
        assert_eq!(sanitize("123Test").unwrap(), "_123Test");
        assert_eq!(
            sanitize("http://test.de/x").unwrap(),
            "http___test_de_x"
        );
    }

    #[test]
    fn sanitization_is_deterministic() {
        assert_eq!(sanitize("a b/c").unwrap(), sanitize("a b/c").unwrap());
    }

    #[test]
    fn blank_names_rejected() {
        assert!(matches!(sanitize(""), Err(NexusError::EmptyName)));
        assert!(matches!(sanitize("   "), Err(NexusError::EmptyName)));
    }

    #[test]
    fn service_type_names_are_capitalized_concatenations() {
        assert_eq!(service_type_name("temp", "sensor").unwrap(), "TempSensor");
        assert_eq!(service_type_name("123a", "b").unwrap(), "_123aB");
    }
}
