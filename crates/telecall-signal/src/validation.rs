//! Input validation for chat traffic.

use telecall_common::models::OutgoingMessage;
use validator::{Validate, ValidationError};

use crate::error::SignalError;

/// Longest room id accepted on the socket or in a REST path.
pub const MAX_ROOM_ID_LENGTH: u64 = 256;

/// Chat line as checked before it is stored.
#[derive(Debug, Validate)]
struct ChatLine {
    #[validate(length(min = 1, max = 256, message = "Room id must be 1-256 characters"))]
    room_id: String,

    #[validate(length(min = 1, max = 128, message = "Display name must be 1-128 characters"))]
    sender_display_name: String,

    #[validate(custom(function = "not_blank"))]
    content: String,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("Content cannot be empty".into()));
    }
    Ok(())
}

/// Reject empty, blank or over-long chat messages.
pub fn validate_message(msg: &OutgoingMessage, max_length: u32) -> Result<(), SignalError> {
    let line = ChatLine {
        room_id: msg.room_id.clone(),
        sender_display_name: msg.sender_display_name.clone(),
        content: msg.content.clone(),
    };
    line.validate().map_err(|e| SignalError::Validation {
        message: format_validation_errors(e),
    })?;

    let length = msg.content.chars().count();
    if length > max_length as usize {
        return Err(SignalError::Validation {
            message: format!("Content is {length} characters; the limit is {max_length}"),
        });
    }
    Ok(())
}

pub fn validate_room_id(room_id: &str) -> Result<(), SignalError> {
    if room_id.trim().is_empty() || room_id.chars().count() as u64 > MAX_ROOM_ID_LENGTH {
        return Err(SignalError::Validation {
            message: "Room id must be 1-256 characters".into(),
        });
    }
    Ok(())
}

fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(room: &str, content: &str) -> OutgoingMessage {
        OutgoingMessage {
            room_id: room.into(),
            sender_user_id: None,
            sender_display_name: "Alice".into(),
            content: content.into(),
        }
    }

    #[test]
    fn accepts_ordinary_messages() {
        assert!(validate_message(&message("appt-1", "hello"), 10).is_ok());
    }

    #[test]
    fn rejects_blank_content() {
        let err = validate_message(&message("appt-1", "   "), 10).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: Content cannot be empty");
    }

    #[test]
    fn length_limit_counts_characters() {
        assert!(validate_message(&message("appt-1", "ééééé"), 5).is_ok());
        assert!(validate_message(&message("appt-1", "éééééé"), 5).is_err());
    }

    #[test]
    fn rejects_missing_room() {
        assert!(validate_message(&message("", "hello"), 10).is_err());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id(&"r".repeat(257)).is_err());
        assert!(validate_room_id("appt-1").is_ok());
    }
}
