use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::SessionError;

/// A named chat channel with its own messages and participant set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
}

impl Room {
    /// Creates a new room with a generated id
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
        }
    }
}

/// A single chat message; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a new message with a writer-generated id and timestamp
    pub fn new(room_id: String, author_username: String, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id,
            author_username,
            content,
            created_at: Utc::now(),
        }
    }
}

/// A room membership row; created on join, destroyed on leave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub room_id: String,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(room_id: String, username: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id,
            username,
            joined_at: Utc::now(),
        }
    }
}

/// Ephemeral typing-status row, keyed by (room_id, username) and upserted
/// in place; at most one live record per user per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingState {
    pub room_id: String,
    pub username: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

const USERNAME_MIN_CHARS: usize = 2;
const USERNAME_MAX_CHARS: usize = 20;
const MESSAGE_MAX_CHARS: usize = 1000;
const ROOM_NAME_MIN_CHARS: usize = 3;
const ROOM_NAME_MAX_CHARS: usize = 50;

/// Validates a username (2-20 characters after trimming), returning the
/// trimmed value.
pub fn validate_username(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len < USERNAME_MIN_CHARS {
        return Err(SessionError::InvalidInput(
            "username must be at least 2 characters".to_string(),
        ));
    }
    if len > USERNAME_MAX_CHARS {
        return Err(SessionError::InvalidInput(
            "username must be at most 20 characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validates a room id (well-formed UUID), returning the trimmed value.
pub fn validate_room_id(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if Uuid::parse_str(trimmed).is_err() {
        return Err(SessionError::InvalidInput(
            "room id is not a well-formed identifier".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validates message content (1-1000 characters after trimming), returning
/// the trimmed value.
pub fn validate_message_content(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidInput(
            "message content must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MESSAGE_MAX_CHARS {
        return Err(SessionError::InvalidInput(
            "message content must be at most 1000 characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validates a room name (3-50 characters after trimming), returning the
/// trimmed value.
pub fn validate_room_name(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len < ROOM_NAME_MIN_CHARS {
        return Err(SessionError::InvalidInput(
            "room name must be at least 3 characters".to_string(),
        ));
    }
    if len > ROOM_NAME_MAX_CHARS {
        return Err(SessionError::InvalidInput(
            "room name must be at most 50 characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ana", "ana")]
    #[case("  ana  ", "ana")]
    #[case("ab", "ab")]
    #[case("abcdefghijklmnopqrst", "abcdefghijklmnopqrst")]
    fn accepts_valid_usernames(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(validate_username(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("a")]
    #[case("  a  ")]
    #[case("abcdefghijklmnopqrstu")]
    fn rejects_invalid_usernames(#[case] raw: &str) {
        assert!(matches!(
            validate_username(raw),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn accepts_uuid_room_ids() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(validate_room_id(&id).unwrap(), id);
    }

    #[rstest]
    #[case("")]
    #[case("not-a-uuid")]
    #[case("12345")]
    fn rejects_malformed_room_ids(#[case] raw: &str) {
        assert!(matches!(
            validate_room_id(raw),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[rstest]
    #[case("")]
    #[case(" ")]
    #[case("\t\n")]
    fn rejects_blank_message_content(#[case] raw: &str) {
        assert!(matches!(
            validate_message_content(raw),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_oversized_message_content() {
        let raw = "x".repeat(1001);
        assert!(matches!(
            validate_message_content(&raw),
            Err(SessionError::InvalidInput(_))
        ));
    }

    #[test]
    fn trims_message_content() {
        assert_eq!(validate_message_content("  hello  ").unwrap(), "hello");
        let max = "x".repeat(1000);
        assert_eq!(validate_message_content(&max).unwrap(), max);
    }

    #[rstest]
    #[case("ab")]
    #[case("  x  ")]
    fn rejects_short_room_names(#[case] raw: &str) {
        assert!(matches!(
            validate_room_name(raw),
            Err(SessionError::InvalidInput(_))
        ));
    }
}
