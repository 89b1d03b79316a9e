//! Typed ID definitions for registrar resources.

use crate::define_id;

define_id!(
    /// A registrable campus event.
    EventId,
    "evt"
);

define_id!(
    /// A user account. The same identity may act as student and coordinator.
    UserId,
    "usr"
);

define_id!(
    /// A queued notification, used to correlate delivery logs.
    NotificationId,
    "ntf"
);

define_id!(
    /// Per-request correlation ID.
    RequestId,
    "req"
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_event_id_prefix() {
        let id = EventId::new();
        assert!(id.to_string().starts_with("evt_"));
    }

    #[test]
    fn test_user_id_rejects_event_prefix() {
        let event = EventId::new().to_string();
        let err = event.parse::<UserId>().unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<EventId, _> = "evt01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<EventId, _> = "".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<UserId, _> = "usr_not-a-ulid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_json_is_plain_string() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_json_rejects_wrong_type() {
        let json = format!("\"{}\"", UserId::new());
        assert!(serde_json::from_str::<EventId>(&json).is_err());
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let first = EventId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EventId::new();
        assert!(first < second);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            EventId::PREFIX,
            UserId::PREFIX,
            NotificationId::PREFIX,
            RequestId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_any_ulid_parses_back(raw in any::<u128>()) {
            let id = UserId::from_ulid(crate::Ulid::from(raw));
            let parsed: UserId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn prop_foreign_prefix_is_rejected(prefix in "[a-z]{1,6}") {
            prop_assume!(prefix != EventId::PREFIX);
            let candidate = format!("{prefix}_{}", crate::Ulid::new());
            prop_assert!(candidate.parse::<EventId>().is_err());
        }
    }
}
