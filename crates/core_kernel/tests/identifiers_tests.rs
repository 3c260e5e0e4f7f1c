//! Tests for strongly-typed identifiers

use core_kernel::{AlertId, BookingId, PaymentEventId, PaymentId, UserId};
use uuid::Uuid;

mod booking_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        assert_ne!(BookingId::new(), BookingId::new());
    }

    #[test]
    fn test_prefix_and_display() {
        assert_eq!(BookingId::PREFIX, "BKG");
        assert!(BookingId::new().to_string().starts_with("BKG-"));
    }

    #[test]
    fn test_parse_with_and_without_prefix() {
        let uuid = Uuid::new_v4();
        let with_prefix: BookingId = format!("BKG-{}", uuid).parse().unwrap();
        let bare: BookingId = uuid.to_string().parse().unwrap();
        assert_eq!(with_prefix, bare);
    }
}

mod payment_id_tests {
    use super::*;

    #[test]
    fn test_new_v7_generates_time_ordered_ids() {
        let id1 = PaymentId::new_v7();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = PaymentId::new_v7();
        let uuid1: Uuid = id1.into();
        let uuid2: Uuid = id2.into();
        assert!(uuid1 < uuid2);
    }

    #[test]
    fn test_serde_is_transparent() {
        let uuid = Uuid::new_v4();
        let id = PaymentId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }

    #[test]
    fn test_invalid_string_fails() {
        assert!("PAY-not-a-uuid".parse::<PaymentId>().is_err());
    }
}

#[test]
fn test_prefixes_are_distinct() {
    let prefixes = [
        BookingId::PREFIX,
        UserId::PREFIX,
        PaymentId::PREFIX,
        PaymentEventId::PREFIX,
        AlertId::PREFIX,
    ];
    let mut sorted = prefixes.to_vec();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), prefixes.len());
}
