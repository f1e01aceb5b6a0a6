use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier is a distinct type so a hold id can never be passed where
/// a booking id is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Tenant that owns inventory, policies and bookings.
    BusinessId
);
uuid_id!(
    /// A rentable inventory item (one row may represent several identical units).
    InventoryItemId
);
uuid_id!(
    /// A short-lived checkout hold.
    HoldId
);
uuid_id!(
    /// A durable booking record.
    BookingId
);
uuid_id!(CustomerId);
uuid_id!(PaymentId);
uuid_id!(CouponId);
uuid_id!(WaiverId);

/// Namespace for booking ids derived from hold ids.
const BOOKING_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_0b8e_4a2d_4d8b_9f3e_2b7a_51c4_e0d9);

impl BookingId {
    /// Derives the booking id a hold materializes into.
    ///
    /// The derivation is deterministic, so every retry of a materialization
    /// for the same hold addresses the same booking row.
    pub fn for_hold(hold_id: HoldId) -> Self {
        Self(Uuid::new_v5(&BOOKING_NAMESPACE, hold_id.as_uuid().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_unique_ids() {
        let id1 = HoldId::new();
        let id2 = HoldId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = BusinessId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn parse_from_str() {
        let uuid = Uuid::new_v4();
        let id: BookingId = uuid.to_string().parse().unwrap();
        assert_eq!(id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<BookingId>().is_err());
    }

    #[test]
    fn serialization_is_transparent() {
        let id = InventoryItemId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let deserialized: InventoryItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn booking_id_for_hold_is_deterministic() {
        let hold = HoldId::new();
        assert_eq!(BookingId::for_hold(hold), BookingId::for_hold(hold));
        assert_ne!(BookingId::for_hold(hold), BookingId::for_hold(HoldId::new()));
        assert_ne!(BookingId::for_hold(hold).as_uuid(), hold.as_uuid());
    }
}
