//! Typed identifiers for the fulfillment domain.
//!
//! UUID-keyed entities use `Id<T>`, a thin wrapper that makes IDs of
//! different entities incompatible at compile time. Catalog-owned
//! identifiers (`GrainId`, `SupplierId`) are opaque strings minted by the
//! catalog collaborator, so they get string newtypes instead.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A typed wrapper around `Uuid`.
///
/// The marker parameter `T` pins the entity this ID belongs to; mixing up
/// IDs across entities is a compile error rather than a runtime surprise.
pub struct Id<T>(Uuid, PhantomData<fn() -> T>);

impl<T> Id<T> {
    /// Mint a fresh time-ordered (v7) ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7(), PhantomData)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T> From<Uuid> for Id<T> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self::from_uuid)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for StockBatch entities.
pub struct StockBatchEntity;

/// Marker type for InventoryAlert entities.
pub struct InventoryAlertEntity;

/// Marker type for Order entities.
pub struct OrderEntity;

/// Marker type for customer identities resolved by access control.
pub struct CustomerEntity;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for a stock batch.
pub type BatchId = Id<StockBatchEntity>;

/// Typed ID for an inventory alert.
pub type AlertId = Id<InventoryAlertEntity>;

/// Typed ID for an order.
pub type OrderId = Id<OrderEntity>;

/// Typed ID for a customer.
pub type CustomerId = Id<CustomerEntity>;

// ============================================================================
// Catalog-owned string identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Catalog identifier of a grain type (e.g. `wheat-001`).
    GrainId
}

string_id! {
    /// Identifier of the supplier a batch was received from.
    SupplierId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_of_same_entity_compare_by_uuid() {
        let uuid = Uuid::now_v7();
        assert_eq!(OrderId::from_uuid(uuid), OrderId::from_uuid(uuid));
        assert_ne!(OrderId::new(), OrderId::new());
    }

    #[test]
    fn id_roundtrips_through_display_and_parse() {
        let id = BatchId::new();
        let parsed: BatchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
