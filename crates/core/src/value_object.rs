//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Cents`
/// with the same amount are the same amount, while two items with the same
/// price are still different items.
///
/// The trait requires:
/// - **Clone**: value objects are cheap to copy
/// - **PartialEq**: compared by attribute values
/// - **Debug**: shows up in logs and test failures
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
