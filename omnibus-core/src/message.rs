//! Runtime message-type identity and polymorphic ancestry (spec §3, §4.1).
//!
//! The source runtime relies on class inheritance to let a producer
//! declared only for a base type cover its derived messages. Rust has no
//! such runtime hierarchy, so a message declares its own ancestor chain
//! explicitly, most-specific-omitted, furthest ancestor last.

use std::any::{Any, TypeId};

/// A value that can flow through the bus as a produced or consumed message.
///
/// `ancestor_type_ids()` is the polymorphism hook: a type with a non-empty
/// chain is eligible for base-type producer/consumer fallback (§4.1). Most
/// messages have no ancestors and accept the default empty chain.
pub trait Message: Any + Send + Sync + 'static {
    /// Declared base types, most specific first, furthest ancestor last.
    /// Empty for a message with no polymorphic fallback.
    fn ancestor_type_ids() -> Vec<TypeId>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Stable name used on the wire (`MessageType` header) and for
    /// cross-transport type identification (spec §6's message-type resolver).
    fn type_name() -> &'static str
    where
        Self: Sized;
}

/// Declares `$derived`'s ancestor chain for polymorphic producer/consumer
/// resolution. `$base` is the nearest declared ancestor; its own chain (if
/// any) is appended so the full lineage is visible to the type registry in
/// one lookup.
#[macro_export]
macro_rules! impl_message {
    ($ty:ty, $name:literal) => {
        impl $crate::message::Message for $ty {
            fn type_name() -> &'static str {
                $name
            }
        }
    };
    ($ty:ty, $name:literal, ancestors = [$($base:ty),+ $(,)?]) => {
        impl $crate::message::Message for $ty {
            fn ancestor_type_ids() -> Vec<std::any::TypeId> {
                vec![$(std::any::TypeId::of::<$base>()),+]
            }

            fn type_name() -> &'static str {
                $name
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BaseEvent;
    struct DerivedEvent;

    impl_message!(BaseEvent, "BaseEvent");
    impl_message!(DerivedEvent, "DerivedEvent", ancestors = [BaseEvent]);

    #[test]
    fn base_message_has_empty_ancestry() {
        assert!(BaseEvent::ancestor_type_ids().is_empty());
    }

    #[test]
    fn derived_message_declares_base_as_ancestor() {
        let ancestors = DerivedEvent::ancestor_type_ids();
        assert_eq!(ancestors, vec![TypeId::of::<BaseEvent>()]);
    }

    #[test]
    fn type_name_is_stable() {
        assert_eq!(BaseEvent::type_name(), "BaseEvent");
        assert_eq!(DerivedEvent::type_name(), "DerivedEvent");
    }
}
