//! Serialization port (spec §4.2, §6).
//!
//! `Serializer` must be object-safe so a bus can hold it as
//! `Arc<dyn Serializer>` while still supporting arbitrary concrete message
//! types. Plain `serde::Serialize`/`Deserialize` bounds are not object-safe,
//! so both directions are expressed in terms of `erased_serde`: encode takes
//! a `&dyn Serialize`, and decode hands the caller a `&mut dyn Deserializer`
//! instead of returning a generic `T` — a generic method on `dyn Serializer`
//! would make the trait itself not object-safe (no `Self: Sized` bound is
//! possible without losing dyn-compatibility). Callers that know their
//! concrete type, such as [`crate::handler::FnConsumer`]/[`crate::handler::FnHandler`],
//! go through [`deserialize`] below instead of calling the trait method
//! directly.

use bytes::Bytes;
use erased_serde::{Deserializer as ErasedDeserializer, Serialize as ErasedSerialize};

use crate::error::{BusError, Result};

/// Abstract encode/decode of a declared type to/from an opaque byte buffer.
pub trait Serializer: Send + Sync {
    /// Encode `value` to bytes. `type_name` is carried only for error
    /// messages and tracing; the encoding itself is type-driven by `value`.
    fn serialize(&self, type_name: &str, value: &dyn ErasedSerialize) -> Result<Bytes>;

    /// Decode `bytes`, handing the erased deserializer to `visit` so the
    /// typed decode can happen on the caller's side of the object-safety
    /// boundary. Round-trip identity with `serialize` is required for all
    /// declared types (spec §4.2, §8).
    fn deserialize_erased(
        &self,
        type_name: &str,
        bytes: &[u8],
        visit: &mut dyn FnMut(&mut dyn ErasedDeserializer) -> Result<()>,
    ) -> Result<()>;
}

/// Typed convenience wrapper over [`Serializer::deserialize_erased`] for
/// callers that know the concrete type `T` they expect.
pub fn deserialize<T>(serializer: &dyn Serializer, type_name: &str, bytes: &[u8]) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut decoded = None;
    serializer.deserialize_erased(type_name, bytes, &mut |erased| {
        decoded = Some(
            erased_serde::deserialize(erased)
                .map_err(|err| BusError::Serialization(format!("decoding {type_name}: {err}")))?,
        );
        Ok(())
    })?;
    decoded.ok_or_else(|| BusError::Serialization(format!("no value decoded for '{type_name}'")))
}

/// JSON serializer, the reference implementation shipped with the core.
///
/// Concrete transport crates or applications may supply another
/// `Serializer` (e.g. a binary codec); the core never assumes JSON beyond
/// this default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, type_name: &str, value: &dyn ErasedSerialize) -> Result<Bytes> {
        let mut buf = Vec::new();
        let mut json_ser = serde_json::Serializer::new(&mut buf);
        let mut erased = <dyn erased_serde::Serializer>::erase(&mut json_ser);
        value
            .erased_serialize(&mut erased)
            .map_err(|err| BusError::Serialization(format!("encoding {type_name}: {err}")))?;
        Ok(Bytes::from(buf))
    }

    fn deserialize_erased(
        &self,
        type_name: &str,
        bytes: &[u8],
        visit: &mut dyn FnMut(&mut dyn ErasedDeserializer) -> Result<()>,
    ) -> Result<()> {
        let mut json_de = serde_json::Deserializer::from_slice(bytes);
        let mut erased = <dyn erased_serde::Deserializer>::erase(&mut json_de);
        visit(&mut erased).map_err(|err| match err {
            BusError::Serialization(msg) => BusError::Serialization(msg),
            other => BusError::Serialization(format!("decoding {type_name}: {other}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OrderPlaced {
        id: String,
        amount: i64,
    }

    #[test]
    fn json_roundtrip_is_identity() {
        let serializer = JsonSerializer;
        let value = OrderPlaced {
            id: "o-1".into(),
            amount: 1200,
        };
        let bytes = serializer.serialize("OrderPlaced", &value).unwrap();
        let back: OrderPlaced = deserialize(&serializer, "OrderPlaced", &bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn malformed_payload_is_serialization_error() {
        let serializer = JsonSerializer;
        let err = deserialize::<OrderPlaced>(&serializer, "OrderPlaced", b"not json").unwrap_err();
        assert_eq!(err.kind(), "Serialization");
    }
}
