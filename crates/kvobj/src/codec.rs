//! JSON encoding at the store boundary.
//!
//! Values are encoded before any store call is issued, so an unencodable
//! value never causes a partial write.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ObjectError, ObjectResult};

pub(crate) fn encode<V: Serialize + ?Sized>(value: &V) -> ObjectResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(ObjectError::Serialization)
}

pub(crate) fn decode<V: DeserializeOwned>(key: &str, raw: &[u8]) -> ObjectResult<V> {
    serde_json::from_slice(raw).map_err(|source| ObjectError::Deserialization {
        key: key.to_string(),
        source,
    })
}

/// Sorted-set member layout: a unique id followed by the payload.
///
/// `id` is serialized first, so members with equal scores sort by id.
#[derive(Serialize)]
struct EnvelopeRef<'a, V: ?Sized> {
    id: Uuid,
    value: &'a V,
}

#[derive(Deserialize)]
pub(crate) struct Envelope<V> {
    pub id: Uuid,
    pub value: V,
}

pub(crate) fn encode_member<V: Serialize + ?Sized>(id: Uuid, value: &V) -> ObjectResult<Bytes> {
    encode(&EnvelopeRef { id, value })
}

pub(crate) fn decode_member<V: DeserializeOwned>(key: &str, raw: &[u8]) -> ObjectResult<Envelope<V>> {
    decode(key, raw)
}
