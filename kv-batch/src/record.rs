use crate::{Entity, ServiceError};

/// Stored value of an entity: its encoded fields plus the index entries written for it.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Record {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: ::prost::alloc::vec::Vec<u8>,

    #[prost(message, repeated, tag = "2")]
    pub indexes: ::prost::alloc::vec::Vec<IndexEntry>,
}

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct IndexEntry {
    #[prost(string, tag = "1")]
    pub field: ::prost::alloc::string::String,

    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

impl Record {
    pub fn from_entity<E: Entity>(entity: &E) -> Self {
        Self {
            payload: entity.encode_to_vec(),
            indexes: entity
                .indexed_fields()
                .into_iter()
                .map(|(field, value)| IndexEntry { field, value })
                .collect(),
        }
    }
}

/// Decodes `payload` into `dst`.
///
/// prost skips fields it does not know, so a payload longer than the re-encoded
/// message held fields `E` no longer declares. `dst` is still populated in that case.
pub(crate) fn decode_payload<E: Entity>(
    kind: &str,
    payload: &[u8],
    dst: &mut E,
) -> Result<(), ServiceError> {
    let decoded = E::decode(payload)
        .map_err(|err| ServiceError::InvalidEntityType(format!("{kind}: {err}")))?;
    let known = decoded.encoded_len();
    *dst = decoded;
    if payload.len() > known {
        return Err(ServiceError::FieldMismatch {
            kind: kind.to_string(),
            reason: format!(
                "{} byte(s) of stored fields have no counterpart",
                payload.len() - known
            ),
        });
    }
    Ok(())
}
