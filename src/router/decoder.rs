//! Payload decoders
//!
//! A decoder turns the raw bytes of a message into the payload kind a route's
//! handler expects. Decoding runs once per matching route, so two routes on
//! the same topic can interpret one payload differently.

use crate::error::DecodeError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Converts raw payload bytes into a typed value
pub trait PayloadDecoder: Send + Sync + 'static {
    type Output: Send + 'static;

    fn decode(&self, payload: &Bytes) -> Result<Self::Output, DecodeError>;

    /// Short name of the payload kind, used in logs
    fn kind(&self) -> &'static str;
}

/// JSON payloads deserialized with serde
pub struct JsonDecoder<T> {
    // fn() -> T keeps the decoder Send + Sync whatever T is
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonDecoder<{}>", std::any::type_name::<T>())
    }
}

impl<T> PayloadDecoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, payload: &Bytes) -> Result<T, DecodeError> {
        serde_json::from_slice(payload).map_err(|source| DecodeError::Json {
            type_name: std::any::type_name::<T>(),
            source,
        })
    }

    fn kind(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// UTF-8 text payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl PayloadDecoder for TextDecoder {
    type Output = String;

    fn decode(&self, payload: &Bytes) -> Result<String, DecodeError> {
        Ok(String::from_utf8(payload.to_vec())?)
    }

    fn kind(&self) -> &'static str {
        "text"
    }
}

/// Raw bytes, never fails
#[derive(Debug, Default, Clone, Copy)]
pub struct RawDecoder;

impl PayloadDecoder for RawDecoder {
    type Output = Bytes;

    fn decode(&self, payload: &Bytes) -> Result<Bytes, DecodeError> {
        Ok(payload.clone())
    }

    fn kind(&self) -> &'static str {
        "raw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reading {
        room: String,
        celsius: f64,
    }

    #[test]
    fn test_json_decoder() {
        let decoder = JsonDecoder::<Reading>::new();
        let payload = Bytes::from_static(br#"{"room":"kitchen","celsius":21.5}"#);

        let reading = decoder.decode(&payload).unwrap();
        assert_eq!(
            reading,
            Reading {
                room: "kitchen".to_string(),
                celsius: 21.5
            }
        );
        assert!(decoder.kind().contains("Reading"));
    }

    #[test]
    fn test_json_decoder_rejects_wrong_shape() {
        let decoder = JsonDecoder::<Reading>::new();
        let err = decoder.decode(&Bytes::from_static(b"21.5")).unwrap_err();
        assert!(matches!(err, DecodeError::Json { type_name, .. } if type_name.contains("Reading")));
    }

    #[test]
    fn test_text_decoder() {
        assert_eq!(
            TextDecoder.decode(&Bytes::from_static(b"online")).unwrap(),
            "online"
        );
        assert!(matches!(
            TextDecoder.decode(&Bytes::from_static(&[0xff, 0xfe])),
            Err(DecodeError::Utf8(_))
        ));
    }

    #[test]
    fn test_raw_decoder_never_fails() {
        let payload = Bytes::from_static(&[0x00, 0xff, 0x10]);
        assert_eq!(RawDecoder.decode(&payload).unwrap(), payload);
    }
}
