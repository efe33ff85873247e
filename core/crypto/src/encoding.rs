//! Base64 helpers for persisted and transmitted binary values.

use base64::{engine::general_purpose::STANDARD, Engine};

use keyrelay_common::{Error, Result};

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| Error::Serialization(format!("Invalid base64: {}", e)))
}

/// Decode standard base64 into a fixed-size array.
pub fn decode_array<const N: usize>(text: &str) -> Result<[u8; N]> {
    let bytes = decode(text)?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::Serialization(format!("Expected {} bytes, got {}", N, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_array_length_checked() {
        let text = encode(&[1u8; 12]);
        assert_eq!(decode_array::<12>(&text).unwrap(), [1u8; 12]);
        assert!(decode_array::<16>(&text).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not base64!").is_err());
    }
}
