//! Utility functions for identifiers and hashing

use crate::error::EngineError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32, the hrp names the entity kind
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, EngineError> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| EngineError::InvalidInput(format!("invalid id prefix {hrp:?}: {e}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes()).map_err(|e| EngineError::Codec(e.to_string()))
}

/// Short carrier-facing shipment reference: 8 uppercase hex characters.
pub fn new_tracking_id() -> String {
    let id = uuid7();
    // the leading bytes of a uuid7 are the timestamp, take the random tail
    hex::encode_upper(&id.as_bytes()[12..])
}

/// sha256 over a CBOR encoding, hex encoded.
pub fn digest_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<String, EngineError> {
    let cbor = minicbor::to_vec(value)?;
    Ok(sha256::digest(&cbor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_uuid_to_bech32("trade_").unwrap();
        assert!(id.starts_with("trade_1"));
        assert_ne!(id, new_uuid_to_bech32("trade_").unwrap());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn tracking_ids_are_short_uppercase_hex() {
        let id = new_tracking_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
