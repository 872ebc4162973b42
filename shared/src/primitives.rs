//! Canonical representations shared by every crate in the workspace.
//!
//! Addresses and hashes are stored and compared as lowercase hex strings
//! with a `0x` prefix. Token amounts keep their full `uint256` precision
//! through [`BigDecimal`] until they reach the database.

pub use alloy::primitives::{Address, B256, I256, U256, keccak256};

use {
    crate::error::DecodeError,
    bigdecimal::{BigDecimal, ToPrimitive, num_bigint::BigInt},
};

/// The mint/burn sentinel. Transfers touching it never update address stats.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Formats an address as the canonical lowercase `0x` hex string.
///
/// [`Address`]'s `Display` applies EIP-55 checksum casing, which is the
/// wrong representation for primary keys.
pub fn lower_hex_address(address: &Address) -> String {
    format!("{address:#x}")
}

/// Formats a 32-byte hash as the canonical lowercase `0x` hex string.
pub fn lower_hex_hash(hash: &B256) -> String {
    format!("{hash:#x}")
}

/// Lowercases an incoming hex string and guarantees the `0x` prefix.
pub fn normalize_hex(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{lower}")
    }
}

/// Extracts the address packed into the low 20 bytes of an indexed topic.
///
/// Returns `None` for topics too short to contain an address, matching the
/// tolerance expected of malformed logs.
pub fn address_from_topic(topic: &str) -> Option<String> {
    let stripped = topic.strip_prefix("0x").unwrap_or(topic);
    if stripped.len() < 40 || !stripped.is_ascii() {
        return None;
    }
    Some(format!("0x{}", stripped[stripped.len() - 40..].to_ascii_lowercase()))
}

/// Parses a hex quantity into a [`U256`]. Empty data (`""` or `"0x"`)
/// decodes to zero, the convention for value-less event payloads.
pub fn u256_from_hex(value: &str) -> Result<U256, DecodeError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if stripped.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(stripped, 16).map_err(|_| DecodeError::BadHex(value.to_owned()))
}

/// Decodes `0x`-prefixed hex payload bytes.
pub fn bytes_from_hex(value: &str) -> Result<Vec<u8>, DecodeError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped).map_err(|_| DecodeError::BadHex(value.to_owned()))
}

/// Converts a `uint256` into an exact arbitrary-precision decimal.
pub fn u256_to_decimal(value: &U256) -> BigDecimal {
    // The decimal rendering of a U256 always parses back.
    BigInt::parse_bytes(value.to_string().as_bytes(), 10)
        .map(BigDecimal::from)
        .unwrap_or_default()
}

/// Scales a raw token amount by `10^decimals`, e.g. wei-style units into
/// whole tokens, without losing precision.
pub fn scaled_amount(amount: &U256, decimals: i64) -> BigDecimal {
    BigDecimal::new(
        BigInt::parse_bytes(amount.to_string().as_bytes(), 10).unwrap_or_default(),
        decimals,
    )
}

/// Converts a wei amount to fractional ether as `f64`, for fiat valuation.
pub fn wei_to_eth(value: &U256) -> f64 {
    scaled_amount(value, 18).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test]
    fn test_address_display_is_checksummed_but_helper_is_not() {
        let address: Address = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
            .parse()
            .unwrap();
        assert_eq!(
            lower_hex_address(&address),
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
    }

    #[test_case("0x", U256::ZERO; "empty payload")]
    #[test_case("", U256::ZERO; "no prefix empty")]
    #[test_case("0x0a", U256::from(10u64); "small amount")]
    #[test_case(
        "0x000000000000000000000000000000000000000000000000000000000000000a",
        U256::from(10u64);
        "padded word"
    )]
    fn test_u256_from_hex(input: &str, expected: U256) {
        assert_eq!(u256_from_hex(input).unwrap(), expected);
    }

    #[test]
    fn test_u256_from_hex_rejects_garbage() {
        assert!(matches!(u256_from_hex("0xzz"), Err(DecodeError::BadHex(_))));
    }

    #[test]
    fn test_address_from_topic_takes_low_twenty_bytes() {
        let topic = "0x000000000000000000000000C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
        assert_eq!(
            address_from_topic(topic).unwrap(),
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
    }

    #[test]
    fn test_address_from_topic_rejects_short_input() {
        assert_eq!(address_from_topic("0x1234"), None);
    }

    #[test]
    fn test_scaled_amount_preserves_precision() {
        let amount = U256::from(1_500_000u64);
        let expected: BigDecimal = "1.5".parse().unwrap();
        assert_eq!(scaled_amount(&amount, 6), expected);
    }

    #[test]
    fn test_u256_to_decimal_round_trips_the_largest_word() {
        let max = U256::MAX;
        assert_eq!(u256_to_decimal(&max).to_string(), max.to_string());
    }

    #[test]
    fn test_wei_to_eth() {
        let one_and_a_half_eth = U256::from(1_500_000_000_000_000_000u128);
        assert!((wei_to_eth(&one_and_a_half_eth) - 1.5).abs() < f64::EPSILON);
    }
}
