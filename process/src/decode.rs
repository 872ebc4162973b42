//! Binary decoding of raw EVM log payloads.
//!
//! Everything here is pure: hex payload in, typed words out. Handlers
//! decide what a [`DecodeError`] means for the event (skip the record, or
//! for batch events skip the whole event).

use {
    alloy::sol_types::SolValue,
    quarry_shared::{
        DecodeError,
        primitives::{I256, U256, bytes_from_hex},
    },
};

/// `Swap(address,uint256,uint256,uint256,uint256,address)` body: four
/// unsigned words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Swap {
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

/// `Swap(address,address,int256,int256,uint160,uint128,int24)` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Swap {
    pub amount0: I256,
    pub amount1: I256,
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub tick: i32,
}

fn word(bytes: &[u8], index: usize) -> U256 {
    U256::from_be_slice(&bytes[index * 32..(index + 1) * 32])
}

fn require_len(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::ShortData {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

pub fn v2_swap(data: &str) -> Result<V2Swap, DecodeError> {
    let bytes = bytes_from_hex(data)?;
    require_len(&bytes, 128)?;
    Ok(V2Swap {
        amount0_in: word(&bytes, 0),
        amount1_in: word(&bytes, 1),
        amount0_out: word(&bytes, 2),
        amount1_out: word(&bytes, 3),
    })
}

pub fn v3_swap(data: &str) -> Result<V3Swap, DecodeError> {
    let bytes = bytes_from_hex(data)?;
    require_len(&bytes, 160)?;
    let tick = I256::from_raw(word(&bytes, 4));
    Ok(V3Swap {
        amount0: I256::from_raw(word(&bytes, 0)),
        amount1: I256::from_raw(word(&bytes, 1)),
        sqrt_price_x96: word(&bytes, 2),
        liquidity: word(&bytes, 3),
        tick: i32::try_from(tick)
            .map_err(|_| DecodeError::AbiMismatch(format!("tick {tick} out of int24 range")))?,
    })
}

/// `TransferSingle` data is `id(32) ∥ value(32)`. A payload carrying only
/// the id decodes with a zero value.
pub fn erc1155_single(data: &str) -> Result<(U256, U256), DecodeError> {
    let bytes = bytes_from_hex(data)?;
    require_len(&bytes, 32)?;
    let id = word(&bytes, 0);
    let value = if bytes.len() >= 64 {
        word(&bytes, 1)
    } else {
        U256::ZERO
    };
    Ok((id, value))
}

/// `TransferBatch` data is canonical ABI `(uint256[] ids, uint256[] values)`.
pub fn erc1155_batch(data: &str) -> Result<(Vec<U256>, Vec<U256>), DecodeError> {
    let bytes = bytes_from_hex(data)?;
    <(Vec<U256>, Vec<U256>)>::abi_decode_params(&bytes)
        .map_err(|e| DecodeError::AbiMismatch(e.to_string()))
}

/// Splits a signed swap amount into `(in, out)` columns: a negative
/// amount is the input side, stored as its absolute value.
pub fn signed_flow(amount: I256) -> (String, String) {
    if amount.is_negative() {
        (amount.unsigned_abs().to_string(), "0".to_owned())
    } else {
        ("0".to_owned(), amount.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_word(value: u64) -> String {
        format!("{value:064x}")
    }

    #[test]
    fn test_v2_swap_decodes_four_words() {
        let data = format!(
            "0x{}{}{}{}",
            hex_word(0),
            hex_word(1),
            hex_word(0),
            hex_word(2)
        );
        let swap = v2_swap(&data).unwrap();
        assert_eq!(swap.amount0_in, U256::ZERO);
        assert_eq!(swap.amount1_in, U256::from(1u64));
        assert_eq!(swap.amount0_out, U256::ZERO);
        assert_eq!(swap.amount1_out, U256::from(2u64));
    }

    #[test]
    fn test_v2_swap_rejects_short_data() {
        assert_eq!(
            v2_swap("0x00"),
            Err(DecodeError::ShortData {
                expected: 128,
                actual: 1
            })
        );
    }

    #[test]
    fn test_v3_swap_decodes_signed_amounts() {
        let amount0 = I256::try_from(-100i64).unwrap();
        let amount1 = I256::try_from(200i64).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&amount0.to_be_bytes::<32>());
        bytes.extend_from_slice(&amount1.to_be_bytes::<32>());
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(&I256::try_from(-5i64).unwrap().to_be_bytes::<32>());
        let data = format!("0x{}", hex::encode(&bytes));

        let swap = v3_swap(&data).unwrap();
        assert_eq!(swap.amount0, amount0);
        assert_eq!(swap.amount1, amount1);
        assert_eq!(swap.tick, -5);

        assert_eq!(signed_flow(swap.amount0), ("100".to_owned(), "0".to_owned()));
        assert_eq!(signed_flow(swap.amount1), ("0".to_owned(), "200".to_owned()));
    }

    #[test]
    fn test_erc1155_single_tolerates_missing_value_word() {
        let (id, value) = erc1155_single(&format!("0x{}", hex_word(7))).unwrap();
        assert_eq!(id, U256::from(7u64));
        assert_eq!(value, U256::ZERO);
    }

    #[test]
    fn test_erc1155_batch_round_trips_canonical_abi() {
        let ids = vec![U256::from(7u64), U256::from(8u64)];
        let values = vec![U256::from(2u64), U256::from(3u64)];
        let encoded = (ids.clone(), values.clone()).abi_encode_params();
        let data = format!("0x{}", hex::encode(encoded));

        let (decoded_ids, decoded_values) = erc1155_batch(&data).unwrap();
        assert_eq!(decoded_ids, ids);
        assert_eq!(decoded_values, values);
    }

    #[test]
    fn test_erc1155_batch_rejects_garbage() {
        assert!(matches!(
            erc1155_batch("0xdeadbeef"),
            Err(DecodeError::AbiMismatch(_))
        ));
    }
}
