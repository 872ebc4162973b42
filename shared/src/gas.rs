//! EIP-1559 gas price arithmetic.

/// What a transaction actually paid per unit of gas.
///
/// For type-2 transactions with a known base fee this is
/// `min(max_fee_per_gas, base_fee_per_gas + max_priority_fee_per_gas)`;
/// legacy transactions (and type-2 transactions in blocks that predate the
/// base fee) fall back to the quoted `gas_price`.
pub fn effective_gas_price(
    txn_type: u8,
    gas_price: Option<u128>,
    max_fee_per_gas: Option<u128>,
    max_priority_fee_per_gas: Option<u128>,
    base_fee_per_gas: Option<u64>,
) -> Option<u128> {
    if txn_type >= 2 {
        if let (Some(max_fee), Some(base_fee)) = (max_fee_per_gas, base_fee_per_gas) {
            let tip = max_priority_fee_per_gas.unwrap_or(0);
            return Some(max_fee.min(u128::from(base_fee) + tip));
        }
        return gas_price;
    }
    gas_price
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test]
    fn test_legacy_transaction_pays_its_gas_price() {
        let fifty_gwei = 50_000_000_000u128;
        let actual = effective_gas_price(0, Some(fifty_gwei), None, None, Some(40_000_000_000));
        assert_eq!(actual, Some(fifty_gwei));
    }

    // base fee + tip under the cap pays base + tip, over the cap pays the cap
    #[test_case(100, 200, 5, 105; "uncapped")]
    #[test_case(150, 120, 10, 120; "capped")]
    fn test_eip1559_effective_price(base_fee: u64, max_fee: u128, tip: u128, expected: u128) {
        let actual = effective_gas_price(2, Some(max_fee), Some(max_fee), Some(tip), Some(base_fee));
        assert_eq!(actual, Some(expected));
    }

    #[test]
    fn test_eip1559_without_base_fee_falls_back_to_gas_price() {
        let actual = effective_gas_price(2, Some(105), Some(200), Some(5), None);
        assert_eq!(actual, Some(105));
    }
}
