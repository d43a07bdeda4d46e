/// A receipt log belongs to the tracked pool when its emitter matches the
/// configured pool address, ignoring case.
pub fn is_tracked_pool(pool_address: &str, log_address: &str) -> bool {
    log_address.eq_ignore_ascii_case(pool_address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WETH_USDC_POOL;

    #[test]
    fn matches_regardless_of_case() {
        assert!(is_tracked_pool(
            WETH_USDC_POOL,
            "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"
        ));
        assert!(is_tracked_pool(WETH_USDC_POOL, WETH_USDC_POOL));
    }

    #[test]
    fn rejects_other_addresses() {
        assert!(!is_tracked_pool(
            WETH_USDC_POOL,
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        ));
        assert!(!is_tracked_pool(WETH_USDC_POOL, ""));
    }
}
