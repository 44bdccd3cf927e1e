use serde::{Deserialize, Serialize};

/// All rates in the simulation are expressed in millionths.
pub const MILLIONTHS: u128 = 1_000_000;

/// The fee a node charges for forwarding a payment through it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub base_fee: u128,
    pub proportional_millionths: u128,
}

impl FeePolicy {
    pub fn new(base_fee: u128, proportional_millionths: u128) -> Self {
        Self {
            base_fee,
            proportional_millionths,
        }
    }

    pub fn forward_fee(&self, amount: u128) -> Result<u128, String> {
        calculate_forward_fee(amount, self.base_fee, self.proportional_millionths)
    }
}

/// The proportional part is rounded up so that a forwarding node is never underpaid.
pub(crate) fn calculate_forward_fee(
    amount: u128,
    base_fee: u128,
    fee_proportional_millionths: u128,
) -> Result<u128, String> {
    let fee = fee_proportional_millionths
        .checked_mul(amount)
        .ok_or_else(|| {
            format!(
                "fee_proportional_millionths {} * amount {} overflow",
                fee_proportional_millionths, amount
            )
        })?;
    let proportional = fee / MILLIONTHS + u128::from(fee % MILLIONTHS > 0);
    base_fee
        .checked_add(proportional)
        .ok_or_else(|| format!("base fee {} + fee {} overflow", base_fee, proportional))
}

/// The collateral a payee puts at stake for a hop from which `hops_remaining`
/// hops (this one included) could stall the payment, each for `blocks_per_hop`.
pub(crate) fn calculate_griefing_penalty(
    amount: u128,
    penalty_rate_millionths: u128,
    blocks_per_hop: u64,
    hops_remaining: usize,
) -> Option<u128> {
    if penalty_rate_millionths == 0 {
        return Some(0);
    }
    amount
        .checked_mul(penalty_rate_millionths)?
        .checked_mul(u128::from(blocks_per_hop))?
        .checked_mul(hops_remaining as u128)
        .map(|v| v / MILLIONTHS)
}

/// What reaches the owner of `amount` after the close fee is taken.
pub(crate) fn amount_after_fee(amount: u128, fee_rate_millionths: u128) -> u128 {
    let fee_rate = fee_rate_millionths.min(MILLIONTHS);
    amount - amount.saturating_mul(fee_rate) / MILLIONTHS
}

/// What a debit of `amount` costs once the fee is added, `None` on overflow.
pub(crate) fn amount_with_fee(amount: u128, fee_rate_millionths: u128) -> Option<u128> {
    let fee = amount.checked_mul(fee_rate_millionths)?;
    let fee = fee / MILLIONTHS + u128::from(fee % MILLIONTHS > 0);
    amount.checked_add(fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_fee_rounds_up() {
        assert_eq!(calculate_forward_fee(10, 1, 0), Ok(1));
        assert_eq!(calculate_forward_fee(1_000, 0, 1_000), Ok(1));
        assert_eq!(calculate_forward_fee(1_001, 0, 1_000), Ok(2));
        assert_eq!(calculate_forward_fee(1_000, 5, 1_000), Ok(6));
        assert!(calculate_forward_fee(u128::MAX, 0, 2).is_err());
    }

    #[test]
    fn test_griefing_penalty() {
        assert_eq!(calculate_griefing_penalty(100, 0, 1, 3), Some(0));
        assert_eq!(calculate_griefing_penalty(100, 100_000, 1, 1), Some(10));
        assert_eq!(calculate_griefing_penalty(100, 100_000, 2, 3), Some(60));
        assert_eq!(calculate_griefing_penalty(u128::MAX, 2, 1, 1), None);
    }

    #[test]
    fn test_close_fee_arithmetic() {
        assert_eq!(amount_after_fee(100, 100_000), 90);
        assert_eq!(amount_after_fee(0, 100_000), 0);
        assert_eq!(amount_with_fee(100, 100_000), Some(110));
        assert_eq!(amount_with_fee(5, 100_000), Some(6));
        assert_eq!(amount_after_fee(100, 2 * MILLIONTHS), 0);
    }
}
