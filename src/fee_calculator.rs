use crate::config::FeeSchedule;

const BASIS_POINT_DENOMINATOR: u32 = 10_000;

/// Advisory fee and allowance arithmetic shown before a deposit is submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> FeeSchedule {
        self.schedule
    }

    /// Fee rate in basis points for a deposit with the given monthly allowance.
    pub fn fee_basis_points(&self, monthly_withdraw_basis_points: u32) -> u32 {
        let surcharge = if monthly_withdraw_basis_points > 0 {
            self.schedule.monthly_withdraw_fee_basis_points
        } else {
            0
        };
        self.schedule.base_fee_basis_points + surcharge
    }

    pub fn fee(&self, amount_in_eth: f64, monthly_withdraw_basis_points: u32) -> f64 {
        amount_in_eth * f64::from(self.fee_basis_points(monthly_withdraw_basis_points))
            / f64::from(BASIS_POINT_DENOMINATOR)
    }

    pub fn monthly_withdrawal(&self, amount_in_eth: f64, basis_points: u32) -> f64 {
        amount_in_eth * f64::from(basis_points) / f64::from(BASIS_POINT_DENOMINATOR)
    }

    pub fn fee_wei(&self, amount_wei: u128, monthly_withdraw_basis_points: u32) -> u128 {
        scale_basis_points(amount_wei, self.fee_basis_points(monthly_withdraw_basis_points))
    }

    pub fn monthly_withdrawal_wei(&self, amount_wei: u128, basis_points: u32) -> u128 {
        scale_basis_points(amount_wei, basis_points)
    }

    /// Amount plus advisory fee.
    pub fn total_with_fee(&self, amount_in_eth: f64, monthly_withdraw_basis_points: u32) -> f64 {
        amount_in_eth + self.fee(amount_in_eth, monthly_withdraw_basis_points)
    }
}

// Splits the division so large amounts cannot overflow the multiplication.
fn scale_basis_points(amount: u128, basis_points: u32) -> u128 {
    let denominator = u128::from(BASIS_POINT_DENOMINATOR);
    let basis_points = u128::from(basis_points);
    (amount / denominator)
        .saturating_mul(basis_points)
        .saturating_add((amount % denominator) * basis_points / denominator)
}
