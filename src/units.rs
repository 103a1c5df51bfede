use crate::error::{LacatError, Result};

pub const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;
pub const ETH_DECIMALS: usize = 18;
pub const MAX_BASIS_POINTS: u32 = 10_000;

/// Parse a decimal ether amount ("1", "0.25", ".5") into wei.
pub fn parse_ether(input: &str) -> Result<u128> {
    let input = input.trim();
    if input.is_empty() {
        return Err(LacatError::ValidationError("Empty ether amount".to_string()));
    }
    if input.starts_with('-') {
        return Err(LacatError::ValidationError(format!(
            "Negative ether amount: {}",
            input
        )));
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(LacatError::ValidationError(format!("Invalid ether amount: {}", input)));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(LacatError::ValidationError(format!("Invalid ether amount: {}", input)));
    }
    if fraction.len() > ETH_DECIMALS {
        return Err(LacatError::ValidationError(format!(
            "Ether amount has more than {} decimals: {}",
            ETH_DECIMALS, input
        )));
    }

    let overflow = || LacatError::ValidationError(format!("Ether amount too large: {}", input));
    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(WEI_PER_ETH)
            .ok_or_else(overflow)?
    };
    let fraction_wei = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = ETH_DECIMALS);
        padded.parse::<u128>().map_err(|_| overflow())?
    };

    whole_wei.checked_add(fraction_wei).ok_or_else(overflow)
}

/// Convert a floating ether amount to wei through its shortest decimal rendering.
pub fn eth_to_wei(amount_in_eth: f64) -> Result<u128> {
    if !amount_in_eth.is_finite() {
        return Err(LacatError::ValidationError(format!(
            "Ether amount is not finite: {}",
            amount_in_eth
        )));
    }
    if amount_in_eth < 0.0 {
        return Err(LacatError::ValidationError(format!(
            "Negative ether amount: {}",
            amount_in_eth
        )));
    }
    parse_ether(&amount_in_eth.to_string())
}

/// Render wei as ether without trailing zeros.
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETH;
    let fraction = wei % WEI_PER_ETH;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction, width = ETH_DECIMALS);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

pub fn wei_to_eth(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETH as f64
}

pub fn validate_basis_points(basis_points: u32) -> Result<u16> {
    if basis_points > MAX_BASIS_POINTS {
        return Err(LacatError::ValidationError(format!(
            "Basis points must be within [0, {}], got {}",
            MAX_BASIS_POINTS, basis_points
        )));
    }
    u16::try_from(basis_points).map_err(|_| {
        LacatError::ValidationError(format!("Basis points out of range: {}", basis_points))
    })
}
