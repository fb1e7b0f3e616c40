//! Heuristic fee estimator. Deliberately overestimates the transaction size.
//!
//! ```text
//! size = inputs * 180 + outputs * 34 + 10 + inputs (+ 40 with an OP_RETURN output)
//! fee  = ceil(size * fee_rate)
//! ```

use bitcoin::Amount;

/// Estimated size of one input, fee calculation only.
pub const INPUT_BYTES: u64 = 180;
/// Estimated size of one output, fee calculation only.
pub const OUTPUT_BYTES: u64 = 34;
/// Fixed transaction overhead.
pub const TX_OVERHEAD_BYTES: u64 = 10;
/// Allowance for an OP_RETURN data output.
pub const OP_RETURN_BYTES: u64 = 40;

pub fn estimated_size(num_inputs: usize, num_outputs: usize, op_return: bool) -> u64 {
    let inputs = num_inputs as u64;
    let outputs = num_outputs as u64;
    inputs * INPUT_BYTES
        + outputs * OUTPUT_BYTES
        + TX_OVERHEAD_BYTES
        + inputs
        + if op_return { OP_RETURN_BYTES } else { 0 }
}

/// Fee in satoshis for `fee_rate` sat/byte. Fractional rates round up, never down.
pub fn estimate_fee(fee_rate: f64, num_inputs: usize, num_outputs: usize, op_return: bool) -> Amount {
    let rate = if fee_rate.is_finite() && fee_rate > 0.0 { fee_rate } else { 0.0 };
    let sats = (estimated_size(num_inputs, num_outputs, op_return) as f64 * rate).ceil();
    Amount::from_sat(sats as u64)
}
