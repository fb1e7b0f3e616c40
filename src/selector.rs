//! Greedy UTXO selection: confirmed only, largest first, stop once the target is exceeded.

use crate::chain::Utxo;
use crate::error::SelectError;
use bitcoin::Amount;

/// Select the shortest descending-value prefix of the confirmed candidates whose sum strictly
/// exceeds `target`. All-or-nothing: anything short of that is `InsufficientFunds`.
pub fn select_utxos(candidates: &[Utxo], target: Amount) -> Result<Vec<Utxo>, SelectError> {
    let mut confirmed: Vec<&Utxo> = candidates.iter().filter(|u| u.confirmed).collect();
    // Stable sort keeps API order among equal values, so selection is deterministic.
    confirmed.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut sum = Amount::ZERO;
    for utxo in confirmed.iter() {
        selected.push((*utxo).clone());
        sum += utxo.value;
        if sum > target {
            return Ok(selected);
        }
    }

    Err(SelectError::InsufficientFunds { needed: target, available: sum })
}

pub fn total_value(utxos: &[Utxo]) -> Amount {
    utxos.iter().map(|u| u.value).sum()
}
