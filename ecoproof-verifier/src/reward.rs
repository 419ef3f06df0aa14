//! Token reward calculation.
//!
//! Rounding policy: floor the CO2 figure to whole kilograms first, then
//! floor the multiplied product. Any verified action with positive impact
//! earns at least one token; zero impact earns zero (and is rejected
//! upstream before minting).

use ecoproof_common::{ActionCategory, MultiplierTable};

pub fn calculate_reward(co2_kg: f64, category: ActionCategory, table: &MultiplierTable) -> u64 {
    if !(co2_kg > 0.0) {
        return 0;
    }
    let base = co2_kg.floor();
    let tokens = (base * table.multiplier(category)).floor() as u64;
    tokens.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_reward_is_floored_co2() {
        let table = MultiplierTable::default();
        assert_eq!(calculate_reward(187.2, ActionCategory::Energy, &table), 187);
    }

    #[test]
    fn solar_reward_applies_multiplier_after_flooring() {
        let table = MultiplierTable::default();
        // floor(187.2) = 187; floor(187 * 1.5) = floor(280.5) = 280
        assert_eq!(calculate_reward(187.2, ActionCategory::Solar, &table), 280);
    }

    #[test]
    fn small_positive_impact_still_earns_one_token() {
        let table = MultiplierTable::default();
        assert_eq!(calculate_reward(0.4, ActionCategory::Waste, &table), 1);
        assert_eq!(calculate_reward(1.0, ActionCategory::Waste, &table), 1);
    }

    #[test]
    fn zero_impact_earns_nothing() {
        let table = MultiplierTable::default();
        assert_eq!(calculate_reward(0.0, ActionCategory::Energy, &table), 0);
        assert_eq!(calculate_reward(-3.0, ActionCategory::Energy, &table), 0);
    }

    #[test]
    fn category_multipliers_apply() {
        let table = MultiplierTable::default();
        assert_eq!(calculate_reward(100.0, ActionCategory::Transport, &table), 120);
        assert_eq!(calculate_reward(100.0, ActionCategory::Waste, &table), 80);
        assert_eq!(calculate_reward(100.0, ActionCategory::Water, &table), 90);
    }
}
