use crate::config::Params;
use crate::engine::Engine;
use crate::market::{AllocationTable, Vision};
use crate::record::RunRecord;
use anyhow::{Context, Result};
use rand::prelude::*;

/// Joint choice of a market position and a price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    /// Position index.
    pub position: usize,
    /// Price level index.
    pub price: usize,
}

/// Spatial competition model.
///
/// Holds the strategy space, the price ladder and the consumer allocation
/// table of a parameter set. Moves are indices into the strategy space,
/// which is enumerated with the position varying slowest.
pub struct Model {
    params: Params,
    strategies: Vec<Strategy>,
    prices: Vec<f64>,
    table: AllocationTable,
}

/// Validate the parameters and build the [`Model`] they describe.
pub fn build_model(params: &Params) -> Result<Model> {
    params.validate().context("failed to validate params")?;

    let strategies = (0..params.n_positions)
        .flat_map(|position| (0..params.n_prices).map(move |price| Strategy { position, price }))
        .collect();

    let prices = price_ladder(params.p_min, params.p_max, params.n_prices);

    let vision = Vision::new(params.r, params.n_positions);
    let table = AllocationTable::build(params.n_positions, |x| vision.field_of_view(x));
    log::debug!("built allocation table (radius: {})", vision.radius());

    Ok(Model {
        params: params.clone(),
        strategies,
        prices,
        table,
    })
}

/// Linearly spaced prices from `p_min` to `p_max` (both included).
fn price_ladder(p_min: f64, p_max: f64, n_prices: usize) -> Vec<f64> {
    let step = (p_max - p_min) / (n_prices - 1) as f64;
    let mut prices: Vec<_> = (0..n_prices).map(|i| p_min + i as f64 * step).collect();
    prices[n_prices - 1] = p_max;
    prices
}

impl Model {
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn n_strategies(&self) -> usize {
        self.strategies.len()
    }

    pub fn strategy(&self, mv: usize) -> Strategy {
        assert!(
            mv < self.strategies.len(),
            "move {mv} out of range 0..{}",
            self.strategies.len()
        );
        self.strategies[mv]
    }

    pub fn price(&self, mv: usize) -> f64 {
        self.prices[self.strategy(mv).price]
    }

    /// Expected number of consumers of each firm.
    ///
    /// Shared consumers go to the cheaper firm, or are split in half on equal prices.
    pub fn consumers_for(&self, move_a: usize, move_b: usize) -> [f64; 2] {
        let strat_a = self.strategy(move_a);
        let strat_b = self.strategy(move_b);

        let alloc = self.table.get(strat_a.position, strat_b.position);
        let mut n_consumers = alloc.captive.map(|n| n as f64);
        let shared = alloc.shared as f64;

        if strat_a.price == strat_b.price {
            n_consumers[0] += shared / 2.0;
            n_consumers[1] += shared / 2.0;
        } else if strat_a.price < strat_b.price {
            n_consumers[0] += shared;
        } else {
            n_consumers[1] += shared;
        }

        n_consumers
    }

    /// Expected profit of each firm.
    ///
    /// Consumer counts are computed when not given.
    pub fn profit_for(
        &self,
        move_a: usize,
        move_b: usize,
        n_consumers: Option<[f64; 2]>,
    ) -> [f64; 2] {
        let n_consumers = n_consumers.unwrap_or_else(|| self.consumers_for(move_a, move_b));
        [
            n_consumers[0] * self.price(move_a),
            n_consumers[1] * self.price(move_b),
        ]
    }

    /// Best response to `opp_move`.
    ///
    /// Ties between strategies with exactly the maximum profit are broken
    /// uniformly at random with a single draw from `rng`.
    pub fn optimal_move<R: Rng + ?Sized>(&self, opp_move: usize, rng: &mut R) -> Result<usize> {
        let profits: Vec<_> = (0..self.n_strategies())
            .map(|mv| self.profit_for(mv, opp_move, None)[0])
            .collect();

        let max_profit = profits.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let i_ties: Vec<_> = profits
            .iter()
            .enumerate()
            .filter(|&(_, &profit)| profit == max_profit)
            .map(|(mv, _)| mv)
            .collect();

        let &mv = i_ties
            .choose(rng)
            .context("failed to choose among optimal moves")?;
        Ok(mv)
    }

    /// Run the simulation from a freshly seeded random number generator.
    pub fn run(&self) -> Result<RunRecord> {
        Engine::new(self).perform_simulation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn model(r: f64, n_positions: usize, n_prices: usize) -> Model {
        let params =
            Params::new(r, 42, n_positions, n_prices, 1.0, 3.0, 10).expect("invalid params");
        build_model(&params).expect("failed to build model")
    }

    fn find_move(model: &Model, position: usize, price: usize) -> usize {
        (0..model.n_strategies())
            .find(|&mv| model.strategy(mv) == Strategy { position, price })
            .expect("strategy not found")
    }

    #[test]
    fn enumerates_every_strategy_once() {
        let model = model(0.3, 4, 3);
        assert_eq!(model.n_strategies(), 12);
        assert_eq!(model.strategy(0), Strategy { position: 0, price: 0 });
        assert_eq!(model.strategy(1), Strategy { position: 0, price: 1 });
        assert_eq!(model.strategy(3), Strategy { position: 1, price: 0 });
        assert_eq!(model.strategy(11), Strategy { position: 3, price: 2 });
    }

    #[test]
    fn builds_linear_price_ladder() {
        assert_eq!(price_ladder(1.0, 3.0, 3), vec![1.0, 2.0, 3.0]);
        let prices = price_ladder(1.0, 10.0, 50);
        assert_eq!(prices.len(), 50);
        assert_eq!(prices[0], 1.0);
        assert_eq!(prices[49], 10.0);
        assert!(prices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn rejects_invalid_params() {
        let params = Params {
            r: 0.0,
            seed: 1,
            n_positions: 5,
            n_prices: 3,
            p_min: 1.0,
            p_max: 3.0,
            t_max: 10,
        };
        assert!(build_model(&params).is_err());
    }

    #[test]
    fn splits_shared_consumers_on_equal_prices() {
        let model = model(0.2, 10, 3);
        for (pos_a, pos_b) in [(2, 4), (0, 9), (5, 5)] {
            let move_a = find_move(&model, pos_a, 1);
            let move_b = find_move(&model, pos_b, 1);
            let alloc = model.table.get(pos_a, pos_b);
            let n_consumers = model.consumers_for(move_a, move_b);
            let half = alloc.shared as f64 / 2.0;
            assert_eq!(n_consumers[0] - alloc.captive[0] as f64, half);
            assert_eq!(n_consumers[1] - alloc.captive[1] as f64, half);
        }
    }

    #[test]
    fn cheaper_firm_takes_shared_consumers() {
        let model = model(0.2, 10, 3);
        let move_a = find_move(&model, 3, 0);
        let move_b = find_move(&model, 6, 2);
        let alloc = model.table.get(3, 6);
        assert!(alloc.shared > 0);

        let n_consumers = model.consumers_for(move_a, move_b);
        assert_eq!(n_consumers[0], (alloc.captive[0] + alloc.shared) as f64);
        assert_eq!(n_consumers[1], alloc.captive[1] as f64);

        let n_consumers = model.consumers_for(move_b, move_a);
        assert_eq!(n_consumers[0], alloc.captive[1] as f64);
        assert_eq!(n_consumers[1], (alloc.captive[0] + alloc.shared) as f64);
    }

    #[test]
    fn profit_is_consumers_times_price() {
        let model = model(0.2, 10, 3);
        let move_a = find_move(&model, 1, 0);
        let move_b = find_move(&model, 8, 2);
        let n_consumers = model.consumers_for(move_a, move_b);
        let profits = model.profit_for(move_a, move_b, None);
        assert_eq!(profits, [n_consumers[0] * 1.0, n_consumers[1] * 3.0]);
        assert_eq!(
            model.profit_for(move_a, move_b, Some([2.0, 4.0])),
            [2.0, 12.0]
        );
    }

    #[test]
    fn zero_radius_only_counts_own_position() {
        let model = model(0.01, 10, 3);
        let move_a = find_move(&model, 2, 0);
        let move_b = find_move(&model, 7, 2);
        assert_eq!(model.consumers_for(move_a, move_b), [1.0, 1.0]);

        let move_b = find_move(&model, 2, 2);
        assert_eq!(model.consumers_for(move_a, move_b), [1.0, 0.0]);
        assert_eq!(model.profit_for(move_b, move_a, None), [0.0, 1.0]);
    }

    #[test]
    #[should_panic]
    fn panics_on_out_of_range_move() {
        let model = model(0.2, 5, 3);
        model.consumers_for(0, model.n_strategies());
    }

    #[test]
    fn optimal_move_is_reproducible() {
        let model = model(0.3, 10, 4);
        let opp_move = find_move(&model, 4, 2);
        let mut rng_a = ChaCha12Rng::seed_from_u64(7);
        let mut rng_b = ChaCha12Rng::seed_from_u64(7);
        for _ in 0..20 {
            let mv_a = model.optimal_move(opp_move, &mut rng_a).expect("no move");
            let mv_b = model.optimal_move(opp_move, &mut rng_b).expect("no move");
            assert_eq!(mv_a, mv_b);
        }
    }

    #[test]
    fn optimal_move_maximizes_profit() {
        let model = model(0.3, 10, 4);
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        for opp_move in 0..model.n_strategies() {
            let mv = model.optimal_move(opp_move, &mut rng).expect("no move");
            let best = model.profit_for(mv, opp_move, None)[0];
            for other in 0..model.n_strategies() {
                assert!(model.profit_for(other, opp_move, None)[0] <= best);
            }
        }
    }

    #[test]
    fn optimal_move_breaks_ties_within_the_tie_set() {
        // With full vision the position is irrelevant, so every position ties.
        let model = model(1.0, 5, 3);
        let opp_move = find_move(&model, 0, 2);
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let mut positions = Vec::new();
        for _ in 0..200 {
            let mv = model.optimal_move(opp_move, &mut rng).expect("no move");
            let strat = model.strategy(mv);
            // Undercutting (2.0 * 5) beats splitting (3.0 * 2.5).
            assert_eq!(strat.price, 1);
            positions.push(strat.position);
        }
        positions.sort();
        positions.dedup();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn round_trip_params_reproduce_the_run() {
        let params = Params::new(0.37, 987_654, 14, 7, 1.5, 9.25, 20).expect("invalid params");
        let model = build_model(&params).expect("failed to build model");

        let contents = toml::to_string(&params).expect("failed to serialize");
        let loaded: Params = toml::from_str(&contents).expect("failed to deserialize");
        let loaded_model = build_model(&loaded).expect("failed to build model");

        assert!(model.table == loaded_model.table);
        assert_eq!(model.prices, loaded_model.prices);
        assert_eq!(
            model.run().expect("failed to run"),
            loaded_model.run().expect("failed to run")
        );
    }
}
