use crate::model::Model;
use crate::record::RunRecord;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;

/// Simulation engine.
///
/// Drives the alternating best-response game of a [`Model`] with its own
/// random number generator, seeded once from the model parameters.
pub struct Engine<'a> {
    model: &'a Model,
    rng: ChaCha12Rng,
}

impl<'a> Engine<'a> {
    pub fn new(model: &'a Model) -> Self {
        let rng = ChaCha12Rng::seed_from_u64(model.params().seed);
        Self { model, rng }
    }

    /// Perform the simulation and return the recorded time series.
    pub fn perform_simulation(&mut self) -> Result<RunRecord> {
        let t_max = self.model.params().t_max;

        let mut positions = Vec::with_capacity(t_max);
        let mut prices = Vec::with_capacity(t_max);
        let mut n_consumers = Vec::with_capacity(t_max);
        let mut profits = Vec::with_capacity(t_max);

        // Firm 1 opens with a random move; firm 0 has not moved yet and its
        // slot is overwritten on the first turn.
        let mut moves = [0; 2];
        moves[1] = self.rng.random_range(0..self.model.n_strategies());

        let mut active = 0;
        for t in 0..t_max {
            let passive = (active + 1) % 2;

            moves[active] = self
                .model
                .optimal_move(moves[passive], &mut self.rng)
                .with_context(|| format!("failed to choose move of firm {active} at turn {t}"))?;

            let [move_0, move_1] = moves;
            let turn_n_consumers = self.model.consumers_for(move_0, move_1);

            positions.push(moves.map(|mv| self.model.strategy(mv).position));
            prices.push(moves.map(|mv| self.model.price(mv)));
            profits.push(self.model.profit_for(move_0, move_1, Some(turn_n_consumers)));
            n_consumers.push(turn_n_consumers);

            log::debug!("turn {t}: firm {active} played {}", moves[active]);

            active = passive;
        }

        Ok(RunRecord {
            params: self.model.params().clone(),
            positions,
            prices,
            n_consumers,
            profits,
        })
    }
}
