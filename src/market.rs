/// Consumer visibility on a discrete line of market positions.
#[derive(Debug, Clone, Copy)]
pub struct Vision {
    n_positions: usize,
    radius: usize,
}

impl Vision {
    /// Create the visibility model of consumers with field of view radius `r`
    /// (as a fraction of the grid).
    pub fn new(r: f64, n_positions: usize) -> Self {
        let radius = (r * n_positions as f64).round() as usize;
        Self {
            n_positions,
            radius,
        }
    }

    /// Radius in position units.
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Inclusive bounds of the positions seen by a consumer at `position`.
    pub fn field_of_view(&self, position: usize) -> (usize, usize) {
        assert!(
            position < self.n_positions,
            "position {position} out of range 0..{}",
            self.n_positions
        );
        (
            position.saturating_sub(self.radius),
            (position + self.radius).min(self.n_positions - 1),
        )
    }

    /// Number of consumers seeing each position.
    pub fn targetable_consumers(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_positions];
        for x in 0..self.n_positions {
            let (min, max) = self.field_of_view(x);
            counts[min..=max].iter_mut().for_each(|count| *count += 1);
        }
        counts
    }
}

/// Consumers reachable by two firms standing at a given pair of positions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Consumers seeing only the firm at the first position and only the firm
    /// at the second position.
    pub captive: [usize; 2],
    /// Consumers seeing both firms.
    pub shared: usize,
}

/// Precomputed [`Allocation`] of every ordered pair of positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    n_positions: usize,
    entries: Vec<Allocation>,
}

impl AllocationTable {
    /// Build the table from the field of view of every consumer.
    ///
    /// Only pairs with `i <= j` are counted; the `(j, i)` entry is the mirror.
    pub fn build<F>(n_positions: usize, field_of_view: F) -> Self
    where
        F: Fn(usize) -> (usize, usize),
    {
        let fov_vec: Vec<_> = (0..n_positions).map(field_of_view).collect();
        let mut entries = vec![Allocation::default(); n_positions * n_positions];

        for i in 0..n_positions {
            for j in i..n_positions {
                let mut alloc = Allocation::default();
                for &(min, max) in &fov_vec {
                    let sees_i = (min..=max).contains(&i);
                    let sees_j = (min..=max).contains(&j);
                    match (sees_i, sees_j) {
                        (true, true) => alloc.shared += 1,
                        (true, false) => alloc.captive[0] += 1,
                        (false, true) => alloc.captive[1] += 1,
                        (false, false) => {}
                    }
                }

                entries[i * n_positions + j] = alloc;
                entries[j * n_positions + i] = Allocation {
                    captive: [alloc.captive[1], alloc.captive[0]],
                    shared: alloc.shared,
                };
            }
        }

        Self {
            n_positions,
            entries,
        }
    }

    /// Allocation of two firms standing at `pos_a` and `pos_b`.
    ///
    /// `captive[0]` belongs to the firm at `pos_a`.
    pub fn get(&self, pos_a: usize, pos_b: usize) -> Allocation {
        assert!(
            pos_a < self.n_positions && pos_b < self.n_positions,
            "positions ({pos_a}, {pos_b}) out of range 0..{}",
            self.n_positions
        );
        self.entries[pos_a * self.n_positions + pos_b]
    }
}
