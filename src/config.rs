use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fmt::Debug,
    fs,
    ops::{Bound, RangeBounds},
    path::Path,
};

/// Upper bound (exclusive) for random seeds.
pub const SEED_LIMIT: u64 = u32::MAX as u64;

/// Parameters of a single simulation run.
///
/// Loaded from a TOML file and validated before use.
/// See [`Params::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Params {
    /// Field of view radius as a fraction of the grid.
    pub r: f64,
    /// Seed of the random number generator.
    pub seed: u64,

    /// Number of discrete market positions.
    pub n_positions: usize,
    /// Number of discrete price levels.
    pub n_prices: usize,

    /// Lowest price level.
    pub p_min: f64,
    /// Highest price level.
    pub p_max: f64,

    /// Number of simulation turns.
    pub t_max: usize,
}

impl Params {
    /// Create a new validated [`Params`].
    pub fn new(
        r: f64,
        seed: u64,
        n_positions: usize,
        n_prices: usize,
        p_min: f64,
        p_max: f64,
        t_max: usize,
    ) -> Result<Self> {
        let params = Self {
            r,
            seed,
            n_positions,
            n_prices,
            p_min,
            p_max,
            t_max,
        };
        params.validate().context("failed to validate params")?;
        Ok(params)
    }

    /// Load [`Params`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the parameter values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let params: Params = read_toml(file)?;
        params.validate().context("failed to validate params")?;
        Ok(params)
    }

    /// Write [`Params`] to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        write_toml(self, file)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.r, (Bound::Excluded(0.0), Bound::Included(1.0)))
            .context("invalid field of view radius")?;
        check_num(self.seed, 0..SEED_LIMIT).context("invalid seed")?;
        check_num(self.n_positions, 3..).context("invalid number of positions")?;
        check_num(self.n_prices, 3..).context("invalid number of prices")?;
        check_prices(self.p_min, self.p_max).context("invalid price bounds")?;
        check_num(self.t_max, 3..).context("invalid number of turns")?;
        Ok(())
    }
}

/// Parameters of a batch of independent runs.
///
/// Every index of `r` and `seed` describes one run; all other values are shared.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PoolParams {
    pub n_positions: usize,
    pub n_prices: usize,

    pub p_min: f64,
    pub p_max: f64,

    pub t_max: usize,

    /// Field of view radius of each run.
    pub r: Vec<f64>,
    /// Seed of each run.
    pub seed: Vec<u64>,
}

impl PoolParams {
    /// Load [`PoolParams`] from a TOML file.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let pool_params: PoolParams = read_toml(file)?;
        pool_params
            .validate()
            .context("failed to validate pool params")?;
        Ok(pool_params)
    }

    /// Write [`PoolParams`] to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        write_toml(self, file)
    }

    fn validate(&self) -> Result<()> {
        let n_runs = self.r.len();
        check_num(n_runs, 1..).context("invalid number of runs")?;
        if self.seed.len() != n_runs {
            bail!(
                "number of seeds must be {n_runs}, but is {}",
                self.seed.len()
            );
        }
        Ok(())
    }

    /// Expand into the validated [`Params`] of every run.
    pub fn extract(&self) -> Result<Vec<Params>> {
        self.validate().context("failed to validate pool params")?;
        self.r
            .iter()
            .zip(&self.seed)
            .enumerate()
            .map(|(i_run, (&r, &seed))| {
                Params::new(
                    r,
                    seed,
                    self.n_positions,
                    self.n_prices,
                    self.p_min,
                    self.p_max,
                    self.t_max,
                )
                .with_context(|| format!("invalid params of run {i_run}"))
            })
            .collect()
    }
}

/// Values shared by every generated run.
#[derive(Debug, Clone)]
pub struct Template {
    pub n_positions: usize,
    pub n_prices: usize,
    pub p_min: f64,
    pub p_max: f64,
    pub t_max: usize,
}

impl Template {
    /// Generate [`PoolParams`] of `n_sim` runs with random radii in (0, 1] and random seeds.
    pub fn generate_pool<R: Rng + ?Sized>(
        &self,
        n_sim: usize,
        rng: &mut R,
    ) -> Result<PoolParams> {
        let r_dist = Uniform::new(0.0, 1.0)?;
        let seed_dist = Uniform::new(0, SEED_LIMIT)?;

        let pool_params = PoolParams {
            n_positions: self.n_positions,
            n_prices: self.n_prices,
            p_min: self.p_min,
            p_max: self.p_max,
            t_max: self.t_max,
            r: (0..n_sim).map(|_| 1.0 - r_dist.sample(rng)).collect(),
            seed: (0..n_sim).map(|_| seed_dist.sample(rng)).collect(),
        };
        pool_params
            .extract()
            .context("failed to validate generated pool params")?;
        Ok(pool_params)
    }

    /// Generate [`Params`] with radius `r` and a random seed.
    pub fn generate_run<R: Rng + ?Sized>(&self, r: f64, rng: &mut R) -> Result<Params> {
        let seed_dist = Uniform::new(0, SEED_LIMIT)?;
        Params::new(
            r,
            seed_dist.sample(rng),
            self.n_positions,
            self.n_prices,
            self.p_min,
            self.p_max,
            self.t_max,
        )
    }
}

fn read_toml<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> Result<T> {
    let file = file.as_ref();
    let contents =
        fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
    toml::from_str(&contents).with_context(|| format!("failed to deserialize {file:?}"))
}

fn write_toml<T: Serialize, P: AsRef<Path>>(value: &T, file: P) -> Result<()> {
    let file = file.as_ref();
    let contents = toml::to_string(value).context("failed to serialize to TOML")?;
    fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_prices(p_min: f64, p_max: f64) -> Result<()> {
    if !p_min.is_finite() || !p_max.is_finite() {
        bail!("prices must be finite, but are {p_min} and {p_max}");
    }
    if p_min >= p_max {
        bail!("minimum price must be lower than maximum price, but {p_min} >= {p_max}");
    }
    Ok(())
}
