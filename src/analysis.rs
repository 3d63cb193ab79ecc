use crate::market::{AllocationTable, Vision};
use crate::record::{PoolRecord, RunRecord};
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
};

/// Fraction of the final turns of a run included in the analysis.
const SPAN_RATIO: f64 = 0.33;

/// Number of equal bins over the field of view radius.
const N_BINS: usize = 50;

pub trait Obs {
    fn update(&mut self, run: &RunRecord);
    fn report(&self) -> serde_json::Value;
}

/// How the analyzed values of a run enter an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Every analyzed value is added.
    Turns,
    /// Each run is reduced to the mean of its analyzed values first.
    RunMeans,
}

impl Pooling {
    fn add_run<I: Iterator<Item = f64>>(self, acc: &mut Accumulator, vals: I) {
        match self {
            Pooling::Turns => vals.for_each(|val| acc.add(val)),
            Pooling::RunMeans => {
                let mut run_acc = Accumulator::new();
                vals.for_each(|val| run_acc.add(val));
                acc.add(run_acc.report().mean);
            }
        }
    }
}

/// Turns of `run` included in the analysis.
///
/// Runs too short for a single turn of span are analyzed as a whole.
fn analyzed_turns(run: &RunRecord) -> std::ops::Range<usize> {
    let t_max = run.params.t_max;
    let span = (SPAN_RATIO * t_max as f64) as usize;
    if span == 0 { 0..t_max } else { t_max - span..t_max }
}

/// Distance between the firms as a fraction of the grid.
pub struct Distance {
    pooling: Pooling,
    acc: Accumulator,
}

impl Distance {
    pub fn new(pooling: Pooling) -> Self {
        Self {
            pooling,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Distance {
    fn update(&mut self, run: &RunRecord) {
        let n_positions = run.params.n_positions as f64;
        let vals = run.positions[analyzed_turns(run)]
            .iter()
            .map(|[pos_0, pos_1]| pos_0.abs_diff(*pos_1) as f64 / n_positions);
        self.pooling.add_run(&mut self.acc, vals);
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "distance": self.acc.report() })
    }
}

/// Per-firm quantity of a run pooled over both firms.
pub struct FirmSeries {
    name: &'static str,
    select: fn(&RunRecord) -> &[[f64; 2]],
    pooling: Pooling,
    acc: Accumulator,
}

impl FirmSeries {
    pub fn new(
        name: &'static str,
        select: fn(&RunRecord) -> &[[f64; 2]],
        pooling: Pooling,
    ) -> Self {
        Self {
            name,
            select,
            pooling,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for FirmSeries {
    fn update(&mut self, run: &RunRecord) {
        let vals = (self.select)(run)[analyzed_turns(run)].iter().flatten().copied();
        self.pooling.add_run(&mut self.acc, vals);
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ self.name: self.acc.report() })
    }
}

pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(pooling: Pooling) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Distance::new(pooling)),
            Box::new(FirmSeries::new("price", |run| run.prices.as_slice(), pooling)),
            Box::new(FirmSeries::new("profit", |run| run.profits.as_slice(), pooling)),
            Box::new(FirmSeries::new(
                "n_consumers",
                |run| run.n_consumers.as_slice(),
                pooling,
            )),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_run(&mut self, run: &RunRecord) {
        self.n_runs += 1;
        for obs in &mut self.obs_ptr_vec {
            obs.update(run);
        }
    }

    pub fn report(&self) -> serde_json::Value {
        let mut report = serde_json::Map::new();
        report.insert("n_runs".to_string(), self.n_runs.into());
        for obs in &self.obs_ptr_vec {
            if let serde_json::Value::Object(map) = obs.report() {
                report.extend(map);
            }
        }
        serde_json::Value::Object(report)
    }
}

/// Analyze a single run.
pub fn analyze_run(run: &RunRecord) -> serde_json::Value {
    let mut analyzer = Analyzer::new(Pooling::Turns);
    analyzer.add_run(run);
    serde_json::json!({
        "r": run.params.r,
        "seed": run.params.seed,
        "results": analyzer.report(),
    })
}

/// Analyze every run of a pool, individually and binned over the radius.
///
/// Bin statistics are taken over the per-run means of the runs in the bin.
pub fn analyze_pool(pool: &PoolRecord) -> serde_json::Value {
    let runs: Vec<_> = pool.runs.iter().map(analyze_run).collect();

    let mut bin_analyzers: Vec<_> = (0..N_BINS)
        .map(|_| Analyzer::new(Pooling::RunMeans))
        .collect();
    for run in &pool.runs {
        bin_analyzers[radius_bin(run.params.r)].add_run(run);
    }

    let bins: Vec<_> = bin_analyzers
        .iter()
        .enumerate()
        .map(|(i_bin, analyzer)| {
            serde_json::json!({
                "r_min": i_bin as f64 / N_BINS as f64,
                "r_max": (i_bin + 1) as f64 / N_BINS as f64,
                "results": analyzer.report(),
            })
        })
        .collect();

    serde_json::json!({ "runs": runs, "bins": bins })
}

/// First bin whose upper bound is not below `r`.
fn radius_bin(r: f64) -> usize {
    (1..=N_BINS)
        .position(|i_bound| r <= i_bound as f64 / N_BINS as f64)
        .unwrap_or(N_BINS - 1)
}

#[derive(Debug, Serialize)]
pub struct APrioriReport {
    pub r: f64,
    pub radius: usize,
    /// Number of consumers seeing each position.
    pub targetable: Vec<usize>,
    /// Captive consumers of the firm at the row position against the column position.
    pub captive: Vec<Vec<usize>>,
}

/// Consumer reach of each position, independent of any firm behavior.
pub fn analyze_a_priori(radii: &[f64], n_positions: usize) -> Vec<APrioriReport> {
    radii
        .iter()
        .map(|&r| {
            let vision = Vision::new(r, n_positions);
            let table = AllocationTable::build(n_positions, |x| vision.field_of_view(x));
            let captive = (0..n_positions)
                .map(|i| (0..n_positions).map(|j| table.get(i, j).captive[0]).collect())
                .collect();
            APrioriReport {
                r,
                radius: vision.radius(),
                targetable: vision.targetable_consumers(),
                captive,
            }
        })
        .collect()
}

pub fn save_report<T: Serialize, P: AsRef<Path>>(report: &T, file: P) -> Result<()> {
    let file = file.as_ref();
    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
    }
    let writer =
        BufWriter::new(File::create(file).with_context(|| format!("failed to create {file:?}"))?);
    serde_json::to_writer_pretty(writer, report).context("failed to write report")?;
    log::info!("saved {file:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;

    fn run_record() -> RunRecord {
        let params = Params::new(0.5, 1, 10, 3, 1.0, 3.0, 10).expect("invalid params");
        // Only the last three turns are analyzed.
        let series = |head: [f64; 2], tail: [[f64; 2]; 3]| -> Vec<[f64; 2]> {
            vec![head; 7].into_iter().chain(tail).collect()
        };
        RunRecord {
            params,
            positions: vec![[0, 0]; 7]
                .into_iter()
                .chain([[2, 6], [1, 9], [5, 5]])
                .collect(),
            prices: series([3.0, 3.0], [[1.0, 2.0], [2.0, 3.0], [2.0, 2.0]]),
            n_consumers: series([5.0, 5.0], [[5.0, 5.0]; 3]),
            profits: series([0.0, 0.0], [[4.0, 8.0], [6.0, 6.0], [3.0, 3.0]]),
        }
    }

    fn mean(report: &serde_json::Value) -> f64 {
        report["mean"].as_f64().expect("mean is not a number")
    }

    #[test]
    fn analyzes_final_third_of_run() {
        let report = analyze_run(&run_record());
        let results = &report["results"];
        assert_eq!(results["n_runs"], 1);
        assert_eq!(results["distance"]["n_vals"], 3);
        assert!((mean(&results["distance"]) - 0.4).abs() < 1e-12);
        assert_eq!(results["price"]["n_vals"], 6);
        assert!((mean(&results["price"]) - 2.0).abs() < 1e-12);
        assert!((mean(&results["profit"]) - 5.0).abs() < 1e-12);
        assert!((mean(&results["n_consumers"]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn bins_runs_by_radius() {
        assert_eq!(radius_bin(0.001), 0);
        assert_eq!(radius_bin(0.02), 0);
        assert_eq!(radius_bin(0.021), 1);
        assert_eq!(radius_bin(0.5), 24);
        assert_eq!(radius_bin(1.0), 49);
    }

    #[test]
    fn pool_report_covers_every_run_and_bin() {
        let run = run_record();
        let pool = PoolRecord {
            params: crate::config::PoolParams {
                n_positions: 10,
                n_prices: 3,
                p_min: 1.0,
                p_max: 3.0,
                t_max: 10,
                r: vec![0.5, 0.5],
                seed: vec![1, 1],
            },
            runs: vec![run.clone(), run],
        };
        let report = analyze_pool(&pool);
        assert_eq!(report["runs"].as_array().map(Vec::len), Some(2));
        assert_eq!(report["bins"].as_array().map(Vec::len), Some(N_BINS));
        assert_eq!(report["bins"][24]["results"]["n_runs"], 2);
        assert_eq!(report["bins"][24]["results"]["distance"]["n_vals"], 2);
        assert_eq!(report["bins"][24]["results"]["distance"]["std_dev"], 0.0);
        assert_eq!(report["bins"][0]["results"]["n_runs"], 0);
    }

    #[test]
    fn bins_spread_runs_by_their_means() {
        let constant_price = |seed: u64, price: f64| RunRecord {
            params: Params::new(0.5, seed, 10, 3, 1.0, 3.0, 10).expect("invalid params"),
            positions: vec![[2, 7]; 10],
            prices: vec![[price, price]; 10],
            n_consumers: vec![[5.0, 5.0]; 10],
            profits: vec![[5.0 * price, 5.0 * price]; 10],
        };
        let runs = vec![constant_price(1, 1.0), constant_price(2, 3.0)];
        let pool = PoolRecord {
            params: crate::config::PoolParams {
                n_positions: 10,
                n_prices: 3,
                p_min: 1.0,
                p_max: 3.0,
                t_max: 10,
                r: vec![0.5, 0.5],
                seed: vec![1, 2],
            },
            runs,
        };

        let report = analyze_pool(&pool);
        let price = &report["bins"][24]["results"]["price"];
        assert_eq!(price["n_vals"], 2);
        assert!((mean(price) - 2.0).abs() < 1e-12);
        let std_dev = price["std_dev"].as_f64().expect("std_dev is not a number");
        assert!((std_dev - 1.0).abs() < 1e-12);

        let run_price = &report["runs"][0]["results"]["price"];
        assert_eq!(run_price["n_vals"], 6);
        assert_eq!(run_price["std_dev"], 0.0);
    }

    #[test]
    fn short_runs_are_analyzed_whole() {
        let run = RunRecord {
            params: Params::new(0.5, 1, 10, 3, 1.0, 3.0, 3).expect("invalid params"),
            positions: vec![[0, 1], [0, 3], [0, 5]],
            prices: vec![[1.0, 1.0]; 3],
            n_consumers: vec![[5.0, 5.0]; 3],
            profits: vec![[5.0, 5.0]; 3],
        };
        assert_eq!(analyzed_turns(&run), 0..3);

        let results = &analyze_run(&run)["results"];
        assert_eq!(results["distance"]["n_vals"], 3);
        assert!((mean(&results["distance"]) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn a_priori_reach() {
        let reports = analyze_a_priori(&[0.25, 1.0], 8);
        assert_eq!(reports[0].radius, 2);
        assert_eq!(reports[0].targetable, vec![3, 4, 5, 5, 5, 5, 4, 3]);
        assert_eq!(reports[0].captive[0][7], 3);
        assert_eq!(reports[1].targetable, vec![8; 8]);
        assert!(reports[1].captive.iter().flatten().all(|&n| n == 0));
    }
}
