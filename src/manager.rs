use crate::analysis::{analyze_a_priori, analyze_pool, analyze_run, save_report};
use crate::config::{Params, PoolParams, Template};
use crate::model::build_model;
use crate::record::{self, PoolRecord, RunRecord};
use anyhow::{Context, Result};
use glob::glob;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Radii of the individually analyzed runs.
const INDIVIDUAL_RADII: [f64; 3] = [0.25, 0.50, 0.75];

/// Grid size of the a-priori analysis.
const A_PRIORI_N_POSITIONS: usize = 100;

pub struct Manager {
    sim_dir: PathBuf,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();
        fs::create_dir_all(&sim_dir).with_context(|| format!("failed to create {sim_dir:?}"))?;
        Ok(Self { sim_dir })
    }

    /// Write new pool and individual parameter files.
    pub fn generate_params(&self, template: &Template, n_sim: usize) -> Result<()> {
        let params_dir = self.params_dir();
        fs::create_dir_all(&params_dir)
            .with_context(|| format!("failed to create {params_dir:?}"))?;
        log::info!("created {params_dir:?}");

        let mut rng = ChaCha12Rng::try_from_os_rng()?;

        let pool_params = template
            .generate_pool(n_sim, &mut rng)
            .context("failed to generate pool params")?;
        let pool_file = self.pool_params_file();
        pool_params.to_file(&pool_file)?;
        log::info!("wrote {pool_file:?}");

        for r in INDIVIDUAL_RADII {
            let params = template
                .generate_run(r, &mut rng)
                .with_context(|| format!("failed to generate params with r = {r}"))?;
            let file = params_dir.join(format!("r-{:03}.toml", (r * 100.0).round() as usize));
            params.to_file(&file)?;
            log::info!("wrote {file:?}");
        }

        Ok(())
    }

    /// Run every individual parameter file whose data is missing (or all if `force`).
    pub fn run_individual(&self, force: bool) -> Result<()> {
        let params_files = self
            .list_files(&self.params_dir(), "r-*.toml")
            .context("failed to list individual params files")?;

        for params_file in params_files {
            let name = file_stem(&params_file)?;
            let data_file = self.data_file(&name);
            if data_file.exists() && !force {
                log::info!("skipped {params_file:?} ({data_file:?} already exists)");
                continue;
            }

            let params = Params::from_file(&params_file)
                .with_context(|| format!("failed to load {params_file:?}"))?;
            log::info!("{params:#?}");

            let run = build_model(&params)
                .context("failed to build model")?
                .run()
                .context("failed to run simulation")?;

            record::save(&run, &data_file, self.summary_file(&name))
                .context("failed to save run record")?;
        }

        Ok(())
    }

    /// Run all pool runs in parallel unless the pool data already exists (or if `force`).
    pub fn run_pool(&self, force: bool) -> Result<()> {
        let data_file = self.data_file("pool");
        if data_file.exists() && !force {
            log::info!("skipped pool ({data_file:?} already exists)");
            return Ok(());
        }

        let pool_file = self.pool_params_file();
        let pool_params = PoolParams::from_file(&pool_file)
            .with_context(|| format!("failed to load {pool_file:?}"))?;
        let params_vec = pool_params.extract().context("failed to extract runs")?;

        let n_runs = params_vec.len();
        let log_every = (n_runs / 10).max(1);
        let n_done = AtomicUsize::new(0);

        let runs = params_vec
            .par_iter()
            .map(|params| -> Result<RunRecord> {
                let run = build_model(params)
                    .and_then(|model| model.run())
                    .with_context(|| format!("failed to run simulation with seed {}", params.seed))?;

                let n_done = n_done.fetch_add(1, Ordering::Relaxed) + 1;
                if n_done % log_every == 0 || n_done == n_runs {
                    let progress = 100.0 * n_done as f64 / n_runs as f64;
                    log::info!("completed {progress:06.2}%");
                }
                Ok(run)
            })
            .collect::<Result<Vec<_>>>()?;

        let pool = PoolRecord {
            params: pool_params,
            runs,
        };
        record::save(&pool, &data_file, self.summary_file("pool"))
            .context("failed to save pool record")?;

        Ok(())
    }

    /// Analyze every saved record.
    pub fn run_analysis(&self) -> Result<()> {
        let data_files = self
            .list_files(&self.data_dir(), "r-*.msgpack")
            .context("failed to list individual data files")?;
        for data_file in data_files {
            let name = file_stem(&data_file)?;
            let run: RunRecord = record::load(&data_file)
                .with_context(|| format!("failed to load {data_file:?}"))?;
            save_report(&analyze_run(&run), self.results_file(&name))
                .context("failed to save run results")?;
        }

        let pool_file = self.data_file("pool");
        if pool_file.exists() {
            let pool: PoolRecord = record::load(&pool_file)
                .with_context(|| format!("failed to load {pool_file:?}"))?;
            save_report(&analyze_pool(&pool), self.results_file("pool"))
                .context("failed to save pool results")?;
        }

        Ok(())
    }

    pub fn run_a_priori(&self) -> Result<()> {
        let reports = analyze_a_priori(&INDIVIDUAL_RADII, A_PRIORI_N_POSITIONS);
        save_report(&reports, self.results_file("a_priori"))
            .context("failed to save a-priori results")
    }

    /// Remove all data and results, keeping the parameter files.
    pub fn clean_sim(&self) -> Result<()> {
        for dir in [self.data_dir(), self.results_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {dir:?}"))?;
                log::info!("removed {dir:?}");
            }
        }
        Ok(())
    }

    fn list_files(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = dir.join(pattern);
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob files")?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    fn params_dir(&self) -> PathBuf {
        self.sim_dir.join("params")
    }

    fn data_dir(&self) -> PathBuf {
        self.sim_dir.join("data")
    }

    fn results_dir(&self) -> PathBuf {
        self.sim_dir.join("results")
    }

    fn pool_params_file(&self) -> PathBuf {
        self.params_dir().join("pool.toml")
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(format!("{name}.msgpack"))
    }

    fn summary_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(format!("{name}.json"))
    }

    fn results_file(&self, name: &str) -> PathBuf {
        self.results_dir().join(format!("{name}.json"))
    }
}

fn file_stem(file: &Path) -> Result<String> {
    let stem = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("invalid file name {file:?}"))?;
    Ok(stem.to_string())
}
