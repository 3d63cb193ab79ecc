use crate::config::{Params, PoolParams};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Time series of a single run.
///
/// Every vector holds one entry per turn with one column per firm.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub params: Params,
    pub positions: Vec<[usize; 2]>,
    pub prices: Vec<[f64; 2]>,
    pub n_consumers: Vec<[f64; 2]>,
    pub profits: Vec<[f64; 2]>,
}

/// Runs of a batch together with the batch parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PoolRecord {
    pub params: PoolParams,
    pub runs: Vec<RunRecord>,
}

/// Record whose parameters can be summarized in a readable form.
pub trait Summary {
    fn summary(&self) -> Result<serde_json::Value>;
}

impl Summary for RunRecord {
    fn summary(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.params).context("failed to summarize run params")
    }
}

impl Summary for PoolRecord {
    fn summary(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.params).context("failed to summarize pool params")
    }
}

/// Save a record to a MessagePack data file and its parameters to a JSON file.
pub fn save<T, P, Q>(record: &T, data_file: P, summary_file: Q) -> Result<()>
where
    T: Serialize + Summary,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let data_file = data_file.as_ref();
    let summary_file = summary_file.as_ref();
    for file in [data_file, summary_file] {
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
        }
    }

    let file =
        File::create(summary_file).with_context(|| format!("failed to create {summary_file:?}"))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &record.summary()?)
        .context("failed to write summary")?;

    let file = File::create(data_file).with_context(|| format!("failed to create {data_file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, record).context("failed to serialize record")?;
    writer.flush().context("failed to flush writer stream")?;

    log::info!("saved {data_file:?}");
    Ok(())
}

/// Load a record previously written by [`save`].
pub fn load<T: DeserializeOwned, P: AsRef<Path>>(data_file: P) -> Result<T> {
    let file = data_file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize record")
}
