//! Saving and restoring a process.
//!
//! Compiled functions are not serializable: a snapshot holds the construction
//! parameters, the observations and the hyper-parameter state, and loading
//! rebuilds and recompiles the process from them.
use crate::errors::{Result, TgpError};
use crate::hypers::Hypers;
use crate::parameters::{ProcessParams, ProcessValidParams};
use crate::process::{Description, Record, StochasticProcess};
use crate::space::{DisplayIndex, SpaceInput};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Version written in every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// Format of a saved process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    /// Human readable format
    #[default]
    Json,
    /// Binary format
    Binary,
}

/// Serializable state of a process
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Format version
    pub version: u32,
    /// Construction parameters, query domain included
    pub params: ProcessValidParams,
    /// Observations
    pub record: Option<Record>,
    /// Current hyper-parameters
    pub hypers: Option<Hypers>,
    /// Pinned hyper-parameters
    pub fixed: Hypers,
    /// Presentation labels
    pub description: Description,
}

fn space_input(values: &ndarray::Array2<f64>, index: &DisplayIndex) -> SpaceInput {
    match index {
        DisplayIndex::Labels(labels) => SpaceInput::Series {
            values: values.clone(),
            index: labels.clone(),
        },
        DisplayIndex::Values(_) => SpaceInput::Matrix(values.clone()),
    }
}

impl StochasticProcess {
    /// Snapshot of the process, `hypers` overriding the current hyper-parameters
    pub fn snapshot(&self, hypers: Option<&Hypers>) -> Result<ProcessSnapshot> {
        let mut params = self.params.clone();
        if let (Some(values), Some(index)) = (&self.space.values, &self.space.index) {
            params.space = space_input(values, index);
        }
        let hypers = match hypers {
            Some(h) => Some(self.resolve(Some(h))?),
            None => self.current.clone(),
        };
        Ok(ProcessSnapshot {
            version: SNAPSHOT_VERSION,
            params,
            record: self.record.clone(),
            hypers,
            fixed: self.fixed.clone(),
            description: self.description.clone(),
        })
    }

    /// Rebuild and compile a process from a snapshot
    pub fn from_snapshot(snapshot: ProcessSnapshot) -> Result<StochasticProcess> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(TgpError::LoadError(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        let mut process = ProcessParams::new_from_valid(&snapshot.params).build()?;
        if let Some(record) = snapshot.record {
            process.observed(
                space_input(&record.inputs, &record.index),
                record.outputs.column(0).to_owned(),
            )?;
        }
        process.fix_params(&snapshot.fixed)?;
        if let Some(hypers) = &snapshot.hypers {
            process.set_params(hypers)?;
        }
        process.description = snapshot.description;
        Ok(process)
    }

    /// Save the process in the given file.
    pub fn save<P: AsRef<Path>>(
        &self,
        path: P,
        hypers: Option<&Hypers>,
        format: FileFormat,
    ) -> Result<()> {
        let snapshot = self.snapshot(hypers)?;
        let bytes = match format {
            FileFormat::Json => serde_json::to_vec_pretty(&snapshot)?,
            FileFormat::Binary => bincode::serialize(&snapshot)?,
        };
        let mut file = fs::File::create(path.as_ref())?;
        file.write_all(&bytes)?;
        info!(
            "Process `{}` saved in {}",
            self.params.name,
            path.as_ref().display()
        );
        Ok(())
    }

    /// Load a process from the given file.
    pub fn load<P: AsRef<Path>>(path: P, format: FileFormat) -> Result<StochasticProcess> {
        let data = fs::read(path)?;
        let snapshot: ProcessSnapshot = match format {
            FileFormat::Json => serde_json::from_slice(&data)
                .map_err(|e| TgpError::LoadError(e.to_string()))?,
            FileFormat::Binary => {
                bincode::deserialize(&data).map_err(|e| TgpError::LoadError(e.to_string()))?
            }
        };
        Self::from_snapshot(snapshot)
    }
}
