//! YAML input of the command-line driver.

use std::path::PathBuf;

use serde::Deserialize;

use crate::dataset::Weights;
use crate::error::{OrbgenError, Result};
use crate::optimization::OptOptions;

/// One reference geometry: paired overlap and operator files.
#[derive(Clone, Debug, Deserialize)]
pub struct ConfigFiles {
    pub overlap: PathBuf,
    pub operator: PathBuf,
}

/// One optimization level: cumulative zeta targets and the band window
/// it fits against. Earlier levels are frozen while later ones optimize.
#[derive(Clone, Debug, Deserialize)]
pub struct Level {
    pub nzeta: Vec<usize>,
    pub nbands: usize,
}

#[derive(Debug, Deserialize)]
pub struct Input {
    pub element: String,
    pub ecut: f64,
    /// Single-atom reference used for the initial guess.
    pub monomer: PathBuf,
    pub configs: Vec<ConfigFiles>,
    pub levels: Vec<Level>,
    pub output: PathBuf,
    #[serde(default = "default_true")]
    pub reduced: bool,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub options: OptOptions,
    #[serde(default = "default_nthreads")]
    pub nthreads: usize,
    #[serde(default = "default_dr")]
    pub dr: f64,
}

fn default_true() -> bool {
    true
}

fn default_nthreads() -> usize {
    1
}

fn default_dr() -> f64 {
    0.01
}

impl Input {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let input: Self = serde_yaml::from_str(text)
            .map_err(|e| OrbgenError::MalformedDataset(format!("input file: {e}")))?;
        if input.configs.is_empty() {
            return Err(OrbgenError::MalformedDataset(
                "input file: no configurations given".into(),
            ));
        }
        if input.levels.is_empty() {
            return Err(OrbgenError::MalformedDataset(
                "input file: no optimization levels given".into(),
            ));
        }
        // zeta targets are cumulative across levels
        for pair in input.levels.windows(2) {
            let (a, b) = (&pair[0].nzeta, &pair[1].nzeta);
            let grows = b.len() >= a.len()
                && a.iter().zip(b.iter()).all(|(x, y)| x <= y);
            if !grows {
                return Err(OrbgenError::MalformedDataset(format!(
                    "input file: level nzeta {b:?} does not extend {a:?}"
                )));
            }
        }
        Ok(input)
    }
}
