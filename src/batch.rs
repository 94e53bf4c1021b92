/*
MIT License

Copyright (c) 2024 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Analysis of many files in parallel.
//!
//! Each file runs the whole pipeline on one worker of a bounded thread pool.
//! The only state the workers share is the filter cache of the
//! [`OnsetAnalyzer`]. A file that fails to load or to analyze is reported in
//! its [`BatchOutcome`] and doesn't affect the other files.

use crate::audio_analysis::post_processing::OutputSeries;
use crate::pipeline::{AnalysisError, AnalysisInput, OnsetAnalyzer};
use rayon::prelude::*;
use std::error::Error as StdError;
use std::path::Path;
use thiserror::Error;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Everything the pipeline needs for one file, as produced by the decoding
/// and detection collaborators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisJob {
    /// Mono signal.
    pub signal: Vec<f32>,
    pub sample_rate: u32,
    pub onset_samples: Vec<usize>,
    pub beat_samples: Vec<usize>,
}

impl AnalysisJob {
    #[must_use]
    pub fn as_input(&self) -> AnalysisInput<'_> {
        AnalysisInput {
            signal: &self.signal,
            sample_rate: self.sample_rate,
            onset_samples: &self.onset_samples,
            beat_samples: &self.beat_samples,
        }
    }
}

/// Failure of a single batch item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("loading failed: {0}")]
    Load(#[source] Box<dyn StdError + Send + Sync>),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

/// The batch as a whole couldn't run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to create the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of one batch item.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Path of the item.
    pub name: String,
    pub result: Result<OutputSeries, ItemError>,
}

/// Number of succeeded and failed items of a batch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn of(outcomes: &[BatchOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// Analyzes all items on a pool of `workers` threads (at least one).
///
/// `load` turns an item into an [`AnalysisJob`], e.g., by decoding the file
/// and reading its detected onsets. The outcomes are in the order of
/// `items`.
pub fn run_batch<T, F, E>(
    analyzer: &OnsetAnalyzer,
    items: &[T],
    workers: usize,
    load: F,
) -> Result<Vec<BatchOutcome>, BatchError>
where
    T: AsRef<Path> + Sync,
    F: Fn(&Path) -> Result<AnalysisJob, E> + Sync,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;
    log::debug!("batch: {} items, {} workers", items.len(), workers.max(1));

    let outcomes = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                let path = item.as_ref();
                let name = path.display().to_string();
                let result = load(path)
                    .map_err(|e| ItemError::Load(e.into()))
                    .and_then(|job| {
                        analyzer
                            .analyze(&job.as_input())
                            .map_err(ItemError::from)
                    });
                match &result {
                    Ok(series) => log::debug!("{name}: {} onsets", series.len()),
                    Err(e) => log::warn!("{name}: {e}"),
                }
                BatchOutcome { name, result }
            })
            .collect::<Vec<_>>()
    });

    Ok(outcomes)
}
