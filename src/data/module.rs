// ============================================================
// Layer 4: Data Modules
// ============================================================
// A data module turns whatever the caller handed to `fit`
// (in-memory arrays, one CSV file, a folder of CSV files) into a
// training loader and an optional validation loader:
//
//   let mut module = TabularModule::new(source, settings);
//   module.prepare(sample_weights)?;          // read, split, weight
//   let (train, valid) = module.initialize()?;
//
// Sources only know how to produce rows; splitting, weighting,
// loader construction and persistence are shared by all of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::constants::{DATA_FOLDER, DATA_INFO_FILE, MAX_INDEXED_ROWS};
use crate::data::batcher::TabularBatcher;
use crate::data::csv::{read_table, write_table};
use crate::data::dataset::{TabularDataset, TabularSample};
use crate::data::splitter::split_train_val;
use crate::data::weights::{normalize, SampleWeights};
use crate::domain::arrays::NamedArrays;
use crate::error::{Error, Result};
use crate::infra::io::write_json;

/// Host-side batches of one split.
pub type Loader = Arc<dyn DataLoader<NamedArrays>>;

// ─── DataModule ───────────────────────────────────────────────────────────────
pub trait DataModule: Send {
    fn kind(&self) -> &'static str;

    /// Read the source, split it and attach normalised sample weights.
    fn prepare(&mut self, sample_weights: SampleWeights) -> Result<()>;

    /// Build (train, valid) loaders from the prepared rows.
    fn initialize(&self) -> Result<(Loader, Option<Loader>)>;

    fn info(&self) -> Result<&DataInfo>;

    /// Persist the prepared rows and the data summary under `folder/data`.
    fn retain(&self, folder: &Path) -> Result<()>;
}

/// Summary written to `__data__.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInfo {
    pub input_dim:     usize,
    pub label_dim:     Option<usize>,
    pub num_train:     usize,
    pub num_valid:     usize,
    pub feature_names: Vec<String>,
    pub label_name:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub batch_size:       usize,
    pub valid_batch_size: usize,
    pub shuffle_train:    bool,
    pub seed:             u64,
    pub num_workers:      usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self { batch_size: 128, valid_batch_size: 512, shuffle_train: true, seed: 142857, num_workers: 0 }
    }
}

pub fn build_loader(samples: Vec<TabularSample>, batch_size: usize, shuffle_seed: Option<u64>, num_workers: usize) -> Loader {
    let mut builder = DataLoaderBuilder::new(TabularBatcher::new()).batch_size(batch_size.max(1));
    if let Some(seed) = shuffle_seed {
        builder = builder.shuffle(seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }
    builder.build(TabularDataset::new(samples))
}

/// Rows from arrays; `y` rows line up with `x` rows.
pub fn samples_from_arrays(x: &Array2<f32>, y: Option<&Array2<f32>>) -> Result<Vec<TabularSample>> {
    if x.nrows() > MAX_INDEXED_ROWS {
        return Err(Error::config(
            "x",
            format!("{} rows exceed the {MAX_INDEXED_ROWS} rows a batch can index exactly", x.nrows()),
        ));
    }
    if let Some(y) = y {
        if y.nrows() != x.nrows() {
            return Err(Error::config("y", format!("{} label rows for {} input rows", y.nrows(), x.nrows())));
        }
    }
    Ok(x.rows()
        .into_iter()
        .enumerate()
        .map(|(index, row)| TabularSample {
            index,
            x: row.to_vec(),
            y: y.map(|y| y.row(index).to_vec()),
            weight: None,
        })
        .collect())
}

/// Unshuffled loader used by `predict`.
pub fn inference_loader(x: &Array2<f32>, y: Option<&Array2<f32>>, batch_size: usize) -> Result<Loader> {
    Ok(build_loader(samples_from_arrays(x, y)?, batch_size, None, 0))
}

// ─── Sources ──────────────────────────────────────────────────────────────────

/// What a source hands back before weighting.
#[derive(Debug, Clone)]
pub struct RawSplit {
    pub feature_names: Vec<String>,
    pub label_name:    Option<String>,
    pub train:         Vec<TabularSample>,
    pub valid:         Vec<TabularSample>,
    /// `SampleWeights::All` is indexed by original row rather than by position.
    pub weights_by_row: bool,
}

pub trait TabularSource: Send {
    const KIND: &'static str;

    fn load(&self) -> Result<RawSplit>;
}

fn default_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// In-memory arrays, with either an explicit validation pair or a split fraction.
#[derive(Debug, Clone)]
pub struct ArrayData {
    pub x:           Array2<f32>,
    pub y:           Option<Array2<f32>>,
    pub valid:       Option<(Array2<f32>, Option<Array2<f32>>)>,
    pub valid_split: f64,
    pub split_seed:  u64,
}

impl ArrayData {
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> Self {
        Self { x, y: Some(y), valid: None, valid_split: 0.0, split_seed: 0 }
    }

    pub fn with_valid(mut self, x: Array2<f32>, y: Array2<f32>) -> Self {
        self.valid = Some((x, Some(y)));
        self
    }

    pub fn with_valid_split(mut self, fraction: f64, seed: u64) -> Self {
        self.valid_split = fraction;
        self.split_seed  = seed;
        self
    }
}

impl TabularSource for ArrayData {
    const KIND: &'static str = "arrays";

    fn load(&self) -> Result<RawSplit> {
        let samples = samples_from_arrays(&self.x, self.y.as_ref())?;
        let (train, valid, by_row) = match &self.valid {
            Some((vx, vy)) => (samples, samples_from_arrays(vx, vy.as_ref())?, false),
            None if self.valid_split > 0.0 => {
                let (t, v) = split_train_val(samples, 1.0 - self.valid_split, self.split_seed);
                (t, v, true)
            }
            None => (samples, Vec::new(), false),
        };
        Ok(RawSplit {
            feature_names: default_names("x", self.x.ncols()),
            label_name:    None,
            train,
            valid,
            weights_by_row: by_row,
        })
    }
}

/// One CSV file, split by fraction.
#[derive(Debug, Clone)]
pub struct CsvFileData {
    pub path:        PathBuf,
    pub label_name:  Option<String>,
    pub valid_split: f64,
    pub split_seed:  u64,
}

impl TabularSource for CsvFileData {
    const KIND: &'static str = "csv";

    fn load(&self) -> Result<RawSplit> {
        let table = read_table(&self.path)?;
        let (names, x, label, y) = table.split_label(self.label_name.as_deref())?;
        let samples = samples_from_arrays(&x, Some(&y))?;
        let (train, valid) = if self.valid_split > 0.0 {
            split_train_val(samples, 1.0 - self.valid_split, self.split_seed)
        } else {
            (samples, Vec::new())
        };
        Ok(RawSplit { feature_names: names, label_name: Some(label), train, valid, weights_by_row: true })
    }
}

/// A folder with `train.csv` and an optional `valid.csv`.
#[derive(Debug, Clone)]
pub struct FolderData {
    pub path:       PathBuf,
    pub label_name: Option<String>,
}

pub const TRAIN_FILE: &str = "train.csv";
pub const VALID_FILE: &str = "valid.csv";

impl TabularSource for FolderData {
    const KIND: &'static str = "folder";

    fn load(&self) -> Result<RawSplit> {
        let train_path = self.path.join(TRAIN_FILE);
        if !train_path.is_file() {
            return Err(Error::missing(TRAIN_FILE, &self.path));
        }
        let table = read_table(&train_path)?;
        let (names, x, label, y) = table.split_label(self.label_name.as_deref())?;
        let train = samples_from_arrays(&x, Some(&y))?;

        let valid_path = self.path.join(VALID_FILE);
        let valid = if valid_path.is_file() {
            let table = read_table(&valid_path)?;
            let (vnames, vx, _, vy) = table.split_label(Some(&label))?;
            if vnames != names {
                return Err(Error::config(
                    valid_path.display().to_string(),
                    format!("columns {vnames:?} differ from train columns {names:?}"),
                ));
            }
            samples_from_arrays(&vx, Some(&vy))?
        } else {
            Vec::new()
        };
        Ok(RawSplit { feature_names: names, label_name: Some(label), train, valid, weights_by_row: false })
    }
}

// ─── TabularModule ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Prepared {
    train: Vec<TabularSample>,
    valid: Vec<TabularSample>,
    info:  DataInfo,
}

pub struct TabularModule<S: TabularSource> {
    source:   S,
    settings: LoaderSettings,
    prepared: Option<Prepared>,
}

pub type ArrayModule  = TabularModule<ArrayData>;
pub type CsvModule    = TabularModule<CsvFileData>;
pub type FolderModule = TabularModule<FolderData>;

impl<S: TabularSource> TabularModule<S> {
    pub fn new(source: S, settings: LoaderSettings) -> Self {
        Self { source, settings, prepared: None }
    }

    fn prepared(&self) -> Result<&Prepared> {
        self.prepared
            .as_ref()
            .ok_or_else(|| Error::config(S::KIND, "data module used before prepare()"))
    }
}

fn apply_weights(side: &str, samples: &mut [TabularSample], weights: Option<Vec<f32>>) -> Result<()> {
    if let Some(raw) = weights {
        for (sample, w) in samples.iter_mut().zip(normalize(side, &raw)?) {
            sample.weight = Some(w);
        }
    }
    Ok(())
}

impl<S: TabularSource> DataModule for TabularModule<S> {
    fn kind(&self) -> &'static str {
        S::KIND
    }

    fn prepare(&mut self, sample_weights: SampleWeights) -> Result<()> {
        let RawSplit { feature_names, label_name, mut train, mut valid, weights_by_row } = self.source.load()?;
        if train.is_empty() {
            return Err(Error::config(S::KIND, "no training rows"));
        }
        if train.iter().any(|s| s.y.is_none()) {
            return Err(Error::config("y", "training rows need labels"));
        }

        // row-indexed weights are reordered to match the split
        let sample_weights = match sample_weights {
            SampleWeights::All(w) if weights_by_row => {
                let total = train.len() + valid.len();
                if w.len() != total {
                    return Err(Error::config("sample_weights.all", format!("expected {total} weights, got {}", w.len())));
                }
                SampleWeights::All(train.iter().chain(valid.iter()).map(|s| w[s.index]).collect())
            }
            other => other,
        };
        let (train_w, valid_w) = sample_weights.split(train.len(), valid.len())?;
        apply_weights("train", &mut train, train_w)?;
        apply_weights("valid", &mut valid, valid_w)?;

        let info = DataInfo {
            input_dim:     train[0].input_dim(),
            label_dim:     train[0].y.as_ref().map(Vec::len),
            num_train:     train.len(),
            num_valid:     valid.len(),
            feature_names,
            label_name,
        };
        tracing::info!(
            "Prepared {} data: {} train / {} valid rows, input_dim={}",
            S::KIND, info.num_train, info.num_valid, info.input_dim
        );
        self.prepared = Some(Prepared { train, valid, info });
        Ok(())
    }

    fn initialize(&self) -> Result<(Loader, Option<Loader>)> {
        let p = self.prepared()?;
        let s = &self.settings;
        let shuffle = s.shuffle_train.then_some(s.seed);
        let train   = build_loader(p.train.clone(), s.batch_size, shuffle, s.num_workers);
        let valid   = (!p.valid.is_empty())
            .then(|| build_loader(p.valid.clone(), s.valid_batch_size, None, s.num_workers));
        Ok((train, valid))
    }

    fn info(&self) -> Result<&DataInfo> {
        Ok(&self.prepared()?.info)
    }

    fn retain(&self, folder: &Path) -> Result<()> {
        let p   = self.prepared()?;
        let dir = folder.join(DATA_FOLDER);
        let mut columns = p.info.feature_names.clone();
        let label_dim   = p.info.label_dim.unwrap_or(0);
        match (&p.info.label_name, label_dim) {
            (Some(name), 1) => columns.push(name.clone()),
            _ => columns.extend(default_names("y", label_dim)),
        }
        for (file, rows) in [(TRAIN_FILE, &p.train), (VALID_FILE, &p.valid)] {
            if rows.is_empty() {
                continue;
            }
            let flat: Vec<f32> = rows
                .iter()
                .flat_map(|s| s.x.iter().chain(s.y.iter().flatten()).copied())
                .collect();
            let table = Array2::from_shape_vec((rows.len(), columns.len()), flat)
                .map_err(|e| Error::Tensor(e.to_string()))?;
            write_table(&dir.join(file), &columns, table.view())?;
        }
        write_json(&dir.join(DATA_INFO_FILE), &p.info)
    }
}
