// ============================================================
// Layer 4: Data Pipeline
// ============================================================
// This layer takes raw tabular input all the way to host-side
// batches:
//
//   arrays / train.csv / folder
//       │
//       ▼
//   TabularSource     → reads rows, picks the label column
//       │
//       ▼
//   split_train_val   → seeded train/validation split
//       │
//       ▼
//   SampleWeights     → per-side normalised weights
//       │
//       ▼
//   TabularDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   TabularBatcher    → stacks samples into NamedArrays
//       │
//       ▼
//   DataLoader        → feeds batches to trainer and inference
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Numeric CSV reading and writing
pub mod csv;

/// Implements Burn's Dataset trait for tabular rows
pub mod dataset;

/// Implements Burn's Batcher trait to create named batches
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;

/// Sample weight resolution and normalisation
pub mod weights;

/// DataModule contract and the tabular sources
pub mod module;

pub use module::{
    ArrayData, CsvFileData, DataInfo, DataModule, FolderData, Loader, LoaderSettings, TabularModule,
};
pub use weights::SampleWeights;
