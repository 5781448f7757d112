// ============================================================
// Layer 6: Checkpoint Set
// ============================================================
// Saves and restores model parameters as safetensors files and
// keeps a score index next to them.
//
// Folder layout:
//   checkpoints/
//     model_0.pt     ← most recently written snapshot
//     model_1.pt     ← the one before
//     ...
//     scores.json    ← {"model_0.pt": 0.91, "model_1.pt": 0.87, ...}
//
// scores.json is kept in *write order* (most recent first), not in
// score order. That gives two distinct selection policies:
//   - most_recent(): first entry, used to restore a pipeline
//   - best():        highest score, used to pack for production
//
// Each new snapshot becomes rank 0 and shifts older ranks up by
// one; ranks beyond `max_keep` are deleted from disk and index.
//
// Why safetensors rather than burn's recorders?
//   Parameters are exchanged as a flat StateDict so callers can
//   remap keys before loading, and f32 values are stored exactly.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde_json::{Map, Value};

use crate::constants::{checkpoint_file, checkpoint_rank, PACKED_RANK, SCORES_FILE};
use crate::domain::arrays::{ParamTensor, StateDict};
use crate::error::{Error, IoContext, Result};
use crate::infra::io::{read_json, write_json};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEntry {
    pub file:  String,
    pub score: f64,
}

/// One `checkpoints/` folder and its ordered score index.
#[derive(Debug, Clone)]
pub struct CheckpointSet {
    dir:     PathBuf,
    entries: Vec<CheckpointEntry>,
}

impl CheckpointSet {
    /// Open an existing folder; a missing index yields an empty set.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir        = dir.into();
        let index_path = dir.join(SCORES_FILE);
        let entries = if index_path.is_file() {
            let raw: Map<String, Value> = read_json(&index_path)?;
            raw.into_iter()
                .map(|(file, v)| {
                    let score = v.as_f64().ok_or_else(|| {
                        Error::config(format!("{SCORES_FILE}.{file}"), "score must be a number")
                    })?;
                    Ok(CheckpointEntry { file, score })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self { dir, entries })
    }

    /// Open, creating the folder if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).at(&dir)?;
        Self::open(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path_of(&self, entry: &CheckpointEntry) -> PathBuf {
        self.dir.join(&entry.file)
    }

    /// First entry in write order whose file is present on disk.
    pub fn most_recent(&self) -> Option<&CheckpointEntry> {
        self.entries.iter().find(|e| self.path_of(e).is_file())
    }

    /// Highest score among entries present on disk; ties go to the newer one.
    pub fn best(&self) -> Option<&CheckpointEntry> {
        self.entries
            .iter()
            .filter(|e| self.path_of(e).is_file())
            .fold(None, |best: Option<&CheckpointEntry>, e| match best {
                Some(b) if b.score >= e.score => Some(b),
                _ => Some(e),
            })
    }

    /// Entries sorted by descending score.
    pub fn ranked(&self) -> Vec<&CheckpointEntry> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
        sorted
    }

    /// Write `states` as the new rank-0 snapshot, rotating older ranks.
    pub fn push(&mut self, score: f64, states: &StateDict, max_keep: usize) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).at(&self.dir)?;
        let max_keep = max_keep.max(1);

        let mut ranked: Vec<(i64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| checkpoint_rank(&e.file).filter(|r| *r >= 0).map(|r| (r, i)))
            .collect();
        // shift from the highest rank down so renames never collide
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut dropped = Vec::new();
        for (rank, index) in ranked {
            let from = self.dir.join(checkpoint_file(rank));
            let next = rank + 1;
            if next as usize >= max_keep {
                if from.is_file() {
                    fs::remove_file(&from).at(&from)?;
                }
                dropped.push(index);
                continue;
            }
            let to = self.dir.join(checkpoint_file(next));
            if from.is_file() {
                fs::rename(&from, &to).at(&from)?;
            }
            self.entries[index].file = checkpoint_file(next);
        }
        dropped.sort_unstable_by(|a, b| b.cmp(a));
        for index in dropped {
            self.entries.remove(index);
        }

        let file = checkpoint_file(0);
        let path = self.dir.join(&file);
        write_state_dict(&path, states)?;
        self.entries.insert(0, CheckpointEntry { file, score });
        self.write_index()?;
        tracing::debug!("Saved checkpoint '{}' (score {:.6})", path.display(), score);
        Ok(path)
    }

    /// Copy the best checkpoint into `dest` as the single packed entry.
    pub fn pack_best_into(&self, dest: &Path) -> Result<CheckpointEntry> {
        let best = self
            .best()
            .ok_or_else(|| Error::missing("checkpoint", &self.dir))?
            .clone();
        fs::create_dir_all(dest).at(dest)?;
        let packed = CheckpointEntry { file: checkpoint_file(PACKED_RANK), score: best.score };
        let from   = self.path_of(&best);
        let to     = dest.join(&packed.file);
        fs::copy(&from, &to).at(&from)?;

        let single = CheckpointSet { dir: dest.to_path_buf(), entries: vec![packed.clone()] };
        single.write_index()?;
        tracing::info!("Packed '{}' (score {:.6}) as '{}'", best.file, best.score, packed.file);
        Ok(packed)
    }

    /// Read the state dict of the most recent checkpoint.
    pub fn load_most_recent(&self) -> Result<(CheckpointEntry, StateDict)> {
        let entry = self
            .most_recent()
            .ok_or_else(|| Error::missing("checkpoint", &self.dir))?
            .clone();
        let states = read_state_dict(&self.path_of(&entry))?;
        Ok((entry, states))
    }

    fn write_index(&self) -> Result<()> {
        let mut map = Map::new();
        for e in &self.entries {
            map.insert(e.file.clone(), Value::from(e.score));
        }
        write_json(&self.dir.join(SCORES_FILE), &map)
    }
}

// ─── StateDict files ──────────────────────────────────────────────────────────

pub fn write_state_dict(path: &Path, states: &StateDict) -> Result<()> {
    let views = states
        .iter()
        .map(|(name, p)| {
            let bytes: &[u8] = bytemuck::cast_slice(&p.values);
            TensorView::new(Dtype::F32, p.shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| Error::checkpoint(path, format!("tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let bytes = safetensors::serialize(views, None::<HashMap<String, String>>)
        .map_err(|e| Error::checkpoint(path, e.to_string()))?;
    fs::write(path, bytes).at(path)
}

pub fn read_state_dict(path: &Path) -> Result<StateDict> {
    let bytes   = fs::read(path).at(path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| Error::checkpoint(path, e.to_string()))?;
    let mut out = BTreeMap::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(Error::checkpoint(path, format!("tensor '{name}' is {:?}, expected F32", view.dtype())));
        }
        // byte buffer may be unaligned for f32, decode explicitly
        let values = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        out.insert(name, ParamTensor::new(view.shape().to_vec(), values)?);
    }
    Ok(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn states(value: f32) -> StateDict {
        let mut s = StateDict::new();
        s.insert("w".into(), ParamTensor::new(vec![2, 2], vec![value, 1.0, 2.0, 3.0]).unwrap());
        s.insert("b".into(), ParamTensor::new(vec![2], vec![-value, 0.5]).unwrap());
        s
    }

    #[test]
    fn test_state_dict_round_trip_is_exact() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("m.pt");
        let s    = states(0.123_456_79);
        write_state_dict(&path, &s).unwrap();
        assert_eq!(read_state_dict(&path).unwrap(), s);
    }

    #[test]
    fn test_push_rotates_and_keeps_write_order() {
        let tmp     = TempDir::new().unwrap();
        let mut set = CheckpointSet::create(tmp.path().join("checkpoints")).unwrap();
        set.push(0.5, &states(1.0), 5).unwrap();
        set.push(0.9, &states(2.0), 5).unwrap();
        set.push(0.3, &states(3.0), 5).unwrap();

        let files: Vec<_> = set.entries().iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, ["model_0.pt", "model_1.pt", "model_2.pt"]);
        assert_eq!(set.most_recent().unwrap().score, 0.3);
        assert_eq!(set.best().unwrap(), &CheckpointEntry { file: "model_1.pt".into(), score: 0.9 });

        // reopening reads the same order back
        let reopened = CheckpointSet::open(set.dir()).unwrap();
        assert_eq!(reopened.entries(), set.entries());
        let (_, loaded) = reopened.load_most_recent().unwrap();
        assert_eq!(loaded, states(3.0));
    }

    #[test]
    fn test_push_prunes_beyond_max_keep() {
        let tmp     = TempDir::new().unwrap();
        let mut set = CheckpointSet::create(tmp.path()).unwrap();
        for i in 0..4 {
            set.push(i as f64, &states(i as f32), 2).unwrap();
        }
        assert_eq!(set.entries().len(), 2);
        assert!(!tmp.path().join("model_2.pt").exists());
        assert_eq!(set.entries()[0].score, 3.0);
    }

    #[test]
    fn test_pack_best_into_single_entry() {
        let tmp     = TempDir::new().unwrap();
        let mut set = CheckpointSet::create(tmp.path().join("src")).unwrap();
        set.push(0.9, &states(9.0), 5).unwrap();
        set.push(0.3, &states(3.0), 5).unwrap();

        let dest   = tmp.path().join("dst");
        let packed = set.pack_best_into(&dest).unwrap();
        assert_eq!(packed.file, "model_-1.pt");

        let single = CheckpointSet::open(&dest).unwrap();
        assert_eq!(single.entries(), &[packed]);
        assert_eq!(read_state_dict(&dest.join("model_-1.pt")).unwrap(), states(9.0));
    }

    #[test]
    fn test_empty_set_reports_folder() {
        let tmp = TempDir::new().unwrap();
        let set = CheckpointSet::open(tmp.path()).unwrap();
        let err = set.load_most_recent().unwrap_err();
        assert!(matches!(err, Error::MissingArtifact { .. }));
    }
}
