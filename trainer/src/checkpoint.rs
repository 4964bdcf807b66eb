use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{error::Result, state::TrainState};

const LAST_CHECKPOINT: &str = "last_checkpoint";
const TMP_SUFFIX: &str = ".tmp";

/// Something whose state can be flattened into numbers and restored.
pub trait Checkpointable {
    fn state_dict(&self) -> Vec<f32>;

    /// Restores a state produced by `state_dict`.
    ///
    /// # Errors
    /// `SizeMismatch` if `state` doesn't fit this instance.
    fn load_state_dict(&mut self, state: &[f32]) -> Result<()>;
}

/// Persists the model, optimizer and resumable state under a name.
pub trait CheckpointSink<M, O> {
    fn save(&mut self, name: &str, model: &M, optimizer: &O, state: &TrainState) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    model: Vec<f32>,
    optimizer: Vec<f32>,
    state: TrainState,
}

/// Writes checkpoints as JSON files in a directory.
///
/// Every rank calls `save`, only the one built with `save_to_disk` writes.
/// The name of the latest file is kept in `last_checkpoint` for `resume`.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    dir: PathBuf,
    save_to_disk: bool,
}

impl FileCheckpointer {
    /// Creates a new `FileCheckpointer`.
    ///
    /// # Arguments
    /// * `dir` - Where checkpoints are written, created on the first save.
    /// * `save_to_disk` - Whether this rank writes anything, usually only the coordinator.
    pub fn new<P: Into<PathBuf>>(dir: P, save_to_disk: bool) -> Self {
        Self {
            dir: dir.into(),
            save_to_disk,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path of the latest checkpoint, if any was recorded.
    pub fn last_checkpoint(&self) -> Result<Option<PathBuf>> {
        match fs::read_to_string(self.dir.join(LAST_CHECKPOINT)) {
            Ok(name) => Ok(Some(self.dir.join(name.trim()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the latest checkpoint into `model` and `optimizer`.
    ///
    /// # Returns
    /// The saved state, or `None` if there is nothing to resume from.
    ///
    /// # Errors
    /// Returns `TrainErr` if the checkpoint can't be read or doesn't fit.
    pub fn resume<M, O>(&self, model: &mut M, optimizer: &mut O) -> Result<Option<TrainState>>
    where
        M: Checkpointable,
        O: Checkpointable,
    {
        let Some(path) = self.last_checkpoint()? else {
            debug!("no checkpoint found in {}", self.dir.display());
            return Ok(None);
        };

        info!("loading checkpoint from {}", path.display());
        let reader = BufReader::new(File::open(&path)?);
        let file: CheckpointFile = serde_json::from_reader(reader)?;

        model.load_state_dict(&file.model)?;
        optimizer.load_state_dict(&file.optimizer)?;
        Ok(Some(file.state))
    }
}

impl<M, O> CheckpointSink<M, O> for FileCheckpointer
where
    M: Checkpointable,
    O: Checkpointable,
{
    fn save(&mut self, name: &str, model: &M, optimizer: &O, state: &TrainState) -> Result<()> {
        if !self.save_to_disk {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;

        let file_name = format!("{name}.json");
        let path = self.dir.join(&file_name);
        info!("saving checkpoint to {}", path.display());

        let file = CheckpointFile {
            model: model.state_dict(),
            optimizer: optimizer.state_dict(),
            state: state.clone(),
        };

        replace_file(&path, |writer| {
            serde_json::to_writer(&mut *writer, &file)?;
            Ok(())
        })?;

        replace_file(&self.dir.join(LAST_CHECKPOINT), |writer| {
            writer.write_all(file_name.as_bytes())?;
            Ok(())
        })
    }
}

/// Writes a sibling temporary file and renames it over `path`, so readers
/// see either the previous contents or the new ones.
fn replace_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp, path)?;
    Ok(())
}
