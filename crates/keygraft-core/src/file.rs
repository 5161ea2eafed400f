//! Reading and writing safetensors checkpoint files.
//!
//! Files are memory-mapped only for as long as it takes to copy tensors out;
//! no map or handle outlives the call that opened it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::Mmap;
use safetensors::{SafeTensorError, SafeTensors};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, CheckpointResult};
use crate::tensor::Tensor;

fn map_file(path: &Path) -> CheckpointResult<Mmap> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    // SAFETY: the map is read-only and private to this module. Callers copy
    // what they need and drop it before returning.
    unsafe { Mmap::map(&file) }.map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn format_error(path: &Path, source: SafeTensorError) -> CheckpointError {
    CheckpointError::Format {
        path: path.to_path_buf(),
        source,
    }
}

/// Load every tensor of a checkpoint into memory.
///
/// Keys are inserted in lexical order. Header `__metadata__` is kept.
pub fn load(path: &Path) -> CheckpointResult<Checkpoint> {
    let mmap = map_file(path)?;
    let (_, header) = SafeTensors::read_metadata(&mmap).map_err(|e| format_error(path, e))?;
    let tensors = SafeTensors::deserialize(&mmap).map_err(|e| format_error(path, e))?;

    let mut names = tensors.names();
    names.sort();
    let mut checkpoint = Checkpoint::new();
    for name in names {
        let view = tensors.tensor(name).map_err(|e| format_error(path, e))?;
        checkpoint.insert(name.as_str(), Tensor::from_view(&view));
    }
    checkpoint.set_metadata(header.metadata().clone());

    debug!(
        path = %path.display(),
        tensors = checkpoint.len(),
        bytes = checkpoint.total_bytes(),
        "checkpoint loaded"
    );
    Ok(checkpoint)
}

/// Copy a single tensor out of a checkpoint file.
///
/// Returns `Ok(None)` if the file is valid but has no tensor named `key`.
pub fn read_tensor(path: &Path, key: &str) -> CheckpointResult<Option<Tensor>> {
    let mmap = map_file(path)?;
    let tensors = SafeTensors::deserialize(&mmap).map_err(|e| format_error(path, e))?;
    match tensors.tensor(key) {
        Ok(view) => Ok(Some(Tensor::from_view(&view))),
        Err(SafeTensorError::TensorNotFound(_)) => {
            debug!(path = %path.display(), key, "key not present");
            Ok(None)
        }
        Err(e) => Err(format_error(path, e)),
    }
}

/// Serialize a checkpoint to `path`.
///
/// Data is written to a temporary file next to the destination and renamed
/// into place, so a failed save never leaves a truncated output behind. An
/// existing destination keeps its permissions, and a symlinked destination
/// is written through to its target.
pub fn save(checkpoint: &Checkpoint, path: &Path) -> CheckpointResult<()> {
    let target = if path.exists() {
        fs::canonicalize(path).map_err(|source| io_error(path, source))?
    } else {
        path.to_path_buf()
    };

    // A fresh destination is created empty first so it gets the mode the
    // process umask would give any new file; the staged data inherits it.
    let (permissions, created) = match fs::metadata(&target) {
        Ok(meta) => (meta.permissions(), false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let placeholder = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map_err(|source| io_error(path, source))?;
            let meta = placeholder.metadata().map_err(|source| io_error(path, source))?;
            (meta.permissions(), true)
        }
        Err(source) => return Err(io_error(path, source)),
    };

    let result = write_staged(checkpoint, path, &target, permissions);
    if result.is_err() && created {
        let _ = fs::remove_file(&target);
    }
    result?;

    debug!(
        path = %path.display(),
        tensors = checkpoint.len(),
        "checkpoint saved"
    );
    Ok(())
}

fn write_staged(
    checkpoint: &Checkpoint,
    path: &Path,
    target: &Path,
    permissions: fs::Permissions,
) -> CheckpointResult<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = NamedTempFile::new_in(dir).map_err(|source| io_error(path, source))?;

    safetensors::serialize_to_file(checkpoint.iter(), checkpoint.metadata(), staging.path())
        .map_err(|e| format_error(path, e))?;
    fs::set_permissions(staging.path(), permissions).map_err(|source| io_error(path, source))?;
    staging
        .persist(target)
        .map_err(|e| io_error(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::HeaderMetadata;
    use safetensors::Dtype;

    fn f32_tensor(values: &[f32]) -> Tensor {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor::new(Dtype::F32, vec![values.len()], data)
    }

    fn sample() -> Checkpoint {
        let mut ckpt = Checkpoint::new();
        ckpt.insert("unet.weight", f32_tensor(&[1.0, 2.0, 3.0, 4.0]));
        ckpt.insert("unet.bias", f32_tensor(&[0.5]));
        ckpt.insert(
            "text.ids",
            Tensor::new(Dtype::I64, vec![2, 1], [7i64, 9].iter().flat_map(|v| v.to_le_bytes()).collect()),
        );
        ckpt
    }

    fn sorted_keys(ckpt: &Checkpoint) -> Vec<String> {
        let mut keys: Vec<String> = ckpt.keys().map(String::from).collect();
        keys.sort();
        keys
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let original = sample();

        save(&original, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(sorted_keys(&loaded), sorted_keys(&original));
        for (key, tensor) in original.iter() {
            assert_eq!(loaded.get(key), Some(tensor), "tensor {key} differs");
        }
    }

    #[test]
    fn load_then_save_reproduces_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.safetensors");
        let second = dir.path().join("b.safetensors");

        save(&sample(), &first).unwrap();
        save(&load(&first).unwrap(), &second).unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn metadata_survives_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.safetensors");
        let mut ckpt = sample();
        let mut meta = HeaderMetadata::new();
        meta.insert("modelspec.architecture".into(), "stable-diffusion-xl-v1-base".into());
        ckpt.set_metadata(Some(meta.clone()));

        save(&ckpt, &path).unwrap();
        assert_eq!(load(&path).unwrap().metadata(), &Some(meta));
    }

    #[test]
    fn empty_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.safetensors");
        save(&Checkpoint::new(), &path).unwrap();
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.safetensors");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn load_garbage_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.safetensors");
        std::fs::write(&path, b"definitely not a tensor container").unwrap();
        assert!(matches!(load(&path).unwrap_err(), CheckpointError::Format { .. }));
    }

    #[test]
    fn load_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.safetensors");
        std::fs::write(&path, b"").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_lists_keys_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.safetensors");
        let mut ckpt = Checkpoint::new();
        ckpt.insert("zeta", f32_tensor(&[1.0]));
        ckpt.insert("alpha", Tensor::new(Dtype::U8, vec![1], vec![2]));
        ckpt.insert("mid.weight", f32_tensor(&[3.0, 4.0]));
        ckpt.insert("beta", Tensor::new(Dtype::I64, vec![1], 5i64.to_le_bytes().to_vec()));
        save(&ckpt, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(
            loaded.keys().collect::<Vec<_>>(),
            vec!["alpha", "beta", "mid.weight", "zeta"]
        );
    }

    #[test]
    fn read_tensor_present_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        save(&sample(), &path).unwrap();

        let bias = read_tensor(&path, "unet.bias").unwrap();
        assert_eq!(bias, Some(f32_tensor(&[0.5])));
        assert_eq!(read_tensor(&path, "v_pred").unwrap(), None);
    }

    #[test]
    fn read_tensor_from_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.safetensors");
        std::fs::write(&path, [0xffu8; 64]).unwrap();
        assert!(matches!(
            read_tensor(&path, "v_pred").unwrap_err(),
            CheckpointError::Format { .. }
        ));
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out.safetensors");
        let err = save(&sample(), &path).unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn save_overwrites_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.safetensors");
        std::fs::write(&path, b"stale").unwrap();

        save(&sample(), &path).unwrap();
        assert_eq!(load(&path).unwrap().len(), 3);
        // Only the output itself remains; the staging file was renamed.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::{symlink, PermissionsExt};

        fn mode(path: &Path) -> u32 {
            fs::metadata(path).unwrap().permissions().mode() & 0o777
        }

        #[test]
        fn save_keeps_existing_mode() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.safetensors");
            fs::write(&path, b"stale").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

            save(&sample(), &path).unwrap();
            assert_eq!(mode(&path), 0o644);

            fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
            save(&sample(), &path).unwrap();
            assert_eq!(mode(&path), 0o640);
        }

        #[test]
        fn fresh_output_gets_default_file_mode() {
            let dir = tempfile::tempdir().unwrap();
            let reference = dir.path().join("reference");
            fs::write(&reference, b"").unwrap();
            let path = dir.path().join("fresh.safetensors");

            save(&sample(), &path).unwrap();
            assert_eq!(mode(&path), mode(&reference));
            assert_eq!(load(&path).unwrap().len(), 3);
        }

        #[test]
        fn save_writes_through_symlink() {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("real.safetensors");
            fs::write(&target, b"stale").unwrap();
            let link = dir.path().join("link.safetensors");
            symlink(&target, &link).unwrap();

            save(&sample(), &link).unwrap();
            assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
            assert_eq!(load(&target).unwrap().len(), 3);
        }
    }
}
