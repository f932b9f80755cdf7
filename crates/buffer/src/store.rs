//! Blob storage for spilled items. A `FileStore` manages a single flat
//! directory; every blob is one regular file inside it, named by the hash of
//! the record that owns it. Names are restricted to a single path component
//! so that no operation can reach outside the managed directory, and writes
//! never overwrite an existing file.

use std::{
    env,
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use crate::errors::StoreError;

/// File storage under one managed directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store managing `parent/directory`, creating the directory if
    /// needed. `parent` defaults to the OS temp directory. Fails with a
    /// configuration error when `directory` is empty or would resolve outside
    /// its parent (an absolute path, `.`, `..`, or any name containing them).
    pub fn create(directory: &str, parent: Option<&Path>) -> Result<Self, StoreError> {
        if directory.is_empty() {
            return Err(StoreError::Configuration(String::from(
                "managed directory name must not be empty",
            )));
        }

        if Path::new(directory)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Configuration(format!(
                "managed directory '{}' must stay inside its parent",
                directory
            )));
        }

        let parent = match parent {
            Some(path) => path.to_path_buf(),
            None => env::temp_dir(),
        };

        let root = parent.join(directory);
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    /// The directory this store manages.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The fully qualified path a blob named `name` would occupy. Does not
    /// touch the filesystem.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Opens an existing blob for reading. Fails with `NotFound` when no
    /// regular file with that name exists, or the name does not pass the
    /// safety policy.
    pub fn open_read(&self, name: &str) -> Result<File, StoreError> {
        let path = self
            .guarded(name)
            .filter(|path| path.is_file())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        File::open(path).map_err(StoreError::Io)
    }

    /// Opens a new blob for writing. Overwriting is not permitted through
    /// this interface; an existing file fails with `AlreadyExists`.
    pub fn open_write(&self, name: &str) -> Result<File, StoreError> {
        let path = self
            .guarded(name)
            .ok_or_else(|| StoreError::InvalidName(name.to_string()))?;

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Removes the blob named `name`, reporting whether a file was actually
    /// deleted. Missing files, directories, and unsafe names all yield
    /// `false`.
    pub fn delete(&self, name: &str) -> bool {
        match self.guarded(name) {
            Some(path) => fs::remove_file(path).is_ok(),
            None => false,
        }
    }

    /// Resolves `name` inside the managed directory. Names that are empty,
    /// span more than one path component (anything containing a separator,
    /// `.`, or `..`), or resolve to an existing directory are rejected.
    fn guarded(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }

        let mut components = Path::new(name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return None;
        }

        let path = self.root.join(name);
        if path.is_dir() {
            return None;
        }

        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let path = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn create_makes_the_managed_directory() {
        let root = scratch("blob_store_create");
        assert!(!root.exists());

        let store = FileStore::create("blob_store_create", None).unwrap();
        assert!(root.is_dir());
        assert_eq!(root, store.root());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn create_is_idempotent() {
        let root = scratch("blob_store_reopen");
        {
            FileStore::create("blob_store_reopen", None).unwrap();
        }
        let store = FileStore::create("blob_store_reopen", None).unwrap();
        assert!(store.root().is_dir());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn create_rejects_empty_and_escaping_names() {
        assert!(matches!(
            FileStore::create("", None),
            Err(StoreError::Configuration(_))
        ));
        assert!(matches!(
            FileStore::create(".", None),
            Err(StoreError::Configuration(_))
        ));
        assert!(matches!(
            FileStore::create("..", None),
            Err(StoreError::Configuration(_))
        ));
        assert!(matches!(
            FileStore::create("up/../..", None),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn path_of_joins_without_touching_the_filesystem() {
        let root = scratch("blob_store_path_of");
        let store = FileStore::create("blob_store_path_of", None).unwrap();

        assert_eq!(root.join("file"), store.path_of("file"));
        assert!(!store.path_of("file").exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn open_read_requires_an_existing_file() {
        let root = scratch("blob_store_read_missing");
        let store = FileStore::create("blob_store_read_missing", None).unwrap();

        assert!(matches!(
            store.open_read("file"),
            Err(StoreError::NotFound(_))
        ));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn written_content_reads_back() {
        let root = scratch("blob_store_round_trip");
        let store = FileStore::create("blob_store_round_trip", None).unwrap();

        let mut file = store.open_write("file").unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let mut read = String::new();
        store
            .open_read("file")
            .unwrap()
            .read_to_string(&mut read)
            .unwrap();
        assert_eq!("hello world", read);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn open_write_refuses_to_overwrite() {
        let root = scratch("blob_store_no_overwrite");
        let store = FileStore::create("blob_store_no_overwrite", None).unwrap();

        fs::write(store.path_of("file"), b"hello world").unwrap();
        assert!(matches!(
            store.open_write("file"),
            Err(StoreError::AlreadyExists(_))
        ));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn operations_reject_traversal_names() {
        let root = scratch("blob_store_traversal");
        let store = FileStore::create("blob_store_traversal", None).unwrap();

        assert!(store.open_read("..").is_err());
        assert!(store.open_read("../file").is_err());
        assert!(store.open_write("..").is_err());
        assert!(matches!(
            store.open_write("nested/file"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(!store.delete(".."));
        assert!(!store.delete("../file"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn operations_reject_directories() {
        let root = scratch("blob_store_directories");
        let store = FileStore::create("blob_store_directories", None).unwrap();

        fs::create_dir(store.path_of("subdir")).unwrap();
        assert!(matches!(
            store.open_read("subdir"),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.open_write("subdir").is_err());
        assert!(!store.delete("subdir"));
        assert!(store.path_of("subdir").is_dir());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn delete_reports_whether_a_file_was_removed() {
        let root = scratch("blob_store_delete");
        let store = FileStore::create("blob_store_delete", None).unwrap();

        assert!(!store.delete("file"));

        fs::write(store.path_of("file"), b"hello world").unwrap();
        assert!(store.delete("file"));
        assert!(!store.path_of("file").exists());
        assert!(!store.delete("file"));

        let _ = fs::remove_dir_all(root);
    }
}
