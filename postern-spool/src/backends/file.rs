use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use postern_common::{Mail, internal};
use postern_tracing::traced;
use tokio::fs;

use crate::{
    MailKey, MailRepository, RepositoryError, Result, SerializationError, ValidationError,
};

const SYSTEM_DIRECTORIES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// Mail repository backed by a directory.
///
/// Each mail is stored as two files named after its [`MailKey`]:
/// - `{key}.eml`: the raw message
/// - `{key}.bin`: the rest of the mail (envelope, state, attributes), bincode encoded
///
/// Both files are written under a `.tmp_` prefix and renamed into place, so a
/// crash never leaves a half-written mail visible to [`MailRepository::list`].
#[derive(Debug, Clone)]
pub struct FileMailRepository {
    path: PathBuf,
}

impl FileMailRepository {
    /// Rejects locations that traverse upwards or point into system directories.
    fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentTraversal(path.display().to_string()));
        }

        if let Some(prefix) = SYSTEM_DIRECTORIES
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Opens the repository at `path`, creating the directory if needed and
    /// removing temporary files left behind by an interrupted write.
    ///
    /// # Errors
    /// - If the path fails validation
    /// - If the directory cannot be created, or the path exists but is not a directory
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        if !fs::try_exists(&path).await? {
            internal!("{} does not exist, creating...", path.display());
            fs::create_dir_all(&path).await?;
        } else if !fs::metadata(&path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(path.display().to_string()).into());
        }

        let repository = Self { path };
        repository.remove_partial_writes().await?;

        Ok(repository)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn remove_partial_writes(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut removed = 0_usize;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            internal!(
                level = INFO,
                "Removed {removed} partially written mails from {}",
                self.path.display()
            );
        }

        Ok(())
    }

    fn paths(&self, key: &MailKey) -> (PathBuf, PathBuf) {
        (
            self.path.join(format!("{key}.bin")),
            self.path.join(format!("{key}.eml")),
        )
    }
}

#[async_trait]
impl MailRepository for FileMailRepository {
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(mail = %mail.name())), timing(precision = "ms"))]
    async fn store(&self, mail: &Mail) -> Result<MailKey> {
        let key = MailKey::generate();
        let (meta_path, data_path) = self.paths(&key);

        let mut envelope = mail.clone();
        envelope.clear_diagnostic();
        let metadata = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(SerializationError::from)?;

        let temp_meta_path = self.path.join(format!(".tmp_{key}.bin"));
        let temp_data_path = self.path.join(format!(".tmp_{key}.eml"));

        fs::write(&temp_data_path, &mail.message()[..]).await?;
        fs::write(&temp_meta_path, &metadata).await?;

        // The data file goes first: list() only looks at metadata files.
        fs::rename(&temp_data_path, &data_path).await?;
        fs::rename(&temp_meta_path, &meta_path).await?;

        internal!(
            level = DEBUG,
            "Stored mail {} as {key} in {}",
            mail.name(),
            self.path.display()
        );

        Ok(key)
    }

    async fn list(&self) -> Result<Vec<MailKey>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".bin")
                && !filename.starts_with(".tmp_")
                && let Some(key) = MailKey::from_filename(&filename)
            {
                keys.push(key);
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(key = %key)))]
    async fn retrieve(&self, key: &MailKey) -> Result<Mail> {
        let (meta_path, data_path) = self.paths(key);

        let metadata = match fs::read(&meta_path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound(*key));
            }
            Err(err) => return Err(err.into()),
        };

        let (mut mail, _): (Mail, usize) =
            bincode::serde::decode_from_slice(&metadata, bincode::config::standard())
                .map_err(SerializationError::from)?;

        let data = fs::read(&data_path).await?;
        mail.set_message(Arc::<[u8]>::from(data));

        Ok(mail)
    }

    async fn remove(&self, key: &MailKey) -> Result<()> {
        let (meta_path, data_path) = self.paths(key);

        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound(*key));
            }
            Err(err) => return Err(err.into()),
        }

        fs::remove_file(&data_path).await?;
        internal!(level = DEBUG, "Removed mail {key} from {}", self.path.display());

        Ok(())
    }
}
