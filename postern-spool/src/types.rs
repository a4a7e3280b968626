/// Key of a mail stored in a repository.
///
/// A ULID, so keys sort by the time the mail was stored. File repositories use
/// it as the file stem, which is why parsing from a filename is strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailKey {
    id: ulid::Ulid,
}

impl MailKey {
    /// Parse a key from a filename like `01ARYZ6S41....bin` or `....eml`.
    ///
    /// Anything containing path separators or traversal patterns is rejected.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename
            .strip_suffix(".bin")
            .or_else(|| filename.strip_suffix(".eml"))?;

        stem.parse().ok()
    }

    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Milliseconds since the Unix epoch at which the key was generated.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::str::FromStr for MailKey {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(|id| Self { id })
    }
}

impl std::fmt::Display for MailKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for MailKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MailKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_validated() {
        assert!(MailKey::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());
        assert!(MailKey::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml").is_some());

        assert!(MailKey::from_filename("../etc/passwd.bin").is_none());
        assert!(MailKey::from_filename("foo/bar.bin").is_none());
        assert!(MailKey::from_filename("..\\windows\\system32.bin").is_none());
        assert!(MailKey::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(MailKey::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.json").is_none());
    }

    #[test]
    fn keys_sort_by_creation() {
        let first = MailKey::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MailKey::generate();
        assert!(first < second);
    }
}
