//! Resolution of `task.input` paths into local files or object references.

use crate::error::{ConversionError, ConversionResult};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*)://(?P<rest>.*)$").unwrap());

/// An object in remote storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    /// Last segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Deterministic download location under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut path = root.join(&self.bucket);
        path.extend(self.key.split('/'));
        path
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Where a job input lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    /// Already on the local filesystem; owned by the caller
    Local(PathBuf),
    /// Must be downloaded first
    Remote(ObjectRef),
}

impl InputLocation {
    /// Classify an input path.
    ///
    /// `file://` and scheme-less paths are local. Any other `scheme://` path
    /// must be `scheme://bucket/key` with a relative key.
    pub fn parse(path: &str) -> ConversionResult<Self> {
        let Some(captures) = SCHEME.captures(path) else {
            return Ok(Self::Local(PathBuf::from(path)));
        };

        let scheme = &captures["scheme"];
        let rest = &captures["rest"];

        if scheme.eq_ignore_ascii_case("file") {
            return Ok(Self::Local(PathBuf::from(rest)));
        }

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| ConversionError::malformed(path, "expected scheme://bucket/key"))?;

        if bucket.is_empty() {
            return Err(ConversionError::malformed(path, "bucket is empty"));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(ConversionError::malformed(path, "key does not name an object"));
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == ".." || segment == ".") {
            return Err(ConversionError::malformed(
                path,
                "key must be relative without dot segments",
            ));
        }

        Ok(Self::Remote(ObjectRef {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        }))
    }

    /// File name the output is named after.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            InputLocation::Local(path) => path.file_name().and_then(|name| name.to_str()),
            InputLocation::Remote(object) => Some(object.file_name()),
        }
    }
}

/// `<output_dir>/<input stem>.<extension>`, a pure function of the job content.
pub fn output_path(
    output_dir: &str,
    input_file_name: &str,
    extension: &str,
) -> ConversionResult<PathBuf> {
    let stem = Path::new(input_file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| ConversionError::malformed(input_file_name, "input has no file name"))?;

    Ok(Path::new(output_dir).join(format!("{}.{}", stem, extension)))
}
