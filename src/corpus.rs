//! Building the corpus blob from a directory of JSON documents.
//!
//! Every `*.json` file in the source directory is parsed and re-serialized, and the documents are
//! joined into a single JSON array text. Files that fail to parse are logged and skipped. The
//! result is cached verbatim; as long as the cache file exists the directory is not looked at
//! again.
//!
//! Documents are re-serialized with `", "` and `": "` separators, object keys in source order and
//! all non-ASCII characters escaped, so a file containing `{"a":1}` becomes `[{"a": 1}]`.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use serde_json::ser::Formatter;

/// Extension of the files picked up from the source directory.
pub const JSON_EXTENSION: &str = "json";

/// Separator between documents in the blob.
const DOCUMENT_SEPARATOR: &str = ",\n";

/// An immutable JSON array text holding every document of the corpus.
///
/// Cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusBlob(Arc<str>);

impl CorpusBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CorpusBlob {
    fn from(text: String) -> Self {
        CorpusBlob(Arc::from(text))
    }
}

impl From<&str> for CorpusBlob {
    fn from(text: &str) -> Self {
        CorpusBlob(Arc::from(text))
    }
}

impl fmt::Display for CorpusBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors building or loading the corpus.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("no valid JSON documents in {} ({found} candidate files)", dir.display())]
    EmptyCorpus { dir: PathBuf, found: usize },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path, source: io::Error) -> Self {
        CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A file that was not included in the corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning a directory.
#[derive(Debug)]
pub struct CombineReport {
    pub blob: CorpusBlob,
    /// Files that made it into the blob, in blob order.
    pub included: Vec<PathBuf>,
    /// Files that were skipped, with the reason.
    pub skipped: Vec<SkippedFile>,
}

/// Where a loaded corpus came from.
#[derive(Debug)]
pub enum Source {
    /// Read from an existing cache file.
    Cache,
    /// Built by scanning the source directory; the cache file has been written.
    Scan {
        included: Vec<PathBuf>,
        skipped: Vec<SkippedFile>,
    },
}

/// A corpus, ready to be injected into a conversation.
#[derive(Debug)]
pub struct LoadedCorpus {
    pub blob: CorpusBlob,
    pub source: Source,
}

/// Loads the corpus from cache, or builds and caches it.
#[derive(Clone, Debug)]
pub struct CorpusLoader {
    source_dir: PathBuf,
    cache_path: PathBuf,
}

impl CorpusLoader {
    pub fn new<D: Into<PathBuf>, C: Into<PathBuf>>(source_dir: D, cache_path: C) -> Self {
        Self {
            source_dir: source_dir.into(),
            cache_path: cache_path.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Returns the cached corpus if the cache file exists, otherwise scans the source directory
    /// and writes the cache.
    ///
    /// A missing source directory is created so it can be populated; loading then fails with
    /// [`CorpusError::EmptyCorpus`].
    pub fn load(&self) -> Result<LoadedCorpus, CorpusError> {
        if self.cache_path.exists() {
            let text = fs::read_to_string(&self.cache_path)
                .map_err(|err| CorpusError::io(&self.cache_path, err))?;
            tracing::info!(
                path = %self.cache_path.display(),
                bytes = text.len(),
                "loaded corpus from cache"
            );
            return Ok(LoadedCorpus {
                blob: CorpusBlob::from(text),
                source: Source::Cache,
            });
        }

        if !self.source_dir.is_dir() {
            tracing::warn!(
                dir = %self.source_dir.display(),
                "corpus directory not found, creating it; populate it with JSON files"
            );
            fs::create_dir_all(&self.source_dir)
                .map_err(|err| CorpusError::io(&self.source_dir, err))?;
        }

        let report = combine_dir(&self.source_dir)?;
        write_atomically(&self.cache_path, report.blob.as_str())?;
        tracing::info!(
            path = %self.cache_path.display(),
            documents = report.included.len(),
            skipped = report.skipped.len(),
            bytes = report.blob.len(),
            "corpus cache written"
        );

        Ok(LoadedCorpus {
            blob: report.blob,
            source: Source::Scan {
                included: report.included,
                skipped: report.skipped,
            },
        })
    }
}

/// Scans `dir` (non-recursively) for JSON files and combines them into one array text.
///
/// Files are visited in path order. Unreadable or invalid files are logged and skipped.
pub fn combine_dir(dir: &Path) -> Result<CombineReport, CorpusError> {
    let candidates = json_files(dir)?;
    tracing::info!(
        dir = %dir.display(),
        files = candidates.len(),
        "combining JSON files"
    );

    let mut documents = Vec::with_capacity(candidates.len());
    let mut included = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for path in candidates {
        match read_document(&path) {
            Ok(document) => {
                documents.push(document);
                included.push(path);
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "skipping file");
                skipped.push(SkippedFile { path, reason });
            }
        }
    }

    if documents.is_empty() {
        return Err(CorpusError::EmptyCorpus {
            dir: dir.to_path_buf(),
            found: skipped.len(),
        });
    }

    let blob = format!("[{}]", documents.join(DOCUMENT_SEPARATOR));

    Ok(CombineReport {
        blob: CorpusBlob::from(blob),
        included,
        skipped,
    })
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let entries = fs::read_dir(dir).map_err(|err| CorpusError::io(dir, err))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| CorpusError::io(dir, err))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == JSON_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

fn read_document(path: &Path) -> Result<String, String> {
    let text = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|err| err.to_string())?;
    to_spaced_string(&value).map_err(|err| err.to_string())
}

/// Serializes `value` with spaced separators and ASCII-only output.
pub fn to_spaced_string<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);
    value.serialize(&mut serializer)?;
    // Every byte written is ASCII, so the lossy branch is never taken.
    Ok(String::from_utf8(out)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned()))
}

/// Single-line formatter using `", "` and `": "` separators and `\uXXXX` escapes for everything
/// outside ASCII.
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }

        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Writes `contents` to `path` through a temporary file in the same directory, so the file either
/// holds the full contents or does not exist.
fn write_atomically(path: &Path, contents: &str) -> Result<(), CorpusError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file =
        tempfile::NamedTempFile::new_in(dir).map_err(|err| CorpusError::io(dir, err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| CorpusError::io(path, err))?;
    file.persist(path)
        .map_err(|err| CorpusError::io(path, err.error))?;

    Ok(())
}
