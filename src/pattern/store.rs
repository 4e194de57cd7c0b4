use std::path::{Path, PathBuf};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;

use crate::error::PatternError;
use crate::pattern::types::{DefaultPattern, Pattern, PatternFrame};

/// Name of the index file that maps pattern names to their source files.
pub const INDEX_FILE: &str = "pattern_dict.json";

/// Directory (relative to the data directory) holding the pattern source files.
pub const PATTERN_FILES_DIR: &str = "patterns";

fn simple_default() -> Pattern {
    Pattern::new(vec![PatternFrame::fixed(10, 90, 10)])
}

fn varied_default() -> Pattern {
    let mut frames = vec![PatternFrame::fixed(5, 135, 20); 9];
    frames.extend([
        PatternFrame::fixed(5, 95, 20),
        PatternFrame::fixed(4, 86, 20),
        PatternFrame::fixed(4, 76, 20),
        PatternFrame::fixed(4, 66, 20),
        PatternFrame::fixed(3, 57, 20),
        PatternFrame::fixed(3, 37, 20),
        PatternFrame::fixed(3, 37, 20),
        PatternFrame::fixed(2, 28, 20),
        PatternFrame::fixed(2, 18, 20),
        PatternFrame::fixed(1, 14, 20),
        PatternFrame::fixed(1, 9, 20),
    ]);
    Pattern::new(frames)
}

/// Named stimulation patterns. Read-only once loaded.
///
/// The empty name always resolves to [`DefaultPattern::Simple`]; the data files can not
/// override it.
#[derive(Debug, Clone)]
pub struct PatternStore {
    named: IndexMap<String, Pattern>,
    defaults: [Pattern; 2],
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PatternError> {
    let content = tokio::fs::read(path).await
        .map_err(|source| PatternError::Read { path: path.to_path_buf(), source })?;

    serde_json::from_slice(&content)
        .map_err(|source| PatternError::Parse { path: path.to_path_buf(), source })
}

impl PatternStore {
    /// A store holding only the built-in defaults.
    pub fn builtin_only() -> Self {
        PatternStore {
            named: IndexMap::new(),
            defaults: [simple_default(), varied_default()],
        }
    }

    /// Reads `<dir>/pattern_dict.json` and every file it references from `<dir>/patterns/`.
    ///
    /// Frames of the files listed for a name are concatenated in list order. Any unreadable or
    /// malformed file fails the whole load.
    pub async fn load(dir: &Path) -> Result<Self, PatternError> {
        let index_path = dir.join(INDEX_FILE);
        info!("Loading patterns from {}", index_path.to_string_lossy());

        let index: IndexMap<String, Vec<String>> = read_json(&index_path).await?;
        let mut store = PatternStore::builtin_only();

        for (name, files) in index {
            if name.is_empty() {
                warn!("Ignoring pattern with an empty name in {}, the built-in default is used", INDEX_FILE);
                continue;
            }

            let mut pattern = Pattern::default();
            for file in &files {
                let path: PathBuf = dir.join(PATTERN_FILES_DIR).join(file);
                let frames: Vec<PatternFrame> = read_json(&path).await?;
                debug!("{}: {} frame(s) from {}", name, frames.len(), file);
                pattern.extend(frames);
            }

            if pattern.is_empty() {
                return Err(PatternError::Empty { name });
            }

            store.named.insert(name, pattern);
        }

        info!("Loaded {} pattern(s)", store.named.len());
        Ok(store)
    }

    /// Pattern names in index order, starting with the empty default name.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once("").chain(self.named.keys().map(String::as_str))
    }

    pub fn contains(&self, name: &str) -> bool {
        name.is_empty() || self.named.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Pattern> {
        if name.is_empty() {
            return Some(self.builtin(DefaultPattern::Simple));
        }
        self.named.get(name)
    }

    /// Like [`PatternStore::get`], but unknown names fall back to the default pattern.
    pub fn resolve(&self, name: &str) -> &Pattern {
        match self.get(name) {
            Some(pattern) => pattern,
            None => {
                warn!("Pattern {:?} not found - Using default", name);
                self.builtin(DefaultPattern::Simple)
            },
        }
    }

    pub fn builtin(&self, which: DefaultPattern) -> &Pattern {
        match which {
            DefaultPattern::Simple => &self.defaults[0],
            DefaultPattern::Varied => &self.defaults[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn data_dir(index: &str, files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), index).unwrap();
        fs::create_dir(dir.path().join(PATTERN_FILES_DIR)).unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(PATTERN_FILES_DIR).join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn builtin_defaults() {
        let store = PatternStore::builtin_only();
        let simple = store.get("").unwrap();
        assert_eq!(simple.frames(), &[PatternFrame::fixed(10, 90, 10)]);

        let varied = store.builtin(DefaultPattern::Varied);
        assert_eq!(varied.len(), 20);
        assert_eq!(varied.frames()[0], PatternFrame::fixed(5, 135, 20));
        assert_eq!(varied.frames()[19], PatternFrame::fixed(1, 9, 20));
        assert!(varied.frames().iter().all(|frame| frame.amplitude == 20));
    }

    #[tokio::test]
    async fn load_concatenates_files_in_order() {
        let dir = data_dir(
            r#"{"vibrator_4": ["ramp.json", "hold.json"], "hold": ["hold.json"]}"#,
            &[
                ("ramp.json", "[[1, 9, 5], [2, 8, 10]]"),
                ("hold.json", "[[10, 90, 20]]"),
            ],
        );

        let store = PatternStore::load(dir.path()).await.unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["", "vibrator_4", "hold"]);
        assert_eq!(
            store.get("vibrator_4").unwrap().frames(),
            &[PatternFrame::fixed(1, 9, 5), PatternFrame::fixed(2, 8, 10), PatternFrame::fixed(10, 90, 20)],
        );
        assert_eq!(store.get("hold").unwrap().len(), 1);
        assert!(!store.get("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_name_can_not_be_overridden() {
        let dir = data_dir(r#"{"": ["hold.json"]}"#, &[("hold.json", "[[31, 1000, 31]]")]);

        let store = PatternStore::load(dir.path()).await.unwrap();
        assert_eq!(store.get("").unwrap(), store.builtin(DefaultPattern::Simple));
    }

    #[tokio::test]
    async fn missing_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PatternStore::load(dir.path()).await;
        assert!(matches!(result, Err(PatternError::Read { .. })));
    }

    #[tokio::test]
    async fn missing_pattern_file_fails() {
        let dir = data_dir(r#"{"a": ["missing.json"]}"#, &[]);
        let result = PatternStore::load(dir.path()).await;
        assert!(matches!(result, Err(PatternError::Read { .. })));
    }

    #[tokio::test]
    async fn malformed_or_out_of_range_frames_fail() {
        let dir = data_dir(r#"{"a": ["bad.json"]}"#, &[("bad.json", "[[1, 2]]")]);
        assert!(matches!(PatternStore::load(dir.path()).await, Err(PatternError::Parse { .. })));

        let dir = data_dir(r#"{"a": ["bad.json"]}"#, &[("bad.json", "[[1, 2, 99]]")]);
        assert!(matches!(PatternStore::load(dir.path()).await, Err(PatternError::Parse { .. })));
    }

    #[tokio::test]
    async fn pattern_without_frames_fails() {
        let dir = data_dir(r#"{"a": ["empty.json"]}"#, &[("empty.json", "[]")]);
        assert!(matches!(PatternStore::load(dir.path()).await, Err(PatternError::Empty { .. })));
    }

    #[tokio::test]
    async fn shipped_data_has_the_default_pattern() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data").join("estim");
        let store = PatternStore::load(&dir).await.unwrap();
        assert!(store.contains("vibrator_4"));
        assert_eq!(store.get("pulse_ramp").unwrap().len(), 8);
    }

    #[test]
    fn unknown_names_resolve_to_default() {
        let store = PatternStore::builtin_only();
        assert!(!store.contains("nope"));
        assert_eq!(store.resolve("nope"), store.builtin(DefaultPattern::Simple));
    }
}
