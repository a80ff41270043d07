use std::path::{Path, PathBuf};
use storyloop_common::Story;
use tracing::warn;
use walkdir::WalkDir;

use super::StoryStore;
use crate::errors::StoreError;

const FRONT_MATTER_DELIMITER: &str = "---";

/// Stories as `<dir>/**/*.md` files with YAML front matter.
#[derive(Debug, Clone)]
pub struct FileStoryStore {
    dir: PathBuf,
}

impl FileStoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn story_files(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();
        files
    }

    /// File holding the story with this id, if any.
    pub fn path_of(&self, id: &str) -> Option<PathBuf> {
        let direct = self.dir.join(format!("{}.md", id));
        if direct.is_file() && read_story(&direct).is_ok_and(|s| s.id == id) {
            return Some(direct);
        }
        self.story_files()
            .into_iter()
            .find(|path| read_story(path).is_ok_and(|s| s.id == id))
    }
}

impl StoryStore for FileStoryStore {
    fn load(&self, id: &str) -> Result<Story, StoreError> {
        let path = self
            .path_of(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        read_story(&path)
    }

    fn save(&self, story: &Story) -> Result<(), StoreError> {
        let path = self
            .path_of(&story.id)
            .unwrap_or_else(|| self.dir.join(format!("{}.md", story.id)));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = render_story(story).map_err(|message| StoreError::Malformed {
            path: path.clone(),
            message,
        })?;

        let tmp = path.with_extension("md.tmp");
        std::fs::write(&tmp, content).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }

    fn list(&self) -> Result<Vec<Story>, StoreError> {
        let mut stories = Vec::new();
        for path in self.story_files() {
            match read_story(&path) {
                Ok(story) => stories.push(story),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable story file"),
            }
        }
        stories.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stories)
    }
}

/// Split `---\n<yaml>\n---\n<body>` into its two halves.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    if let Some(end) = rest.find("\n---\n") {
        return Some((&rest[..end], &rest[end + 5..]));
    }
    if let Some(end) = rest.find("\r\n---\r\n") {
        return Some((&rest[..end], &rest[end + 7..]));
    }
    rest.strip_suffix("\n---").map(|yaml| (yaml, ""))
}

pub fn parse_story(content: &str, path: &Path) -> Result<Story, StoreError> {
    let (yaml, body) = split_front_matter(content).ok_or_else(|| StoreError::Malformed {
        path: path.to_path_buf(),
        message: "missing front matter block".to_string(),
    })?;
    let story: Story = serde_yaml::from_str(yaml).map_err(|e| StoreError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(story.with_body(body))
}

pub fn render_story(story: &Story) -> Result<String, String> {
    let yaml = serde_yaml::to_string(story).map_err(|e| e.to_string())?;
    Ok(format!(
        "{delim}\n{yaml}{delim}\n{body}",
        delim = FRONT_MATTER_DELIMITER,
        yaml = yaml,
        body = story.body
    ))
}

fn read_story(path: &Path) -> Result<Story, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_story(&content, path)
}
