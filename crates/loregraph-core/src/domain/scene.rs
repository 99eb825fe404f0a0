//! Scene text supplied by the editing and upload subsystems
//!
//! The engine only reads scenes; where they come from is a collaborator's
//! concern. Two sources ship with the crate: an in-memory map for embedding
//! and tests, and a directory of `<scene_id>.txt` files for the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One scene of narrative text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub text: String,
}

impl Scene {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Read access to a project's scenes
#[async_trait]
pub trait SceneSource: Send + Sync {
    /// Ids of every scene in a project, in narrative order
    async fn list_scenes(&self, project_id: &str) -> Result<Vec<String>>;

    /// One scene's text
    async fn get_scene(&self, project_id: &str, scene_id: &str) -> Result<Scene>;
}

/// Scenes held in memory, keyed by project
#[derive(Debug, Default)]
pub struct InMemorySceneSource {
    projects: DashMap<String, BTreeMap<String, String>>,
}

impl InMemorySceneSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a scene
    pub fn insert(&self, project_id: &str, scene: Scene) {
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .insert(scene.id, scene.text);
    }

    pub fn with_scene(self, project_id: &str, scene_id: &str, text: &str) -> Self {
        self.insert(project_id, Scene::new(scene_id, text));
        self
    }
}

#[async_trait]
impl SceneSource for InMemorySceneSource {
    async fn list_scenes(&self, project_id: &str) -> Result<Vec<String>> {
        Ok(self
            .projects
            .get(project_id)
            .map(|scenes| scenes.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_scene(&self, project_id: &str, scene_id: &str) -> Result<Scene> {
        self.projects
            .get(project_id)
            .and_then(|scenes| scenes.get(scene_id).cloned())
            .map(|text| Scene::new(scene_id, text))
            .ok_or_else(|| Error::scene_not_found(scene_id))
    }
}

/// Scenes stored as `<dir>/<scene_id>.txt`
///
/// The directory holds one project's scenes; the project id is not part of
/// the path.
#[derive(Debug, Clone)]
pub struct DirectorySceneSource {
    root: PathBuf,
}

impl DirectorySceneSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scene_path(&self, scene_id: &str) -> Result<PathBuf> {
        let valid = !scene_id.is_empty()
            && scene_id
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !scene_id.starts_with('.');
        if !valid {
            return Err(Error::Validation(format!("invalid scene id '{}'", scene_id)));
        }
        Ok(self.root.join(format!("{}.txt", scene_id)))
    }
}

#[async_trait]
impl SceneSource for DirectorySceneSource {
    async fn list_scenes(&self, _project_id: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn get_scene(&self, _project_id: &str, scene_id: &str) -> Result<Scene> {
        let path = self.scene_path(scene_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Scene::new(scene_id, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::scene_not_found(scene_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemorySceneSource::new()
            .with_scene("p", "s2", "Second.")
            .with_scene("p", "s1", "First.")
            .with_scene("q", "x", "Other project.");

        assert_eq!(source.list_scenes("p").await.unwrap(), vec!["s1", "s2"]);
        assert_eq!(source.get_scene("p", "s1").await.unwrap().text, "First.");
        assert!(source.list_scenes("none").await.unwrap().is_empty());

        let err = source.get_scene("p", "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ch01.txt"), "Mickey walked to Mars.").unwrap();
        std::fs::write(dir.path().join("ch02.txt"), "Minnie stayed home.").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let source = DirectorySceneSource::new(dir.path());
        assert_eq!(source.list_scenes("p").await.unwrap(), vec!["ch01", "ch02"]);

        let scene = source.get_scene("p", "ch01").await.unwrap();
        assert_eq!(scene.text, "Mickey walked to Mars.");

        assert!(source.get_scene("p", "missing").await.unwrap_err().is_not_found());
        assert!(matches!(
            source.get_scene("p", "../etc/passwd").await,
            Err(Error::Validation(_))
        ));
    }
}
