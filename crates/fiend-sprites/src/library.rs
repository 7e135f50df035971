//! Sprite directory controller.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use fiend_core::{ControllerError, TargetController};
use rand::seq::IndexedRandom;
use tokio::sync::RwLock;

const BASES_DIR: &str = "bases";
const FACES_DIR: &str = "faces";

#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Face,
}

impl Layer {
    const fn dir(self) -> &'static str {
        match self {
            Self::Base => BASES_DIR,
            Self::Face => FACES_DIR,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::Face => "Face",
        }
    }
}

#[derive(Debug, Default)]
struct Current {
    base: String,
    face: String,
}

/// Widget state backed by a sprite directory with `bases/` and `faces/`.
///
/// Only PNG files directly inside those directories are selectable.
#[derive(Debug)]
pub struct SpriteLibrary {
    root: PathBuf,
    current: RwLock<Current>,
}

impl SpriteLibrary {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: RwLock::new(Current::default()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn list(&self, layer: Layer) -> Result<Vec<String>, ControllerError> {
        let dir = self.root.join(layer.dir());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, &e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, &e))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_png(&name) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| io_error(&dir, &e))?
                .is_file();
            if is_file {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn resolve(&self, layer: Layer, name: &str) -> Result<(), ControllerError> {
        let not_found = || {
            ControllerError::NotFound(format!("{} image not found: {name}", layer.label()))
        };
        if !is_bare_file_name(name) {
            return Err(not_found());
        }

        match tokio::fs::metadata(self.root.join(layer.dir()).join(name)).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(io_error(&self.root, &e)),
        }
    }
}

#[async_trait]
impl TargetController for SpriteLibrary {
    async fn load_random(&self) -> Result<(), ControllerError> {
        let bases = self.list(Layer::Base).await?;
        let faces = self.list(Layer::Face).await?;

        let picked = {
            let mut rng = rand::rng();
            bases.choose(&mut rng).cloned().zip(faces.choose(&mut rng).cloned())
        };
        let Some((base, face)) = picked else {
            return Err(ControllerError::Unavailable(
                "No PNG files found in bases or faces directories.".to_string(),
            ));
        };

        tracing::debug!(%base, %face, "Loaded random sprites");
        let mut current = self.current.write().await;
        current.base = base;
        current.face = face;
        Ok(())
    }

    async fn set_base(&self, name: &str) -> Result<(), ControllerError> {
        self.resolve(Layer::Base, name).await?;
        self.current.write().await.base = name.to_string();
        Ok(())
    }

    async fn set_face(&self, name: &str) -> Result<(), ControllerError> {
        self.resolve(Layer::Face, name).await?;
        self.current.write().await.face = name.to_string();
        Ok(())
    }

    async fn list_bases(&self) -> Result<Vec<String>, ControllerError> {
        self.list(Layer::Base).await
    }

    async fn list_faces(&self) -> Result<Vec<String>, ControllerError> {
        self.list(Layer::Face).await
    }

    async fn get_current(&self) -> Result<(String, String), ControllerError> {
        let current = self.current.read().await;
        Ok((current.base.clone(), current.face.clone()))
    }
}

fn is_png(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

/// A single normal path component, so names cannot escape the layer directory.
fn is_bare_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

fn io_error(path: &Path, e: &io::Error) -> ControllerError {
    ControllerError::Internal(format!("{}: {e}", path.display()))
}
