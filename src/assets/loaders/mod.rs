//! Asset Loaders
//!
//! File-format parsers behind the resource cache. Formats are detected by
//! extension; enum entries without an implementation fail with
//! `UnsupportedFormat`.

pub mod obj;
pub mod stl;
pub mod texture;

use std::path::Path;

use crate::assets::mesh::MeshData;
use crate::errors::{KilnError, Result};

/// Mesh file formats known to the engine. `Ply`, `Fbx` and `Gltf` are
/// reserved but unimplemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Stl,
    Ply,
    Fbx,
    Gltf,
}

impl MeshFormat {
    /// Detects the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        Some(match extension.as_str() {
            "obj" => Self::Obj,
            "stl" => Self::Stl,
            "ply" => Self::Ply,
            "fbx" => Self::Fbx,
            "gltf" | "glb" => Self::Gltf,
            _ => return None,
        })
    }
}

/// Reads and parses a mesh file into its mesh list.
pub fn load_meshes(path: &Path) -> Result<Vec<MeshData>> {
    let format = MeshFormat::from_path(path).ok_or_else(|| {
        KilnError::UnsupportedFormat(format!("mesh file {}", path.display()))
    })?;
    let debug_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    match format {
        MeshFormat::Obj => {
            let text = std::fs::read_to_string(path)?;
            obj::parse_obj(&text, &debug_name)
        }
        MeshFormat::Stl => {
            let bytes = std::fs::read(path)?;
            stl::parse_stl(&bytes, &debug_name)
        }
        MeshFormat::Ply | MeshFormat::Fbx | MeshFormat::Gltf => Err(KilnError::UnsupportedFormat(
            format!("{format:?} meshes are not implemented ({})", path.display()),
        )),
    }
}
