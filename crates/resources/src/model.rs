//! Mesh data and glTF model loading.

use std::path::{Path, PathBuf};

use glam::{Vec2, Vec3};
use renderer_rhi::vertex::Vertex;
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};

/// CPU-side geometry of one drawable mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Base color texture, resolved against the model's directory.
    pub texture: Option<PathBuf>,
}

impl MeshData {
    /// Builds a mesh, checking every index against the vertex count.
    pub fn new(
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        texture: Option<PathBuf>,
    ) -> ResourceResult<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(ResourceError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }
        Ok(Self {
            vertices,
            indices,
            texture,
        })
    }

    /// Axis-aligned quad in the XY plane facing +Z, counter-clockwise.
    pub fn quad(center: Vec3, half_extent: f32, color: Vec3) -> Self {
        let corner = |x: f32, y: f32, u: f32, v: f32| {
            Vertex::new(
                center + Vec3::new(x * half_extent, y * half_extent, 0.0),
                color,
                Vec2::new(u, v),
            )
        };
        Self {
            vertices: vec![
                corner(-1.0, 1.0, 0.0, 1.0),
                corner(1.0, 1.0, 1.0, 1.0),
                corner(1.0, -1.0, 1.0, 0.0),
                corner(-1.0, -1.0, 0.0, 0.0),
            ],
            indices: vec![0, 3, 2, 2, 1, 0],
            texture: None,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// All triangle meshes of one model file.
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub meshes: Vec<MeshData>,
}

impl ModelData {
    /// Loads every triangle primitive of a `.gltf` or `.glb` file.
    ///
    /// Per primitive: positions (required), `COLOR_0` or else the material's
    /// base color factor, `TEXCOORD_0` or zeros, indices or a generated
    /// `0..n` list, and the base color texture when it is an external file.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        let gltf_error = |source| ResourceError::GltfLoad {
            path: path.to_path_buf(),
            source,
        };

        let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(gltf_error)?;
        let base = path.parent().unwrap_or(Path::new("."));
        let buffers = gltf::import_buffers(&document, Some(base), blob).map_err(gltf_error)?;

        let mut meshes = Vec::new();
        for mesh in document.meshes() {
            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    warn!(
                        "Skipping {:?} primitive in mesh {} of {:?}",
                        primitive.mode(),
                        mesh.index(),
                        path
                    );
                    continue;
                }

                let reader = primitive
                    .reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

                let positions: Vec<[f32; 3]> = reader
                    .read_positions()
                    .ok_or_else(|| ResourceError::NoPositionData {
                        path: path.to_path_buf(),
                        mesh: mesh.index(),
                    })?
                    .collect();

                let material = primitive.material();
                let pbr = material.pbr_metallic_roughness();
                let [r, g, b, _] = pbr.base_color_factor();
                let colors: Vec<[f32; 3]> = match reader.read_colors(0) {
                    Some(colors) => colors.into_rgb_f32().collect(),
                    None => vec![[r, g, b]; positions.len()],
                };
                let tex_coords: Vec<[f32; 2]> = match reader.read_tex_coords(0) {
                    Some(coords) => coords.into_f32().collect(),
                    None => vec![[0.0, 0.0]; positions.len()],
                };

                let vertices = positions
                    .iter()
                    .enumerate()
                    .map(|(i, &position)| {
                        Vertex::new(
                            Vec3::from(position),
                            colors.get(i).copied().map(Vec3::from).unwrap_or(Vec3::ONE),
                            tex_coords.get(i).copied().map(Vec2::from).unwrap_or(Vec2::ZERO),
                        )
                    })
                    .collect::<Vec<_>>();

                let indices = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..vertices.len() as u32).collect(),
                };

                let texture = pbr
                    .base_color_texture()
                    .and_then(|info| texture_path(base, info.texture().source().source()));

                meshes.push(MeshData::new(vertices, indices, texture)?);
            }
        }

        if meshes.is_empty() {
            return Err(ResourceError::NoMeshes(path.to_path_buf()));
        }

        let model = Self { meshes };
        info!(
            "Loaded {:?}: {} mesh(es), {} vertices, {} triangles",
            path,
            model.meshes.len(),
            model.vertex_count(),
            model.triangle_count()
        );
        Ok(model)
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes.iter().map(|m| m.vertices.len()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(MeshData::triangle_count).sum()
    }
}

/// External image files only; embedded images are left untextured.
fn texture_path(base: &Path, source: gltf::image::Source<'_>) -> Option<PathBuf> {
    match source {
        gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
            let path = base.join(uri);
            debug!("Base color texture: {:?}", path);
            Some(path)
        }
        _ => {
            warn!("Embedded glTF images are not supported, using the default texture");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_rejects_dangling_index() {
        let vertices = vec![Vertex::default(); 3];
        let err = MeshData::new(vertices, vec![0, 1, 3], None).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            }
        ));
    }

    #[test]
    fn test_quad_geometry() {
        let quad = MeshData::quad(Vec3::new(0.0, 0.0, -1.0), 0.5, Vec3::X);
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.triangle_count(), 2);
        assert!(quad.indices.iter().all(|&i| (i as usize) < quad.vertices.len()));
        assert!(quad.vertices.iter().all(|v| v.color == Vec3::X));
        assert_eq!(quad.vertices[1].position, Vec3::new(0.5, 0.5, -1.0));
    }

    #[test]
    fn test_quad_winding_is_counter_clockwise() {
        let quad = MeshData::quad(Vec3::ZERO, 1.0, Vec3::ONE);
        for triangle in quad.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| quad.vertices[triangle[k] as usize].position);
            assert!((b - a).cross(c - a).z > 0.0);
        }
    }

    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "buffers": [{ "uri": "triangle.bin", "byteLength": 36 }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "accessors": [{
            "bufferView": 0,
            "componentType": 5126,
            "count": 3,
            "type": "VEC3",
            "min": [-1.0, -1.0, 0.0],
            "max": [1.0, 1.0, 0.0]
        }],
        "images": [{ "uri": "albedo.png" }],
        "textures": [{ "source": 0 }],
        "materials": [{
            "pbrMetallicRoughness": {
                "baseColorFactor": [0.25, 0.5, 1.0, 1.0],
                "baseColorTexture": { "index": 0 }
            }
        }],
        "meshes": [{
            "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }]
        }]
    }"#;

    fn write_triangle(dir: &Path) -> PathBuf {
        let positions: [f32; 9] = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0];
        let bytes: Vec<u8> = positions.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(dir.join("triangle.bin"), bytes).unwrap();
        let path = dir.join("triangle.gltf");
        std::fs::write(&path, TRIANGLE_GLTF).unwrap();
        path
    }

    #[test]
    fn test_load_gltf_fills_missing_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_triangle(dir.path());

        let model = ModelData::load(&path).unwrap();
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.vertex_count(), 3);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[2].position, Vec3::new(0.0, 1.0, 0.0));
        assert!(mesh.vertices.iter().all(|v| v.color == Vec3::new(0.25, 0.5, 1.0)));
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == Vec2::ZERO));
        assert_eq!(mesh.texture.as_deref(), Some(dir.path().join("albedo.png").as_path()));
    }

    #[test]
    fn test_load_missing_gltf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelData::load(&dir.path().join("absent.gltf")).unwrap_err();
        assert!(matches!(err, ResourceError::GltfLoad { .. }));
    }
}
