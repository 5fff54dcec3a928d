//! Decoding a whole container into meshes, materials and a flattened node list.

use glam::{Mat4, Quat, Vec3};
use keel_math::Aabb;

use crate::accessor::{AccessorReader, IndexArray};
use crate::container::Container;
use crate::document::{Document, NodeDef, PrimitiveDef};
use crate::error::DecodeError;
use crate::material::{MaterialSlot, resolve_materials};

const MODE_TRIANGLES: u32 = 4;

/// One drawable unit: de-interleaved vertex streams plus triangle indices.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: IndexArray,
    /// Index into [`DecodedModel::materials`]; `None` uses the default slot.
    pub material: Option<usize>,
    /// Local-space bounds of the raw positions.
    pub bounds: Aabb,
}

impl PrimitiveData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub primitives: Vec<PrimitiveData>,
}

/// A node reachable from the active scene, with its transform resolved to world space.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeData {
    /// Position in the source node table.
    pub index: usize,
    pub name: String,
    pub mesh: Option<usize>,
    pub world: Mat4,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedModel {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialSlot>,
    /// Reachable nodes in depth-first order, parents before children.
    pub nodes: Vec<NodeData>,
}

impl DecodedModel {
    /// World-space bounds of every node that carries a mesh.
    pub fn world_bounds(&self) -> Option<Aabb> {
        let mut out = Aabb::EMPTY;
        for node in &self.nodes {
            let Some(mesh) = node.mesh.and_then(|m| self.meshes.get(m)) else {
                continue;
            };
            for prim in mesh.primitives.iter().filter(|p| !p.bounds.is_empty()) {
                out = out.union(&prim.bounds.transformed(&node.world));
            }
        }
        (!out.is_empty()).then_some(out)
    }

    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(|m| m.primitives.len()).sum()
    }

    /// Node with a mesh, looked up by name.
    pub fn node(&self, name: &str) -> Option<&NodeData> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Decode a binary container into a [`DecodedModel`].
///
/// Any malformed range or dangling table index fails the whole decode.
pub fn decode_model(bytes: &[u8]) -> Result<DecodedModel, DecodeError> {
    let container = Container::parse(bytes)?;
    let doc = Document::parse(container.json)?;
    let reader = AccessorReader::new(&doc, container.bin);

    let materials = resolve_materials(&doc, &reader)?;
    let meshes = doc
        .meshes
        .iter()
        .enumerate()
        .map(|(i, mesh)| {
            let mut primitives = Vec::with_capacity(mesh.primitives.len());
            for (j, prim) in mesh.primitives.iter().enumerate() {
                if prim.mode != MODE_TRIANGLES {
                    log::debug!("mesh {i} primitive {j}: skipping topology mode {}", prim.mode);
                    continue;
                }
                primitives.push(decode_primitive(&reader, &doc, i, j, prim)?);
            }
            Ok(MeshData {
                name: mesh.name.clone().unwrap_or_else(|| format!("mesh_{i}")),
                primitives,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;
    let nodes = flatten_nodes(&doc)?;

    log::debug!(
        "decoded model: {} meshes, {} materials, {} nodes",
        meshes.len(),
        materials.len(),
        nodes.len()
    );
    Ok(DecodedModel {
        meshes,
        materials,
        nodes,
    })
}

fn decode_primitive(
    reader: &AccessorReader<'_>,
    doc: &Document,
    mesh: usize,
    primitive: usize,
    def: &PrimitiveDef,
) -> Result<PrimitiveData, DecodeError> {
    let position = *def
        .attributes
        .get("POSITION")
        .ok_or(DecodeError::MissingPosition { mesh, primitive })?;
    let positions: Vec<[f32; 3]> = vec3s(reader, mesh, "POSITION", position)?;
    let vertex_count = positions.len();

    let indices = match def.indices {
        Some(i) => reader.read_indices(i)?,
        None => IndexArray::sequential(vertex_count),
    };
    if let Some(max) = indices.max()
        && max as usize >= vertex_count
    {
        return Err(DecodeError::IndexOutOfBounds {
            mesh,
            index: max,
            vertex_count,
        });
    }

    let normals = match def.attributes.get("NORMAL") {
        Some(&n) => {
            let normals = vec3s(reader, mesh, "NORMAL", n)?;
            if normals.len() == vertex_count {
                normals
            } else {
                log::warn!("mesh {mesh}: NORMAL count differs from POSITION, regenerating");
                generate_normals(&positions, &indices)
            }
        }
        None => generate_normals(&positions, &indices),
    };

    let uvs = match def.attributes.get("TEXCOORD_0") {
        Some(&t) => {
            let decoded = reader.read_floats(t)?;
            let arity = decoded.element.arity();
            if arity != 2 {
                return Err(DecodeError::AttributeArity {
                    mesh,
                    semantic: "TEXCOORD_0",
                    arity,
                    expected: 2,
                });
            }
            let uvs: Vec<[f32; 2]> = decoded.values.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
            if uvs.len() == vertex_count {
                uvs
            } else {
                log::warn!("mesh {mesh}: TEXCOORD_0 count differs from POSITION, zeroing");
                vec![[0.0; 2]; vertex_count]
            }
        }
        None => vec![[0.0; 2]; vertex_count],
    };

    if let Some(m) = def.material
        && m >= doc.materials.len()
    {
        return Err(DecodeError::BadIndex {
            table: "materials",
            index: m,
            len: doc.materials.len(),
        });
    }

    let bounds = Aabb::from_points(positions.iter().map(|&p| Vec3::from(p))).unwrap_or(Aabb::EMPTY);
    Ok(PrimitiveData {
        positions,
        normals,
        uvs,
        indices,
        material: def.material,
        bounds,
    })
}

fn vec3s(
    reader: &AccessorReader<'_>,
    mesh: usize,
    semantic: &'static str,
    accessor: usize,
) -> Result<Vec<[f32; 3]>, DecodeError> {
    let decoded = reader.read_floats(accessor)?;
    let arity = decoded.element.arity();
    if arity != 3 {
        return Err(DecodeError::AttributeArity {
            mesh,
            semantic,
            arity,
            expected: 3,
        });
    }
    Ok(decoded
        .values
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

/// Area-weighted vertex normals from the triangle list. Vertices touched by no
/// non-degenerate triangle point up.
fn generate_normals(positions: &[[f32; 3]], indices: &IndexArray) -> Vec<[f32; 3]> {
    let mut acc = vec![Vec3::ZERO; positions.len()];
    let idx: Vec<u32> = indices.iter().collect();
    for tri in idx.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (pa, pb, pc) = (
            Vec3::from(positions[a]),
            Vec3::from(positions[b]),
            Vec3::from(positions[c]),
        );
        // Cross product length is twice the area, which weights the sum.
        let n = (pb - pa).cross(pc - pa);
        acc[a] += n;
        acc[b] += n;
        acc[c] += n;
    }
    acc.into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}

fn local_transform(node: &NodeDef) -> Mat4 {
    if let Some(m) = node.matrix {
        return Mat4::from_cols_array(&m);
    }
    let t = node.translation.map_or(Vec3::ZERO, Vec3::from);
    let r = node
        .rotation
        .map_or(Quat::IDENTITY, |q| Quat::from_array(q).normalize());
    let s = node.scale.map_or(Vec3::ONE, Vec3::from);
    Mat4::from_scale_rotation_translation(s, r, t)
}

/// Resolve world transforms from the active scene's roots, depth first.
///
/// Without a node table, every mesh gets an implicit identity node.
fn flatten_nodes(doc: &Document) -> Result<Vec<NodeData>, DecodeError> {
    if doc.nodes.is_empty() {
        return Ok(doc
            .meshes
            .iter()
            .enumerate()
            .map(|(i, m)| NodeData {
                index: i,
                name: m.name.clone().unwrap_or_else(|| format!("mesh_{i}")),
                mesh: Some(i),
                world: Mat4::IDENTITY,
            })
            .collect());
    }

    let check = |table: &'static str, index: usize, len: usize| {
        if index < len {
            Ok(index)
        } else {
            Err(DecodeError::BadIndex { table, index, len })
        }
    };

    let roots: Vec<usize> = match doc.scenes.get(doc.scene.unwrap_or(0)) {
        Some(scene) => scene.nodes.clone(),
        None => {
            // No scene list: every node that is nobody's child is a root.
            let mut is_child = vec![false; doc.nodes.len()];
            for node in &doc.nodes {
                for &c in &node.children {
                    is_child[check("nodes", c, doc.nodes.len())?] = true;
                }
            }
            (0..doc.nodes.len()).filter(|&i| !is_child[i]).collect()
        }
    };

    let mut visited = vec![false; doc.nodes.len()];
    let mut out = Vec::new();
    let mut stack: Vec<(usize, Mat4)> = roots
        .iter()
        .rev()
        .map(|&r| Ok((check("nodes", r, doc.nodes.len())?, Mat4::IDENTITY)))
        .collect::<Result<_, DecodeError>>()?;

    while let Some((index, parent)) = stack.pop() {
        if std::mem::replace(&mut visited[index], true) {
            log::warn!("node {index} reached twice, ignoring repeat");
            continue;
        }
        let def = &doc.nodes[index];
        let world = parent * local_transform(def);
        let mesh = def
            .mesh
            .map(|m| check("meshes", m, doc.meshes.len()))
            .transpose()?;
        out.push(NodeData {
            index,
            name: def.name.clone().unwrap_or_else(|| format!("node_{index}")),
            mesh,
            world,
        });
        for &c in def.children.iter().rev() {
            stack.push((check("nodes", c, doc.nodes.len())?, world));
        }
    }
    Ok(out)
}
