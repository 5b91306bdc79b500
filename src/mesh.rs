//! Triangle meshes for overlay assets and a Wavefront OBJ reader.
//!
//! Only geometry is read: `v`, `f`, `o` and `g` records. Texture coordinates,
//! normals and material statements are skipped. Polygons are fan-triangulated.
//! Object/group names select the structural part each vertex belongs to.

use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::error::{Result, TryOnError};

/// Structural part of an eyewear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Body,
    /// Temple arm on the model's -x side (image left when facing the camera).
    TempleLeft,
    TempleRight,
}

impl PartKind {
    pub fn from_group_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("temple") || lower.contains("arm") {
            if lower.contains("left") || lower.ends_with(".l") || lower.ends_with("_l") {
                return PartKind::TempleLeft;
            }
            if lower.contains("right") || lower.ends_with(".r") || lower.ends_with("_r") {
                return PartKind::TempleRight;
            }
        }
        PartKind::Body
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    fn from_points<'a>(mut points: impl Iterator<Item = &'a Point3<f32>>) -> Option<Aabb> {
        let first = *points.next()?;
        Some(points.fold(Aabb { min: first, max: first }, |acc, p| Aabb {
            min: acc.min.inf(p),
            max: acc.max.sup(p),
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    pub triangles: Vec<[u32; 3]>,
    /// Part membership, one entry per vertex.
    pub vertex_parts: Vec<PartKind>,
}

impl Mesh {
    pub fn from_obj_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_obj(&text)
    }

    pub fn from_obj(text: &str) -> Result<Self> {
        let mut mesh = Mesh::default();
        let mut current = PartKind::Body;
        // A vertex takes the part of the first face that references it.
        let mut assigned: Vec<bool> = Vec::new();

        for (n, raw) in text.lines().enumerate() {
            let line_no = n + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            let mut fields = line.split_whitespace();
            let Some(tag) = fields.next() else { continue };

            match tag {
                "v" => {
                    let coords: Vec<f32> = fields
                        .take(3)
                        .map(|s| s.parse::<f32>())
                        .collect::<std::result::Result<_, _>>()
                        .map_err(|e| mesh_err(line_no, format!("bad vertex: {e}")))?;
                    if coords.len() != 3 {
                        return Err(mesh_err(line_no, "vertex needs three coordinates"));
                    }
                    mesh.vertices.push(Point3::new(coords[0], coords[1], coords[2]));
                    mesh.vertex_parts.push(PartKind::Body);
                    assigned.push(false);
                }
                "f" => {
                    let count = mesh.vertices.len();
                    let indices: Vec<u32> = fields
                        .map(|f| resolve_index(f, count).ok_or_else(|| mesh_err(line_no, format!("bad face index '{f}'"))))
                        .collect::<Result<_>>()?;
                    if indices.len() < 3 {
                        return Err(mesh_err(line_no, "face needs at least three vertices"));
                    }
                    for &i in &indices {
                        if !assigned[i as usize] {
                            mesh.vertex_parts[i as usize] = current;
                            assigned[i as usize] = true;
                        }
                    }
                    for k in 1..indices.len() - 1 {
                        mesh.triangles.push([indices[0], indices[k], indices[k + 1]]);
                    }
                }
                "o" | "g" => {
                    let name = fields.collect::<Vec<_>>().join(" ");
                    current = PartKind::from_group_name(&name);
                }
                _ => {}
            }
        }

        if mesh.triangles.is_empty() {
            return Err(mesh_err(0, "mesh has no faces"));
        }
        Ok(mesh)
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter())
    }

    pub fn part_bounds(&self, part: PartKind) -> Option<Aabb> {
        Aabb::from_points(
            self.vertices
                .iter()
                .zip(&self.vertex_parts)
                .filter(|(_, k)| **k == part)
                .map(|(v, _)| v),
        )
    }

    /// Move the bounding-box centroid to the origin; returns the shift applied.
    pub fn recenter(&mut self) -> Vector3<f32> {
        let Some(bounds) = self.bounds() else {
            return Vector3::zeros();
        };
        let shift = -bounds.center().coords;
        self.translate(&shift);
        shift
    }

    pub fn translate(&mut self, offset: &Vector3<f32>) {
        for v in &mut self.vertices {
            *v += *offset;
        }
    }
}

fn resolve_index(field: &str, count: usize) -> Option<u32> {
    let raw: i64 = field.split('/').next()?.parse().ok()?;
    let idx = if raw < 0 { count as i64 + raw } else { raw - 1 };
    (0..count as i64).contains(&idx).then_some(idx as u32)
}

fn mesh_err(line: usize, reason: impl Into<String>) -> TryOnError {
    TryOnError::Mesh { line, reason: reason.into() }
}
