//! Overlay asset catalog, per-asset calibration and the load-once asset cache.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AssetFailure, Result, TryOnError};
use crate::mesh::{Mesh, PartKind};
use crate::types::parse_hex;

/// Stable identifier of an overlay asset, e.g. `"classic-black"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(String);

impl AssetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub color_hex: String,
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self { color_hex: "#1A1A1A".to_string(), opacity: 0.95 }
    }
}

impl Material {
    pub fn rgb(&self) -> [u8; 3] {
        let (r, g, b) = parse_hex(&self.color_hex);
        [r, g, b]
    }
}

/// Static calibration of one mesh, supplied by configuration.
///
/// Meshes are authored with the inner eye span as one model unit; with the
/// defaults the mesh then matches a face whose inner eye corners are
/// `reference_eye_distance` world units apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub scale_multiplier: f32,
    /// Model-space offset baked into the geometry after centering.
    pub position_offset: [f32; 3],
    /// Euler angles in degrees (roll about x, pitch about y, yaw about z).
    pub rotation_offset_deg: [f32; 3],
    pub material: Material,
    /// World distance between inner eye corners at which scale == multiplier.
    pub reference_eye_distance: f32,
    /// Forehead-to-chin world distance matching `reference_eye_distance`.
    pub reference_face_height: f32,
    /// Fraction of the way from the eye midpoint to the nose bridge.
    pub nose_bias: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale_multiplier: 0.075,
            position_offset: [0.0, 0.0, 0.0],
            rotation_offset_deg: [0.0, 0.0, 0.0],
            material: Material::default(),
            reference_eye_distance: 0.075,
            reference_face_height: 0.42,
            nose_bias: 0.25,
        }
    }
}

impl Calibration {
    pub fn rotation_offset(&self) -> UnitQuaternion<f32> {
        let [r, p, y] = self.rotation_offset_deg;
        UnitQuaternion::from_euler_angles(r.to_radians(), p.to_radians(), y.to_radians())
    }
}

/// Calibration per asset key with a required fallback entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub default: Calibration,
    #[serde(default)]
    pub assets: HashMap<AssetKey, Calibration>,
}

/// The built-in meshes have 4.5-unit temples, so re-centering pushes the
/// front well forward of the eyes; this pulls it back to sit just ahead.
const BUILTIN_FRONT_OFFSET: [f32; 3] = [0.0, 0.0, -2.0];

impl Default for CalibrationTable {
    fn default() -> Self {
        let mut assets = HashMap::new();
        assets.insert(
            AssetKey::from("classic-black"),
            Calibration { position_offset: BUILTIN_FRONT_OFFSET, ..Calibration::default() },
        );
        assets.insert(
            AssetKey::from("retro-round"),
            Calibration {
                material: Material { color_hex: "#7A4A22".to_string(), opacity: 0.9 },
                scale_multiplier: 0.072,
                position_offset: BUILTIN_FRONT_OFFSET,
                ..Calibration::default()
            },
        );
        Self { default: Calibration::default(), assets }
    }
}

impl CalibrationTable {
    pub fn lookup(&self, key: &AssetKey) -> &Calibration {
        self.assets.get(key).unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: AssetKey,
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCatalog {
    pub entries: Vec<CatalogEntry>,
}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self {
            entries: vec![
                CatalogEntry {
                    key: AssetKey::from("classic-black"),
                    label: "Classic Black".to_string(),
                    path: PathBuf::from("assets/classic_black.obj"),
                },
                CatalogEntry {
                    key: AssetKey::from("retro-round"),
                    label: "Retro Round".to_string(),
                    path: PathBuf::from("assets/retro_round.obj"),
                },
            ],
        }
    }
}

impl AssetCatalog {
    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.entries.iter().map(|e| &e.key)
    }

    pub fn label(&self, key: &AssetKey) -> Option<&str> {
        self.entries.iter().find(|e| &e.key == key).map(|e| e.label.as_str())
    }
}

/// Temple arm geometry measured once at load time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempleGeometry {
    /// Model-space z of the hinge (front end of the arm).
    pub hinge_z: f32,
    pub length: f32,
}

/// A loaded, centered and calibrated mesh. Never mutated after load.
#[derive(Debug)]
pub struct OverlayAsset {
    pub key: AssetKey,
    pub mesh: Mesh,
    pub calibration: Calibration,
    pub rotation_offset: UnitQuaternion<f32>,
    pub temples: Option<(TempleGeometry, TempleGeometry)>,
}

impl OverlayAsset {
    pub fn from_mesh(key: AssetKey, mut mesh: Mesh, calibration: Calibration) -> Self {
        mesh.recenter();
        mesh.translate(&Vector3::from(calibration.position_offset));

        let temple = |part| {
            mesh.part_bounds(part).map(|b| TempleGeometry {
                hinge_z: b.max.z,
                length: b.extent().z,
            })
        };
        let temples = match (temple(PartKind::TempleLeft), temple(PartKind::TempleRight)) {
            (Some(l), Some(r)) if l.length > f32::EPSILON && r.length > f32::EPSILON => Some((l, r)),
            _ => None,
        };

        Self {
            key,
            rotation_offset: calibration.rotation_offset(),
            calibration,
            mesh,
            temples,
        }
    }
}

/// Write-once cache of overlay assets.
#[derive(Debug, Default)]
pub struct AssetManager {
    assets: HashMap<AssetKey, Arc<OverlayAsset>>,
}

impl AssetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every catalog entry not already present, in parallel.
    ///
    /// Successful entries stay usable when others fail; the failures are
    /// reported together as [`TryOnError::AssetLoad`].
    pub fn load_all(&mut self, catalog: &AssetCatalog, calibration: &CalibrationTable) -> Result<()> {
        let pending: Vec<&CatalogEntry> = catalog
            .entries
            .iter()
            .filter(|e| !self.assets.contains_key(&e.key))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let results: Vec<(&CatalogEntry, Result<Mesh>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = pending
                .iter()
                .map(|entry| (*entry, scope.spawn(move || Mesh::from_obj_file(&entry.path))))
                .collect();
            handles
                .into_iter()
                .map(|(entry, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(TryOnError::Mesh { line: 0, reason: "loader panicked".to_string() }));
                    (entry, result)
                })
                .collect()
        });

        let mut failures = Vec::new();
        for (entry, result) in results {
            match result {
                Ok(mesh) => {
                    let asset = OverlayAsset::from_mesh(
                        entry.key.clone(),
                        mesh,
                        calibration.lookup(&entry.key).clone(),
                    );
                    debug!(
                        key = %entry.key,
                        triangles = asset.mesh.triangles.len(),
                        temples = asset.temples.is_some(),
                        "asset loaded"
                    );
                    self.assets.insert(entry.key.clone(), Arc::new(asset));
                }
                Err(e) => {
                    warn!(key = %entry.key, path = %entry.path.display(), "asset failed to load: {e}");
                    failures.push(AssetFailure {
                        key: entry.key.clone(),
                        path: entry.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("{} of {} overlay assets available", self.assets.len(), catalog.entries.len());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TryOnError::AssetLoad { failures })
        }
    }

    /// Register an already-built asset. Ignored if the key is present.
    pub fn insert(&mut self, asset: OverlayAsset) {
        self.assets.entry(asset.key.clone()).or_insert_with(|| Arc::new(asset));
    }

    pub fn get(&self, key: &AssetKey) -> Option<Arc<OverlayAsset>> {
        self.assets.get(key).cloned()
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.assets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GLASSES_OBJ;
    use std::fs;

    fn catalog_in(dir: &std::path::Path, names: &[(&str, bool)]) -> AssetCatalog {
        let entries = names
            .iter()
            .map(|(name, exists)| {
                let path = dir.join(format!("{name}.obj"));
                if *exists {
                    fs::write(&path, GLASSES_OBJ).unwrap();
                }
                CatalogEntry { key: AssetKey::from(*name), label: name.to_string(), path }
            })
            .collect();
        AssetCatalog { entries }
    }

    #[test]
    fn partial_catalog_keeps_successful_assets() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path(), &[("a", true), ("missing", false), ("c", true)]);
        let mut manager = AssetManager::new();

        let err = manager.load_all(&catalog, &CalibrationTable::default()).unwrap_err();
        match &err {
            TryOnError::AssetLoad { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].key, AssetKey::from("missing"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_blocking());
        assert!(manager.get(&AssetKey::from("a")).is_some());
        assert!(manager.get(&AssetKey::from("c")).is_some());
        assert!(manager.get(&AssetKey::from("missing")).is_none());
    }

    #[test]
    fn loaded_assets_are_never_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path(), &[("a", true)]);
        let mut manager = AssetManager::new();
        manager.load_all(&catalog, &CalibrationTable::default()).unwrap();
        let first = manager.get(&AssetKey::from("a")).unwrap();

        // Corrupt the file on disk; a second load must not touch the cached asset.
        fs::write(&catalog.entries[0].path, "not an obj").unwrap();
        manager.load_all(&catalog, &CalibrationTable::default()).unwrap();
        let second = manager.get(&AssetKey::from("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn assets_are_centered_and_calibrated() {
        let mesh = Mesh::from_obj(GLASSES_OBJ).unwrap();
        let mut table = CalibrationTable::default();
        table.assets.insert(
            AssetKey::from("tilted"),
            Calibration { rotation_offset_deg: [0.0, 0.0, 90.0], ..Calibration::default() },
        );
        let asset = OverlayAsset::from_mesh(AssetKey::from("tilted"), mesh, table.lookup(&AssetKey::from("tilted")).clone());
        assert!(asset.mesh.bounds().unwrap().center().coords.norm() < 1e-5);
        assert!((asset.rotation_offset.angle() - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!(asset.temples.is_some());
    }

    #[test]
    fn builtin_catalog_loads_with_articulated_temples() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
        let mut catalog = AssetCatalog::default();
        for e in &mut catalog.entries {
            e.path = root.join(&e.path);
        }
        let mut manager = AssetManager::new();
        manager.load_all(&catalog, &CalibrationTable::default()).unwrap();
        for key in catalog.keys() {
            let asset = manager.get(key).unwrap();
            let (l, r) = asset.temples.expect("temples");
            assert!((l.length - 4.5).abs() < 1e-3 && (r.length - 4.5).abs() < 1e-3);
            // Front sits just ahead of the anchor.
            let front = asset.mesh.part_bounds(PartKind::Body).unwrap();
            assert!(front.max.z > 0.0 && front.max.z < 0.5, "front z {}", front.max.z);
        }
    }

    #[test]
    fn unknown_keys_use_default_calibration() {
        let table = CalibrationTable::default();
        let cal = table.lookup(&AssetKey::from("nope"));
        assert_eq!(cal.scale_multiplier, table.default.scale_multiplier);
        assert_ne!(table.lookup(&AssetKey::from("retro-round")).material.color_hex, cal.material.color_hex);
    }
}
