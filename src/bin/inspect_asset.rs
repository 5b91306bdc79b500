use anyhow::{Context, Result};
use rusty_frames::assets::{AssetKey, CalibrationTable, OverlayAsset};
use rusty_frames::mesh::{Mesh, PartKind};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: inspect_asset <path_to_mesh.obj> [asset-key]");
        return Ok(());
    }

    let path = Path::new(&args[1]);
    println!("Inspecting mesh: {}", path.display());
    let mesh = Mesh::from_obj_file(path).with_context(|| format!("loading {}", path.display()))?;

    println!("\n--- Raw ---");
    println!("Vertices:  {}", mesh.vertices.len());
    println!("Triangles: {}", mesh.triangles.len());
    if let Some(b) = mesh.bounds() {
        let c = b.center();
        let e = b.extent();
        println!("Bounds:    min ({:.3}, {:.3}, {:.3}) max ({:.3}, {:.3}, {:.3})", b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z);
        println!("Centroid:  ({:.3}, {:.3}, {:.3})", c.x, c.y, c.z);
        println!("Extent:    ({:.3}, {:.3}, {:.3})", e.x, e.y, e.z);
    }

    println!("\n--- Parts ---");
    for part in [PartKind::Body, PartKind::TempleLeft, PartKind::TempleRight] {
        let count = mesh.vertex_parts.iter().filter(|p| **p == part).count();
        match mesh.part_bounds(part) {
            Some(b) => println!("{:?}: {} vertices, z {:.3} .. {:.3}", part, count, b.min.z, b.max.z),
            None => println!("{:?}: none", part),
        }
    }

    // Calibrated view, as the try-on would load it
    let key = AssetKey::new(args.get(2).cloned().unwrap_or_else(|| "inspect".to_string()));
    let calibration = CalibrationTable::default().lookup(&key).clone();
    let asset = OverlayAsset::from_mesh(key.clone(), mesh, calibration);
    println!("\n--- Calibrated ({}) ---", key);
    println!("Scale multiplier: {}", asset.calibration.scale_multiplier);
    println!("Position offset:  {:?}", asset.calibration.position_offset);
    println!("Rotation offset:  {:?} deg", asset.calibration.rotation_offset_deg);
    match asset.temples {
        Some((l, r)) => println!(
            "Temples: left hinge z {:.3} len {:.3} | right hinge z {:.3} len {:.3}",
            l.hinge_z, l.length, r.hinge_z, r.length
        ),
        None => println!("Temples: not articulated"),
    }

    Ok(())
}
