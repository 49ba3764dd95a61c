//! Export: write layout artifacts for tools outside the service.
//!
//! ```text
//! DualLayout ──export_json()────────▶ pretty JSON (what renderers fetch)
//!            ──export_point_cloud()─▶ "name x y z" lines, one space
//! ```

use std::io::Write;

use serde::Serialize;

use crate::model::Space;
use crate::service::DualLayout;
use crate::Result;

/// Write any artifact as pretty-printed JSON.
pub fn export_json<T: Serialize>(artifact: &T, writer: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, artifact)?;
    writeln!(writer)?;
    Ok(())
}

/// Write one space of a dual layout as a whitespace-separated point cloud.
///
/// The comparison space is written in its aligned position. Names with
/// whitespace are quoted.
pub fn export_point_cloud(layout: &DualLayout, space: Space, writer: &mut dyn Write) -> Result<()> {
    let meta = &layout.metadata;
    let model = match space {
        Space::Baseline => &meta.baseline_model,
        Space::Comparison => &meta.comparison_model,
    };
    writeln!(writer, "# latent-atlas point cloud")?;
    writeln!(writer, "# space: {space} ({model})")?;
    writeln!(writer, "# layout: {} / {}", meta.topology, meta.layout)?;
    writeln!(writer, "# disparity: {} ({})", meta.disparity, meta.alignment_mode)?;
    writeln!(writer, "# points: {}", layout.nodes.len())?;

    for node in &layout.nodes {
        let [x, y, z] = node.coordinates.position(space);
        let name = node.name.as_str();
        if name.chars().any(char::is_whitespace) {
            writeln!(writer, "{name:?} {x} {y} {z}")?;
        } else {
            writeln!(writer, "{name} {x} {y} {z}")?;
        }
    }
    Ok(())
}
