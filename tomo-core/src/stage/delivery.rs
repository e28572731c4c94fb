use super::KeyValues;
use crate::delivery::sinogram::{LeafSinogram, leaf_major_pairs};
use crate::delivery::timeline::{EventKind, EventTimeline, EventValue, TimelineEvent};
use crate::domain::{LEAF_BANK, PlanRecord, RegistrationCorrection};
use crate::util::le::write_f64s;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Event value with the registration folded in.
///
/// Isocenter offsets are applied with per-axis signs (`isoX - x`, `isoY + y`,
/// `isoZ - z`); roll is added to the gantry angle.
pub fn corrected_value(event: &TimelineEvent, reg: &RegistrationCorrection) -> EventValue {
    let EventValue::Value(v) = event.value else {
        return EventValue::Unset;
    };
    EventValue::Value(match event.kind {
        EventKind::IsoX => v - reg.x,
        EventKind::IsoY => v + reg.y,
        EventKind::IsoZ => v - reg.z,
        EventKind::GantryAngle => v + reg.roll,
        _ => v,
    })
}

/// `plan.header`: events, per-leaf projection counts, then the plan scale.
pub fn header_text(
    plan: &PlanRecord,
    timeline: &EventTimeline,
    sinogram: &LeafSinogram,
    reg: &RegistrationCorrection,
) -> String {
    let mut kv = KeyValues::new();
    for (i, ev) in timeline.iter().enumerate() {
        let line = match corrected_value(ev, reg) {
            EventValue::Value(v) => format!("{} {} {}", ev.tau, ev.kind, v),
            EventValue::Unset => format!("{} {}", ev.tau, ev.kind),
        };
        kv.set(&format!("event.{i:02}"), line);
    }
    let active = sinogram.active_leaves();
    for leaf in 0..LEAF_BANK {
        let count = if active.contains(&leaf) {
            sinogram.projections()
        } else {
            0
        };
        kv.set(&format!("leaf.count.{leaf:02}"), count);
    }
    kv.set("scale", plan.scale);
    kv.into_string()
}

pub fn write_header(
    plan: &PlanRecord,
    timeline: &EventTimeline,
    sinogram: &LeafSinogram,
    reg: &RegistrationCorrection,
    path: &Path,
) -> io::Result<()> {
    std::fs::write(path, header_text(plan, timeline, sinogram, reg))
}

/// `plan.img`: leaf-major open/close pairs over the full projection range.
pub fn write_stream(sinogram: &LeafSinogram, path: &Path) -> io::Result<()> {
    let pairs = leaf_major_pairs(
        &sinogram.expand(),
        sinogram.projections(),
        sinogram.active_leaves(),
    );
    let mut w = BufWriter::new(File::create(path)?);
    write_f64s(&mut w, &pairs)?;
    w.flush()
}
