//! The volume-group builder (component 7): walks the parsed `Value` tree by
//! well-known key name and produces the immutable `VolumeGroup` model,
//! enforcing every invariant in the data model.

use std::collections::HashSet;

use crate::error::Error;
use crate::metadata::{find_section, find_value, Node, Value};
use crate::model::{LogicalVolume, PhysicalVolume, Segment, SegmentType, Stripe, VolumeGroup};

const SECTOR_SIZE: u64 = 512;

fn inconsistent(reason: impl Into<String>) -> Error {
    Error::Inconsistent {
        reason: reason.into(),
    }
}

fn require_int(body: &[Node], name: &str) -> Result<i64, Error> {
    find_value(body, name)
        .and_then(Value::as_integer)
        .ok_or_else(|| inconsistent(format!("missing or non-integer field '{name}'")))
}

fn require_u64(body: &[Node], name: &str) -> Result<u64, Error> {
    let v = require_int(body, name)?;
    u64::try_from(v).map_err(|_| inconsistent(format!("field '{name}' must be non-negative")))
}

fn optional_u64(body: &[Node], name: &str) -> Result<Option<u64>, Error> {
    match find_value(body, name) {
        None => Ok(None),
        Some(v) => {
            let i = v
                .as_integer()
                .ok_or_else(|| inconsistent(format!("field '{name}' must be an integer")))?;
            let u =
                u64::try_from(i).map_err(|_| inconsistent(format!("field '{name}' must be non-negative")))?;
            Ok(Some(u))
        }
    }
}

fn require_str(body: &[Node], name: &str) -> Result<String, Error> {
    find_value(body, name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| inconsistent(format!("missing or non-string field '{name}'")))
}

fn sectors_to_bytes(sectors: u64) -> u64 {
    sectors * SECTOR_SIZE
}

/// Builds the `VolumeGroup` model from a fully parsed textual-metadata tree.
pub fn build_volume_group(root: &[Node]) -> Result<VolumeGroup, Error> {
    let vg_sections: Vec<&Node> = root.iter().filter(|n| matches!(n, Node::Section(..))).collect();
    let vg_section = match vg_sections.as_slice() {
        [single] => *single,
        [] => return Err(inconsistent("textual metadata has no volume group section")),
        _ => return Err(inconsistent("textual metadata describes more than one volume group")),
    };
    let Node::Section(vg_name, body) = vg_section else {
        unreachable!("filtered to sections above");
    };

    let name = vg_name.trim().to_string();
    if name.is_empty() || name.len() > 127 || !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(inconsistent("volume group name is not printable ASCII of length <= 127"));
    }

    let id = require_str(body, "id")?;
    let seqno = require_u64(body, "seqno")?;
    let extent_size_sectors = require_u64(body, "extent_size")?;
    if extent_size_sectors == 0 || !extent_size_sectors.is_power_of_two() {
        return Err(inconsistent("extent_size must be a positive power of two (in sectors)"));
    }
    let extent_size = sectors_to_bytes(extent_size_sectors);

    let physical_volumes = build_physical_volumes(body)?;
    let mut pv_names = HashSet::new();
    let mut pv_ids = HashSet::new();
    for pv in &physical_volumes {
        if !pv_names.insert(pv.name.clone()) {
            return Err(inconsistent(format!("duplicate physical volume name '{}'", pv.name)));
        }
        if !pv_ids.insert(pv.id.clone()) {
            return Err(inconsistent(format!("duplicate physical volume id '{}'", pv.id)));
        }
    }

    let logical_volumes = build_logical_volumes(body, extent_size, &pv_names)?;

    log::debug!(
        "VolumeGroup: name: {}, seqno: {}, extent_size: {}, physical_volumes: {}, logical_volumes: {}",
        name,
        seqno,
        extent_size,
        physical_volumes.len(),
        logical_volumes.len()
    );
    let vg = VolumeGroup {
        name,
        id,
        seqno,
        extent_size,
        physical_volumes,
        logical_volumes,
    };
    tracing::trace!(?vg);
    Ok(vg)
}

fn build_physical_volumes(vg_body: &[Node]) -> Result<Vec<PhysicalVolume>, Error> {
    let Some(section) = find_section(vg_body, "physical_volumes") else {
        return Ok(Vec::new());
    };
    let mut pvs = Vec::new();
    for node in section {
        let Node::Section(pv_name, pv_body) = node else {
            continue;
        };
        let id = require_str(pv_body, "id")?;
        let device_path = require_str(pv_body, "device")?;
        let pe_start_sectors = require_u64(pv_body, "pe_start")?;
        let dev_size_sectors = require_u64(pv_body, "dev_size")?;
        let pv = PhysicalVolume {
            name: pv_name.clone(),
            id,
            device_path,
            size: sectors_to_bytes(dev_size_sectors),
            pe_start: sectors_to_bytes(pe_start_sectors),
        };
        tracing::trace!(?pv);
        pvs.push(pv);
    }
    Ok(pvs)
}

fn build_logical_volumes(
    vg_body: &[Node],
    extent_size: u64,
    pv_names: &HashSet<String>,
) -> Result<Vec<LogicalVolume>, Error> {
    let Some(section) = find_section(vg_body, "logical_volumes") else {
        return Ok(Vec::new());
    };
    let mut lvs = Vec::new();
    for node in section {
        let Node::Section(lv_name, lv_body) = node else {
            continue;
        };
        lvs.push(build_logical_volume(lv_name, lv_body, extent_size, pv_names)?);
    }
    Ok(lvs)
}

struct RawSegment {
    start_extent: u64,
    extent_count: u64,
    segment_type: String,
    stripe_count: Option<u64>,
    stripe_size_sectors: Option<u64>,
    stripes: Vec<(String, u64)>,
}

fn build_logical_volume(
    lv_name: &str,
    lv_body: &[Node],
    extent_size: u64,
    pv_names: &HashSet<String>,
) -> Result<LogicalVolume, Error> {
    let id = require_str(lv_body, "id")?;

    let mut raw_segments: Vec<RawSegment> = Vec::new();
    for node in lv_body {
        let Node::Section(seg_name, seg_body) = node else {
            continue;
        };
        if !seg_name.starts_with("segment") {
            continue;
        }
        let start_extent = require_u64(seg_body, "start_extent")?;
        let extent_count = require_u64(seg_body, "extent_count")?;
        let segment_type = require_str(seg_body, "type")?;
        let stripe_count = optional_u64(seg_body, "stripe_count")?;
        let stripe_size_sectors = optional_u64(seg_body, "stripe_size")?;
        let stripes_value = find_value(seg_body, "stripes");
        let mut stripes = Vec::new();
        if let Some(Value::Array(items)) = stripes_value {
            if items.len() % 2 != 0 {
                return Err(inconsistent(format!(
                    "segment '{seg_name}' stripes array has odd length"
                )));
            }
            let mut it = items.iter();
            while let (Some(pv), Some(offset)) = (it.next(), it.next()) {
                let pv_name = pv
                    .as_str()
                    .ok_or_else(|| inconsistent("stripe pv name must be a string"))?
                    .to_string();
                let pe_index = offset
                    .as_integer()
                    .ok_or_else(|| inconsistent("stripe pe offset must be an integer"))?;
                let pe_index = u64::try_from(pe_index)
                    .map_err(|_| inconsistent("stripe pe offset must be non-negative"))?;
                stripes.push((pv_name, pe_index));
            }
        }

        raw_segments.push(RawSegment {
            start_extent,
            extent_count,
            segment_type,
            stripe_count,
            stripe_size_sectors,
            stripes,
        });
    }
    raw_segments.sort_by_key(|s| s.start_extent);

    if let Some(unsupported) = raw_segments
        .iter()
        .find(|s| s.segment_type != "linear" && s.segment_type != "striped")
    {
        let unsupported_type = unsupported.segment_type.clone();
        let size = raw_segments
            .iter()
            .map(|s| s.extent_count * extent_size)
            .sum();
        log::debug!(
            "LogicalVolume '{lv_name}' has an unsupported segment type '{unsupported_type}'; reads will be rejected"
        );
        return Ok(LogicalVolume {
            name: lv_name.to_string(),
            id,
            size,
            segments: Vec::new(),
            unsupported_segment_type: Some(unsupported_type),
        });
    }

    let mut segments = Vec::with_capacity(raw_segments.len());
    let mut expected_start_extent = 0u64;
    for raw in raw_segments {
        if raw.start_extent != expected_start_extent {
            return Err(inconsistent(format!(
                "logical volume '{lv_name}' has a gap or overlap at extent {}",
                raw.start_extent
            )));
        }
        let start = raw.start_extent * extent_size;
        let size = raw.extent_count * extent_size;

        let (segment_type, stripe_size) = match raw.segment_type.as_str() {
            "linear" => {
                if raw.stripe_count.unwrap_or(1) != 1 {
                    return Err(inconsistent(format!(
                        "linear segment in '{lv_name}' must have stripe_count == 1"
                    )));
                }
                if raw.stripes.len() != 1 {
                    return Err(inconsistent(format!(
                        "linear segment in '{lv_name}' must have exactly one stripe"
                    )));
                }
                (SegmentType::Linear, extent_size)
            }
            "striped" => {
                let stripe_count = raw
                    .stripe_count
                    .ok_or_else(|| inconsistent("striped segment missing stripe_count"))?;
                if stripe_count < 2 {
                    return Err(inconsistent(format!(
                        "striped segment in '{lv_name}' must have stripe_count >= 2"
                    )));
                }
                if raw.stripes.len() as u64 != stripe_count {
                    return Err(inconsistent(format!(
                        "striped segment in '{lv_name}' stripe list length does not match stripe_count"
                    )));
                }
                let stripe_size_sectors = raw
                    .stripe_size_sectors
                    .ok_or_else(|| inconsistent("striped segment missing stripe_size"))?;
                if stripe_size_sectors == 0 {
                    return Err(inconsistent("striped segment stripe_size must be positive"));
                }
                let stripe_size = sectors_to_bytes(stripe_size_sectors);
                if stripe_size >= size || size % stripe_size != 0 {
                    return Err(inconsistent(format!(
                        "striped segment in '{lv_name}' stripe_size must be < segment size and divide it"
                    )));
                }
                if raw.extent_count % stripe_count != 0 {
                    return Err(inconsistent(format!(
                        "striped segment in '{lv_name}' extent_count must be divisible by stripe_count"
                    )));
                }
                (SegmentType::Striped, stripe_size)
            }
            other => unreachable!("unsupported type '{other}' handled above"),
        };

        let mut stripes = Vec::with_capacity(raw.stripes.len());
        for (pv_name, pe_index) in raw.stripes {
            if !pv_names.contains(&pv_name) {
                return Err(inconsistent(format!(
                    "segment in '{lv_name}' references unknown physical volume '{pv_name}'"
                )));
            }
            stripes.push(Stripe {
                pv_name,
                pe_offset: pe_index * extent_size,
            });
        }

        let segment = Segment {
            start,
            size,
            extent_count: raw.extent_count,
            segment_type,
            stripe_size,
            stripes,
        };
        tracing::trace!(?segment);
        segments.push(segment);
        expected_start_extent += raw.extent_count;
    }

    let total_size = segments.iter().map(|s| s.size).sum();

    log::debug!(
        "LogicalVolume: name: {}, size: {}, segments: {}",
        lv_name,
        total_size,
        segments.len()
    );
    Ok(LogicalVolume {
        name: lv_name.to_string(),
        id,
        size: total_size,
        segments,
        unsupported_segment_type: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata;

    fn sample_vg_text() -> &'static str {
        r#"
        vg0 {
            id = "vgid"
            seqno = 1
            extent_size = 8192
            physical_volumes {
                pv0 {
                    id = "pv0id"
                    device = "/dev/loop0"
                    status = ["ALLOCATABLE"]
                    pe_start = 2048
                    dev_size = 65536
                    pe_count = 7
                }
                pv1 {
                    id = "pv1id"
                    device = "/dev/loop1"
                    pe_start = 2048
                    dev_size = 65536
                    pe_count = 7
                }
            }
            logical_volumes {
                lv0 {
                    id = "lv0id"
                    status = ["READ", "WRITE"]
                    segment_count = 1
                    segment1 {
                        start_extent = 0
                        extent_count = 2
                        type = "linear"
                        stripe_count = 1
                        stripes = ["pv0", 0]
                    }
                }
                lv1 {
                    id = "lv1id"
                    segment_count = 1
                    segment1 {
                        start_extent = 0
                        extent_count = 4
                        type = "striped"
                        stripe_count = 2
                        stripe_size = 128
                        stripes = ["pv0", 1, "pv1", 0]
                    }
                }
            }
        }
        "#
    }

    #[test]
    fn builds_linear_and_striped() {
        let nodes = metadata::parse(sample_vg_text()).unwrap();
        let vg = build_volume_group(&nodes).unwrap();
        assert_eq!(vg.name, "vg0");
        assert_eq!(vg.extent_size, 8192 * 512);
        assert_eq!(vg.physical_volumes.len(), 2);

        let lv0 = vg.find_lv_by_name("lv0").unwrap();
        assert_eq!(lv0.size, 2 * vg.extent_size);
        assert_eq!(lv0.segments.len(), 1);
        assert_eq!(lv0.segments[0].segment_type, SegmentType::Linear);
        assert_eq!(lv0.segments[0].stripes.len(), 1);

        let lv1 = vg.find_lv_by_name("lv1").unwrap();
        assert_eq!(lv1.segments[0].segment_type, SegmentType::Striped);
        assert_eq!(lv1.segments[0].stripes.len(), 2);
        assert_eq!(lv1.segments[0].stripe_size, 128 * 512);
    }

    #[test]
    fn rejects_duplicate_pv_name() {
        let text = sample_vg_text().replace("pv1 {", "pv0 {");
        let nodes = metadata::parse(&text).unwrap();
        assert!(build_volume_group(&nodes).is_err());
    }

    #[test]
    fn marks_unsupported_segment_type() {
        let text = sample_vg_text().replace("type = \"striped\"", "type = \"mirror\"");
        let nodes = metadata::parse(&text).unwrap();
        let vg = build_volume_group(&nodes).unwrap();
        let lv1 = vg.find_lv_by_name("lv1").unwrap();
        assert_eq!(lv1.unsupported_segment_type.as_deref(), Some("mirror"));
        let lv0 = vg.find_lv_by_name("lv0").unwrap();
        assert!(lv0.unsupported_segment_type.is_none());
    }
}
