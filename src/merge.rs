use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::segmentation::{Frame, SegmentNumberAllocator, SegmentationObject};

/// Plan key whose directives apply to every segmentation object.
pub const WILDCARD_KEY: &str = "all";

/// Combine the named source segments into one new named segment via
/// per-slice union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDirective {
    pub old_objects: Vec<String>,
    pub new_object: String,
}

/// Merge directives keyed by segmentation object key, with the wildcard
/// key `"all"` applying to every object. Folder-specific directives run
/// before wildcard directives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergePlan {
    #[serde(default)]
    pub merge_plan: BTreeMap<String, Vec<MergeDirective>>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.merge_plan.values().all(|directives| directives.is_empty())
    }

    /// Directives applying to `object_key`: its own list first, then the
    /// wildcard list.
    pub fn directives_for(&self, object_key: &str) -> Vec<&MergeDirective> {
        let mut directives: Vec<&MergeDirective> = Vec::new();
        if let Some(specific) = self.merge_plan.get(object_key) {
            directives.extend(specific);
        }
        if object_key != WILDCARD_KEY {
            if let Some(global) = self.merge_plan.get(WILDCARD_KEY) {
                directives.extend(global);
            }
        }
        directives
    }
}

/// Result of applying one directive to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New frames appended under one fresh segment number.
    Applied {
        frames_added: usize,
        segment_number: u16,
    },
    /// Empty source list or empty target name.
    SkippedInvalid,
    /// A segment with the target name already exists; re-running a plan
    /// must not duplicate merged segments.
    SkippedExisting,
    /// Every candidate slice summed to zero; nothing was emitted. The
    /// directive still consumed a segment number.
    Empty,
}

struct MergeGroup {
    ref_sop_uid: String,
    image_position: Option<[f64; 3]>,
    sum: Array2<u8>,
}

/// Apply every directive in order, sharing one allocator so directives get
/// strictly increasing segment numbers. Returns the total frames added.
pub fn apply_directives(
    object: &mut SegmentationObject,
    directives: &[&MergeDirective],
) -> usize {
    let mut alloc = SegmentNumberAllocator::for_object(object);
    let mut total = 0;
    for directive in directives {
        if let MergeOutcome::Applied { frames_added, .. } =
            apply_directive(object, directive, &mut alloc)
        {
            total += frames_added;
        }
    }
    total
}

/// Apply one merge directive to an object.
///
/// Frames whose segment name is in `old_objects` are grouped by
/// `(slice identity, in-plane position)`; frames without a slice identity
/// cannot be placed unambiguously and are excluded. Each group's label
/// arrays are summed elementwise and clipped to [0, 1], so overlapping
/// source masks still produce a binary result. All-zero groups are
/// discarded. Existing frames are never modified or removed.
pub fn apply_directive(
    object: &mut SegmentationObject,
    directive: &MergeDirective,
    alloc: &mut SegmentNumberAllocator,
) -> MergeOutcome {
    if directive.old_objects.is_empty() || directive.new_object.is_empty() {
        warn!(?directive, "invalid merge directive, skipping");
        return MergeOutcome::SkippedInvalid;
    }
    if object.has_segment_name(&directive.new_object) {
        warn!(
            new_object = %directive.new_object,
            "segment already exists, skipping directive (merge plans are re-run safe)"
        );
        return MergeOutcome::SkippedExisting;
    }

    let mut groups: Vec<MergeGroup> = Vec::new();
    for frame in &object.frames {
        let Some(name) = &frame.segment_name else {
            continue;
        };
        if !directive.old_objects.contains(name) {
            continue;
        }
        let Some(uid) = &frame.ref_sop_uid else {
            continue;
        };
        match groups
            .iter_mut()
            .find(|g| g.ref_sop_uid == *uid && g.image_position == frame.image_position)
        {
            Some(group) => {
                group
                    .sum
                    .zip_mut_with(&frame.data, |a, &b| *a = a.saturating_add(b));
            }
            None => groups.push(MergeGroup {
                ref_sop_uid: uid.clone(),
                image_position: frame.image_position,
                sum: frame.data.clone(),
            }),
        }
    }

    let segment_number = alloc.allocate();

    for group in &mut groups {
        group.sum.mapv_inplace(|v| v.min(1));
    }
    groups.retain(|group| group.sum.iter().any(|&v| v != 0));

    if groups.is_empty() {
        info!(
            new_object = %directive.new_object,
            old_objects = ?directive.old_objects,
            "merge produced no foreground, nothing emitted"
        );
        return MergeOutcome::Empty;
    }

    let start_index = object.frames.len();
    let frames_added = groups.len();
    for (offset, group) in groups.into_iter().enumerate() {
        object.frames.push(Frame {
            frame_index: start_index + offset,
            segment_number: Some(segment_number),
            segment_name: Some(directive.new_object.clone()),
            segment_color: None,
            image_position: group.image_position,
            ref_sop_uid: Some(group.ref_sop_uid),
            data: group.sum,
        });
    }

    info!(
        new_object = %directive.new_object,
        old_objects = ?directive.old_objects,
        segment_number,
        frames_added,
        "merged segmentation objects"
    );
    MergeOutcome::Applied {
        frames_added,
        segment_number,
    }
}
