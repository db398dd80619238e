//! 🦴欢迎光临🦴
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;
pub use crate::{BoneError, BoneResult};

pub use crate::data::distance::signed_distance;
pub use crate::data::morph::{fill_background_holes, keep_largest_components, largest_component};
pub use crate::data::{BoneLabel, Connectivity, LabelSet, SeedState, Volume};

pub use crate::consts::mark::{MARK_BACKGROUND, MARK_UNMARKED};
pub use crate::consts::{LABEL_BACKGROUND, MASK_BACKGROUND, MASK_FOREGROUND};

pub use crate::sheetness::{
    enhance_sheetness, skin_mask, MeasureConfig, NoiseScale, Reduction, SheetnessConfig,
    SigmaSpacing,
};

pub use crate::graph_cut::{
    segment_endosteal, segment_label, segment_label_with, segment_labels, BoundaryTerm,
    DataTerm, EndostealConfig, EndostealSegmentation, GraphCutConfig, PostProcess, Segmentation,
};

pub use crate::{combine_labels, segment_and_combine};
