//! 程序运行函数.

use ct_bone::prelude::*;
use log::info;
use utils::loader::ScanFiles;

/// 实际运行. `(lower, upper)` 为视作骨骼的标签码区间.
pub fn run(files: &ScanFiles, (lower, upper): (u8, u8)) -> BoneResult<()> {
    let sheet = Volume::<f32>::open(&files.sheet)?;
    let peri = Volume::<u8>::open(&files.peri)?;
    let mask = peri.map(|v| u8::from((lower..=upper).contains(v)));
    info!(
        "loaded {}: shape {:?}, {} bone voxels",
        files.peri.display(),
        peri.shape(),
        mask.count_nonzero()
    );

    let seg = segment_endosteal(&sheet, &mask, &EndostealConfig::default())?;
    info!("max flow {:.3}", seg.max_flow);
    seg.labels.save(&files.endo)
}
