//! 程序运行函数.

use ct_bone::prelude::*;
use log::info;
use utils::loader::ScanFiles;

/// 打开皮肤掩膜. 文件不存在时由 HU 体数据生成并写出.
fn skin_or_generate(
    files: &ScanFiles,
    hu: &Volume<f32>,
    config: &SheetnessConfig,
) -> BoneResult<Volume<u8>> {
    if files.skin.is_file() {
        return Volume::<u8>::open(&files.skin);
    }
    info!("{} not found, generating skin mask", files.skin.display());
    let skin = skin_mask(hu, config.air_threshold, config.metal_threshold)?;
    skin.save(&files.skin)?;
    Ok(skin)
}

/// 实际运行.
pub fn run(files: &ScanFiles) -> BoneResult<()> {
    let hu = Volume::<f32>::open(&files.hu)?;
    info!(
        "loaded {}: shape {:?}, spacing {:?}",
        files.hu.display(),
        hu.shape(),
        hu.spacing()
    );

    let sheet_config = SheetnessConfig::default();
    let skin = skin_or_generate(files, &hu, &sheet_config)?;
    let sheet = enhance_sheetness(&hu, &skin, &sheet_config)?;
    sheet.save(&files.sheet)?;
    info!("sheetness written to {}", files.sheet.display());

    let marking = Volume::<u8>::open(&files.mark)?;
    let labels = LabelSet::bones();
    let config = GraphCutConfig::default();
    let peri = segment_and_combine(&sheet, &marking, Some(&hu), &labels, &config)?;
    peri.save(&files.peri)
}
