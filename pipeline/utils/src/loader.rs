//! 单个扫描相关文件的路径约定.

use std::env;
use std::path::{Path, PathBuf};

/// 获取扫描数据所在目录.
///
/// 1. 若环境变量 `$BONE_MODEL_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/models`.
///
/// 两者都无法获得时返回 `None`.
pub fn model_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("BONE_MODEL_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.extend(["dataset", "models"]);
            Some(ans)
        }
    }
}

/// 同一扫描的输入与输出文件. 均位于同一目录, 以 `<base>` 为前缀.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFiles {
    /// HU 体数据 `<base>.nii`.
    pub hu: PathBuf,

    /// 皮肤掩膜 `<base>_SKIN.nii`.
    pub skin: PathBuf,

    /// 种子标注 `<base>_MARK.nii`.
    pub mark: PathBuf,

    /// sheetness 输出 `<base>_SHEET.nii`.
    pub sheet: PathBuf,

    /// 多标签分割输出 `<base>_PERI.nii`.
    pub peri: PathBuf,

    /// 皮质骨 / 松质骨分割输出 `<base>_ENDO.nii`.
    pub endo: PathBuf,
}

impl ScanFiles {
    /// 以目录 `dir` 和扫描名 `base` 生成所有路径.
    pub fn new<P: AsRef<Path>>(dir: P, base: &str) -> Self {
        let dir = dir.as_ref();
        let file = |suffix: &str| dir.join(format!("{base}{suffix}.nii"));
        Self {
            hu: file(""),
            skin: file("_SKIN"),
            mark: file("_MARK"),
            sheet: file("_SHEET"),
            peri: file("_PERI"),
            endo: file("_ENDO"),
        }
    }

    /// 以 [`model_dir_from_env_or_home`] 为目录生成所有路径.
    #[inline]
    pub fn from_env_or_home(base: &str) -> Option<Self> {
        model_dir_from_env_or_home().map(|d| Self::new(d, base))
    }
}
