//! 运行时错误.

use crate::Idx3d;

/// 增强、分割或合并过程中的错误.
///
/// 前置条件违例 (形状/分辨率不一致等) 与数值退化 (非正尺度等) 都是致命的,
/// 当前操作直接终止, 不产生部分结果. 种子缺失 **不是** 错误, 见 [`crate::segment_label`].
#[derive(Debug, thiserror::Error)]
pub enum BoneError {
    /// 体数据形状不一致.
    #[error("volume shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// 参考体数据的形状.
        expected: Idx3d,
        /// 实际体数据的形状.
        found: Idx3d,
    },

    /// 体素分辨率不一致.
    #[error("voxel spacing mismatch: expected {expected:?}, found {found:?}")]
    SpacingMismatch {
        /// 参考体数据的分辨率.
        expected: [f64; 3],
        /// 实际体数据的分辨率.
        found: [f64; 3],
    },

    /// 体素分辨率非有限或非正.
    #[error("invalid voxel spacing {0:?}")]
    InvalidSpacing([f64; 3]),

    /// 尺度 (sigma) 非有限或非正.
    #[error("sigma must be finite and positive, got {0}")]
    NonPositiveSigma(f64),

    /// 尺度空间为空.
    #[error("at least one scale is required")]
    NoScales,

    /// 平滑项权重非有限或非正.
    #[error("lambda must be finite and positive, got {0}")]
    InvalidLambda(f64),

    /// 其它权重参数非法.
    #[error("invalid weight `{name}` = {value}")]
    InvalidWeight {
        /// 参数名.
        name: &'static str,
        /// 参数值.
        value: f64,
    },

    /// 空气阈值不低于金属阈值.
    #[error("air threshold {air} must be lower than metal threshold {metal}")]
    InvalidThresholds {
        /// 空气阈值.
        air: f64,
        /// 金属阈值.
        metal: f64,
    },

    /// 标签码为 0 或保留值.
    #[error("invalid label code {0}")]
    InvalidLabelCode(u8),

    /// 标签集合非法.
    #[error("invalid label set: {0}")]
    InvalidLabelSet(String),

    /// 当前参数需要的输入体数据缺失.
    #[error("missing input volume `{0}`")]
    MissingInput(&'static str),

    /// nifti 文件读写错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 数组形状错误.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// 增强 / 分割 / 合并运行时结果.
pub type BoneResult<T> = Result<T, BoneError>;
