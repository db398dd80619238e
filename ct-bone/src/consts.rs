//! 通用常量.

/// 种子标注体数据中的取值.
pub mod mark {
    /// 未标注体素.
    pub const MARK_UNMARKED: u8 = 0;

    /// 显式背景种子. 任何非零且不等于目标标签码的标注值都被视为背景种子,
    /// 该值只是一个保留的专用背景码.
    pub const MARK_BACKGROUND: u8 = u8::MAX;

    /// 体素是否被标注 (前景或背景种子)?
    #[inline]
    pub const fn is_marked(m: u8) -> bool {
        m != MARK_UNMARKED
    }
}

/// 多标签分割结果中, 背景体素的值.
pub const LABEL_BACKGROUND: u8 = 0;

/// 二值掩膜中前景体素的值.
pub const MASK_FOREGROUND: u8 = 1;

/// 二值掩膜中背景体素的值.
pub const MASK_BACKGROUND: u8 = 0;

/// 骨骼标签个数.
pub const BONE_LABEL_COUNT: usize = 10;

/// 片状增强的默认参数.
pub mod sheetness {
    /// 默认尺度个数.
    pub const NUMBER_OF_SIGMA: usize = 2;

    /// 默认最小尺度 (mm).
    pub const MIN_SIGMA: f64 = 0.5;

    /// 默认最大尺度 (mm).
    pub const MAX_SIGMA: f64 = 1.0;

    /// 低于该 HU 值的体素被视为空气.
    pub const AIR_THRESHOLD: f64 = -400.0;

    /// 高于该 HU 值的体素被视为金属.
    pub const METAL_THRESHOLD: f64 = 1200.0;

    /// Hessian 迹噪声抑制权重.
    pub const TRACE_WEIGHT: f64 = 0.05;

    /// 自适应噪声尺度 `c` 相对最大 Frobenius 范数的权重.
    pub const FROBENIUS_WEIGHT: f64 = 0.05;

    /// Calgary 度量中 `R_bone` 的灵敏度.
    pub const ALPHA: f64 = 0.5;

    /// 被掩膜排除的体素 (空气, 金属, 体外) 的响应值.
    pub const SENTINEL: f32 = 0.0;
}

/// 图割的默认参数.
pub mod graph_cut {
    /// 默认平滑项权重.
    pub const LAMBDA: f64 = 50.0;

    /// 默认边界项噪声尺度.
    pub const SIGMA: f64 = 0.25;

    /// 未标注体素数据项的权重.
    pub const DATA_WEIGHT: f64 = 1.0;

    /// 浮点权重量化为整数容量时的放大倍数.
    pub const WEIGHT_SCALE: f64 = 1000.0;

    /// HU 数据项的骨阈值.
    pub const HU_THRESHOLD: f64 = 250.0;
}

/// 皮质骨 / 松质骨 (骨内膜) 分割的默认参数.
pub mod endosteal {
    /// 平滑项权重.
    pub const LAMBDA: f64 = 5.0;

    /// 边界项噪声尺度.
    pub const SIGMA: f64 = 0.2;

    /// 到骨外膜距离 (毫米) 小于该值的体素必为皮质骨.
    pub const MIN_DISTANCE: f64 = 1.0;

    /// 到骨外膜距离 (毫米) 大于该值的体素倾向松质骨.
    pub const MAX_DISTANCE: f64 = 2.0;

    /// 皮质骨标签码.
    pub const CORTICAL_LABEL: u8 = 1;

    /// 松质骨标签码.
    pub const CANCELLOUS_LABEL: u8 = 2;
}
