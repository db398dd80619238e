#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 CT 扫描中骨骼 (股骨, 骨盆, 骶骨, 腰椎) 的片状增强与多标签图割分割.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 流程
//!
//! 1. HU 体数据经过多尺度 Hessian 片状增强 ([`enhance_sheetness`]), 得到 sheetness 体数据.
//! 2. 对每个骨骼标签, 以 sheetness 为边界项、以种子标注体数据为硬约束,
//!   独立运行一次二值图割 ([`segment_label`]).
//! 3. 按固定标签顺序合并所有二值掩膜 ([`combine_labels`]), 先写入者优先.
//! 4. (可选) 在合并后的骨外膜掩膜内区分皮质骨与松质骨 ([`segment_endosteal`]).
//!
//! # 注意
//!
//! 1. 所有参与同一次计算的体数据必须形状与体素分辨率一致, 否则返回
//!   [`BoneError::ShapeMismatch`] 或 [`BoneError::SpacingMismatch`].
//! 2. 核心算法内部不做任何文件 I/O. 读写 nifti 文件由 [`Volume::open`] 和
//!   `Volume::save` 在边界上完成.
//! 3. 相同输入保证得到逐位一致的输出 (无论是否启用 `rayon` feature).
//!
//! # 模块
//!
//! ### 体数据 ✅
//!
//! 带分辨率和原点的 3D 体素网格, 越界安全的邻域访问, 三维形态学工具.
//!
//! 实现位于 `ct-bone/src/data`.
//!
//! ### 多尺度 Hessian 片状增强 ✅
//!
//! 高斯导数核计算 Hessian, 闭式求解对称 3x3 特征值, Calgary 片状度量,
//! 尺度空间最大值归约, 空气/金属/皮肤掩膜与迹噪声抑制.
//!
//! 实现位于 `ct-bone/src/sheetness`.
//!
//! ### 种子图割 ✅
//!
//! 隐式网格图上的 Boykov-Kolmogorov 最大流, 整数容量, 确定性遍历顺序.
//!
//! 实现位于 `ct-bone/src/graph_cut`.
//!
//! ### 标签合并 ✅
//!
//! 实现位于 `ct-bone/src/combine.rs`.
//!
//! ### 皮质骨 / 松质骨分割 ✅
//!
//! 以骨外膜掩膜的带符号距离图给出数据项, 在掩膜内再做一次二值图割.
//!
//! 实现位于 `ct-bone/src/graph_cut/endosteal.rs` 和 `ct-bone/src/data/distance.rs`.

/// 三维索引 `(z, y, x)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 按 feature 选择并行或串行的 `ndarray::Zip::for_each`.
macro_rules! zip_for_each {
    ($zip: expr, $f: expr) => {{
        #[cfg(feature = "rayon")]
        let r = $zip.par_for_each($f);
        #[cfg(not(feature = "rayon"))]
        let r = $zip.for_each($f);
        r
    }};
}

/// 按 feature 选择并行或串行的 `ndarray::Zip::map_collect`.
macro_rules! zip_map_collect {
    ($zip: expr, $f: expr) => {{
        #[cfg(feature = "rayon")]
        let r = $zip.par_map_collect($f);
        #[cfg(not(feature = "rayon"))]
        let r = $zip.map_collect($f);
        r
    }};
}

pub mod consts;

mod error;

pub use error::{BoneError, BoneResult};

/// 3D 体数据基础结构.
pub mod data;

pub use data::{BoneLabel, Connectivity, LabelSet, SeedState, Volume};

pub mod sheetness;

pub use sheetness::{enhance_sheetness, skin_mask, SheetnessConfig};

pub mod graph_cut;

pub use graph_cut::{
    segment_endosteal, segment_label, segment_label_with, segment_labels, EndostealConfig,
    GraphCutConfig,
};

mod combine;

pub use combine::{combine_labels, segment_and_combine};

pub mod prelude;
