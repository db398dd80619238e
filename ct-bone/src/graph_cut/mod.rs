//! 以 sheetness 为边界项, 以种子标注为硬约束的二值图割.
//!
//! 每个标签独立建图求解, 源一侧的体素即该标签的前景掩膜.

use log::{debug, info, warn};
use ndarray::Array3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::graph_cut::*;
use crate::consts::mark::{MARK_BACKGROUND, MARK_UNMARKED};
use crate::consts::MASK_BACKGROUND;
use crate::data::morph::{fill_background_holes, label_components};
use crate::{BoneError, BoneResult, Connectivity, LabelSet, SeedState, Volume};

mod endosteal;
mod grid;
mod terms;

use grid::{Cap, GridGraph};
use terms::{distance_factor, quantize, terminal_caps, MAX_FINITE_CAP};

pub use endosteal::{segment_endosteal, EndostealConfig, EndostealSegmentation};
pub use terms::{BoundaryTerm, DataTerm};

/// 图割结果的可选后处理. 默认不做任何后处理.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PostProcess {
    /// 仅保留最大的若干个 26-连通前景分量. 含前景种子的分量总是保留.
    pub keep_largest_foreground: Option<usize>,

    /// 填充 6-连通背景空洞. 背景种子所在体素保持为背景.
    pub fill_background: bool,
}

/// 图割参数. 默认值见 [`crate::consts::graph_cut`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GraphCutConfig {
    /// 边界项权重 `lambda`, 越大分割越平滑.
    pub lambda: f64,

    /// 边界项的 sheetness 噪声尺度 `sigma`.
    pub sigma: f64,

    /// 图的邻域.
    pub connectivity: Connectivity,

    /// 边界项形式.
    pub boundary: BoundaryTerm,

    /// 未标注体素的数据项形式.
    pub data: DataTerm,

    /// 未标注体素数据项的权重.
    pub data_weight: f64,

    /// 浮点权重量化为整数容量时的放大倍数.
    pub weight_scale: f64,

    /// 后处理.
    pub post: PostProcess,

    /// 同时求解的标签个数上限. `None` 代表不限制.
    ///
    /// 每个标签同时持有一张完整的网格图 (每体素约 75 字节), 大体数据上应设为较小的值.
    /// 为 `Some(1)` 时依次求解.
    pub max_parallel_labels: Option<usize>,
}

impl Default for GraphCutConfig {
    fn default() -> Self {
        Self {
            lambda: LAMBDA,
            sigma: SIGMA,
            connectivity: Connectivity::default(),
            boundary: BoundaryTerm::default(),
            data: DataTerm::default(),
            data_weight: DATA_WEIGHT,
            weight_scale: WEIGHT_SCALE,
            post: PostProcess::default(),
            max_parallel_labels: None,
        }
    }
}

impl GraphCutConfig {
    /// 设置平滑项权重.
    #[inline]
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// 设置边界项噪声尺度.
    #[inline]
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    /// 设置邻域.
    #[inline]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// 设置边界项形式.
    #[inline]
    pub fn with_boundary(mut self, boundary: BoundaryTerm) -> Self {
        self.boundary = boundary;
        self
    }

    /// 设置数据项形式.
    #[inline]
    pub fn with_data_term(mut self, data: DataTerm) -> Self {
        self.data = data;
        self
    }

    /// 设置数据项权重.
    #[inline]
    pub fn with_data_weight(mut self, data_weight: f64) -> Self {
        self.data_weight = data_weight;
        self
    }

    /// 设置后处理.
    #[inline]
    pub fn with_post(mut self, post: PostProcess) -> Self {
        self.post = post;
        self
    }

    /// 设置同时求解的标签个数上限.
    #[inline]
    pub fn with_max_parallel_labels(mut self, n: Option<usize>) -> Self {
        self.max_parallel_labels = n;
        self
    }

    /// 检查参数合法性.
    ///
    /// # 注意
    ///
    /// 放大后的权重不得超过单条边容量上限, 否则整数流量可能溢出.
    pub fn validate(&self) -> BoneResult<()> {
        if !self.lambda.is_finite() || self.lambda <= 0.0 {
            return Err(BoneError::InvalidLambda(self.lambda));
        }
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(BoneError::NonPositiveSigma(self.sigma));
        }
        if !self.weight_scale.is_finite() || self.weight_scale <= 0.0 {
            return Err(BoneError::InvalidWeight {
                name: "weight_scale",
                value: self.weight_scale,
            });
        }
        if !self.data_weight.is_finite() || self.data_weight < 0.0 {
            return Err(BoneError::InvalidWeight {
                name: "data_weight",
                value: self.data_weight,
            });
        }
        if self.lambda * self.weight_scale > MAX_FINITE_CAP {
            return Err(BoneError::InvalidLambda(self.lambda));
        }
        if self.data_weight * self.weight_scale > MAX_FINITE_CAP {
            return Err(BoneError::InvalidWeight {
                name: "data_weight",
                value: self.data_weight,
            });
        }
        if let DataTerm::HuThreshold(t) = self.data {
            if !t.is_finite() {
                return Err(BoneError::InvalidWeight {
                    name: "hu_threshold",
                    value: t,
                });
            }
        }
        if self.max_parallel_labels == Some(0) {
            return Err(BoneError::InvalidWeight {
                name: "max_parallel_labels",
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// 单个标签的图割结果.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// 二值前景掩膜, 与输入几何一致.
    pub mask: Volume<u8>,

    /// 最大流 (按放大倍数还原为浮点权重), 即最小割的能量.
    pub max_flow: f64,

    /// 前景种子个数.
    pub foreground_seeds: usize,
}

/// 以默认参数和给定的 `lambda`, `sigma` 分割标签码为 `label` 的骨骼.
///
/// 见 [`segment_label_with`].
#[inline]
pub fn segment_label(
    sheetness: &Volume<f32>,
    marking: &Volume<u8>,
    label: u8,
    lambda: f64,
    sigma: f64,
) -> BoneResult<Volume<u8>> {
    let config = GraphCutConfig::default()
        .with_lambda(lambda)
        .with_sigma(sigma);
    Ok(segment_label_with(sheetness, marking, None, label, &config)?.mask)
}

/// 分割标签码为 `label` 的骨骼.
///
/// `marking` 中等于 `label` 的体素为前景种子, 其余非零体素为背景种子.
/// `hu` 为 HU 体数据, 仅 [`DataTerm::HuThreshold`] 需要.
///
/// # 注意
///
/// 1. 前景种子总在结果中, 背景种子总不在结果中.
/// 2. 没有前景种子时返回全零掩膜, 不报错.
/// 3. `label` 不能是 0 或 255, 否则返回 [`BoneError::InvalidLabelCode`].
/// 4. 数据项需要 HU 体数据而 `hu` 为 `None` 时返回 [`BoneError::MissingInput`].
pub fn segment_label_with(
    sheetness: &Volume<f32>,
    marking: &Volume<u8>,
    hu: Option<&Volume<f32>>,
    label: u8,
    config: &GraphCutConfig,
) -> BoneResult<Segmentation> {
    sheetness.same_geometry(marking)?;
    if let Some(hu) = hu {
        sheetness.same_geometry(hu)?;
    }
    config.validate()?;
    if config.data.needs_hu() && hu.is_none() {
        return Err(BoneError::MissingInput("hu"));
    }
    if label == MARK_UNMARKED || label == MARK_BACKGROUND {
        return Err(BoneError::InvalidLabelCode(label));
    }

    let foreground_seeds = marking.data().iter().filter(|m| **m == label).count();
    if foreground_seeds == 0 {
        warn!("label {label} has no foreground seed, result is empty");
        return Ok(Segmentation {
            mask: marking.zeros_like(),
            max_flow: 0.0,
            foreground_seeds,
        });
    }

    let mut graph = build_graph(sheetness, marking, hu, label, config);
    let flow = graph.maxflow();
    let cut: Vec<u8> = (0..graph.len())
        .map(|v| u8::from(graph.is_source(v)))
        .collect();
    let mask = sheetness.like(Array3::from_shape_vec(sheetness.shape(), cut)?)?;
    let mask = post_process(mask, marking, label, &config.post);
    debug!(
        "label {label}: {foreground_seeds} seeds, {} foreground voxels, flow = {flow}",
        mask.count_nonzero()
    );
    Ok(Segmentation {
        mask,
        max_flow: flow as f64 / config.weight_scale,
        foreground_seeds,
    })
}

/// 按边界项与数据项建立网格图.
fn build_graph(
    sheetness: &Volume<f32>,
    marking: &Volume<u8>,
    hu: Option<&Volume<f32>>,
    label: u8,
    config: &GraphCutConfig,
) -> GridGraph {
    let mut graph = GridGraph::new(sheetness.shape(), config.connectivity);
    let offsets = config.connectivity.offsets();
    let factors: Vec<f64> = offsets.iter().map(|o| distance_factor(*o)).collect();
    let values: Vec<f32> = sheetness.data().iter().copied().collect();
    let (lambda, sigma, scale) = (config.lambda, config.sigma, config.weight_scale);
    let boundary = config.boundary;

    let capacity = |v: usize, d: usize| -> Cap {
        let Some(n) = sheetness.offset(sheetness.position(v), offsets[d]) else {
            return 0;
        };
        let (p, q) = (values[v] as f64, sheetness[n] as f64);
        quantize(boundary.weight(p, q, lambda, sigma) * factors[d], scale)
    };
    fill_edges(graph.edges_mut(), offsets.len(), capacity);

    let data_cap = quantize(config.data_weight, scale);
    let hu: Vec<f32> = hu.map_or_else(Vec::new, |h| h.data().iter().copied().collect());
    for (v, (m, s)) in marking.data().iter().zip(values.iter()).enumerate() {
        let h = hu.get(v).copied().unwrap_or_default();
        let unmarked = config.data.caps(*s, h, data_cap);
        let (source, sink) = terminal_caps(SeedState::classify(*m, label), unmarked);
        graph.set_terminal(v, source, sink);
    }
    graph
}

/// 按种子约束做后处理.
fn post_process(
    mut mask: Volume<u8>,
    marking: &Volume<u8>,
    label: u8,
    post: &PostProcess,
) -> Volume<u8> {
    if let Some(n) = post.keep_largest_foreground {
        let comps = label_components(&mask, Connectivity::TwentySix, |p| *p != 0);
        let mut keep = vec![false; comps.sizes.len() + 1];
        for id in comps.by_size_desc().into_iter().take(n) {
            keep[id as usize] = true;
        }
        for (id, m) in comps.labels.iter().zip(marking.data().iter()) {
            if *m == label && *id != 0 {
                keep[*id as usize] = true;
            }
        }
        mask.data_mut()
            .iter_mut()
            .zip(comps.labels.iter())
            .for_each(|(p, id)| *p = u8::from(keep[*id as usize]));
    }
    if post.fill_background {
        mask = fill_background_holes(&mask, Connectivity::Six);
        mask.data_mut()
            .iter_mut()
            .zip(marking.data().iter())
            .filter(|(_, m)| matches!(SeedState::classify(**m, label), SeedState::Background))
            .for_each(|(p, _)| *p = MASK_BACKGROUND);
    }
    mask
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 借助 `rayon` 并行填充所有节点的出边容量.
        fn fill_edges(
            edges: &mut [Cap],
            degree: usize,
            capacity: impl Fn(usize, usize) -> Cap + Sync,
        ) {
            edges
                .par_chunks_mut(degree)
                .enumerate()
                .for_each(|(v, row)| {
                    row.iter_mut().enumerate().for_each(|(d, c)| *c = capacity(v, d));
                });
        }

        /// 借助 `rayon` 分批并行分割所有标签, 结果按 `labels` 顺序排列.
        ///
        /// # 注意
        ///
        /// 每批至多 [`GraphCutConfig::max_parallel_labels`] 个标签, 每个标签同时持有
        /// 一张完整的网格图, 内存占用随批大小线性增长.
        pub fn segment_labels(
            sheetness: &Volume<f32>,
            marking: &Volume<u8>,
            hu: Option<&Volume<f32>>,
            labels: &LabelSet,
            config: &GraphCutConfig,
        ) -> BoneResult<Vec<(u8, Volume<u8>)>> {
            config.validate()?;
            let labels: Vec<(&str, u8)> = labels.iter().collect();
            let batch = config.max_parallel_labels.unwrap_or(labels.len()).max(1);
            let mut out = Vec::with_capacity(labels.len());
            for chunk in labels.chunks(batch) {
                let masks = chunk
                    .par_iter()
                    .map(|(name, code)| segment_one(sheetness, marking, hu, name, *code, config))
                    .collect::<BoneResult<Vec<_>>>()?;
                out.extend(masks);
            }
            Ok(out)
        }
    } else {
        /// 依次填充所有节点的出边容量.
        fn fill_edges(edges: &mut [Cap], degree: usize, capacity: impl Fn(usize, usize) -> Cap) {
            edges.chunks_mut(degree).enumerate().for_each(|(v, row)| {
                row.iter_mut().enumerate().for_each(|(d, c)| *c = capacity(v, d));
            });
        }

        /// 依次分割所有标签, 结果按 `labels` 顺序排列.
        pub fn segment_labels(
            sheetness: &Volume<f32>,
            marking: &Volume<u8>,
            hu: Option<&Volume<f32>>,
            labels: &LabelSet,
            config: &GraphCutConfig,
        ) -> BoneResult<Vec<(u8, Volume<u8>)>> {
            config.validate()?;
            labels
                .iter()
                .map(|(name, code)| segment_one(sheetness, marking, hu, name, code, config))
                .collect()
        }
    }
}

fn segment_one(
    sheetness: &Volume<f32>,
    marking: &Volume<u8>,
    hu: Option<&Volume<f32>>,
    name: &str,
    code: u8,
    config: &GraphCutConfig,
) -> BoneResult<(u8, Volume<u8>)> {
    let seg = segment_label_with(sheetness, marking, hu, code, config)?;
    info!(
        "{name} ({code}): {} voxels, energy {:.3}",
        seg.mask.count_nonzero(),
        seg.max_flow
    );
    Ok((code, seg.mask))
}
