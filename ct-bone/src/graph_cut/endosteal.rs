//! 骨外膜掩膜内的皮质骨 / 松质骨二分.
//!
//! 掩膜外的体素硬连汇点且不参与平滑项. 距骨外膜不足 `min_distance` 的体素硬连源点,
//! 超过 `max_distance` 的体素倾向汇点, 其余体素两端等权. 源一侧为皮质骨, 汇一侧为松质骨.

use log::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::grid::{Cap, GridGraph, INFINITE};
use super::terms::{distance_factor, quantize, BoundaryTerm, MAX_FINITE_CAP};
use super::fill_edges;
use crate::consts::endosteal::*;
use crate::consts::graph_cut::{DATA_WEIGHT, WEIGHT_SCALE};
use crate::consts::LABEL_BACKGROUND;
use crate::data::distance::signed_distance;
use crate::{BoneError, BoneResult, Connectivity, Volume};

/// 骨内膜分割参数. 默认值见 [`crate::consts::endosteal`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EndostealConfig {
    /// 平滑项权重.
    pub lambda: f64,

    /// 边界项噪声尺度.
    pub sigma: f64,

    /// 到骨外膜的距离 (毫米) 小于该值的掩膜内体素必为皮质骨.
    pub min_distance: f64,

    /// 到骨外膜的距离 (毫米) 大于该值的掩膜内体素只连向汇点.
    pub max_distance: f64,

    /// 皮质骨标签码.
    pub cortical_label: u8,

    /// 松质骨标签码.
    pub cancellous_label: u8,

    /// 图的邻域.
    pub connectivity: Connectivity,

    /// 数据项权重.
    pub data_weight: f64,

    /// 浮点权重量化为整数容量时的放大倍数.
    pub weight_scale: f64,
}

impl Default for EndostealConfig {
    fn default() -> Self {
        Self {
            lambda: LAMBDA,
            sigma: SIGMA,
            min_distance: MIN_DISTANCE,
            max_distance: MAX_DISTANCE,
            cortical_label: CORTICAL_LABEL,
            cancellous_label: CANCELLOUS_LABEL,
            connectivity: Connectivity::default(),
            data_weight: DATA_WEIGHT,
            weight_scale: WEIGHT_SCALE,
        }
    }
}

impl EndostealConfig {
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

    /// 设置距离带 `[min_distance, max_distance]`.
    #[inline]
    pub fn with_distances(mut self, min_distance: f64, max_distance: f64) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    /// 设置皮质骨与松质骨的标签码.
    #[inline]
    pub fn with_labels(mut self, cortical: u8, cancellous: u8) -> Self {
        self.cortical_label = cortical;
        self.cancellous_label = cancellous;
        self
    }

    /// 检查参数合法性.
    pub fn validate(&self) -> BoneResult<()> {
        if !self.lambda.is_finite()
            || self.lambda <= 0.0
            || self.lambda * self.weight_scale > MAX_FINITE_CAP
        {
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
        if !self.data_weight.is_finite()
            || self.data_weight < 0.0
            || self.data_weight * self.weight_scale > MAX_FINITE_CAP
        {
            return Err(BoneError::InvalidWeight {
                name: "data_weight",
                value: self.data_weight,
            });
        }
        if !self.min_distance.is_finite() || self.min_distance < 0.0 {
            return Err(BoneError::InvalidWeight {
                name: "min_distance",
                value: self.min_distance,
            });
        }
        if !self.max_distance.is_finite() || self.max_distance < self.min_distance {
            return Err(BoneError::InvalidWeight {
                name: "max_distance",
                value: self.max_distance,
            });
        }
        for code in [self.cortical_label, self.cancellous_label] {
            if code == LABEL_BACKGROUND {
                return Err(BoneError::InvalidLabelCode(code));
            }
        }
        if self.cortical_label == self.cancellous_label {
            return Err(BoneError::InvalidLabelSet(format!(
                "cortical and cancellous share code {}",
                self.cortical_label
            )));
        }
        Ok(())
    }
}

/// 骨内膜分割结果.
#[derive(Debug, Clone)]
pub struct EndostealSegmentation {
    /// 掩膜外为 0, 掩膜内为皮质骨或松质骨标签码.
    pub labels: Volume<u8>,

    /// 最大流 (按放大倍数还原为浮点权重).
    pub max_flow: f64,

    /// 皮质骨体素个数.
    pub cortical: usize,

    /// 松质骨体素个数.
    pub cancellous: usize,
}

/// 在骨外膜掩膜 `mask` (非零为骨) 内将骨骼分为皮质骨与松质骨.
///
/// `input` 为边界项使用的体数据, 通常是 sheetness.
/// 到骨外膜的距离是 `mask` 的带符号距离图 (见 [`signed_distance`]), 掩膜内为正.
///
/// # 注意
///
/// 1. 掩膜外的体素总为 0, 掩膜内的体素总有一个非零标签.
/// 2. 距离小于 `min_distance` 的掩膜内体素总是皮质骨.
/// 3. 空掩膜返回全零结果, 不报错.
pub fn segment_endosteal(
    input: &Volume<f32>,
    mask: &Volume<u8>,
    config: &EndostealConfig,
) -> BoneResult<EndostealSegmentation> {
    input.same_geometry(mask)?;
    config.validate()?;

    let inside = mask.count_nonzero();
    if inside == 0 {
        info!("empty periosteal mask, nothing to split");
        return Ok(EndostealSegmentation {
            labels: mask.zeros_like(),
            max_flow: 0.0,
            cortical: 0,
            cancellous: 0,
        });
    }

    let distance = signed_distance(mask);
    let mut graph = build_graph(input, mask, &distance, config);
    let flow = graph.maxflow();

    let mut labels = mask.zeros_like::<u8>();
    let mut cortical = 0usize;
    labels
        .data_mut()
        .iter_mut()
        .zip(mask.data().iter())
        .enumerate()
        .filter(|(_, (_, m))| **m != 0)
        .for_each(|(v, (l, _))| {
            if graph.is_source(v) {
                cortical += 1;
                *l = config.cortical_label;
            } else {
                *l = config.cancellous_label;
            }
        });
    let cancellous = inside - cortical;
    info!("endosteal: {cortical} cortical, {cancellous} cancellous voxels, flow = {flow}");
    Ok(EndostealSegmentation {
        labels,
        max_flow: flow as f64 / config.weight_scale,
        cortical,
        cancellous,
    })
}

/// 未被硬约束的掩膜内体素按距离给出 `(source, sink)` 容量.
#[inline]
fn terminal_caps(inside: bool, d: f32, config: &EndostealConfig, unit: Cap) -> (Cap, Cap) {
    let d = d as f64;
    if !inside {
        (0, INFINITE)
    } else if d < config.min_distance {
        (INFINITE, 0)
    } else if d > config.max_distance {
        (0, unit)
    } else {
        (unit, unit)
    }
}

fn build_graph(
    input: &Volume<f32>,
    mask: &Volume<u8>,
    distance: &Volume<f32>,
    config: &EndostealConfig,
) -> GridGraph {
    let mut graph = GridGraph::new(input.shape(), config.connectivity);
    let offsets = config.connectivity.offsets();
    let factors: Vec<f64> = offsets.iter().map(|o| distance_factor(*o)).collect();
    let values: Vec<f32> = input.data().iter().copied().collect();
    let inside: Vec<bool> = mask.data().iter().map(|m| *m != 0).collect();
    let (lambda, sigma, scale) = (config.lambda, config.sigma, config.weight_scale);

    let capacity = |v: usize, d: usize| -> Cap {
        let Some(n) = input.offset(input.position(v), offsets[d]) else {
            return 0;
        };
        let n = input.linear_index(n);
        if !inside[v] || !inside[n] {
            return 0;
        }
        let (p, q) = (values[v] as f64, values[n] as f64);
        quantize(BoundaryTerm::Directed.weight(p, q, lambda, sigma) * factors[d], scale)
    };
    fill_edges(graph.edges_mut(), offsets.len(), capacity);

    let unit = quantize(config.data_weight, scale);
    let mut hard = 0usize;
    for (v, d) in distance.data().iter().enumerate() {
        let (source, sink) = terminal_caps(inside[v], *d, config, unit);
        hard += usize::from(source == INFINITE);
        graph.set_terminal(v, source, sink);
    }
    debug!("endosteal graph: {hard} voxels pinned to cortical bone");
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume_from_fn<T: Clone>(
        shape: (usize, usize, usize),
        f: impl Fn(usize, usize, usize) -> T,
    ) -> Volume<T> {
        let data = Array3::from_shape_fn(shape, |(z, y, x)| f(z, y, x));
        Volume::from_array(data, [1.0; 3]).unwrap()
    }

    /// 一根方截面长骨: 掩膜为 `2..14` 的方柱, 皮质层 (外两层) 的 sheetness 为 1, 髓腔为 -1.
    fn square_bone() -> (Volume<f32>, Volume<u8>) {
        let shape = (6, 16, 16);
        let depth = |y: usize, x: usize| {
            let edge = |c: usize| c.min(15 - c);
            edge(y).min(edge(x))
        };
        let mask = volume_from_fn(shape, |_, y, x| u8::from(depth(y, x) >= 2));
        let sheet = volume_from_fn(shape, |_, y, x| match depth(y, x) {
            0 | 1 => 0.0f32,
            2 | 3 => 1.0,
            _ => -1.0,
        });
        (sheet, mask)
    }

    #[test]
    fn test_outer_shell_is_cortical() {
        let (sheet, mask) = square_bone();
        let seg = segment_endosteal(&sheet, &mask, &EndostealConfig::default()).unwrap();
        let dist = signed_distance(&mask);
        assert_eq!(seg.cortical + seg.cancellous, mask.count_nonzero());
        for (pos, l) in seg.labels.data().indexed_iter() {
            if mask[pos] == 0 {
                assert_eq!(*l, LABEL_BACKGROUND, "{pos:?}");
            } else if (dist[pos] as f64) < MIN_DISTANCE {
                assert_eq!(*l, CORTICAL_LABEL, "{pos:?}");
            } else {
                assert_ne!(*l, LABEL_BACKGROUND, "{pos:?}");
            }
        }
        // 髓腔中心离骨外膜最远, 且 sheetness 为负.
        assert_eq!(seg.labels[(3, 7, 7)], CANCELLOUS_LABEL);
        assert_eq!(seg.labels[(3, 8, 8)], CANCELLOUS_LABEL);
        assert!(seg.cancellous > 0);
    }

    #[test]
    fn test_cut_follows_sheetness_drop() {
        // 皮质层与髓腔的 sheetness 落差足够大时, 割落在两者之间.
        let (sheet, mask) = square_bone();
        let config = EndostealConfig::default().with_distances(0.5, 1.5);
        let seg = segment_endosteal(&sheet, &mask, &config).unwrap();
        for (pos, l) in seg.labels.data().indexed_iter() {
            let expected = match sheet[pos] {
                _ if mask[pos] == 0 => LABEL_BACKGROUND,
                s if s > 0.0 => CORTICAL_LABEL,
                _ => CANCELLOUS_LABEL,
            };
            assert_eq!(*l, expected, "{pos:?}");
        }
    }

    #[test]
    fn test_custom_labels_and_empty_mask() {
        let (sheet, mask) = square_bone();
        let config = EndostealConfig::default().with_labels(7, 9);
        let seg = segment_endosteal(&sheet, &mask, &config).unwrap();
        assert!(seg.labels.data().iter().all(|l| [0, 7, 9].contains(l)));
        assert_eq!(seg.labels[(0, 2, 2)], 7);

        let empty = mask.zeros_like::<u8>();
        let seg = segment_endosteal(&sheet, &empty, &config).unwrap();
        assert_eq!(seg.labels.count_nonzero(), 0);
        assert_eq!(seg.max_flow, 0.0);
    }

    #[test]
    fn test_deterministic() {
        let (sheet, mask) = square_bone();
        let config = EndostealConfig::default().with_lambda(2.0);
        let a = segment_endosteal(&sheet, &mask, &config).unwrap();
        let b = segment_endosteal(&sheet, &mask, &config).unwrap();
        assert_eq!(a.labels.data(), b.labels.data());
        assert_eq!(a.max_flow, b.max_flow);
    }

    #[test]
    fn test_invalid_arguments() {
        let (sheet, mask) = square_bone();
        let run = |config: EndostealConfig| segment_endosteal(&sheet, &mask, &config);
        let base = EndostealConfig::default();
        assert!(matches!(run(base.with_lambda(0.0)), Err(BoneError::InvalidLambda(_))));
        assert!(matches!(run(base.with_sigma(-1.0)), Err(BoneError::NonPositiveSigma(_))));
        assert!(matches!(
            run(base.with_distances(2.0, 1.0)),
            Err(BoneError::InvalidWeight { name: "max_distance", .. })
        ));
        assert!(matches!(run(base.with_labels(0, 2)), Err(BoneError::InvalidLabelCode(0))));
        assert!(matches!(run(base.with_labels(3, 3)), Err(BoneError::InvalidLabelSet(_))));

        let small = volume_from_fn((6, 16, 15), |_, _, _| 1u8);
        assert!(matches!(
            segment_endosteal(&sheet, &small, &base),
            Err(BoneError::ShapeMismatch { .. })
        ));
    }
}
