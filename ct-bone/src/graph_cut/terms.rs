//! 边界项与数据项, 以及浮点权重到整数容量的量化.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::grid::{Cap, INFINITE};
use crate::SeedState;

/// 量化后单条边容量的上限. 保证任意节点所有边容量之和远小于 [`INFINITE`].
pub(crate) const MAX_FINITE_CAP: f64 = 1e9;

/// 相邻体素 `p -> q` 之间边界项的形式. `p`, `q` 为两个体素的 sheetness.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BoundaryTerm {
    /// 有向: `p > q` 时为 `lambda * exp(-(p - q)^2 / (2 sigma^2))`, 否则为 `lambda`.
    /// 即从高 sheetness 走向低 sheetness 的切割代价低.
    #[default]
    Directed,

    /// 对称: `lambda * exp(-(p - q)^2 / (2 sigma^2))`.
    Difference,

    /// 幅值: `lambda * exp(-max(p, q)^2 / (2 sigma^2))`. 沿高 sheetness 切割代价低.
    Magnitude,
}

impl BoundaryTerm {
    /// 有向边 `p -> q` 的浮点权重.
    #[inline]
    pub fn weight(self, p: f64, q: f64, lambda: f64, sigma: f64) -> f64 {
        let gauss = |d: f64| (-(d * d) / (2.0 * sigma * sigma)).exp();
        match self {
            BoundaryTerm::Directed if p > q => lambda * gauss(p - q),
            BoundaryTerm::Directed => lambda,
            BoundaryTerm::Difference => lambda * gauss(p - q),
            BoundaryTerm::Magnitude => lambda * gauss(p.max(q)),
        }
    }
}

/// 将非负浮点权重放大 `scale` 倍后四舍五入为整数容量.
#[inline]
pub(crate) fn quantize(weight: f64, scale: f64) -> Cap {
    (weight * scale).round().clamp(0.0, MAX_FINITE_CAP) as Cap
}

/// 未标注体素的数据项.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataTerm {
    /// sheetness 为正时连向源点, 否则连向汇点.
    #[default]
    Sheetness,

    /// HU 值高于阈值时以相同容量同时连向源点和汇点, 否则连向汇点.
    /// 亮体素的归属因此只由边界项和种子决定, 暗体素倾向背景.
    HuThreshold(f64),
}

impl DataTerm {
    /// 是否需要 HU 体数据.
    #[inline]
    pub fn needs_hu(self) -> bool {
        matches!(self, DataTerm::HuThreshold(_))
    }

    /// 未标注体素的 `(source, sink)` 容量. `hu` 仅在 [`DataTerm::HuThreshold`] 时使用.
    #[inline]
    pub(crate) fn caps(self, sheetness: f32, hu: f32, data_cap: Cap) -> (Cap, Cap) {
        match self {
            DataTerm::Sheetness if sheetness > 0.0 => (data_cap, 0),
            DataTerm::Sheetness => (0, data_cap),
            DataTerm::HuThreshold(t) if hu as f64 > t => (data_cap, data_cap),
            DataTerm::HuThreshold(_) => (0, data_cap),
        }
    }
}

/// 体素到源点和汇点的容量 `(source, sink)`.
///
/// 1. 前景种子与源点以无穷容量相连.
/// 2. 背景种子与汇点以无穷容量相连.
/// 3. 未标注体素取数据项给出的 `unmarked`.
#[inline]
pub(crate) fn terminal_caps(state: SeedState, unmarked: (Cap, Cap)) -> (Cap, Cap) {
    match state {
        SeedState::Foreground => (INFINITE, 0),
        SeedState::Background => (0, INFINITE),
        SeedState::Unmarked => unmarked,
    }
}

/// 邻域偏移 `(dz, dy, dx)` 的距离权重, 即以体素为单位的欧氏距离的倒数.
#[inline]
pub(crate) fn distance_factor((dz, dy, dx): (isize, isize, isize)) -> f64 {
    1.0 / ((dz * dz + dy * dy + dx * dx) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directed() {
        let t = BoundaryTerm::Directed;
        assert_eq!(t.weight(-1.0, 1.0, 50.0, 0.25), 50.0);
        assert_eq!(t.weight(0.5, 0.5, 50.0, 0.25), 50.0);
        let w = t.weight(1.0, -1.0, 1.0, 2.0);
        assert!((w - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_terms() {
        for t in [BoundaryTerm::Difference, BoundaryTerm::Magnitude] {
            assert_eq!(t.weight(0.3, -0.2, 2.0, 0.5), t.weight(-0.2, 0.3, 2.0, 0.5));
        }
        assert_eq!(BoundaryTerm::Difference.weight(0.7, 0.7, 3.0, 0.1), 3.0);
        assert!(BoundaryTerm::Magnitude.weight(1.0, 0.0, 1.0, 0.25) < 1e-3);
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0.60653, 1000.0), 607);
        assert_eq!(quantize(1e-4, 1000.0), 0);
        assert_eq!(quantize(-1.0, 1000.0), 0);
        assert_eq!(quantize(1e20, 1.0), MAX_FINITE_CAP as Cap);
    }

    #[test]
    fn test_terminal_caps() {
        assert_eq!(terminal_caps(SeedState::Foreground, (0, 7)), (INFINITE, 0));
        assert_eq!(terminal_caps(SeedState::Background, (7, 0)), (0, INFINITE));
        assert_eq!(terminal_caps(SeedState::Unmarked, (7, 3)), (7, 3));
    }

    #[test]
    fn test_data_terms() {
        let sheet = DataTerm::Sheetness;
        assert_eq!(sheet.caps(0.1, -1000.0, 7), (7, 0));
        assert_eq!(sheet.caps(0.0, 1000.0, 7), (0, 7));
        assert!(!sheet.needs_hu());

        let hu = DataTerm::HuThreshold(250.0);
        assert!(hu.needs_hu());
        assert_eq!(hu.caps(-1.0, 800.0, 7), (7, 7));
        assert_eq!(hu.caps(1.0, 250.0, 7), (0, 7));
        assert_eq!(hu.caps(1.0, -50.0, 7), (0, 7));
    }

    #[test]
    fn test_distance_factor() {
        assert_eq!(distance_factor((0, 0, 1)), 1.0);
        assert!((distance_factor((1, -1, 0)) - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((distance_factor((1, 1, 1)) - (1.0 / 3.0f64).sqrt()).abs() < 1e-12);
    }
}
