//! 多尺度 Hessian 片状增强.
//!
//! 对 HU 体数据在若干尺度上计算 Calgary 片状度量, 逐体素取尺度空间最大值,
//! 再以 Hessian 迹抑制噪声, 最后将空气, 金属和体外体素置为哨兵值.

use itertools::izip;
use log::{debug, info, warn};
use ndarray::Zip;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::sheetness::*;
use crate::data::morph::{erode_ellipsoid, largest_component};
use crate::{BoneError, BoneResult, Connectivity, Volume};

mod hessian;
mod measure;

pub use measure::{
    hessian_response, hessian_response_masked, MeasureConfig, NoiseScale, ScaleResponse,
};

/// 尺度在 `[min_sigma, max_sigma]` 内的分布方式.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SigmaSpacing {
    /// 对数等距.
    #[default]
    Logarithmic,

    /// 线性等距.
    Equispaced,
}

/// 跨尺度的逐体素归约方式.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Reduction {
    /// 取最大值.
    #[default]
    Maximum,

    /// 取绝对值最大者 (保留符号).
    MaximumAbsolute,
}

/// 片状增强参数. 默认值见 [`crate::consts::sheetness`].
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SheetnessConfig {
    /// 为 `true` 时增强亮片 (骨皮质), 否则增强暗片.
    pub enhance_bright: bool,

    /// 尺度个数.
    pub number_of_sigma: usize,

    /// 最小尺度 (毫米).
    pub min_sigma: f64,

    /// 最大尺度 (毫米).
    pub max_sigma: f64,

    /// 尺度分布方式.
    pub sigma_spacing: SigmaSpacing,

    /// 低于该值的体素视为空气.
    pub air_threshold: f64,

    /// 高于该值的体素视为金属.
    pub metal_threshold: f64,

    /// Hessian 迹噪声抑制权重.
    pub trace_weight: f64,

    /// 噪声尺度 `c`.
    pub noise_scale: NoiseScale,

    /// `R_bone` 的灵敏度.
    pub alpha: f64,

    /// 跨尺度归约方式.
    pub reduction: Reduction,

    /// 被掩膜排除的体素的输出值.
    pub sentinel: f32,
}

impl Default for SheetnessConfig {
    fn default() -> Self {
        Self {
            enhance_bright: true,
            number_of_sigma: NUMBER_OF_SIGMA,
            min_sigma: MIN_SIGMA,
            max_sigma: MAX_SIGMA,
            sigma_spacing: SigmaSpacing::default(),
            air_threshold: AIR_THRESHOLD,
            metal_threshold: METAL_THRESHOLD,
            trace_weight: TRACE_WEIGHT,
            noise_scale: NoiseScale::default(),
            alpha: ALPHA,
            reduction: Reduction::default(),
            sentinel: SENTINEL,
        }
    }
}

impl SheetnessConfig {
    /// 设置亮片或暗片增强.
    #[inline]
    pub fn with_polarity(mut self, enhance_bright: bool) -> Self {
        self.enhance_bright = enhance_bright;
        self
    }

    /// 设置尺度空间.
    #[inline]
    pub fn with_sigmas(mut self, number_of_sigma: usize, min_sigma: f64, max_sigma: f64) -> Self {
        (self.number_of_sigma, self.min_sigma, self.max_sigma) =
            (number_of_sigma, min_sigma, max_sigma);
        self
    }

    /// 设置空气和金属阈值.
    #[inline]
    pub fn with_thresholds(mut self, air: f64, metal: f64) -> Self {
        (self.air_threshold, self.metal_threshold) = (air, metal);
        self
    }

    /// 设置迹噪声抑制权重.
    #[inline]
    pub fn with_trace_weight(mut self, trace_weight: f64) -> Self {
        self.trace_weight = trace_weight;
        self
    }

    /// 设置噪声尺度.
    #[inline]
    pub fn with_noise_scale(mut self, noise_scale: NoiseScale) -> Self {
        self.noise_scale = noise_scale;
        self
    }

    /// 设置跨尺度归约方式.
    #[inline]
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// 设置哨兵值.
    #[inline]
    pub fn with_sentinel(mut self, sentinel: f32) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// 单尺度度量参数.
    #[inline]
    pub fn measure(&self) -> MeasureConfig {
        MeasureConfig {
            enhance_bright: self.enhance_bright,
            alpha: self.alpha,
            noise_scale: self.noise_scale,
        }
    }

    /// 尺度数组, 见 [`sigma_array`].
    #[inline]
    pub fn sigmas(&self) -> BoneResult<Vec<f64>> {
        sigma_array(
            self.number_of_sigma,
            self.min_sigma,
            self.max_sigma,
            self.sigma_spacing,
        )
    }

    /// 检查参数合法性.
    pub fn validate(&self) -> BoneResult<()> {
        let (air, metal) = (self.air_threshold, self.metal_threshold);
        if !(air.is_finite() && metal.is_finite() && air < metal) {
            return Err(BoneError::InvalidThresholds { air, metal });
        }
        if !self.trace_weight.is_finite() || self.trace_weight < 0.0 {
            return Err(BoneError::InvalidWeight {
                name: "trace_weight",
                value: self.trace_weight,
            });
        }
        self.sigmas()?;
        self.measure().validate()
    }
}

/// 生成 `n` 个位于 `[min, max]` 内的尺度.
///
/// # 注意
///
/// 1. `n == 0` 时返回 [`BoneError::NoScales`].
/// 2. 尺度非有限或非正时返回 [`BoneError::NonPositiveSigma`].
/// 3. `min > max` 时自动交换; `min == max` 或 `n == 1` 时只返回 `min`.
pub fn sigma_array(n: usize, min: f64, max: f64, spacing: SigmaSpacing) -> BoneResult<Vec<f64>> {
    if n == 0 {
        return Err(BoneError::NoScales);
    }
    for s in [min, max] {
        if !s.is_finite() || s <= 0.0 {
            return Err(BoneError::NonPositiveSigma(s));
        }
    }
    let (min, max) = if min > max { (max, min) } else { (min, max) };
    if min == max || n == 1 {
        return Ok(vec![min]);
    }
    let steps = (n - 1) as f64;
    let mut out: Vec<f64> = match spacing {
        SigmaSpacing::Logarithmic => {
            let (lo, hi) = (min.ln(), max.ln());
            (0..n)
                .map(|k| (lo + k as f64 * (hi - lo) / steps).exp())
                .collect()
        }
        SigmaSpacing::Equispaced => (0..n)
            .map(|k| min + k as f64 * (max - min) / steps)
            .collect(),
    };
    (out[0], out[n - 1]) = (min, max);
    Ok(out)
}

/// 生成皮肤掩膜: 1 代表体内.
///
/// HU 值在 `[air, metal]` 之外的体素中, 最大的 6-连通分量被视为体外空气,
/// 其补集即为体内. 体内的空腔 (肠气等) 因此仍属于体内.
pub fn skin_mask(hu: &Volume<f32>, air: f64, metal: f64) -> BoneResult<Volume<u8>> {
    if !(air.is_finite() && metal.is_finite() && air < metal) {
        return Err(BoneError::InvalidThresholds { air, metal });
    }
    let outside = hu.map(|v| u8::from((*v as f64) < air || (*v as f64) > metal));
    let surrounding = largest_component(&outside, Connectivity::Six);
    let body = surrounding.map(|p| u8::from(*p == 0));
    info!(
        "skin mask: {} of {} voxels inside body",
        body.count_nonzero(),
        body.size()
    );
    Ok(body)
}

/// HU 值在 `[air, metal]` 内的体素.
fn threshold_mask(hu: &Volume<f32>, config: &SheetnessConfig) -> Volume<u8> {
    let (air, metal) = (config.air_threshold, config.metal_threshold);
    hu.map(|v| u8::from(air <= *v as f64 && *v as f64 <= metal))
}

/// 有效体素: 位于皮肤掩膜内, 且在阈值范围内.
fn valid_mask(in_range: &Volume<u8>, skin: &Volume<u8>) -> Volume<u8> {
    let mut valid = in_range.zeros_like::<u8>();
    Zip::from(valid.data_mut())
        .and(in_range.data())
        .and(skin.data())
        .for_each(|m, t, s| *m = u8::from(*t != 0 && *s != 0));
    valid
}

/// 自适应噪声尺度的估计掩膜: 阈值掩膜以半径 `max_sigma` (毫米) 的椭球腐蚀.
/// 皮肤掩膜不参与估计.
///
/// 腐蚀后为空时退化为阈值掩膜, 阈值掩膜也为空时返回 `None` (即整个体数据).
fn estimation_mask(in_range: &Volume<u8>, max_sigma: f64) -> Option<Volume<u8>> {
    let radius = in_range.spacing().map(|s| (max_sigma / s).floor() as usize);
    let eroded = erode_ellipsoid(in_range, radius);
    if eroded.count_nonzero() > 0 {
        return Some(eroded);
    }
    if in_range.count_nonzero() > 0 {
        warn!("estimation mask is empty after erosion by {radius:?} voxels");
        return Some(in_range.clone());
    }
    warn!("no voxel within thresholds for noise estimation, using the whole volume");
    None
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 借助 `rayon` 并行计算所有尺度的响应, 结果按尺度顺序排列.
        fn scale_responses(
            hu: &Volume<f32>,
            sigmas: &[f64],
            measure: &MeasureConfig,
            estimation: Option<&Volume<u8>>,
        ) -> BoneResult<Vec<ScaleResponse>> {
            sigmas
                .par_iter()
                .map(|s| hessian_response_masked(hu, *s, measure, estimation))
                .collect()
        }
    } else {
        /// 依次计算所有尺度的响应.
        fn scale_responses(
            hu: &Volume<f32>,
            sigmas: &[f64],
            measure: &MeasureConfig,
            estimation: Option<&Volume<u8>>,
        ) -> BoneResult<Vec<ScaleResponse>> {
            sigmas
                .iter()
                .map(|s| hessian_response_masked(hu, *s, measure, estimation))
                .collect()
        }
    }
}

/// 多尺度片状增强.
///
/// `skin` 为皮肤掩膜 (非零代表体内), 必须与 `hu` 几何一致. 返回与 `hu`
/// 几何一致的 sheetness 体数据.
///
/// # 步骤
///
/// 1. 在每个尺度上计算片状响应, 逐体素按 [`Reduction`] 归约, 同时记录获胜尺度的迹.
/// 2. 迹噪声抑制: `R' = R - trace_weight * |tr| / max|tr|`, 最大值取自有效体素.
/// 3. 皮肤掩膜外, 低于空气阈值或高于金属阈值的体素置为哨兵值.
///
/// # 注意
///
/// 1. 常数 HU 偏移不改变响应 (阈值掩膜除外). 相同输入保证得到逐位一致的输出.
/// 2. 采用 [`NoiseScale::Fixed`] 时, 响应随片状结构与周围的对比度单调增加.
///    默认的 [`NoiseScale::Adaptive`] 按最大 Frobenius 范数缩放 `c`, 对比度因此被归一化,
///    同一结构在不同对比度下的响应相同.
/// 3. 自适应噪声尺度只在腐蚀后的阈值掩膜上估计, 与皮肤掩膜无关.
pub fn enhance_sheetness(
    hu: &Volume<f32>,
    skin: &Volume<u8>,
    config: &SheetnessConfig,
) -> BoneResult<Volume<f32>> {
    hu.same_geometry(skin)?;
    config.validate()?;
    let sigmas = config.sigmas()?;
    let max_sigma = sigmas.iter().copied().fold(0.0, f64::max);
    info!(
        "enhancing sheetness of {:?} volume at sigmas {:?} mm",
        hu.shape(),
        sigmas
    );

    let in_range = threshold_mask(hu, config);
    let valid = valid_mask(&in_range, skin);
    let estimation = estimation_mask(&in_range, max_sigma);
    let responses = scale_responses(hu, &sigmas, &config.measure(), estimation.as_ref())?;

    let mut responses = responses.into_iter();
    let first = responses.next().ok_or(BoneError::NoScales)?;
    debug!("sigma {:.3}: c = {:.4}", first.sigma, first.noise_scale);
    let (mut best, mut best_trace) = (first.response, first.trace);
    let reduction = config.reduction;
    for r in responses {
        debug!("sigma {:.3}: c = {:.4}", r.sigma, r.noise_scale);
        zip_for_each!(
            Zip::from(&mut best)
                .and(&mut best_trace)
                .and(&r.response)
                .and(&r.trace),
            |b, bt, v, t| {
                let better = match reduction {
                    Reduction::Maximum => *v > *b,
                    Reduction::MaximumAbsolute => v.abs() > b.abs(),
                };
                if better {
                    (*b, *bt) = (*v, *t);
                }
            }
        );
    }

    let max_trace = izip!(best_trace.iter(), valid.data().iter())
        .filter(|(_, m)| **m != 0)
        .fold(0.0f32, |acc, (t, _)| acc.max(*t));
    let weight = if max_trace > 0.0 {
        (config.trace_weight / max_trace as f64) as f32
    } else {
        0.0
    };
    let sentinel = config.sentinel;
    zip_for_each!(
        Zip::from(&mut best).and(&best_trace).and(valid.data()),
        |r, t, m| {
            *r = if *m == 0 { sentinel } else { *r - weight * *t };
        }
    );
    info!(
        "sheetness done: {} of {} voxels valid, max |trace| = {:.3}",
        valid.count_nonzero(),
        valid.size(),
        max_trace
    );
    hu.like(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume_from_fn(
        shape: (usize, usize, usize),
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Volume<f32> {
        let data = Array3::from_shape_fn(shape, |(z, y, x)| f(z, y, x));
        Volume::from_array(data, [1.0; 3]).unwrap()
    }

    fn slab() -> Volume<f32> {
        volume_from_fn((24, 24, 24), |_, _, x| {
            if (10..14).contains(&x) {
                1000.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn test_sigma_array() {
        let log = SigmaSpacing::Logarithmic;
        let lin = SigmaSpacing::Equispaced;
        assert_eq!(sigma_array(2, 0.5, 1.0, log).unwrap(), vec![0.5, 1.0]);
        let s = sigma_array(3, 1.0, 4.0, log).unwrap();
        assert_eq!(s.len(), 3);
        assert!((s[1] - 2.0).abs() < 1e-12);
        assert_eq!(sigma_array(3, 1.0, 3.0, lin).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(sigma_array(3, 3.0, 1.0, lin).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(sigma_array(4, 0.7, 0.7, log).unwrap(), vec![0.7]);
        assert_eq!(sigma_array(1, 0.5, 2.0, log).unwrap(), vec![0.5]);
        assert!(matches!(
            sigma_array(0, 0.5, 1.0, log),
            Err(BoneError::NoScales)
        ));
        assert!(matches!(
            sigma_array(2, -0.5, 1.0, log),
            Err(BoneError::NonPositiveSigma(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let c = SheetnessConfig::default();
        assert!(c.validate().is_ok());
        assert!(matches!(
            c.with_thresholds(100.0, -100.0).validate(),
            Err(BoneError::InvalidThresholds { .. })
        ));
        assert!(c.with_trace_weight(-0.1).validate().is_err());
        assert!(matches!(
            c.with_sigmas(0, 0.5, 1.0).validate(),
            Err(BoneError::NoScales)
        ));
    }

    #[test]
    fn test_slab_is_enhanced() {
        let hu = slab();
        let skin = hu.filled_like(1u8);
        let out = enhance_sheetness(&hu, &skin, &SheetnessConfig::default()).unwrap();
        assert_eq!(out.shape(), hu.shape());
        assert_eq!(out.spacing(), hu.spacing());
        assert!(out[(12, 12, 12)] > 0.4, "{}", out[(12, 12, 12)]);
        assert!(out[(12, 12, 0)].abs() < 1e-6);
    }

    #[test]
    fn test_sentinel_masking() {
        let hu = volume_from_fn((16, 16, 16), |z, y, x| match (z, y, x) {
            (0..=2, _, _) => -1000.0,
            (8, 8, 8) => 3000.0,
            _ => 40.0,
        });
        let mut skin = hu.filled_like(1u8);
        skin[(15, 15, 15)] = 0;
        let config = SheetnessConfig::default().with_sentinel(-7.0);
        let out = enhance_sheetness(&hu, &skin, &config).unwrap();
        assert_eq!(out[(0, 5, 5)], -7.0);
        assert_eq!(out[(2, 0, 0)], -7.0);
        assert_eq!(out[(8, 8, 8)], -7.0);
        assert_eq!(out[(15, 15, 15)], -7.0);
        assert_ne!(out[(10, 3, 3)], -7.0);
        assert_ne!(out[(8, 8, 9)], -7.0);
    }

    #[test]
    fn test_reduction_modes() {
        let hu = slab();
        let skin = hu.filled_like(1u8);
        let base = SheetnessConfig::default()
            .with_sigmas(3, 0.5, 2.0)
            .with_trace_weight(0.0)
            .with_noise_scale(NoiseScale::Fixed(30.0));
        let max = enhance_sheetness(&hu, &skin, &base).unwrap();
        let abs = enhance_sheetness(
            &hu,
            &skin,
            &base.with_reduction(Reduction::MaximumAbsolute),
        )
        .unwrap();
        for (m, a) in max.data().iter().zip(abs.data().iter()) {
            assert!(*m >= *a - 1e-6);
            assert!(a.abs() >= m.abs() - 1e-6);
        }
    }

    #[test]
    fn test_deterministic() {
        let hu = slab();
        let skin = hu.filled_like(1u8);
        let a = enhance_sheetness(&hu, &skin, &SheetnessConfig::default()).unwrap();
        let b = enhance_sheetness(&hu, &skin, &SheetnessConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_geometry_checked() {
        let hu = slab();
        let skin = Volume::from_array(Array3::<u8>::ones((24, 24, 23)), [1.0; 3]).unwrap();
        assert!(matches!(
            enhance_sheetness(&hu, &skin, &SheetnessConfig::default()),
            Err(BoneError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_contrast_with_fixed_noise_scale() {
        let slab_of = |contrast: f32| {
            volume_from_fn((24, 24, 24), move |_, _, x| {
                if (10..14).contains(&x) {
                    contrast
                } else {
                    0.0
                }
            })
        };
        let fixed = SheetnessConfig::default().with_noise_scale(NoiseScale::Fixed(100.0));
        let adaptive = SheetnessConfig::default();
        let at = |contrast: f32, config: &SheetnessConfig| {
            let hu = slab_of(contrast);
            let skin = hu.filled_like(1u8);
            enhance_sheetness(&hu, &skin, config).unwrap()[(12, 12, 12)]
        };

        let r: Vec<f32> = [200.0, 400.0, 800.0].iter().map(|c| at(*c, &fixed)).collect();
        assert!(r[0] + 0.1 < r[1], "{r:?}");
        assert!(r[1] + 0.1 < r[2], "{r:?}");

        // 自适应噪声尺度把对比度归一化掉.
        let r: Vec<f32> = [200.0, 400.0, 800.0].iter().map(|c| at(*c, &adaptive)).collect();
        assert!(r[0] > 0.5);
        assert!((r[0] - r[1]).abs() < 1e-5 && (r[1] - r[2]).abs() < 1e-5, "{r:?}");
    }

    #[test]
    fn test_noise_scale_ignores_skin() {
        // 体内只有一块较暗的板, 更亮的板位于皮肤掩膜之外.
        let hu = volume_from_fn((24, 24, 24), |_, _, x| match x {
            4..=6 => 300.0,
            16..=18 => 1100.0,
            _ => 0.0,
        });
        let full = hu.filled_like(1u8);
        let mut half = hu.zeros_like::<u8>();
        half.data_mut()
            .indexed_iter_mut()
            .for_each(|((_, _, x), s)| *s = u8::from(x < 12));
        let config = SheetnessConfig::default().with_trace_weight(0.0);
        let a = enhance_sheetness(&hu, &full, &config).unwrap();
        let b = enhance_sheetness(&hu, &half, &config).unwrap();
        for ((pos, v), s) in b.data().indexed_iter().zip(half.data().iter()) {
            if *s != 0 {
                assert_eq!(*v, a[pos], "at {pos:?}");
            } else {
                assert_eq!(*v, SENTINEL);
            }
        }
        assert!(b[(12, 12, 5)] > 0.0);
    }

    #[test]
    fn test_skin_mask() {
        // 体外空气包围一个软组织立方体, 立方体内部有一个气腔.
        let hu = volume_from_fn((12, 12, 12), |z, y, x| {
            let body = [z, y, x].iter().all(|c| (2..10).contains(c));
            let pocket = [z, y, x].iter().all(|c| (5..7).contains(c));
            if body && !pocket {
                30.0
            } else {
                -1000.0
            }
        });
        let skin = skin_mask(&hu, AIR_THRESHOLD, METAL_THRESHOLD).unwrap();
        assert_eq!(skin[(0, 0, 0)], 0);
        assert_eq!(skin[(3, 3, 3)], 1);
        assert_eq!(skin[(5, 5, 5)], 1);
        assert_eq!(skin.count_nonzero(), 8 * 8 * 8);
        assert!(skin_mask(&hu, 10.0, 10.0).is_err());
    }
}
