//! 单尺度 Hessian 片状度量.

use itertools::izip;
use log::{debug, warn};
use ndarray::{Array3, Axis, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::hessian::{eigenvalues, frobenius, hessian};
use crate::consts::sheetness::{ALPHA, FROBENIUS_WEIGHT};
use crate::{BoneError, BoneResult, Volume};

/// 最大特征值绝对值低于该值时, 认为局部结构平坦, 响应为 0.
const EIGEN_EPSILON: f64 = 1e-10;

/// Calgary 度量中的噪声尺度 `c`.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoiseScale {
    /// 固定值.
    Fixed(f64),

    /// `c = frobenius_weight * max ||H||_F`, 最大值取自估计掩膜内的体素.
    Adaptive {
        /// 相对最大 Frobenius 范数的权重.
        frobenius_weight: f64,
    },
}

impl Default for NoiseScale {
    #[inline]
    fn default() -> Self {
        NoiseScale::Adaptive {
            frobenius_weight: FROBENIUS_WEIGHT,
        }
    }
}

/// 单尺度度量参数.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasureConfig {
    /// 为 `true` 时增强亮片 (骨皮质), 否则增强暗片.
    pub enhance_bright: bool,

    /// `R_bone` 的灵敏度.
    pub alpha: f64,

    /// 噪声尺度.
    pub noise_scale: NoiseScale,
}

impl Default for MeasureConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enhance_bright: true,
            alpha: ALPHA,
            noise_scale: NoiseScale::default(),
        }
    }
}

impl MeasureConfig {
    /// 检查参数合法性.
    pub fn validate(&self) -> BoneResult<()> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(BoneError::InvalidWeight {
                name: "alpha",
                value: self.alpha,
            });
        }
        match self.noise_scale {
            NoiseScale::Fixed(c) if !c.is_finite() || c < 0.0 => Err(BoneError::InvalidWeight {
                name: "noise_scale",
                value: c,
            }),
            NoiseScale::Adaptive { frobenius_weight: w } if !w.is_finite() || w < 0.0 => {
                Err(BoneError::InvalidWeight {
                    name: "frobenius_weight",
                    value: w,
                })
            }
            _ => Ok(()),
        }
    }

    /// 以已排序的特征值 (`|l1| <= |l2| <= |l3|`) 和噪声尺度 `c` 计算片状度量.
    pub fn measure(&self, [l1, l2, l3]: [f64; 3], c: f64) -> f64 {
        let a3 = l3.abs();
        if a3 < EIGEN_EPSILON || c <= 0.0 {
            return 0.0;
        }
        let sign = if self.enhance_bright { -1.0 } else { 1.0 };
        let r_bone = l1.abs() * l2.abs() / (l3 * l3);
        let r_noise2 = l1 * l1 + l2 * l2 + l3 * l3;
        let alpha = self.alpha;
        sign * (l3 / a3)
            * (-(r_bone * r_bone) / (2.0 * alpha * alpha)).exp()
            * (1.0 - (-r_noise2 / (2.0 * c * c)).exp())
    }
}

/// 单个尺度的响应. 仅在尺度循环内部短暂存在.
#[derive(Debug, Clone)]
pub struct ScaleResponse {
    /// 该响应所用尺度 (毫米).
    pub sigma: f64,

    /// 实际使用的噪声尺度 `c`.
    pub noise_scale: f64,

    /// 每个体素的片状度量.
    pub response: Array3<f32>,

    /// 每个体素 Hessian 迹的绝对值.
    pub trace: Array3<f32>,
}

/// 计算 `volume` 在尺度 `sigma` 上的片状响应. 自适应噪声尺度在整个体数据上估计.
#[inline]
pub fn hessian_response(
    volume: &Volume<f32>,
    sigma: f64,
    config: &MeasureConfig,
) -> BoneResult<ScaleResponse> {
    hessian_response_masked(volume, sigma, config, None)
}

/// 与 [`hessian_response`] 相同, 但自适应噪声尺度仅在 `estimation` 的非零体素上估计.
///
/// `estimation` 为空掩膜时退化为整个体数据.
pub fn hessian_response_masked(
    volume: &Volume<f32>,
    sigma: f64,
    config: &MeasureConfig,
    estimation: Option<&Volume<u8>>,
) -> BoneResult<ScaleResponse> {
    config.validate()?;
    if let Some(mask) = estimation {
        volume.same_geometry(mask)?;
    }
    let h = hessian(volume, sigma)?;

    let c = match config.noise_scale {
        NoiseScale::Fixed(c) => c,
        NoiseScale::Adaptive { frobenius_weight } => {
            let norms: Array3<f64> =
                zip_map_collect!(Zip::from(h.lanes(Axis(3))), |l| frobenius(&lane6(l)));
            let masked_max = estimation.and_then(|m| {
                izip!(norms.iter(), m.data().iter())
                    .filter(|(_, p)| **p != 0)
                    .map(|(n, _)| *n)
                    .reduce(f64::max)
            });
            let max = masked_max.unwrap_or_else(|| {
                if estimation.is_some() {
                    warn!("empty estimation mask at sigma {sigma}, falling back to whole volume");
                }
                norms.iter().copied().fold(0.0, f64::max)
            });
            frobenius_weight * max
        }
    };
    debug!("sigma = {sigma:.3} mm, noise scale c = {c:.4}");

    let mut response = Array3::<f32>::zeros(volume.shape());
    let mut trace = Array3::<f32>::zeros(volume.shape());
    zip_for_each!(
        Zip::from(&mut response)
            .and(&mut trace)
            .and(h.lanes(Axis(3))),
        |r, t, l| {
            let l = lane6(l);
            *t = (l[0] + l[3] + l[5]).abs() as f32;
            *r = config.measure(eigenvalues(&l), c) as f32;
        }
    );
    Ok(ScaleResponse {
        sigma,
        noise_scale: c,
        response,
        trace,
    })
}

/// 将长度为 6 的 Hessian lane 拷贝为定长数组.
#[inline]
fn lane6(l: ndarray::ArrayView1<f64>) -> [f64; 6] {
    [l[0], l[1], l[2], l[3], l[4], l[5]]
}
