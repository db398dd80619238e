//! 高斯导数核, 可分离卷积与对称 3x3 矩阵特征值.

use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};

use crate::BoneResult;
use crate::{BoneError, Volume};

/// 高斯核截断半径 (以标准差为单位).
const TRUNCATE: f64 = 4.0;

/// 一维采样高斯导数核, 阶数 0, 1, 2. 三个核长度相同, 中心对齐.
///
/// 一阶与二阶核由归一化高斯核与中心差分 `[-1/2, 0, 1/2]`, `[1, -2, 1]`
/// 复合得到, 因此:
///
/// 1. 0 阶核和为 1.
/// 2. 1 阶核和为 0, 对线性函数精确求导.
/// 3. 2 阶核和为 0, 对二次函数精确求二阶导.
///
/// 于是常数偏移不会影响任何导数.
#[derive(Debug, Clone)]
pub(crate) struct GaussianKernels {
    pub(crate) kernels: [Vec<f64>; 3],
}

impl GaussianKernels {
    /// 以体素为单位的标准差 `sigma` 生成核. `sigma` 必须有限且为正.
    pub(crate) fn new(sigma: f64) -> Self {
        debug_assert!(sigma.is_finite() && sigma > 0.0);
        let radius = (TRUNCATE * sigma).ceil().max(1.0) as isize;
        let g: Vec<f64> = (-radius..=radius)
            .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
            .collect();
        let sum: f64 = g.iter().sum();

        // 左右各补一个 0, 以便与差分算子复合后长度一致.
        let mut g0 = vec![0.0];
        g0.extend(g.iter().map(|v| v / sum));
        g0.push(0.0);

        let compose = |d: [f64; 3]| -> Vec<f64> {
            (0..g0.len())
                .map(|m| {
                    // k[m] = sum_i d[i] * g0[m - i], i in {-1, 0, 1}.
                    let at = |j: isize| {
                        if j < 0 || j as usize >= g0.len() {
                            0.0
                        } else {
                            g0[j as usize]
                        }
                    };
                    let m = m as isize;
                    d[0] * at(m + 1) + d[1] * at(m) + d[2] * at(m - 1)
                })
                .collect()
        };
        let g1 = compose([-0.5, 0.0, 0.5]);
        let g2 = compose([1.0, -2.0, 1.0]);
        Self {
            kernels: [g0, g1, g2],
        }
    }

    /// 核半径.
    #[inline]
    pub(crate) fn radius(&self) -> usize {
        self.kernels[0].len() / 2
    }
}

/// 沿 `axis` 做一维相关运算, 边界以最近体素复制延拓.
///
/// `out[x] = sum_i k[i + r] * src[clamp(x + i)]`.
pub(crate) fn correlate_axis(src: ArrayView3<f64>, kernel: &[f64], axis: usize) -> Array3<f64> {
    let r = (kernel.len() / 2) as isize;
    let mut out = Array3::<f64>::zeros(src.dim());
    let len = src.len_of(Axis(axis)) as isize;
    zip_for_each!(
        Zip::from(out.lanes_mut(Axis(axis))).and(src.lanes(Axis(axis))),
        |mut dst, lane| {
            for x in 0..len {
                let mut acc = 0.0;
                for (i, k) in kernel.iter().enumerate() {
                    let j = (x + i as isize - r).clamp(0, len - 1) as usize;
                    acc += k * lane[j];
                }
                dst[x as usize] = acc;
            }
        }
    );
    out
}

/// 尺度归一化 Hessian 的六个分量, 按 `(zz, zy, zx, yy, yx, xx)` 存于最后一维.
pub(crate) const HESSIAN_COMPONENTS: [(usize, usize); 6] =
    [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];

/// 计算尺度为 `sigma` (毫米) 的尺度归一化 Hessian, 单位为物理单位. 返回形状为
/// `(z, y, x, 6)` 的数组, 分量顺序见 [`HESSIAN_COMPONENTS`].
///
/// # 注意
///
/// 导数按物理单位 (除以各维分辨率) 计算后乘以 `sigma^2`.
pub(crate) fn hessian(volume: &Volume<f32>, sigma: f64) -> BoneResult<Array4<f64>> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(BoneError::NonPositiveSigma(sigma));
    }
    let spacing = volume.spacing();
    let kernels = spacing.map(|s| GaussianKernels::new(sigma / s));
    let input = volume.data().mapv(|v| v as f64);

    // 先沿 z 轴做 0/1/2 阶卷积, 各分量共用.
    let along_z: Vec<Array3<f64>> = (0..3)
        .map(|o| correlate_axis(input.view(), &kernels[0].kernels[o], 0))
        .collect();

    let (z, y, x) = volume.shape();
    let mut out = Array4::<f64>::zeros((z, y, x, 6));
    for (c, (a, b)) in HESSIAN_COMPONENTS.into_iter().enumerate() {
        let mut orders = [0usize; 3];
        orders[a] += 1;
        orders[b] += 1;
        let tmp = correlate_axis(along_z[orders[0]].view(), &kernels[1].kernels[orders[1]], 1);
        let tmp = correlate_axis(tmp.view(), &kernels[2].kernels[orders[2]], 2);
        let unit: f64 = (0..3).map(|k| spacing[k].powi(orders[k] as i32)).product();
        let scale = sigma * sigma / unit;
        out.index_axis_mut(Axis(3), c)
            .zip_mut_with(&tmp, |dst, src| *dst = src * scale);
    }
    Ok(out)
}

/// 按 [`HESSIAN_COMPONENTS`] 顺序存储的对称矩阵的 Frobenius 范数.
#[inline]
pub(crate) fn frobenius(h: &[f64; 6]) -> f64 {
    let [zz, zy, zx, yy, yx, xx] = *h;
    (zz * zz + yy * yy + xx * xx + 2.0 * (zy * zy + zx * zx + yx * yx)).sqrt()
}

/// 闭式求解对称 3x3 矩阵 (按 [`HESSIAN_COMPONENTS`] 顺序) 的特征值,
/// 结果按绝对值升序排列: `|l1| <= |l2| <= |l3|`.
pub(crate) fn eigenvalues(h: &[f64; 6]) -> [f64; 3] {
    let [a11, a12, a13, a22, a23, a33] = *h;
    let p1 = a12 * a12 + a13 * a13 + a23 * a23;
    let mut eig = if p1 == 0.0 {
        [a11, a22, a33]
    } else {
        let q = (a11 + a22 + a33) / 3.0;
        let p2 = (a11 - q).powi(2) + (a22 - q).powi(2) + (a33 - q).powi(2) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let (b11, b22, b33) = ((a11 - q) / p, (a22 - q) / p, (a33 - q) / p);
        let (b12, b13, b23) = (a12 / p, a13 / p, a23 / p);
        let det = b11 * (b22 * b33 - b23 * b23) - b12 * (b12 * b33 - b23 * b13)
            + b13 * (b12 * b23 - b22 * b13);
        let r = (det / 2.0).clamp(-1.0, 1.0);
        let phi = r.acos() / 3.0;
        let e1 = q + 2.0 * p * phi.cos();
        let e3 = q + 2.0 * p * (phi + 2.0 * std::f64::consts::FRAC_PI_3).cos();
        [e1, 3.0 * q - e1 - e3, e3]
    };
    eig.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    eig
}
