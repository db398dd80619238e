use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView3, ArrayViewMut3};
use num::Zero;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{BoneError, BoneResult, Idx3d};

pub mod distance;
mod io;
mod label;
pub mod morph;

pub use label::{BoneLabel, LabelSet, SeedState};

/// 两个分辨率在该相对误差内视为相等. nifti header 以 `f32` 保存分辨率.
const SPACING_RELATIVE_TOLERANCE: f64 = 1e-5;

/// 6-邻域偏移. 互为相反的偏移相邻存放, 即 `offsets[i ^ 1] == -offsets[i]`.
const SIX: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// 26-邻域偏移. 前 6 个与 [`SIX`] 相同, 互为相反的偏移相邻存放.
const TWENTY_SIX: [(isize, isize, isize); 26] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
    (-1, -1, 0),
    (1, 1, 0),
    (-1, 1, 0),
    (1, -1, 0),
    (-1, 0, -1),
    (1, 0, 1),
    (-1, 0, 1),
    (1, 0, -1),
    (0, -1, -1),
    (0, 1, 1),
    (0, -1, 1),
    (0, 1, -1),
    (-1, -1, -1),
    (1, 1, 1),
    (-1, -1, 1),
    (1, 1, -1),
    (-1, 1, -1),
    (1, -1, 1),
    (-1, 1, 1),
    (1, -1, -1),
];

/// 体素邻域类型.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Connectivity {
    /// 共面邻居 (前后上下左右).
    #[default]
    Six,

    /// 共面, 共棱和共顶点邻居.
    TwentySix,
}

impl Connectivity {
    /// 获取邻域偏移 `(dz, dy, dx)`. 顺序固定, 且 `offsets()[i ^ 1]` 是 `offsets()[i]` 的反向.
    #[inline]
    pub const fn offsets(self) -> &'static [(isize, isize, isize)] {
        match self {
            Connectivity::Six => &SIX,
            Connectivity::TwentySix => &TWENTY_SIX,
        }
    }

    /// 邻居个数.
    #[inline]
    pub const fn len(self) -> usize {
        self.offsets().len()
    }

    /// 第 `dir` 个偏移的反向偏移下标.
    #[inline]
    pub const fn reverse(dir: usize) -> usize {
        dir ^ 1
    }
}

/// 带体素分辨率和原点信息的 3D 体数据. 以 `(z, y, x)` 顺序按行优先存储,
/// 即相邻切片方向是第一维.
///
/// 分辨率 `spacing` 以毫米为单位, 同样按 `[z, y, x]` 顺序给出.
///
/// # 注意
///
/// 参与同一次计算的所有体数据必须形状与分辨率一致, 见 [`Volume::same_geometry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T> Volume<T> {
    /// 由裸数据和分辨率创建体数据, 原点为 `[0, 0, 0]`.
    ///
    /// 若分辨率存在非有限值或非正值, 返回 [`BoneError::InvalidSpacing`].
    pub fn from_array(data: Array3<T>, spacing: [f64; 3]) -> BoneResult<Self>
    where
        T: Clone,
    {
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(BoneError::InvalidSpacing(spacing));
        }
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        debug_assert!(data.is_standard_layout());
        Ok(Self {
            data,
            spacing,
            origin: [0.0; 3],
        })
    }

    /// 设置原点坐标 `[z, y, x]`, 以毫米为单位.
    #[inline]
    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    /// 以 `self` 的几何信息包装新数据. 形状不一致时返回 [`BoneError::ShapeMismatch`].
    pub fn like<U: Clone>(&self, data: Array3<U>) -> BoneResult<Volume<U>> {
        let found = data.dim();
        if found != self.shape() {
            return Err(BoneError::ShapeMismatch {
                expected: self.shape(),
                found,
            });
        }
        Ok(Volume::from_array(data, self.spacing)?.with_origin(self.origin))
    }

    /// 以 `self` 的几何信息创建一个填充 `value` 的体数据.
    #[inline]
    pub fn filled_like<U: Clone>(&self, value: U) -> Volume<U> {
        Volume {
            data: Array3::from_elem(self.shape(), value),
            spacing: self.spacing,
            origin: self.origin,
        }
    }

    /// 以 `self` 的几何信息创建一个全零体数据.
    #[inline]
    pub fn zeros_like<U: Clone + Zero>(&self) -> Volume<U> {
        self.filled_like(U::zero())
    }

    /// 获取数据形状 `(z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 获取体素分辨率 `[z, y, x]`, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 获取原点坐标 `[z, y, x]`, 以毫米为单位.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, y0, x0): &Idx3d) -> bool {
        let (z, y, x) = self.shape();
        *z0 < z && *y0 < y && *x0 < x
    }

    /// 检查 `other` 与 `self` 形状和分辨率是否一致.
    ///
    /// 分辨率允许存在 `f32` 精度级别的误差.
    pub fn same_geometry<U>(&self, other: &Volume<U>) -> BoneResult<()> {
        if self.shape() != other.shape() {
            return Err(BoneError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        let close = self
            .spacing
            .iter()
            .zip(other.spacing.iter())
            .all(|(a, b)| (a - b).abs() <= SPACING_RELATIVE_TOLERANCE * a.max(*b));
        if !close {
            return Err(BoneError::SpacingMismatch {
                expected: self.spacing,
                found: other.spacing,
            });
        }
        Ok(())
    }

    /// 行优先线性下标.
    #[inline]
    pub fn linear_index(&self, (z, y, x): Idx3d) -> usize {
        let (_, h, w) = self.shape();
        (z * h + y) * w + x
    }

    /// 行优先线性下标对应的三维索引.
    #[inline]
    pub fn position(&self, linear: usize) -> Idx3d {
        let (_, h, w) = self.shape();
        (linear / (h * w), (linear / w) % h, linear % w)
    }

    /// 获取 `pos` 沿偏移 `(dz, dy, dx)` 的邻居. 越界时返回 `None`.
    #[inline]
    pub fn offset(&self, (z, y, x): Idx3d, (dz, dy, dx): (isize, isize, isize)) -> Option<Idx3d> {
        let pos = (
            z.checked_add_signed(dz)?,
            y.checked_add_signed(dy)?,
            x.checked_add_signed(dx)?,
        );
        self.check(&pos).then_some(pos)
    }

    /// 按固定顺序获取 `pos` 在邻域 `conn` 中所有不越界的邻居.
    #[inline]
    pub fn neighbours(&self, pos: Idx3d, conn: Connectivity) -> impl Iterator<Item = Idx3d> + '_ {
        conn.offsets()
            .iter()
            .filter_map(move |d| self.offset(pos, *d))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

    /// 对每个体素施加 `f`, 保留几何信息.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            data: self.data.map(f),
            spacing: self.spacing,
            origin: self.origin,
        }
    }
}

/// 二值掩膜 / 标签体数据操作.
impl Volume<u8> {
    /// 非零体素个数.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }

    /// 将所有非零体素置为 1.
    pub fn binarized(&self) -> Self {
        self.map(|p| u8::from(*p != 0))
    }
}
