//! nifti 文件边界. 算法内部不做任何文件读写.

use std::path::Path;

use ndarray::{Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::Volume;
use crate::BoneResult;

/// 从 header 获取分辨率, 将 (W, H, z) 转换成 (z, H, W).
#[inline]
fn spacing_from_header(h: &NiftiHeader) -> [f64; 3] {
    let [_, w, h, z, ..] = h.pixdim;
    [z as f64, h as f64, w as f64]
}

/// 从 header 的 qform 偏移获取原点, 顺序为 (z, H, W).
#[inline]
fn origin_from_header(h: &NiftiHeader) -> [f64; 3] {
    [h.quatern_z as f64, h.quatern_y as f64, h.quatern_x as f64]
}

impl<T> Volume<T> {
    /// 生成写出时参考的 header. 仅携带分辨率与原点, 其余字段由写出器根据数据填写.
    fn reference_header(&self) -> NiftiHeader {
        let mut header = NiftiHeader::default();
        let [sz, sy, sx] = self.spacing;
        let [_, pw, ph, pz, ..] = &mut header.pixdim;
        (*pw, *ph, *pz) = (sx as f32, sy as f32, sz as f32);
        let [oz, oy, ox] = self.origin;
        (header.quatern_x, header.quatern_y, header.quatern_z) = (ox as f32, oy as f32, oz as f32);
        header.qform_code = 1;
        header
    }
}

macro_rules! impl_nifti_io {
    ($($t: ty),*) => {$(
        impl Volume<$t> {
            /// 打开 nii (或 nii.gz) 文件格式的 3D 体数据. `path` 为文件的本地路径.
            /// 体素值转换为该类型. 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
            ///
            /// 长度为 1 的多余维度 (例如单时间点的 4D 文件) 会被去除.
            pub fn open<P: AsRef<Path>>(path: P) -> BoneResult<Self> {
                let obj = ReaderOptions::new().read_file(path.as_ref())?;
                let header = obj.header().clone();
                let mut data = obj.into_volume().into_ndarray::<$t>()?;
                while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
                    let last = data.ndim() - 1;
                    data = data.index_axis_move(Axis(last), 0);
                }

                // [W, H, z] -> [z, H, W].
                let data = data.into_dimensionality::<Ix3>()?.permuted_axes([2, 1, 0]);
                let volume = Self::from_array(data, spacing_from_header(&header))?;
                Ok(volume.with_origin(origin_from_header(&header)))
            }

            /// 将 3D 体数据以 nifti 格式写入 `path`, 以 `.gz` 结尾时压缩.
            /// 分辨率与原点写入 header.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> BoneResult<()> {
                let header = self.reference_header();
                // [z, H, W] -> [W, H, z].
                let data = self.data.view().permuted_axes([2, 1, 0]);
                WriterOptions::new(path.as_ref())
                    .reference_header(&header)
                    .write_nifti(&data)?;
                Ok(())
            }
        }
    )*};
}

impl_nifti_io!(u8, i16, u16, f32, f64);
