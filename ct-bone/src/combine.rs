//! 将各标签的二值掩膜合并为一个多标签体数据.

use log::{info, warn};
use ndarray::Zip;

use crate::consts::mark::MARK_BACKGROUND;
use crate::consts::LABEL_BACKGROUND;
use crate::graph_cut::{segment_labels, GraphCutConfig};
use crate::{BoneError, BoneResult, LabelSet, Volume};

/// 按顺序合并 `(标签码, 二值掩膜)`. 重叠体素取先出现的标签, 其余体素为 0.
///
/// # 注意
///
/// 1. `masks` 不能为空, 否则返回 [`BoneError::InvalidLabelSet`].
/// 2. 标签码不能是 0 或 255, 否则返回 [`BoneError::InvalidLabelCode`].
/// 3. 所有掩膜必须几何一致. 输出沿用第一个掩膜的几何信息.
pub fn combine_labels(masks: &[(u8, Volume<u8>)]) -> BoneResult<Volume<u8>> {
    let Some((_, first)) = masks.first() else {
        return Err(BoneError::InvalidLabelSet("nothing to combine".to_owned()));
    };
    for (code, mask) in masks {
        if *code == LABEL_BACKGROUND || *code == MARK_BACKGROUND {
            return Err(BoneError::InvalidLabelCode(*code));
        }
        first.same_geometry(mask)?;
    }

    let mut out = first.zeros_like::<u8>();
    let mut overlap = 0usize;
    for (code, mask) in masks {
        let mut taken = 0usize;
        Zip::from(out.data_mut())
            .and(mask.data())
            .for_each(|o, m| match (*o, *m) {
                (_, 0) => {}
                (LABEL_BACKGROUND, _) => *o = *code,
                _ => taken += 1,
            });
        if taken > 0 {
            warn!("label {code}: {taken} voxels already taken by earlier labels");
        }
        overlap += taken;
    }
    info!(
        "combined {} labels, {} labelled voxels, {overlap} overlapping",
        masks.len(),
        out.count_nonzero()
    );
    Ok(out)
}

/// 分割 `labels` 中的每个标签并按其顺序合并.
///
/// 见 [`segment_labels`] 和 [`combine_labels`].
pub fn segment_and_combine(
    sheetness: &Volume<f32>,
    marking: &Volume<u8>,
    hu: Option<&Volume<f32>>,
    labels: &LabelSet,
    config: &GraphCutConfig,
) -> BoneResult<Volume<u8>> {
    let masks = segment_labels(sheetness, marking, hu, labels, config)?;
    combine_labels(&masks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::sheetness::{AIR_THRESHOLD, METAL_THRESHOLD};
    use crate::graph_cut::DataTerm;
    use crate::{enhance_sheetness, skin_mask, SheetnessConfig};
    use ndarray::Array3;

    fn volume_from_fn<T: Clone>(
        shape: (usize, usize, usize),
        f: impl Fn(usize, usize, usize) -> T,
    ) -> Volume<T> {
        let data = Array3::from_shape_fn(shape, |(z, y, x)| f(z, y, x));
        Volume::from_array(data, [1.0; 3]).unwrap()
    }

    #[test]
    fn test_first_writer_wins() {
        let a = volume_from_fn((2, 2, 4), |_, _, x| u8::from(x < 3));
        let b = volume_from_fn((2, 2, 4), |_, _, x| u8::from(x >= 1));
        let out = combine_labels(&[(7, a.clone()), (3, b.clone())]).unwrap();
        assert_eq!(out[(0, 0, 0)], 7);
        assert_eq!(out[(1, 1, 2)], 7);
        assert_eq!(out[(1, 0, 3)], 3);

        let out = combine_labels(&[(3, b), (7, a)]).unwrap();
        assert_eq!(out[(0, 0, 0)], 7);
        assert_eq!(out[(1, 1, 2)], 3);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(combine_labels(&[]), Err(BoneError::InvalidLabelSet(_))));
        let a = volume_from_fn((2, 2, 2), |_, _, _| 1u8);
        assert!(matches!(
            combine_labels(&[(0, a.clone())]),
            Err(BoneError::InvalidLabelCode(0))
        ));
        let b = volume_from_fn((2, 2, 3), |_, _, _| 1u8);
        assert!(matches!(
            combine_labels(&[(1, a), (2, b)]),
            Err(BoneError::ShapeMismatch { .. })
        ));
    }

    /// 两块等亮度的厚板在 `x = 10` 处直接接触, 中央各有一块种子.
    fn touching_slabs() -> (Volume<f32>, Volume<u8>) {
        let shape = (12, 12, 20);
        let rows = |z: usize, y: usize| (2..10).contains(&z) && (2..10).contains(&y);
        let hu = volume_from_fn(shape, |z, y, x| {
            if rows(z, y) && (5..15).contains(&x) {
                1000.0f32
            } else {
                0.0
            }
        });
        let seeds = |z: usize, y: usize| (4..8).contains(&z) && (4..8).contains(&y);
        let marks = volume_from_fn(shape, |z, y, x| match x {
            6..=8 if seeds(z, y) => 1u8,
            11..=13 if seeds(z, y) => 2,
            _ => 0,
        });
        (hu, marks)
    }

    #[test]
    fn test_touching_slabs_end_to_end() {
        let (hu, marks) = touching_slabs();
        let skin = skin_mask(&hu, AIR_THRESHOLD, METAL_THRESHOLD).unwrap();
        assert_eq!(skin.count_nonzero(), skin.size());
        let sheet = enhance_sheetness(&hu, &skin, &SheetnessConfig::default()).unwrap();

        let rows = |z: usize, y: usize| (2..10).contains(&z) && (2..10).contains(&y);
        let slab_a = |(z, y, x): (usize, usize, usize)| rows(z, y) && (5..10).contains(&x);
        let slab_b = |(z, y, x): (usize, usize, usize)| rows(z, y) && (10..15).contains(&x);
        let seam = |(z, y, x): (usize, usize, usize)| rows(z, y) && (9..11).contains(&x);

        for data in [DataTerm::Sheetness, DataTerm::HuThreshold(250.0)] {
            let config = GraphCutConfig::default()
                .with_lambda(50.0)
                .with_sigma(0.25)
                .with_data_term(data);
            let labels = LabelSet::new([("a", 1u8), ("b", 2)]).unwrap();
            let masks = segment_labels(&sheet, &marks, Some(&hu), &labels, &config).unwrap();
            let a_view = masks[0].1.data();
            let b_view = masks[1].1.data();

            // 各自覆盖自己的板, 板外为空, 只在接触面两侧各一层体素上重叠.
            let mut overlap = 0;
            for ((pos, a), b) in a_view.indexed_iter().zip(b_view.iter()) {
                if slab_a(pos) {
                    assert_eq!(*a, 1, "{data:?}: label a misses {pos:?}");
                }
                if slab_b(pos) {
                    assert_eq!(*b, 1, "{data:?}: label b misses {pos:?}");
                }
                if !slab_a(pos) && !slab_b(pos) {
                    assert_eq!((*a, *b), (0, 0), "{data:?}: leak at {pos:?}");
                }
                if *a == 1 && *b == 1 {
                    assert!(seam(pos), "{data:?}: overlap off the seam at {pos:?}");
                    overlap += 1;
                }
            }
            assert_eq!(overlap, 2 * 64, "{data:?}");

            // 接缝归先出现的标签.
            let out = combine_labels(&masks).unwrap();
            for (pos, v) in out.data().indexed_iter() {
                let expected = if slab_a(pos) || seam(pos) {
                    1
                } else if slab_b(pos) {
                    2
                } else {
                    0
                };
                assert_eq!(*v, expected, "{data:?}: combined at {pos:?}");
            }
            assert_eq!(out.count_nonzero(), 2 * 320);

            let swapped = LabelSet::new([("b", 2u8), ("a", 1)]).unwrap();
            let out = segment_and_combine(&sheet, &marks, Some(&hu), &swapped, &config).unwrap();
            assert_eq!(out[(5, 5, 9)], 2);
            assert_eq!(out[(5, 5, 10)], 2);
            assert_eq!(out[(5, 5, 8)], 1);
            assert_eq!(out.data().iter().filter(|v| **v == 2).count(), 320 + 64);
            assert_eq!(out.data().iter().filter(|v| **v == 1).count(), 320 - 64);
        }
    }
}
