//! 各向异性分辨率下的精确欧氏距离变换.
//!
//! 沿三个轴依次做一维平方距离变换 (Felzenszwalb-Huttenlocher 抛物线下包络),
//! 每个轴使用该轴的体素分辨率, 因此结果以毫米为单位.

use log::debug;
use ndarray::{Array3, Axis, Zip};

use super::{Connectivity, Volume};
use crate::consts::MASK_FOREGROUND;

/// 前景的内轮廓: 6-邻域内存在背景体素的前景体素. 越界的邻居不算背景.
pub fn contour(mask: &Volume<u8>) -> Volume<u8> {
    let mut out = mask.zeros_like::<u8>();
    for (pos, p) in mask.data().indexed_iter() {
        if *p != 0 && mask.neighbours(pos, Connectivity::Six).any(|n| mask[n] == 0) {
            out[pos] = MASK_FOREGROUND;
        }
    }
    out
}

/// 一维平方距离变换, 采样间距为 `h`.
///
/// `out[i] = min_j (f[j] + ((i - j) h)^2)`. `f` 中的无穷大不参与下包络,
/// 全为无穷大时输出也全为无穷大.
fn transform_1d(f: &[f64], h: f64, out: &mut [f64]) {
    let pos = |q: usize| q as f64 * h;
    let cross = |a: usize, b: usize| {
        ((f[b] + pos(b) * pos(b)) - (f[a] + pos(a) * pos(a))) / (2.0 * (pos(b) - pos(a)))
    };

    // `v[k]` 为下包络中第 k 段抛物线的顶点, `z[k]` 为其左边界.
    let mut v: Vec<usize> = Vec::new();
    let mut z: Vec<f64> = Vec::new();
    for q in (0..f.len()).filter(|q| f[*q].is_finite()) {
        loop {
            match (v.last(), z.last()) {
                (Some(&last), Some(&left)) => {
                    let s = cross(last, q);
                    if s <= left {
                        v.pop();
                        z.pop();
                    } else {
                        v.push(q);
                        z.push(s);
                        break;
                    }
                }
                _ => {
                    v.push(q);
                    z.push(f64::NEG_INFINITY);
                    break;
                }
            }
        }
    }
    if v.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (i, o) in out.iter_mut().enumerate() {
        let x = pos(i);
        while k + 1 < z.len() && z[k + 1] < x {
            k += 1;
        }
        let d = x - pos(v[k]);
        *o = d * d + f[v[k]];
    }
}

/// 每个体素到最近的非零体素的平方欧氏距离 (平方毫米).
/// 没有非零体素时全为无穷大.
pub fn squared_distance_to(sites: &Volume<u8>) -> Array3<f64> {
    let mut d = sites
        .data()
        .map(|p| if *p != 0 { 0.0 } else { f64::INFINITY });
    for (axis, h) in sites.spacing().into_iter().enumerate() {
        zip_for_each!(Zip::from(d.lanes_mut(Axis(axis))), |mut lane| {
            let f: Vec<f64> = lane.iter().copied().collect();
            let mut out = vec![0.0; f.len()];
            transform_1d(&f, h, &mut out);
            lane.iter_mut().zip(out).for_each(|(l, o)| *l = o);
        });
    }
    d
}

/// 带符号距离图: 每个体素到 `mask` 内轮廓 (见 [`contour`]) 的欧氏距离, 以毫米为单位.
///
/// # 注意
///
/// 1. 前景为正, 背景为负, 轮廓体素本身为 0.
/// 2. 没有轮廓 (全空或前景填满整个体数据) 时, 前景为 `+inf`, 背景为 `-inf`.
pub fn signed_distance(mask: &Volume<u8>) -> Volume<f32> {
    let edge = contour(mask);
    debug!("distance map: {} contour voxels", edge.count_nonzero());
    let sq = squared_distance_to(&edge);
    let data = zip_map_collect!(Zip::from(&sq).and(mask.data()), |d, m| {
        let d = d.sqrt() as f32;
        if *m != 0 {
            d
        } else {
            -d
        }
    });
    Volume {
        data,
        spacing: mask.spacing,
        origin: mask.origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_fn(
        shape: (usize, usize, usize),
        spacing: [f64; 3],
        f: impl Fn(usize, usize, usize) -> bool,
    ) -> Volume<u8> {
        let data = Array3::from_shape_fn(shape, |(z, y, x)| u8::from(f(z, y, x)));
        Volume::from_array(data, spacing).unwrap()
    }

    #[test]
    fn test_transform_1d() {
        let inf = f64::INFINITY;
        let mut out = [0.0; 6];
        transform_1d(&[inf, 0.0, inf, inf, inf, 0.0], 2.0, &mut out);
        assert_eq!(out, [4.0, 0.0, 4.0, 16.0, 4.0, 0.0]);

        transform_1d(&[inf, 5.0, inf, 0.0, inf, inf], 1.0, &mut out);
        assert_eq!(out, [6.0, 4.0, 1.0, 0.0, 1.0, 4.0]);

        transform_1d(&[inf; 6], 1.0, &mut out);
        assert!(out.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_signed_line() {
        let mask = mask_from_fn((1, 1, 9), [1.0, 1.0, 0.5], |_, _, x| (2..=6).contains(&x));
        let d = signed_distance(&mask);
        let row: Vec<f32> = d.data().iter().copied().collect();
        assert_eq!(row, [-1.0, -0.5, 0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0]);
    }

    #[test]
    fn test_matches_brute_force() {
        let spacing = [2.0, 1.0, 0.7];
        let mask = mask_from_fn((7, 9, 8), spacing, |z, y, x| {
            let (z, y, x) = (z as f64 - 3.0, y as f64 - 4.0, x as f64 - 3.5);
            (z * 2.0).powi(2) + y * y + (x * 0.7).powi(2) < 9.0 || (z > 2.0 && x < 1.0)
        });
        let edge = contour(&mask);
        let sites: Vec<_> = edge
            .data()
            .indexed_iter()
            .filter(|(_, p)| **p != 0)
            .map(|(pos, _)| pos)
            .collect();
        assert!(!sites.is_empty());

        let d = signed_distance(&mask);
        for (pos, v) in d.data().indexed_iter() {
            let best = sites
                .iter()
                .map(|s| {
                    let dz = (pos.0 as f64 - s.0 as f64) * spacing[0];
                    let dy = (pos.1 as f64 - s.1 as f64) * spacing[1];
                    let dx = (pos.2 as f64 - s.2 as f64) * spacing[2];
                    (dz * dz + dy * dy + dx * dx).sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            let expected = if mask[pos] != 0 { best } else { -best };
            assert!((*v as f64 - expected).abs() < 1e-4, "{pos:?}: {v} vs {expected}");
        }
    }

    #[test]
    fn test_no_contour() {
        let empty = mask_from_fn((3, 3, 3), [1.0; 3], |_, _, _| false);
        assert!(signed_distance(&empty)
            .data()
            .iter()
            .all(|v| *v == f32::NEG_INFINITY));

        let full = mask_from_fn((3, 3, 3), [1.0; 3], |_, _, _| true);
        assert_eq!(contour(&full).count_nonzero(), 0);
        assert!(signed_distance(&full)
            .data()
            .iter()
            .all(|v| *v == f32::INFINITY));
    }
}
