//! 3D 二值形态学操作: 连通分量, 椭球腐蚀, 背景空洞填充.
//!
//! 所有函数都将非零体素视为前景, 并返回 {0, 1} 二值掩膜.

use std::collections::VecDeque;

use log::debug;

use super::{Connectivity, Volume};
use crate::consts::{MASK_BACKGROUND, MASK_FOREGROUND};

/// 前景连通分量标号结果.
#[derive(Debug, Clone)]
pub struct Components {
    /// 每个体素所属分量的编号, 行优先线性存储. `0` 代表不属于任何分量, 分量从 `1` 开始编号.
    pub labels: Vec<u32>,

    /// 第 `i` 个元素是编号为 `i + 1` 的分量的体素个数.
    pub sizes: Vec<usize>,
}

impl Components {
    /// 按体素个数降序排列的分量编号. 大小相同时, 先被扫描到的分量在前.
    pub fn by_size_desc(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = (1..=self.sizes.len() as u32).collect();
        ids.sort_by(|a, b| self.sizes[*b as usize - 1].cmp(&self.sizes[*a as usize - 1]));
        ids
    }
}

/// 按行优先扫描顺序以 BFS 标号满足 `is_fg` 的体素的 `conn`-连通分量.
/// 内部实现保证每次运行产生同样的结果.
pub fn label_components<T>(
    volume: &Volume<T>,
    conn: Connectivity,
    is_fg: impl Fn(&T) -> bool,
) -> Components {
    let mut labels = vec![0u32; volume.size()];
    let mut sizes = vec![];
    let mut q = VecDeque::new();
    for (start, (pos, p)) in volume.data().indexed_iter().enumerate() {
        if labels[start] != 0 || !is_fg(p) {
            continue;
        }
        let id = sizes.len() as u32 + 1;
        let mut size = 0usize;
        labels[start] = id;
        q.push_back(pos);
        while let Some(cur) = q.pop_front() {
            size += 1;
            for n in volume.neighbours(cur, conn) {
                let lin = volume.linear_index(n);
                if labels[lin] == 0 && is_fg(&volume[n]) {
                    labels[lin] = id;
                    q.push_back(n);
                }
            }
        }
        sizes.push(size);
    }
    Components { labels, sizes }
}

/// 由线性存储的分量编号生成掩膜, 保留 `keep(id)` 为真的分量.
fn mask_from_labels<T>(
    like: &Volume<T>,
    labels: &[u32],
    mut keep: impl FnMut(u32) -> bool,
) -> Volume<u8> {
    let mut out = like.zeros_like::<u8>();
    out.data_mut()
        .iter_mut()
        .zip(labels.iter())
        .filter(|(_, id)| **id != 0 && keep(**id))
        .for_each(|(p, _)| *p = MASK_FOREGROUND);
    out
}

/// 仅保留 `mask` 中最大的 `n` 个前景 `conn`-连通分量.
pub fn keep_largest_components(mask: &Volume<u8>, n: usize, conn: Connectivity) -> Volume<u8> {
    let comps = label_components(mask, conn, |p| *p != 0);
    let mut keep = vec![false; comps.sizes.len() + 1];
    for id in comps.by_size_desc().into_iter().take(n) {
        keep[id as usize] = true;
    }
    debug!(
        "keep {} of {} foreground components",
        n.min(comps.sizes.len()),
        comps.sizes.len()
    );
    mask_from_labels(mask, &comps.labels, |id| keep[id as usize])
}

/// 仅保留最大的前景 `conn`-连通分量. 不存在前景时返回全零掩膜.
#[inline]
pub fn largest_component(mask: &Volume<u8>, conn: Connectivity) -> Volume<u8> {
    keep_largest_components(mask, 1, conn)
}

/// 将背景空洞 (即 `conn`-连通背景区域中体素个数不是最大的那些) 填充为前景.
pub fn fill_background_holes(mask: &Volume<u8>, conn: Connectivity) -> Volume<u8> {
    let comps = label_components(mask, conn, |p| *p == 0);
    let Some(&outer) = comps.by_size_desc().first() else {
        // 没有背景.
        return mask.binarized();
    };
    let mut out = mask.binarized();
    out.data_mut()
        .iter_mut()
        .zip(comps.labels.iter())
        .filter(|(_, id)| **id != 0 && **id != outer)
        .for_each(|(p, _)| *p = MASK_FOREGROUND);
    out
}

/// 半径为 `radius` (以体素为单位, `[z, y, x]`) 的椭球结构元素偏移集合.
/// 某一维半径为 0 时, 该维只取 0 偏移.
pub fn ellipsoid_offsets(radius: [usize; 3]) -> Vec<(isize, isize, isize)> {
    let [rz, ry, rx] = radius.map(|r| r as isize);
    let ratio = |d: isize, r: isize| if r == 0 { 0.0 } else { (d as f64 / r as f64).powi(2) };
    let mut out = vec![];
    for dz in -rz..=rz {
        for dy in -ry..=ry {
            for dx in -rx..=rx {
                if ratio(dz, rz) + ratio(dy, ry) + ratio(dx, rx) <= 1.0 {
                    out.push((dz, dy, dx));
                }
            }
        }
    }
    out
}

/// 以椭球结构元素对二值掩膜做腐蚀. 体数据范围外的位置视为前景,
/// 即边界不会额外腐蚀.
pub fn erode_ellipsoid(mask: &Volume<u8>, radius: [usize; 3]) -> Volume<u8> {
    let offsets = ellipsoid_offsets(radius);
    let mut out = mask.zeros_like::<u8>();
    for (pos, p) in mask.data().indexed_iter() {
        if *p == 0 {
            continue;
        }
        let keep = offsets
            .iter()
            .filter_map(|d| mask.offset(pos, *d))
            .all(|n| mask[n] != 0);
        out[pos] = if keep { MASK_FOREGROUND } else { MASK_BACKGROUND };
    }
    out
}
