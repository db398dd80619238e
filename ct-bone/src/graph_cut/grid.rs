//! 隐式 3D 网格图上的 Boykov-Kolmogorov 最大流.
//!
//! 每个体素是一个节点, 邻接关系由 [`Connectivity`] 给出, 不显式存储边表.
//! 容量为整数, 活跃节点与孤儿节点均以 FIFO 队列处理, 邻居顺序固定,
//! 因此相同输入总是得到相同的割.

use std::collections::VecDeque;

use crate::{Connectivity, Idx3d};

/// 整数容量.
pub(crate) type Cap = i64;

/// 硬约束使用的 "无穷大" 容量. 留出足够余量, 累加时不会溢出.
pub(crate) const INFINITE: Cap = Cap::MAX / 4;

/// 无父节点 (自由节点或孤儿).
const NO_PARENT: u8 = u8::MAX;

/// 父节点为终端 (源或汇).
const TERMINAL: u8 = u8::MAX - 1;

/// 节点所属的搜索树.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Tree {
    Free,
    Source,
    Sink,
}

/// 网格图及其最大流求解状态.
#[derive(Debug, Clone)]
pub(crate) struct GridGraph {
    shape: Idx3d,
    offsets: &'static [(isize, isize, isize)],

    /// `res[v * k + d]`: 边 `v -> neighbour(v, d)` 的剩余容量.
    res: Vec<Cap>,

    /// 终端剩余容量. 正值代表源到节点, 负值代表节点到汇.
    tr_cap: Vec<Cap>,

    tree: Vec<Tree>,

    /// 父节点所在方向 (`neighbour(v, parent[v])` 即父节点), 或 [`NO_PARENT`], [`TERMINAL`].
    parent: Vec<u8>,

    /// 距离启发式的时间戳与到终端的距离.
    ts: Vec<u32>,
    dist: Vec<u32>,
    time: u32,

    active: VecDeque<usize>,
    in_active: Vec<bool>,
    orphans: VecDeque<usize>,

    flow: Cap,
}

impl GridGraph {
    /// 创建所有容量为 0 的网格图.
    pub(crate) fn new(shape: Idx3d, conn: Connectivity) -> Self {
        let n = shape.0 * shape.1 * shape.2;
        let k = conn.len();
        debug_assert!(k < TERMINAL as usize);
        Self {
            shape,
            offsets: conn.offsets(),
            res: vec![0; n * k],
            tr_cap: vec![0; n],
            tree: vec![Tree::Free; n],
            parent: vec![NO_PARENT; n],
            ts: vec![0; n],
            dist: vec![0; n],
            time: 0,
            active: VecDeque::new(),
            in_active: vec![false; n],
            orphans: VecDeque::new(),
            flow: 0,
        }
    }

    /// 节点个数.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.tr_cap.len()
    }

    /// 每个节点的邻居方向个数.
    #[inline]
    pub(crate) fn degree(&self) -> usize {
        self.offsets.len()
    }

    /// 节点 `v` 沿方向 `d` 的邻居. 越界时返回 `None`.
    #[inline]
    pub(crate) fn neighbour(&self, v: usize, d: usize) -> Option<usize> {
        let (_, h, w) = self.shape;
        let (z, y, x) = (v / (h * w), (v / w) % h, v % w);
        let (dz, dy, dx) = self.offsets[d];
        let z = z.checked_add_signed(dz).filter(|z| *z < self.shape.0)?;
        let y = y.checked_add_signed(dy).filter(|y| *y < h)?;
        let x = x.checked_add_signed(dx).filter(|x| *x < w)?;
        Some((z * h + y) * w + x)
    }

    /// 设置节点 `v` 的终端容量. 只保留两者之差, 公共部分直接计入流量.
    #[inline]
    pub(crate) fn set_terminal(&mut self, v: usize, source: Cap, sink: Cap) {
        debug_assert!(source >= 0 && sink >= 0);
        self.flow += source.min(sink);
        self.tr_cap[v] = source - sink;
    }

    /// 以可变切片访问所有有向边的剩余容量, 下标为 `v * degree + d`.
    #[inline]
    pub(crate) fn edges_mut(&mut self) -> &mut [Cap] {
        &mut self.res
    }

    /// 节点 `v` 在最小割中是否位于源一侧?
    #[inline]
    pub(crate) fn is_source(&self, v: usize) -> bool {
        self.tree[v] == Tree::Source
    }

    #[inline]
    fn res_at(&self, v: usize, d: usize) -> Cap {
        self.res[v * self.degree() + d]
    }

    #[inline]
    fn res_at_mut(&mut self, v: usize, d: usize) -> &mut Cap {
        let k = self.degree();
        &mut self.res[v * k + d]
    }

    #[inline]
    fn set_active(&mut self, v: usize) {
        if !self.in_active[v] {
            self.in_active[v] = true;
            self.active.push_back(v);
        }
    }

    /// 计算最大流, 返回总流量.
    pub(crate) fn maxflow(&mut self) -> Cap {
        for v in 0..self.len() {
            let t = self.tr_cap[v];
            if t != 0 {
                self.tree[v] = if t > 0 { Tree::Source } else { Tree::Sink };
                self.parent[v] = TERMINAL;
                self.ts[v] = 0;
                self.dist[v] = 1;
                self.set_active(v);
            }
        }

        while let Some((a, d)) = self.grow() {
            self.time += 1;
            self.augment(a, d);
            self.adopt();
        }
        self.flow
    }

    /// 生长阶段. 找到一条连接两棵树的边 `a -> neighbour(a, d)` 时返回,
    /// 其中 `a` 属于源树.
    fn grow(&mut self) -> Option<(usize, usize)> {
        while let Some(&i) = self.active.front() {
            let ti = self.tree[i];
            if ti == Tree::Free {
                self.active.pop_front();
                self.in_active[i] = false;
                continue;
            }
            for d in 0..self.degree() {
                let Some(j) = self.neighbour(i, d) else {
                    continue;
                };
                let rev = Connectivity::reverse(d);
                // 沿树的方向的剩余容量.
                let cap = if ti == Tree::Source {
                    self.res_at(i, d)
                } else {
                    self.res_at(j, rev)
                };
                if cap == 0 {
                    continue;
                }
                match self.tree[j] {
                    Tree::Free => {
                        self.tree[j] = ti;
                        self.parent[j] = rev as u8;
                        self.ts[j] = self.ts[i];
                        self.dist[j] = self.dist[i] + 1;
                        self.set_active(j);
                    }
                    tj if tj != ti => {
                        // 节点 `i` 保持在队首, 下一轮继续生长.
                        return Some(if ti == Tree::Source { (i, d) } else { (j, rev) });
                    }
                    _ => {}
                }
            }
            self.active.pop_front();
            self.in_active[i] = false;
        }
        None
    }

    /// 沿 `source ~> a -> b ~> sink` 增广, 其中 `b = neighbour(a, d)`.
    fn augment(&mut self, a: usize, d: usize) {
        let b = self.neighbour(a, d).unwrap_or(a);
        debug_assert_ne!(a, b);

        // 瓶颈容量.
        let mut bottleneck = self.res_at(a, d);
        let mut v = a;
        while self.parent[v] != TERMINAL {
            let pd = self.parent[v] as usize;
            let p = self.neighbour(v, pd).unwrap_or(v);
            bottleneck = bottleneck.min(self.res_at(p, Connectivity::reverse(pd)));
            v = p;
        }
        bottleneck = bottleneck.min(self.tr_cap[v]);
        let mut v = b;
        while self.parent[v] != TERMINAL {
            let pd = self.parent[v] as usize;
            bottleneck = bottleneck.min(self.res_at(v, pd));
            v = self.neighbour(v, pd).unwrap_or(v);
        }
        bottleneck = bottleneck.min(-self.tr_cap[v]);
        debug_assert!(bottleneck > 0);

        // 中间边.
        *self.res_at_mut(a, d) -= bottleneck;
        *self.res_at_mut(b, Connectivity::reverse(d)) += bottleneck;

        // 源树一侧.
        let mut v = a;
        while self.parent[v] != TERMINAL {
            let pd = self.parent[v] as usize;
            let p = self.neighbour(v, pd).unwrap_or(v);
            *self.res_at_mut(v, pd) += bottleneck;
            let r = self.res_at_mut(p, Connectivity::reverse(pd));
            *r -= bottleneck;
            if *r == 0 {
                self.make_orphan(v);
            }
            v = p;
        }
        self.tr_cap[v] -= bottleneck;
        if self.tr_cap[v] == 0 {
            self.make_orphan(v);
        }

        // 汇树一侧.
        let mut v = b;
        while self.parent[v] != TERMINAL {
            let pd = self.parent[v] as usize;
            let p = self.neighbour(v, pd).unwrap_or(v);
            *self.res_at_mut(p, Connectivity::reverse(pd)) += bottleneck;
            let r = self.res_at_mut(v, pd);
            *r -= bottleneck;
            if *r == 0 {
                self.make_orphan(v);
            }
            v = p;
        }
        self.tr_cap[v] += bottleneck;
        if self.tr_cap[v] == 0 {
            self.make_orphan(v);
        }

        self.flow += bottleneck;
    }

    #[inline]
    fn make_orphan(&mut self, v: usize) {
        self.parent[v] = NO_PARENT;
        self.orphans.push_back(v);
    }

    /// 从 `j` 出发沿父节点走到终端, 返回到终端的距离. 经过孤儿时返回 `None`.
    /// 成功时沿途记录时间戳与距离.
    fn origin_distance(&mut self, j: usize) -> Option<u32> {
        let mut k = j;
        let mut d = 0u32;
        loop {
            if self.ts[k] == self.time {
                d += self.dist[k];
                break;
            }
            d += 1;
            match self.parent[k] {
                TERMINAL => {
                    self.ts[k] = self.time;
                    self.dist[k] = 1;
                    break;
                }
                NO_PARENT => return None,
                pd => k = self.neighbour(k, pd as usize).unwrap_or(k),
            }
        }

        // 沿途记录.
        let mut k = j;
        let mut dd = d;
        while self.ts[k] != self.time {
            self.ts[k] = self.time;
            self.dist[k] = dd;
            dd -= 1;
            let pd = self.parent[k];
            k = self.neighbour(k, pd as usize).unwrap_or(k);
        }
        Some(d)
    }

    /// 收养阶段. 为每个孤儿寻找同树内有效的新父节点, 找不到则释放为自由节点.
    fn adopt(&mut self) {
        while let Some(v) = self.orphans.pop_front() {
            let t = self.tree[v];
            let mut best: Option<(usize, u32)> = None;
            for d in 0..self.degree() {
                let Some(j) = self.neighbour(v, d) else {
                    continue;
                };
                if self.tree[j] != t {
                    continue;
                }
                let cap = if t == Tree::Source {
                    self.res_at(j, Connectivity::reverse(d))
                } else {
                    self.res_at(v, d)
                };
                if cap == 0 {
                    continue;
                }
                if let Some(dist) = self.origin_distance(j) {
                    if best.map_or(true, |(_, bd)| dist < bd) {
                        best = Some((d, dist));
                    }
                }
            }

            if let Some((d, dist)) = best {
                self.parent[v] = d as u8;
                self.ts[v] = self.time;
                self.dist[v] = dist + 1;
                continue;
            }

            // 无法收养: 释放节点, 并处理其邻居.
            for d in 0..self.degree() {
                let Some(j) = self.neighbour(v, d) else {
                    continue;
                };
                if self.tree[j] != t {
                    continue;
                }
                let rev = Connectivity::reverse(d);
                let cap = if t == Tree::Source {
                    self.res_at(j, rev)
                } else {
                    self.res_at(v, d)
                };
                if cap > 0 {
                    self.set_active(j);
                }
                if self.parent[j] == rev as u8 {
                    self.make_orphan(j);
                }
            }
            self.tree[v] = Tree::Free;
            self.ts[v] = 0;
        }
    }
}
