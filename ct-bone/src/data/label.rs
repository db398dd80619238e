//! 骨骼标签, 标签集合与种子状态.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::mark::{is_marked, MARK_BACKGROUND, MARK_UNMARKED};
use crate::consts::BONE_LABEL_COUNT;
use crate::{BoneError, BoneResult};

/// 可分割的骨骼结构. 判别值即种子标注与输出体数据中的标签码.
///
/// 声明顺序即合并优先级: 先声明者在重叠体素上获胜.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum BoneLabel {
    /// 右股骨.
    FemurRight = 1,
    /// 左股骨.
    FemurLeft = 2,
    /// 右髋骨.
    PelvisRight = 3,
    /// 左髋骨.
    PelvisLeft = 4,
    /// 骶骨.
    Sacrum = 5,
    /// 第 5 腰椎.
    L5 = 6,
    /// 第 4 腰椎.
    L4 = 7,
    /// 第 3 腰椎.
    L3 = 8,
    /// 第 2 腰椎.
    L2 = 9,
    /// 第 1 腰椎.
    L1 = 10,
}

impl BoneLabel {
    /// 按合并优先级排列的全部标签.
    pub const ALL: [BoneLabel; BONE_LABEL_COUNT] = [
        BoneLabel::FemurRight,
        BoneLabel::FemurLeft,
        BoneLabel::PelvisRight,
        BoneLabel::PelvisLeft,
        BoneLabel::Sacrum,
        BoneLabel::L5,
        BoneLabel::L4,
        BoneLabel::L3,
        BoneLabel::L2,
        BoneLabel::L1,
    ];

    /// 标签码.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// 标签名, 例如 `Femur_Right`.
    pub const fn name(self) -> &'static str {
        match self {
            BoneLabel::FemurRight => "Femur_Right",
            BoneLabel::FemurLeft => "Femur_Left",
            BoneLabel::PelvisRight => "Pelvis_Right",
            BoneLabel::PelvisLeft => "Pelvis_Left",
            BoneLabel::Sacrum => "Sacrum",
            BoneLabel::L5 => "L5",
            BoneLabel::L4 => "L4",
            BoneLabel::L3 => "L3",
            BoneLabel::L2 => "L2",
            BoneLabel::L1 => "L1",
        }
    }

    /// 由标签码反查标签.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }
}

impl fmt::Display for BoneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BoneLabel {
    type Err = BoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.name() == s)
            .ok_or_else(|| BoneError::InvalidLabelSet(format!("unknown bone label `{s}`")))
    }
}

/// 有序的 `(名称, 标签码)` 集合. 迭代顺序即合并优先级.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LabelSet {
    entries: Vec<(String, u8)>,
}

impl Default for LabelSet {
    #[inline]
    fn default() -> Self {
        Self::bones()
    }
}

impl LabelSet {
    /// 固定的十个骨骼标签, 按 [`BoneLabel::ALL`] 顺序.
    pub fn bones() -> Self {
        Self {
            entries: BoneLabel::ALL
                .into_iter()
                .map(|l| (l.name().to_owned(), l.code()))
                .collect(),
        }
    }

    /// 创建自定义标签集合.
    ///
    /// # 注意
    ///
    /// 集合必须非空, 标签码必须非零, 互不相同, 且不等于保留的背景种子码
    /// [`MARK_BACKGROUND`]. 否则返回 [`BoneError::InvalidLabelSet`].
    pub fn new<I, S>(entries: I) -> BoneResult<Self>
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        let entries: Vec<(String, u8)> = entries.into_iter().map(|(n, c)| (n.into(), c)).collect();
        if entries.is_empty() {
            return Err(BoneError::InvalidLabelSet("empty label set".to_owned()));
        }
        let mut seen = [false; 256];
        for (name, code) in entries.iter() {
            if matches!(*code, MARK_UNMARKED | MARK_BACKGROUND) {
                return Err(BoneError::InvalidLabelSet(format!(
                    "label `{name}` uses reserved code {code}"
                )));
            }
            if std::mem::replace(&mut seen[*code as usize], true) {
                return Err(BoneError::InvalidLabelSet(format!(
                    "duplicated label code {code}"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// 标签个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 集合是否为空? 合法集合总是非空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按合并优先级迭代 `(名称, 标签码)`.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, u8)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), *c))
    }

    /// 按名称查找标签码.
    pub fn code_of(&self, name: &str) -> Option<u8> {
        self.iter().find(|(n, _)| *n == name).map(|(_, c)| c)
    }
}

/// 体素相对某一目标标签的种子状态.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeedState {
    /// 未标注.
    Unmarked,
    /// 目标标签的前景种子.
    Foreground,
    /// 背景种子, 包括其它标签的种子和保留背景码.
    Background,
}

impl SeedState {
    /// 以目标标签码 `label` 判别标注值 `mark`. 每个体素恰好属于一种状态.
    #[inline]
    pub const fn classify(mark: u8, label: u8) -> Self {
        if !is_marked(mark) {
            SeedState::Unmarked
        } else if mark == label {
            SeedState::Foreground
        } else {
            SeedState::Background
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_codes() {
        let codes: Vec<u8> = BoneLabel::ALL.iter().map(|l| l.code()).collect();
        assert_eq!(codes, (1..=10).collect::<Vec<u8>>());
        assert_eq!(BoneLabel::from_code(5), Some(BoneLabel::Sacrum));
        assert_eq!(BoneLabel::from_code(0), None);
        assert_eq!("Pelvis_Left".parse::<BoneLabel>().unwrap(), BoneLabel::PelvisLeft);
        assert!("Tibia".parse::<BoneLabel>().is_err());
        assert_eq!(BoneLabel::L1.to_string(), "L1");
    }

    #[test]
    fn test_bones_order() {
        let set = LabelSet::bones();
        assert_eq!(set.len(), BONE_LABEL_COUNT);
        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "Femur_Right");
        assert_eq!(names[4], "Sacrum");
        assert_eq!(names[9], "L1");
        assert_eq!(set.code_of("L5"), Some(6));
    }

    #[test]
    fn test_label_set_validation() {
        assert!(LabelSet::new(Vec::<(String, u8)>::new()).is_err());
        assert!(LabelSet::new([("a", 0)]).is_err());
        assert!(LabelSet::new([("a", MARK_BACKGROUND)]).is_err());
        assert!(LabelSet::new([("a", 3), ("b", 3)]).is_err());
        let set = LabelSet::new([("b", 7), ("a", 3)]).unwrap();
        assert_eq!(set.iter().map(|(_, c)| c).collect::<Vec<_>>(), vec![7, 3]);
    }

    #[test]
    fn test_seed_classify() {
        assert_eq!(SeedState::classify(0, 3), SeedState::Unmarked);
        assert_eq!(SeedState::classify(3, 3), SeedState::Foreground);
        assert_eq!(SeedState::classify(4, 3), SeedState::Background);
        assert_eq!(
            SeedState::classify(MARK_BACKGROUND, 3),
            SeedState::Background
        );
    }
}
