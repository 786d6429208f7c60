use serde::{Deserialize, Serialize};

/// 相对目标序列的一次插入/删除。
///
/// - 插入以第一个被后移的目标位置为 `target_index`；
/// - 删除以最后一个被删除的目标位置为 `target_index`；
/// - `error_index` 是报告用的规范位置；
/// - `subst_size > 0` 表示同位置的不等长替换（把 `subst_size` 个目标字符换成 `seq`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indel {
    pub insert: bool,
    pub seq: Vec<u8>,
    pub src_index: isize,
    pub target_index: isize,
    pub error_index: isize,
    pub subst_size: usize,
}

impl Indel {
    pub fn new(insert: bool, seq: &[u8], src_index: isize, target_index: isize) -> Self {
        let error_index = default_error_index(insert, seq.len(), target_index);
        Self { insert, seq: seq.to_vec(), src_index, target_index, error_index, subst_size: 0 }
    }

    pub fn insertion(seq: &[u8], src_index: isize, target_index: isize) -> Self {
        Self::new(true, seq, src_index, target_index)
    }

    pub fn deletion(seq: &[u8], src_index: isize, target_index: isize) -> Self {
        Self::new(false, seq, src_index, target_index)
    }

    /// 用 `seq` 替换目标中从 `target_index` 开始的 `subst_size` 个字符
    pub fn substitution(seq: &[u8], src_index: isize, target_index: isize, subst_size: usize) -> Self {
        Self { subst_size, ..Self::insertion(seq, src_index, target_index) }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.seq.len()
    }

    #[inline]
    pub fn is_substitution(&self) -> bool {
        self.subst_size > 0
    }

    /// 对 query 长度的净影响
    #[inline]
    pub fn delta(&self) -> isize {
        if self.insert {
            self.size() as isize - self.subst_size as isize
        } else {
            -(self.size() as isize)
        }
    }

    /// 在目标序列上占据的长度（用于边缘判断）
    #[inline]
    pub fn extent(&self) -> usize {
        if self.insert {
            self.subst_size
        } else {
            self.size()
        }
    }

    /// 三个索引同时平移
    pub fn shift_all(&self, delta: isize) -> Self {
        Self {
            src_index: self.src_index + delta,
            target_index: self.target_index + delta,
            error_index: self.error_index + delta,
            ..self.clone()
        }
    }

    /// query 与目标分别平移（把间隙内的局部坐标放回外层坐标）
    pub fn shift_to(&self, query_delta: isize, target_delta: isize) -> Self {
        Self {
            src_index: self.src_index + query_delta,
            target_index: self.target_index + target_delta,
            error_index: self.error_index + target_delta,
            ..self.clone()
        }
    }

    /// 把这个事件作用到 `source` 上（不支持替换）
    #[cfg(test)]
    pub(crate) fn apply(&self, source: &[u8]) -> Vec<u8> {
        assert!(!self.is_substitution(), "cannot apply a substitution indel");
        let at = self.src_index as usize;
        let mut out = Vec::with_capacity(source.len() + self.size());
        out.extend_from_slice(&source[..at]);
        if self.insert {
            out.extend_from_slice(&self.seq);
            out.extend_from_slice(&source[at..]);
        } else {
            let end = at + self.size();
            assert_eq!(&source[at..end], self.seq.as_slice());
            out.extend_from_slice(&source[end..]);
        }
        out
    }

    pub(crate) fn refresh_error_index(&mut self) {
        self.error_index = default_error_index(self.insert, self.size(), self.target_index);
    }
}

#[inline]
fn default_error_index(insert: bool, size: usize, target_index: isize) -> isize {
    if insert {
        target_index
    } else {
        target_index + 1 - size as isize
    }
}

impl std::fmt::Display for Indel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seq = String::from_utf8_lossy(&self.seq);
        if self.is_substitution() {
            write!(f, "S-{}:{}@{}", self.subst_size, seq, self.error_index)
        } else if self.insert {
            write!(f, "I:{}@{}", seq, self.error_index)
        } else {
            write!(f, "D:{}@{}", seq, self.error_index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_insert_and_delete() {
        let i = Indel::insertion(b"abcd", 4, 0);
        assert_eq!(i.apply(b"GHIJKLMN"), b"GHIJabcdKLMN".to_vec());
        let d = Indel::deletion(b"def", 3, 0);
        assert_eq!(d.apply(b"abcdefghi"), b"abcghi".to_vec());
    }

    #[test]
    fn deltas_and_error_index() {
        let d = Indel::deletion(b"ACG", 5, 9);
        assert_eq!(d.error_index, 7);
        assert_eq!(d.delta(), -3);
        let s = Indel::substitution(b"ACGTA", 2, 4, 3);
        assert_eq!(s.delta(), 2);
        assert_eq!(s.extent(), 3);
        assert_eq!(s.to_string(), "S-3:ACGTA@4");
    }

    #[test]
    fn shifting() {
        let i = Indel::insertion(b"A", 3, 4).shift_all(-2);
        assert_eq!((i.src_index, i.target_index, i.error_index), (1, 2, 2));
        let j = Indel::deletion(b"TT", 0, 1).shift_to(10, 5);
        assert_eq!((j.src_index, j.target_index, j.error_index), (10, 6, 5));
    }
}
