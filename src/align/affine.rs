use std::collections::BTreeMap;

use super::indel::Indel;

pub type SimilarityFn = fn(u8, u8) -> i32;

/// 两端锚定时使用的填充（不含任何核苷酸或通配字符）
const ANCHOR_PAD: &[u8] = b"LMOPQEFIJXZLMO";

/// 匹配 +2，失配 -2
pub fn char_similarity(a: u8, b: u8) -> i32 {
    if a == b {
        2
    } else {
        -2
    }
}

/// 匹配 +2，任一方为 `?` 记 0，其余 -2
pub fn wildcard_similarity(a: u8, b: u8) -> i32 {
    if a == b {
        2
    } else if a == b'?' || b == b'?' {
        0
    } else {
        -2
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AlignParams {
    pub similarity: SimilarityFn,
    pub gap_open: i32,
    pub gap_extend: i32,
    /// 分数相同时偏向离对角线更近的格子
    pub front_biased: bool,
    /// 对齐区域之外的前后缀也计入分数
    pub penalize_ends: bool,
    pub penalize_front_clip: bool,
    pub penalize_back_clip: bool,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            similarity: char_similarity,
            gap_open: 6,
            gap_extend: 1,
            front_biased: true,
            penalize_ends: true,
            penalize_front_clip: true,
            penalize_back_clip: false,
        }
    }
}

/// 仿射间隙对齐结果。所有 end 均为闭区间；未匹配时 end = start - 1。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffineAlignment {
    pub score: i32,
    pub target_len: usize,
    pub target_start: isize,
    pub target_end: isize,
    pub source_len: usize,
    pub source_start: isize,
    pub source_end: isize,
    /// 目标序列位置 -> indel
    pub indels: BTreeMap<isize, Indel>,
    /// 目标序列中失配的位置（升序）
    pub mismatched: Vec<isize>,
    pub max_run: usize,
}

impl AffineAlignment {
    pub fn target_match_len(&self) -> isize {
        self.target_end - self.target_start + 1
    }

    pub fn source_match_len(&self) -> isize {
        self.source_end - self.source_start + 1
    }

    pub fn indels_delta(&self) -> isize {
        (self.source_end - self.source_start) - (self.target_end - self.target_start)
    }

    /// 是否两条序列都被完整覆盖
    pub fn covers_both(&self) -> bool {
        self.source_start == 0
            && self.target_start == 0
            && self.source_end + 1 == self.source_len as isize
            && self.target_end + 1 == self.target_len as isize
    }

    /// 把在反向序列上得到的结果换回正向坐标
    pub fn flip(&mut self) {
        let tlen = self.target_len as isize;
        let slen = self.source_len as isize;
        (self.target_start, self.target_end) = (tlen - self.target_end - 1, tlen - self.target_start - 1);
        (self.source_start, self.source_end) = (slen - self.source_end - 1, slen - self.source_start - 1);
        for m in &mut self.mismatched {
            *m = tlen - *m - 1;
        }
        self.mismatched.sort_unstable();
        let old = std::mem::take(&mut self.indels);
        for (key, mut indel) in old {
            indel.seq.reverse();
            let size = indel.size() as isize;
            let new_key = if indel.insert {
                indel.src_index = slen - indel.src_index - size;
                tlen - key
            } else {
                indel.src_index = slen - indel.src_index;
                size + tlen - key - 2
            };
            indel.target_index = new_key;
            indel.refresh_error_index();
            self.indels.insert(new_key, indel);
        }
    }
}

/// Gotoh 局部仿射间隙对齐。
///
/// 每格取 对角+相似度 / 列最优-间隙 / 行最优-间隙 / 0 的最大值，
/// 列、行最优由滚动数组维护，总复杂度 O(mn)。回溯得到失配与 indel；
/// `penalize_ends` 打开时再对两端剩余部分比较"按失配延伸"与"整段记一个 indel"的代价。
pub fn align(source: &[u8], target: &[u8], p: &AlignParams) -> AffineAlignment {
    let sl = source.len();
    let tl = target.len();
    if sl == 0 || tl == 0 {
        return AffineAlignment {
            score: 0,
            target_len: tl,
            target_start: 0,
            target_end: -1,
            source_len: sl,
            source_start: 0,
            source_end: -1,
            indels: BTreeMap::new(),
            mismatched: Vec::new(),
            max_run: 0,
        };
    }

    let sim = p.similarity;
    let open = p.gap_open;
    let ext = p.gap_extend;
    let rows = sl + 1;
    let cols = tl + 1;

    let mut h = vec![0i32; rows * cols];
    let mut back = vec![(0usize, 0usize); rows * cols];
    let mut colmax = vec![0i32; cols];
    let mut colmaxi = vec![0usize; cols];
    let mut max_h = 0i32;
    let mut maxs = (0usize, 0usize);
    let diag_offset = |i: usize, j: usize| i.abs_diff(j);

    for i in 1..rows {
        let imo = i - 1;
        let mut rowmax = 0i32;
        let mut rowmaxj = 0usize;
        for j in 1..cols {
            let jmo = j - 1;
            let mut v = h[imo * cols + jmo] + sim(source[imo], target[jmo]);
            let h2 = colmax[j] - open - ext * (imo - colmaxi[j]) as i32;
            let h3 = rowmax - open - ext * (jmo - rowmaxj) as i32;
            let mut ptr = (imo, jmo);
            // 平分时优先走间隙
            if h2 >= v {
                v = h2;
                ptr = (colmaxi[j], j);
            }
            if h3 >= v {
                v = h3;
                ptr = (i, rowmaxj);
            }
            let hij = v.max(0);
            h[i * cols + j] = hij;
            back[i * cols + j] = ptr;
            if v >= max_h && (v > max_h || !p.front_biased || diag_offset(i, j) < diag_offset(maxs.0, maxs.1)) {
                max_h = v;
                maxs = (i, j);
            }
            if hij > h2 + open - ext {
                colmax[j] = hij;
                colmaxi[j] = i;
            }
            if hij > h3 + open - ext {
                rowmax = hij;
                rowmaxj = j;
            }
        }
    }

    // 回溯
    let (mut i, mut j) = maxs;
    let mut indels: BTreeMap<isize, Indel> = BTreeMap::new();
    let mut mismatched: Vec<isize> = Vec::new();
    let mut cur_indel: Option<isize> = None;
    let mut cur_run = 0usize;
    let mut max_run = 0usize;
    let mut score = 0i32;

    while i > 0 && j > 0 && (h[i * cols + j] > 0 || p.penalize_ends) {
        let (lasti, lastj) = (i, j);
        (i, j) = back[lasti * cols + lastj];
        let deli = lasti - i;
        let delj = lastj - j;
        if deli > 0 && delj > 0 {
            cur_indel = None;
            let delscore = h[lasti * cols + lastj] - h[i * cols + j];
            if delscore <= 0 {
                mismatched.push(j as isize);
                max_run = max_run.max(cur_run);
                cur_run = 0;
                score += if delscore == 0 { sim(source[i], target[j]) } else { delscore };
            } else {
                cur_run += 1;
                score += delscore;
            }
        } else if deli > 0 {
            match cur_indel.and_then(|k| indels.get_mut(&k)).filter(|d| d.insert) {
                Some(open_indel) => {
                    let mut seq = source[i..lasti].to_vec();
                    seq.extend_from_slice(&open_indel.seq);
                    open_indel.seq = seq;
                    open_indel.src_index = i as isize;
                    score -= ext * deli as i32;
                }
                None => {
                    let key = lastj as isize;
                    indels.insert(key, Indel::insertion(&source[i..lasti], i as isize, key));
                    cur_indel = Some(key);
                    score -= open + ext * (deli as i32 - 1);
                }
            }
            max_run = max_run.max(cur_run);
            cur_run = 0;
        } else {
            assert!(delj > 0, "affine backtrack made no progress at ({lasti}, {lastj})");
            match cur_indel.and_then(|k| indels.get_mut(&k)).filter(|d| !d.insert) {
                Some(open_indel) => {
                    let mut seq = target[j..lastj].to_vec();
                    seq.extend_from_slice(&open_indel.seq);
                    open_indel.seq = seq;
                    open_indel.refresh_error_index();
                    score -= ext * delj as i32;
                }
                None => {
                    let key = lastj as isize - 1;
                    indels.insert(key, Indel::deletion(&target[j..lastj], i as isize, key));
                    cur_indel = Some(key);
                    score -= open + ext * (delj as i32 - 1);
                }
            }
            max_run = max_run.max(cur_run);
            cur_run = 0;
        }
    }
    max_run = max_run.max(cur_run);

    i = i.min(sl - 1);
    j = j.min(tl - 1);
    let (mut end_i, mut end_j) = maxs;

    if p.penalize_ends {
        // 前端：按失配延伸 vs 插入+删除
        if i > 0 && j > 0 {
            let (prei, prej) = (i, j);
            let mut prefix_score = 0i32;
            let mut prefix_mismatches = Vec::new();
            while i > 0 && j > 0 {
                i -= 1;
                j -= 1;
                let s = sim(source[i], target[j]);
                prefix_score += s;
                if s <= 0 {
                    prefix_mismatches.push(j as isize);
                }
            }
            if p.penalize_front_clip && i + j > 0 {
                prefix_score -= open + (i + j - 1) as i32 * ext;
            }
            let in_del_cost = -2 * open - ext * (prei + prej).saturating_sub(2) as i32;
            if prefix_score > in_del_cost {
                score += prefix_score;
                mismatched.extend(prefix_mismatches);
            } else {
                score += in_del_cost;
                indels.insert(0, Indel::insertion(&source[..prei], 0, 0));
                let dkey = prej as isize - 1;
                indels.insert(dkey, Indel::deletion(&target[..prej], prei as isize, dkey));
                i = 0;
                j = 0;
            }
        } else if p.penalize_front_clip {
            if i > 0 {
                indels.insert(0, Indel::insertion(&source[..i], 0, 0));
                score -= open + (i as i32 - 1) * ext;
                i = 0;
            } else if j > 0 {
                let dkey = j as isize - 1;
                indels.insert(dkey, Indel::deletion(&target[..j], 0, dkey));
                score -= open + (j as i32 - 1) * ext;
                j = 0;
            }
        }

        // 后端
        if end_i < sl && end_j < tl {
            let (suffi, suffj) = (end_i, end_j);
            let mut suffix_score = 0i32;
            let mut suffix_mismatches = Vec::new();
            while end_i < sl && end_j < tl {
                let s = sim(source[end_i], target[end_j]);
                suffix_score += s;
                if s <= 0 {
                    suffix_mismatches.push(end_j as isize);
                }
                end_i += 1;
                end_j += 1;
            }
            let leftover = sl + tl - end_i - end_j;
            if p.penalize_back_clip && leftover > 0 {
                suffix_score -= open + (leftover as i32 - 1) * ext;
            }
            let il = sl - suffi;
            let jl = tl - suffj;
            let in_del_cost = -2 * open - ext * (il + jl).saturating_sub(2) as i32;
            if suffix_score > in_del_cost {
                score += suffix_score;
                mismatched.extend(suffix_mismatches);
            } else {
                score += in_del_cost;
                indels.insert(suffj as isize, Indel::insertion(&source[suffi..], suffi as isize, suffj as isize));
                let dkey = tl as isize - 1;
                indels.insert(dkey, Indel::deletion(&target[suffj..], sl as isize, dkey));
                end_i = sl;
                end_j = tl;
            }
        } else if p.penalize_back_clip {
            if end_i < sl {
                indels.insert(end_j as isize, Indel::insertion(&source[end_i..], end_i as isize, end_j as isize));
                score -= open + (sl - end_i - 1) as i32 * ext;
                end_i = sl;
            } else if end_j < tl {
                let dkey = tl as isize - 1;
                indels.insert(dkey, Indel::deletion(&target[end_j..], sl as isize, dkey));
                score -= open + (tl - end_j - 1) as i32 * ext;
                end_j = tl;
            }
        }
    }

    mismatched.sort_unstable();
    AffineAlignment {
        score,
        target_len: tl,
        target_start: j as isize,
        target_end: end_j as isize - 1,
        source_len: sl,
        source_start: i as isize,
        source_end: end_i as isize - 1,
        indels,
        mismatched,
        max_run,
    }
}

/// 两端加上相同的填充后对齐，迫使结果从头到尾覆盖两条序列；
/// 坐标换回未填充的序列，分数扣除填充自身的得分。
pub fn align_anchored(source: &[u8], target: &[u8], p: &AlignParams) -> AffineAlignment {
    let pad = ANCHOR_PAD.len() as isize;
    let wrap = |s: &[u8]| -> Vec<u8> {
        let mut v = Vec::with_capacity(s.len() + 2 * ANCHOR_PAD.len());
        v.extend_from_slice(ANCHOR_PAD);
        v.extend_from_slice(s);
        v.extend(ANCHOR_PAD.iter().rev());
        v
    };
    let mut a = align(&wrap(source), &wrap(target), p);
    a.mismatched = a.mismatched.iter().map(|m| m - pad).collect();
    a.indels = std::mem::take(&mut a.indels)
        .into_iter()
        .map(|(k, v)| (k - pad, v.shift_all(-pad)))
        .collect();
    a.source_end -= 2 * pad;
    a.target_end -= 2 * pad;
    a.source_len = source.len();
    a.target_len = target.len();
    let pad_score: i32 = ANCHOR_PAD.iter().map(|&c| (p.similarity)(c, c)).sum();
    a.score -= 2 * pad_score;
    a
}
