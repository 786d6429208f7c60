pub const NUC_A: u8 = 1;
pub const NUC_C: u8 = 1 << 1;
pub const NUC_G: u8 = 1 << 2;
pub const NUC_T: u8 = 1 << 3;

/// Phred+33 编码的质量分数偏移
pub const PHRED_OFFSET: u8 = 33;

/// IUPAC 代码 -> 核苷酸位掩码；非核苷酸字符返回 0
#[inline]
pub fn iupac_mask(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => NUC_A,
        b'C' => NUC_C,
        b'G' => NUC_G,
        b'T' | b'U' => NUC_T,
        b'Y' => NUC_C | NUC_T,
        b'R' => NUC_G | NUC_A,
        b'S' => NUC_C | NUC_G,
        b'W' => NUC_A | NUC_T,
        b'K' => NUC_G | NUC_T,
        b'M' => NUC_A | NUC_C,
        b'B' => NUC_C | NUC_G | NUC_T,
        b'D' => NUC_A | NUC_G | NUC_T,
        b'H' => NUC_A | NUC_C | NUC_T,
        b'V' => NUC_A | NUC_C | NUC_G,
        b'N' => NUC_A | NUC_C | NUC_G | NUC_T,
        _ => 0,
    }
}

/// 两个碱基在 IUPAC 意义下是否兼容（相等，或位掩码有交集）
#[inline]
pub fn compatible(a: u8, b: u8) -> bool {
    a == b || (iupac_mask(a) & iupac_mask(b)) != 0
}

pub fn normalize_seq(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq {
        let up = b.to_ascii_uppercase();
        let nb = match up {
            b'U' => b'T',
            _ if iupac_mask(up) != 0 => up,
            _ => b'N',
        };
        out.push(nb);
    }
    out
}

#[inline]
pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' | b'U' => b'A',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        b'S' => b'S',
        b'W' => b'W',
        _ => b'N',
    }
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    for &b in seq.iter().rev() {
        out.push(complement(b));
    }
    out
}

/// Phred+33 字符 -> 质量分数（越界字符饱和到 0）
#[inline]
pub fn phred_to_quality(ch: u8) -> u8 {
    ch.saturating_sub(PHRED_OFFSET)
}

#[inline]
pub fn count_indeterminate(seq: &[u8]) -> usize {
    seq.iter().filter(|&&b| b == b'N').count()
}
