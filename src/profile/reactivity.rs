use std::io::Write;

use anyhow::{Context, Result};

use super::mask::{Counts, MaskCounts};

/// 一个靶序列的反应性剖面。
///
/// 数组长度为 n+1：下标 0 对应 RT 跑到 5' 端的全长产物，下标 k 对应第 k 个碱基。
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub beta: Vec<f64>,
    pub theta: Vec<f64>,
    pub rho: Vec<f64>,
    /// 打开突变计数后已并入突变项
    pub c: f64,
    /// 未截断 beta 上的 c
    pub c_alt: f64,
    pub mutations: Option<MutationProfile>,
}

/// 突变率剖面：mu 是突变的反应性估计，r_mut = beta + mu
#[derive(Debug, Clone, PartialEq)]
pub struct MutationProfile {
    pub mu: Vec<f64>,
    pub r_mut: Vec<f64>,
}

impl Profile {
    pub fn compute(treated: &[u64], untreated: &[u64], allow_negative: bool) -> Self {
        assert_eq!(treated.len(), untreated.len(), "treated/untreated count arrays differ in length");
        let n = treated.len().saturating_sub(1);
        let mut beta = vec![0.0; n + 1];
        let mut theta = vec![0.0; n + 1];
        let (mut treated_sum, mut untreated_sum) = (0.0f64, 0.0f64);
        let (mut c, mut c_alt) = (0.0f64, 0.0f64);

        for k in 0..n {
            let x = treated[k] as f64;
            let y = untreated[k] as f64;
            treated_sum += x;
            untreated_sum += y;
            if treated_sum == 0.0 || untreated_sum == 0.0 {
                continue;
            }
            let xbit = x / treated_sum;
            let ybit = y / untreated_sum;
            if xbit >= 1.0 || ybit >= 1.0 {
                continue;
            }
            let mut b = (xbit - ybit) / (1.0 - ybit);
            let mut t = (1.0 - ybit).ln() - (1.0 - xbit).ln();
            if !b.is_finite() || !t.is_finite() {
                continue;
            }
            c_alt -= (1.0 - b).ln();
            if !allow_negative {
                b = b.max(0.0);
                t = t.max(0.0);
            }
            c -= (1.0 - b).ln();
            beta[k] = b;
            theta[k] = t;
        }

        let factor = if c == 0.0 { 1.0 } else { 1.0 / c };
        for t in &mut theta {
            *t = (*t * factor).max(0.0);
        }
        let rho = theta.iter().map(|t| n as f64 * t).collect();
        Self { beta, theta, rho, c, c_alt, mutations: None }
    }

    /// 在终止剖面之上叠加突变剖面，并把突变项并入 `c` / `c_alt`。
    ///
    /// 深度是终止计数的前缀和；`mut_j` 是位点 j 上突变、插入、删除的总数。
    /// 某个位点 mu >= 1 时对应的 c 记为 0。theta 仍按终止剖面的 c 归一化。
    pub fn with_mutations(mut self, treated: &MaskCounts, untreated: &MaskCounts, allow_negative: bool) -> Self {
        let n = self.beta.len().saturating_sub(1);
        let mut mu = vec![0.0; n + 1];
        let mut r_mut = vec![0.0; n + 1];
        let (mut depth_t, mut depth_u) = (0.0f64, 0.0f64);
        let (mut c_sum, mut c_alt_sum) = (0.0f64, 0.0f64);
        let (mut c_zero, mut c_alt_zero) = (false, false);

        for j in 0..n {
            depth_t += treated.stops[j] as f64;
            depth_u += untreated.stops[j] as f64;
            let mut raw = 0.0;
            if depth_t > 0.0 && depth_u > 0.0 {
                let tbit = treated.mutation_events(j) as f64 / depth_t;
                let ubit = untreated.mutation_events(j) as f64 / depth_u;
                if ubit < 1.0 {
                    raw = (tbit - ubit) / (1.0 - ubit);
                }
            }
            mu[j] = if allow_negative { raw } else { raw.max(0.0) };

            if mu[j] < 1.0 {
                c_sum -= (1.0 - mu[j]).ln();
            } else {
                c_zero = true;
            }
            if raw < 1.0 {
                c_alt_sum -= (1.0 - raw).ln();
            } else {
                c_alt_zero = true;
            }
            r_mut[j] = self.beta[j] + mu[j];
        }

        self.c = if c_zero { 0.0 } else { self.c + c_sum };
        self.c_alt = if c_alt_zero { 0.0 } else { self.c_alt + c_alt_sum };
        self.mutations = Some(MutationProfile { mu, r_mut });
        self
    }
}

pub const PROFILE_HEADER: &str = "sequence\trt_start\tfive_prime_offset\tnucleotide\ttreated_mods\tuntreated_mods\tbeta\ttheta\tc";

/// 计数里有突变 / indel 时追加在每行末尾的列
pub const MUTATION_COLUMNS: &str = "treated_muts\tuntreated_muts\tmu\tr_mut";

/// 每个计数行一块、每个位点一行的反应性表格
pub fn write_profiles<W: Write>(out: &mut W, counts: &Counts, treated: usize, untreated: usize, allow_negative: bool) -> Result<()> {
    let with_muts = counts.has_mutations();
    if with_muts {
        writeln!(out, "{}\t{}", PROFILE_HEADER, MUTATION_COLUMNS)?;
    } else {
        writeln!(out, "{}", PROFILE_HEADER)?;
    }
    for target in &counts.targets {
        let tc = target.masks.get(treated).context("treated mask out of range")?;
        let uc = target.masks.get(untreated).context("untreated mask out of range")?;
        let (t, u) = (&tc.stops, &uc.stops);
        let mut profile = Profile::compute(t, u, allow_negative);
        if with_muts {
            profile = profile.with_mutations(tc, uc, allow_negative);
        }
        let n = target.n();
        log::debug!("{}: c = {:.5}, c_alt = {:.5}", target.name, profile.c, profile.c_alt);
        for i in 0..=n {
            let (nuc, beta, theta) = if i == 0 {
                ('*', "-".to_string(), "-".to_string())
            } else {
                (target.characters[i - 1] as char, profile.beta[i].to_string(), profile.theta[i].to_string())
            };
            write!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.5}",
                target.name, n, i, nuc, t[i], u[i], beta, theta, profile.c
            )?;
            if let Some(m) = &profile.mutations {
                write!(out, "\t{}\t{}\t{}\t{}", tc.mutation_events(i), uc.mutation_events(i), m.mu[i], m.r_mut[i])?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::mask::Mask;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reactivities_from_stop_counts() {
        let p = Profile::compute(&[1, 3, 6, 10, 20], &[2, 2, 2, 4, 20], false);
        let beta = [0.0, 0.5, 0.4, 1.0 / 6.0, 0.0];
        let theta = [0.0, 0.5, 0.3684827970831031, 0.13151720291689686, 0.0];
        for k in 0..5 {
            assert!(close(p.beta[k], beta[k]), "beta[{}] = {}", k, p.beta[k]);
            assert!(close(p.theta[k], theta[k]), "theta[{}] = {}", k, p.theta[k]);
            assert!(close(p.rho[k], 4.0 * theta[k]));
        }
        assert!(close(p.c, 4f64.ln()));
        assert!(close(p.c_alt, p.c));
    }

    #[test]
    fn negative_betas_are_clamped() {
        let p = Profile::compute(&[2, 3, 1, 9], &[2, 1, 3, 9], false);
        assert!(close(p.beta[1], 0.4));
        assert_eq!(p.beta[2], 0.0);
        assert!(close(p.c, (1.0f64 / 0.6).ln()));
        assert!(close(p.theta[1], 1.0));
        // 未截断时第 2 位的负 beta 抵消了第 1 位
        assert!(p.c_alt.abs() < 1e-12);

        let raw = Profile::compute(&[2, 3, 1, 9], &[2, 1, 3, 9], true);
        assert!(close(raw.beta[2], -2.0 / 3.0));
    }

    #[test]
    fn zero_untreated_is_not_a_fault() {
        let p = Profile::compute(&[5, 3, 6, 10, 20], &[0, 0, 0, 4, 20], false);
        assert!(p.beta.iter().chain(&p.theta).chain(&p.rho).all(|v| *v == 0.0));
        assert_eq!(p.c, 0.0);

        let empty = Profile::compute(&[0, 0, 0], &[0, 0, 0], false);
        assert_eq!(empty.theta, vec![0.0; 3]);
    }

    fn channel(stops: &[u64], muts: &[u64]) -> MaskCounts {
        MaskCounts {
            stops: stops.to_vec(),
            muts: muts.to_vec(),
            inserts: vec![0; stops.len()],
            deletes: vec![0; stops.len()],
            kept: stops.iter().sum(),
        }
    }

    #[test]
    fn mutation_rates_adjust_c() {
        let t = channel(&[1, 3, 6, 10, 20], &[0, 1, 2, 2, 0]);
        let u = channel(&[2, 2, 2, 4, 20], &[0, 0, 1, 1, 0]);
        let p = Profile::compute(&t.stops, &u.stops, false).with_mutations(&t, &u, false);
        let m = p.mutations.as_ref().unwrap();
        // j=1: 1/4 对 0/4；j=2: 2/10 对 1/6；j=3: 2/20 对 1/10
        let mu = [0.0, 0.25, 0.04, 0.0, 0.0];
        for j in 0..5 {
            assert!(close(m.mu[j], mu[j]), "mu[{}] = {}", j, m.mu[j]);
            assert!(close(m.r_mut[j], p.beta[j] + mu[j]));
        }
        let c = 4f64.ln() - 0.75f64.ln() - 0.96f64.ln();
        assert!(close(p.c, c));
        assert!(close(p.c_alt, c));
        // theta 仍按终止剖面的 c 归一化
        assert!(close(p.theta[1], 0.5));
    }

    #[test]
    fn negative_mutation_rates_only_reach_c_alt() {
        let t = channel(&[1, 3, 6, 10, 20], &[0, 0, 3, 1, 0]);
        let u = channel(&[2, 2, 2, 4, 20], &[0, 2, 0, 2, 0]);
        let p = Profile::compute(&t.stops, &u.stops, false).with_mutations(&t, &u, false);
        let m = p.mutations.as_ref().unwrap();
        assert_eq!(m.mu[1], 0.0);
        assert!(close(m.mu[2], 0.3));
        assert_eq!(m.mu[3], 0.0);
        assert!(close(p.c, 4f64.ln() - 0.7f64.ln()));
        assert!(close(p.c_alt, 4f64.ln() - 2f64.ln() - 0.7f64.ln() - 1.1875f64.ln()));

        let raw = Profile::compute(&t.stops, &u.stops, true).with_mutations(&t, &u, true);
        assert!(close(raw.mutations.unwrap().mu[1], -1.0));
    }

    #[test]
    fn saturated_mutation_rate_zeroes_c() {
        let t = channel(&[2, 2, 4], &[2, 0, 0]);
        let u = channel(&[1, 2, 4], &[0, 0, 0]);
        let p = Profile::compute(&t.stops, &u.stops, false).with_mutations(&t, &u, false);
        assert_eq!(p.mutations.unwrap().mu[0], 1.0);
        assert_eq!(p.c, 0.0);
        assert_eq!(p.c_alt, 0.0);
    }

    #[test]
    fn mutation_columns_follow_counts() {
        let masks = [Mask::new("RRRY").unwrap(), Mask::new("YYYR").unwrap()];
        let mut counts = Counts::new(&masks, &[("t1".to_string(), b"ACG".to_vec())]).with_mutations(true, true);
        let obs = crate::profile::Observation { site: 1, mutations: vec![2], inserts: vec![3], deletes: vec![] };
        counts.observe(0, 0, &obs);
        counts.observe(0, 1, &crate::profile::Observation::stop(0));
        let mut buf = Vec::new();
        write_profiles(&mut buf, &counts, 0, 1, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("{}\t{}", PROFILE_HEADER, MUTATION_COLUMNS));
        let row: Vec<&str> = lines[3].split('\t').collect();
        assert_eq!(row.len(), 13);
        assert_eq!(&row[2..4], &["2", "C"]);
        assert_eq!(&row[9..11], &["1", "0"]);
        let row: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(row[9], "1");
    }

    #[test]
    fn profile_table_layout() {
        let masks = [Mask::new("RRRY").unwrap(), Mask::new("YYYR").unwrap()];
        let mut counts = Counts::new(&masks, &[("t1".to_string(), b"ACG".to_vec())]);
        for (site, n) in [(0, 1), (1, 3), (2, 6), (3, 10)] {
            for _ in 0..n {
                counts.count(0, 0, site);
            }
        }
        for site in 0..=3 {
            counts.count(0, 1, site);
        }
        let mut buf = Vec::new();
        write_profiles(&mut buf, &counts, 0, 1, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], PROFILE_HEADER);
        assert!(lines[1].starts_with("t1\t3\t0\t*\t1\t1\t-\t-\t"));
        let row: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(&row[..6], &["t1", "3", "3", "G", "10", "1"]);
        assert_eq!(row[8].split('.').nth(1).map(str::len), Some(5));
    }
}
