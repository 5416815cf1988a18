//! Byte-level statistical tests used by the detection strategies to tell
//! encrypted/obfuscated payloads apart from plaintext protocols.
//!
//! Every function here is pure and deterministic: no RNG, no I/O. Strategies
//! recover from `InsufficientData` locally (see the C4 entropy strategy),
//! so this crate never needs to know about strategy-level fallback policy.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StatsError {
    #[error("insufficient data: need at least {needed} {unit}, got {got}")]
    InsufficientData {
        needed: usize,
        got: usize,
        unit: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, StatsError>;

/// Shannon entropy of `bytes` over the 256-symbol alphabet, in bits.
///
/// Returns 0 for an empty input.
pub fn byte_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let n = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// One-sample Kolmogorov-Smirnov test of `bytes` against the discrete
/// uniform distribution over `[0, 255]`. Returns the asymptotic two-sided
/// p-value.
pub fn ks_uniform_test(bytes: &[u8]) -> Result<f64> {
    if bytes.len() < 8 {
        return Err(StatsError::InsufficientData {
            needed: 8,
            got: bytes.len(),
            unit: "bytes",
        });
    }
    let mut sorted: Vec<f64> = bytes.iter().map(|&b| b as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(ks_pvalue(&sorted, |x| (x.floor() + 1.0) / 256.0))
}

/// Partition `bytes` into non-overlapping blocks of `block_size` bytes,
/// compute the mean byte value of each, and test the empirical distribution
/// of block means against the theoretical distribution of the mean of
/// `block_size` i.i.d. uniform-`[0,255]` samples (normal approximation via
/// the central limit theorem).
pub fn ks_block_distribution_test(bytes: &[u8], block_size: usize) -> Result<f64> {
    let means = block_means(bytes, block_size)?;
    let (mu, sigma) = block_mean_normal_params(block_size);
    let mut sorted = means;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Ok(ks_pvalue(&sorted, |x| normal_cdf(x, mu, sigma)))
}

/// Anderson-Darling test of the same block-mean distribution against its
/// theoretical normal approximation. Rather than a p-value, this returns
/// `min_threshold`: the largest tabulated significance level whose critical
/// value the statistic does not exceed. `0` means the statistic exceeded
/// every tabulated critical value (strong evidence against uniformity);
/// `1` means it fell below every one (strong evidence for uniformity).
pub fn anderson_darling_block_test(bytes: &[u8], block_size: usize) -> Result<AndersonDarling> {
    let means = block_means(bytes, block_size)?;
    let (mu, sigma) = block_mean_normal_params(block_size);
    let n = means.len();
    let mut sorted = means;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut sum = 0.0;
    for (i, &y) in sorted.iter().enumerate() {
        let z_i = normal_cdf(y, mu, sigma).clamp(1e-12, 1.0 - 1e-12);
        let z_complement = normal_cdf(sorted[n - 1 - i], mu, sigma).clamp(1e-12, 1.0 - 1e-12);
        let weight = (2 * (i + 1) - 1) as f64;
        sum += weight * (z_i.ln() + (1.0 - z_complement).ln());
    }
    let statistic = -(n as f64) - sum / n as f64;

    Ok(AndersonDarling {
        statistic,
        min_threshold: ad_min_threshold(statistic),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AndersonDarling {
    pub statistic: f64,
    pub min_threshold: f64,
}

/// Critical values for the Anderson-Darling goodness-of-fit statistic when
/// the reference distribution's parameters are known rather than estimated
/// from the sample (Stephens 1974, case 0), ascending by critical value.
const AD_CRITICAL_VALUES: [(f64, f64); 4] = [
    (0.10, 1.933),
    (0.05, 2.492),
    (0.025, 3.070),
    (0.01, 3.857),
];

fn ad_min_threshold(statistic: f64) -> f64 {
    if statistic > AD_CRITICAL_VALUES.last().unwrap().1 {
        return 0.0;
    }
    if statistic <= AD_CRITICAL_VALUES.first().unwrap().1 {
        return 1.0;
    }
    AD_CRITICAL_VALUES
        .iter()
        .filter(|&&(_, crit)| statistic <= crit)
        .map(|&(alpha, _)| alpha)
        .fold(0.0, f64::max)
}

fn block_means(bytes: &[u8], block_size: usize) -> Result<Vec<f64>> {
    let num_blocks = bytes.len() / block_size.max(1);
    if num_blocks < 2 {
        return Err(StatsError::InsufficientData {
            needed: 2,
            got: num_blocks,
            unit: "blocks",
        });
    }
    Ok(bytes
        .chunks_exact(block_size)
        .map(|chunk| chunk.iter().map(|&b| b as f64).sum::<f64>() / block_size as f64)
        .collect())
}

/// Mean and standard deviation of the mean of `block_size` i.i.d. samples
/// drawn uniformly from `{0, ..., 255}`.
fn block_mean_normal_params(block_size: usize) -> (f64, f64) {
    let mu = 127.5;
    // Var[Uniform{0..255}] = (256^2 - 1) / 12
    let variance_single = (256.0_f64.powi(2) - 1.0) / 12.0;
    let sigma = (variance_single / block_size.max(1) as f64).sqrt();
    (mu, sigma)
}

fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return if x < mu { 0.0 } else { 1.0 };
    }
    0.5 * (1.0 + erf((x - mu) / (sigma * std::f64::consts::SQRT_2)))
}

/// Abramowitz & Stegun 7.1.26 rational approximation, max error ~1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Two-sided asymptotic Kolmogorov-Smirnov p-value for `sorted` (ascending)
/// against theoretical CDF `cdf`.
fn ks_pvalue(sorted: &[f64], cdf: impl Fn(f64) -> f64) -> f64 {
    let n = sorted.len() as f64;
    let mut d = 0.0_f64;
    for (i, &x) in sorted.iter().enumerate() {
        let f = cdf(x);
        let upper = (i as f64 + 1.0) / n;
        let lower = i as f64 / n;
        d = d.max((upper - f).abs()).max((lower - f).abs());
    }
    let lambda = (n.sqrt() + 0.12 + 0.11 / n.sqrt()) * d;
    kolmogorov_survival(lambda).clamp(0.0, 1.0)
}

fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    for k in 1..=100 {
        let term = (-2.0 * (k * k) as f64 * lambda * lambda).exp();
        sum += if k % 2 == 1 { term } else { -term };
    }
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn entropy_of_empty_is_zero() {
        assert_eq!(byte_entropy(&[]), 0.0);
    }

    #[test]
    fn entropy_of_constant_is_zero() {
        assert_eq!(byte_entropy(&[0x41; 64]), 0.0);
    }

    #[test]
    fn entropy_in_range() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut buf = [0u8; 1024];
        rng.fill_bytes(&mut buf);
        let e = byte_entropy(&buf);
        assert!((0.0..=8.0).contains(&e));
        assert!(e > 7.5);
    }

    #[test]
    fn ks_uniform_needs_eight_bytes() {
        assert_eq!(
            ks_uniform_test(&[1, 2, 3]),
            Err(StatsError::InsufficientData {
                needed: 8,
                got: 3,
                unit: "bytes"
            })
        );
    }

    #[test]
    fn ks_uniform_random_payload_is_uniform() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut buf = [0u8; 2048];
        rng.fill_bytes(&mut buf);
        let p = ks_uniform_test(&buf).unwrap();
        assert!(p >= 0.1, "expected high p-value for random bytes, got {p}");
    }

    #[test]
    fn ks_uniform_repeated_byte_is_not_uniform() {
        let buf = vec![0x41u8; 2048];
        let p = ks_uniform_test(&buf).unwrap();
        assert!(p < 0.1, "expected low p-value for constant bytes, got {p}");
    }

    #[test]
    fn block_test_needs_two_blocks() {
        let buf = vec![1u8; 10];
        assert!(ks_block_distribution_test(&buf, 32).is_err());
    }

    #[test]
    fn ad_threshold_bounds() {
        assert_eq!(ad_min_threshold(0.5), 1.0);
        assert_eq!(ad_min_threshold(10.0), 0.0);
    }
}
