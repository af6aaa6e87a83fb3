//! Distance kernels for f32 vectors.
//!
//! Provides the metrics consumed by search and neighbor selection:
//! - L2 (Squared Euclidean)
//! - Dot Product
//! - Cosine Distance (1 - cosine similarity)
//!
//! Lower is always closer; search and selection treat the value as opaque.

/// Trait for distance calculation.
pub trait Distance: Send + Sync + 'static {
    fn eval(a: &[f32], b: &[f32]) -> f32;
}

pub struct L2Distance;
pub struct DotProduct;
pub struct CosineDistance;

impl Distance for L2Distance {
    #[inline(always)]
    fn eval(a: &[f32], b: &[f32]) -> f32 {
        // Auto-vectorized by the compiler for contiguous f32 slices
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let diff = x - y;
                diff * diff
            })
            .sum()
    }
}

impl Distance for DotProduct {
    #[inline(always)]
    fn eval(a: &[f32], b: &[f32]) -> f32 {
        // Negated so that lower = closer, matching the other metrics
        -a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>()
    }
}

impl Distance for CosineDistance {
    #[inline(always)]
    fn eval(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            return 1.0;
        }

        let sim = dot / (mag_a * mag_b);
        1.0 - sim.max(-1.0).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_correctness() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        // (4-1)^2 + (5-2)^2 + (6-3)^2 = 9 + 9 + 9 = 27
        assert_eq!(L2Distance::eval(&a, &b), 27.0);
    }

    #[test]
    fn test_dot_correctness() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        // -(1*4 + 2*5 + 3*6) = -32
        assert_eq!(DotProduct::eval(&a, &b), -32.0);
    }

    #[test]
    fn test_cosine_parallel_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![2.0, 0.0];
        assert!(CosineDistance::eval(&a, &b).abs() < 1e-6);
    }
}
