//! Analysis window functions

use sf_core::Sample;
use std::f64::consts::PI;

/// Window function selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    /// No window (rectangular)
    Rect,
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
}

impl WindowKind {
    /// Parse a window name as it appears in stage options.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" | "rect" | "rectangular" => Some(Self::Rect),
            "hann" | "hanning" => Some(Self::Hann),
            "hamming" => Some(Self::Hamming),
            "blackman" => Some(Self::Blackman),
            "bartlett" | "triangular" => Some(Self::Bartlett),
            _ => None,
        }
    }

    /// Symmetric window coefficients of length `n`.
    pub fn coefficients(self, n: usize) -> Vec<Sample> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![1.0];
        }
        let m = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = i as f64 / m;
                let w = match self {
                    Self::Rect => 1.0,
                    Self::Hann => 0.5 * (1.0 - (2.0 * PI * x).cos()),
                    Self::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                    Self::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                    }
                    Self::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
                };
                w as Sample
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_endpoints_and_symmetry() {
        let w = WindowKind::Hann.coefficients(64);
        assert!(w[0].abs() < 1e-7);
        assert!(w[63].abs() < 1e-7);
        for i in 0..32 {
            assert!((w[i] - w[63 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn hamming_center_is_unity() {
        let w = WindowKind::Hamming.coefficients(21);
        assert!((w[10] - 1.0).abs() < 1e-6);
        assert!((w[0] - 0.08).abs() < 1e-6);
    }

    #[test]
    fn rect_is_flat() {
        assert!(WindowKind::Rect.coefficients(8).iter().all(|&x| x == 1.0));
    }

    #[test]
    fn names_parse() {
        assert_eq!(WindowKind::from_name("hann"), Some(WindowKind::Hann));
        assert_eq!(WindowKind::from_name("none"), Some(WindowKind::Rect));
        assert_eq!(WindowKind::from_name("gauss"), None);
    }
}
