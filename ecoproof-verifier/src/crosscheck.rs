//! Cross-validation of user-reported consumption against the extracted
//! bill figure. Protects against inflated self-reports: a reported figure
//! more than the threshold away from the independently extracted one is a
//! mismatch and costs confidence downstream.

/// Default relative-variance threshold (20%).
pub const DEFAULT_VARIANCE_THRESHOLD: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub user_kwh: f64,
    pub extracted_kwh: f64,
    pub variance: f64,
    pub within_threshold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossCheck {
    Compared(Comparison),
    /// No extracted figure to compare against; the caller falls back to
    /// extraction confidence alone.
    Unavailable,
}

pub fn cross_validate(user_kwh: f64, extracted_kwh: f64, threshold: f64) -> CrossCheck {
    if extracted_kwh == 0.0 {
        return CrossCheck::Unavailable;
    }
    let variance = (user_kwh - extracted_kwh).abs() / extracted_kwh;
    CrossCheck::Compared(Comparison {
        user_kwh,
        extracted_kwh,
        variance,
        within_threshold: variance <= threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_within_threshold() {
        let check = cross_validate(450.0, 450.0, DEFAULT_VARIANCE_THRESHOLD);
        match check {
            CrossCheck::Compared(c) => {
                assert_eq!(c.variance, 0.0);
                assert!(c.within_threshold);
            }
            CrossCheck::Unavailable => panic!("expected comparison"),
        }
    }

    #[test]
    fn twenty_five_percent_variance_is_a_mismatch() {
        // 500 reported vs 400 extracted: |500-400|/400 = 0.25 > 0.20
        let check = cross_validate(500.0, 400.0, DEFAULT_VARIANCE_THRESHOLD);
        match check {
            CrossCheck::Compared(c) => {
                assert!((c.variance - 0.25).abs() < 1e-9);
                assert!(!c.within_threshold);
            }
            CrossCheck::Unavailable => panic!("expected comparison"),
        }
    }

    #[test]
    fn boundary_variance_is_not_a_mismatch() {
        let check = cross_validate(480.0, 400.0, DEFAULT_VARIANCE_THRESHOLD);
        match check {
            CrossCheck::Compared(c) => assert!(c.within_threshold),
            CrossCheck::Unavailable => panic!("expected comparison"),
        }
    }

    #[test]
    fn zero_extracted_kwh_skips_comparison() {
        assert_eq!(
            cross_validate(450.0, 0.0, DEFAULT_VARIANCE_THRESHOLD),
            CrossCheck::Unavailable
        );
    }
}
