/// Business inputs that rank an item in the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityInputs {
    /// Confirmation emails are time-sensitive.
    pub double_opt_in: bool,
    pub vip: bool,
}

pub const DOUBLE_OPT_IN_BOOST: i32 = 10;
pub const VIP_BOOST: i32 = 20;

/// Higher is dispatched first. A source listed in `vip_sources` counts as VIP.
pub fn compute(inputs: PriorityInputs, source_id: &str, vip_sources: &[String]) -> i32 {
    let mut priority = 0;
    if inputs.double_opt_in {
        priority += DOUBLE_OPT_IN_BOOST;
    }
    if inputs.vip || vip_sources.iter().any(|s| s == source_id) {
        priority += VIP_BOOST;
    }
    priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boosts_are_additive() {
        let none = PriorityInputs::default();
        let both = PriorityInputs {
            double_opt_in: true,
            vip: true,
        };
        assert_eq!(compute(none, "form-1", &[]), 0);
        assert_eq!(
            compute(
                PriorityInputs {
                    double_opt_in: true,
                    vip: false
                },
                "form-1",
                &[]
            ),
            10
        );
        assert_eq!(compute(both, "form-1", &[]), 30);
    }

    #[test]
    fn vip_source_list_flags_source() {
        let vips = vec!["pricing-form".to_string()];
        assert_eq!(compute(PriorityInputs::default(), "pricing-form", &vips), 20);
        assert_eq!(compute(PriorityInputs::default(), "footer-form", &vips), 0);

        // Flag and list membership do not stack.
        let flagged = PriorityInputs {
            double_opt_in: false,
            vip: true,
        };
        assert_eq!(compute(flagged, "pricing-form", &vips), 20);
    }
}
