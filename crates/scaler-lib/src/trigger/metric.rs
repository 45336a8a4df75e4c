//! Threshold-based replica computation
//!
//! Scale up when CPU or memory usage exceeds its threshold, scale down when
//! both sit below half their thresholds, hold steady in between. Every
//! decision moves at most `step_size` replicas and lands within `[min, max]`.

use super::{Evaluation, MetricTrigger};
use crate::models::MetricSample;

/// Compute the desired replica count for a metric trigger
pub fn evaluate_metric(trigger: &MetricTrigger, sample: &MetricSample, current: u32) -> Evaluation {
    let cpu = sample.cpu_usage_pct;
    let mem = sample.mem_usage_pct();
    let cpu_threshold = f64::from(trigger.cpu_threshold_pct);
    let mem_threshold = f64::from(trigger.mem_threshold_pct);

    let proposed = if cpu > cpu_threshold || mem > mem_threshold {
        let ratio = (cpu / cpu_threshold).max(mem / mem_threshold);
        let computed = (ratio * trigger.scaling_factor * f64::from(current)) as u32;
        // Overload never shrinks, whatever the scaling factor
        computed
            .max(current)
            .min(current.saturating_add(trigger.step_size))
    } else if cpu < cpu_threshold / 2.0 && mem < mem_threshold / 2.0 {
        let by_cpu = (f64::from(current) * cpu / cpu_threshold) as u32;
        let by_mem = (f64::from(current) * mem / mem_threshold) as u32;
        // Larger of the two proposals keeps the shrink conservative
        by_cpu
            .max(by_mem)
            .max(current.saturating_sub(trigger.step_size))
    } else {
        return Evaluation::NoOp(format!(
            "usage within dead zone (cpu {:.1}%, memory {:.1})",
            cpu, mem
        ));
    };

    Evaluation::Scale(trigger.clamp(proposed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::MetricsBackend;

    fn trigger() -> MetricTrigger {
        MetricTrigger {
            min: 1,
            max: 10,
            cpu_threshold_pct: 80,
            mem_threshold_pct: 80,
            scaling_factor: 1.5,
            step_size: 1,
            source: MetricsBackend::MetricsServer,
            query: None,
        }
    }

    #[test]
    fn test_scale_up_capped_at_one_step() {
        let sample = MetricSample::new(95.0, 10.0);
        assert_eq!(evaluate_metric(&trigger(), &sample, 2), Evaluation::Scale(3));
    }

    #[test]
    fn test_scale_up_larger_step() {
        let mut t = trigger();
        t.step_size = 5;
        // 2.0 * 1.5 * 4 = 12, capped by step to 9
        let sample = MetricSample::new(160.0, 10.0);
        assert_eq!(evaluate_metric(&t, &sample, 4), Evaluation::Scale(9));
    }

    #[test]
    fn test_scale_up_triggered_by_memory() {
        let sample = MetricSample::new(10.0, 900.0).with_mem_request(1000.0);
        assert_eq!(evaluate_metric(&trigger(), &sample, 4), Evaluation::Scale(5));
    }

    #[test]
    fn test_scale_up_respects_max() {
        let sample = MetricSample::new(99.0, 10.0);
        assert_eq!(evaluate_metric(&trigger(), &sample, 10), Evaluation::Scale(10));
    }

    #[test]
    fn test_scale_up_with_small_factor_holds_current() {
        let mut t = trigger();
        t.max = 20;
        t.scaling_factor = 0.5;
        // 1.2 * 0.5 * 10 = 6 would shrink an overloaded workload
        let sample = MetricSample::new(96.0, 10.0);
        assert_eq!(evaluate_metric(&t, &sample, 10), Evaluation::Scale(10));
    }

    #[test]
    fn test_scale_down_bounded_by_step() {
        // cpu 8% of 80 -> 0.1 * 10 = 1, memory lower still; one step down only
        let sample = MetricSample::new(8.0, 1.0);
        assert_eq!(evaluate_metric(&trigger(), &sample, 10), Evaluation::Scale(9));
    }

    #[test]
    fn test_scale_down_takes_larger_proposal() {
        let mut t = trigger();
        t.step_size = 10;
        // cpu proposes 10 * 20/80 = 2, memory proposes 10 * 36/80 = 4
        let sample = MetricSample::new(20.0, 36.0);
        assert_eq!(evaluate_metric(&t, &sample, 10), Evaluation::Scale(4));
    }

    #[test]
    fn test_scale_down_respects_min() {
        let mut t = trigger();
        t.min = 3;
        t.step_size = 10;
        let sample = MetricSample::new(1.0, 1.0);
        assert_eq!(evaluate_metric(&t, &sample, 5), Evaluation::Scale(3));
    }

    #[test]
    fn test_dead_zone_is_noop() {
        for cpu in [41.0, 50.0, 60.0, 79.9] {
            let sample = MetricSample::new(cpu, 50.0);
            assert!(
                matches!(evaluate_metric(&trigger(), &sample, 4), Evaluation::NoOp(_)),
                "cpu {} should be in dead zone",
                cpu
            );
        }
    }

    #[test]
    fn test_one_resource_low_other_in_dead_zone_is_noop() {
        let sample = MetricSample::new(5.0, 60.0);
        assert!(matches!(
            evaluate_metric(&trigger(), &sample, 4),
            Evaluation::NoOp(_)
        ));
    }

    #[test]
    fn test_bounds_and_steps_hold_across_inputs() {
        for factor in [0.1, 0.5, 1.0, 1.5, 3.0] {
            let mut t = trigger();
            t.scaling_factor = factor;
            for current in 0..15u32 {
                for cpu in (0..200).step_by(7) {
                    for mem in (0..200).step_by(11) {
                        let sample = MetricSample::new(cpu as f64, mem as f64);
                        let overloaded = cpu as f64 > 80.0 || mem as f64 > 80.0;
                        if let Evaluation::Scale(desired) = evaluate_metric(&t, &sample, current) {
                            assert!(desired >= t.min && desired <= t.max);
                            if (t.min..=t.max).contains(&current) {
                                assert!(desired <= current + t.step_size);
                                assert!(desired + t.step_size >= current);
                                if overloaded {
                                    assert!(
                                        desired >= current,
                                        "factor {} cpu {} mem {} shrank {} to {}",
                                        factor, cpu, mem, current, desired
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
