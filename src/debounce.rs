use std::time::{Duration, Instant};

use crate::registry::PinDescriptor;

/// Elapsed-time filter on a monotonic clock. A raw event becomes a delivered
/// event only if at least the pin's debounce threshold has passed since the
/// last accepted one; rejected events leave the stored timestamp unchanged.
pub(crate) fn accept(descriptor: &mut PinDescriptor, now: Instant) -> bool {
    let threshold = Duration::from_millis(descriptor.settings.debounce_ms);
    if !threshold.is_zero()
        && let Some(previous) = descriptor.last_event
        && now.duration_since(previous) < threshold
    {
        return false;
    }
    descriptor.last_event = Some(now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinSettings;
    use crate::port::LineHandle;

    fn descriptor(debounce_ms: u64) -> PinDescriptor {
        let settings = PinSettings {
            debounce_ms,
            ..PinSettings::default()
        };
        PinDescriptor::new(17, settings, LineHandle::synthetic(1))
    }

    #[test]
    fn first_event_is_always_accepted() {
        let mut d = descriptor(100);
        assert!(accept(&mut d, Instant::now()));
    }

    #[test]
    fn sub_threshold_event_is_rejected_and_timestamp_kept() {
        let mut d = descriptor(100);
        let t0 = Instant::now();
        assert!(accept(&mut d, t0));
        assert!(!accept(&mut d, t0 + Duration::from_millis(30)));
        // the rejected event must not push the window forward
        assert_eq!(d.last_event, Some(t0));
    }

    #[test]
    fn event_at_threshold_is_accepted() {
        let mut d = descriptor(100);
        let t0 = Instant::now();
        assert!(accept(&mut d, t0));
        let t1 = t0 + Duration::from_millis(100);
        assert!(accept(&mut d, t1));
        assert_eq!(d.last_event, Some(t1));
    }

    #[test]
    fn zero_threshold_always_accepts() {
        let mut d = descriptor(0);
        let t0 = Instant::now();
        assert!(accept(&mut d, t0));
        assert!(accept(&mut d, t0 + Duration::from_millis(1)));
        assert!(accept(&mut d, t0 + Duration::from_millis(1)));
    }
}
