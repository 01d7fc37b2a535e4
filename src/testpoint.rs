use std::sync::Arc;

/// Observer for named testpoints, fired on rebalance for test synchronization and tracing.
pub trait Testpoints: Send + Sync {
    /// Checked before any testpoint name is formatted.
    fn enabled(&self) -> bool {
        true
    }

    fn fire(&self, name: &str);
}

/// Fires `name` once per element, skipping all formatting when no observer is attached.
pub(crate) fn fire_per_element<T, F>(
    testpoints: Option<&Arc<dyn Testpoints>>,
    elements: &[T],
    name: F,
) where
    F: FnOnce() -> String,
{
    let Some(testpoints) = testpoints else {
        return;
    };
    if elements.is_empty() || !testpoints.enabled() {
        return;
    }

    let name = name();
    for _ in elements {
        testpoints.fire(&name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use super::{fire_per_element, Testpoints};

    #[derive(Default)]
    struct Counting {
        disabled: AtomicBool,
        fired: AtomicUsize,
    }

    impl Testpoints for Counting {
        fn enabled(&self) -> bool {
            !self.disabled.load(Ordering::Relaxed)
        }

        fn fire(&self, _name: &str) {
            self.fired.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn fires_per_element() {
        let counting = Arc::new(Counting::default());
        let testpoints: Arc<dyn Testpoints> = counting.clone();

        fire_per_element(Some(&testpoints), &[1, 2, 3], || "tp".to_string());
        assert_eq!(counting.fired.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn disabled_observer_skips_formatting() {
        let counting = Arc::new(Counting::default());
        counting.disabled.store(true, Ordering::Relaxed);
        let testpoints: Arc<dyn Testpoints> = counting.clone();

        fire_per_element(Some(&testpoints), &[1], || {
            panic!("name must not be formatted for a disabled observer")
        });
        fire_per_element::<i32, _>(None, &[1], || {
            panic!("name must not be formatted without an observer")
        });
        assert_eq!(counting.fired.load(Ordering::Relaxed), 0);
    }
}
