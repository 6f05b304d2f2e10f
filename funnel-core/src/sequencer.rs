use std::sync::atomic::{AtomicU64, Ordering};

/// `Sequencer` assigns each chunk its place in the output order.
///
/// The number is taken at the moment the chunk is accepted for processing,
/// not when its formatting finishes. Any number of threads may call `next`
/// concurrently; the returned numbers are strictly increasing, gap-free and
/// never repeated, starting at 0.
///
/// There is no failure mode besides overflow of the 64 bit counter, which is
/// treated as fatal. At one chunk per nanosecond that takes centuries, so no
/// run is expected to get there.
#[derive(Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Take the next sequence number.
    pub fn next(&self) -> u64 {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);

        if seq == u64::MAX {
            panic!("sequence counter overflow");
        }

        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::setup_log;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sequential_numbers() {
        setup_log();

        let sequencer = Sequencer::new();

        for i in 0..100 {
            assert_eq!(sequencer.next(), i);
        }
    }

    #[test]
    fn test_concurrent_numbers_are_unique() {
        setup_log();

        let sequencer = Arc::new(Sequencer::new());
        let num_threads = 8;
        let per_thread = 1000;

        let mut handles = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let sequencer = sequencer.clone();
            handles.push(std::thread::spawn(move || {
                (0..per_thread)
                    .map(|_| sequencer.next())
                    .collect::<Vec<u64>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let numbers = handle.join().unwrap();

            // Numbers handed to one thread keep the order the calls were issued.
            for window in numbers.windows(2) {
                assert!(window[0] < window[1]);
            }

            for number in numbers {
                assert!(seen.insert(number));
            }
        }

        // Gap-free: the union over all threads is exactly 0..total.
        let total = (num_threads * per_thread) as u64;
        assert_eq!(seen.len() as u64, total);
        assert!(seen.iter().all(|n| *n < total));
    }
}
