use std::{collections::VecDeque, num::NonZeroUsize};

use parking_lot::{Condvar, Mutex};

/// Bounded blocking FIFO between the fetch workers and the training loop.
///
/// Any number of producers may `enqueue` concurrently, a single consumer is expected
/// to `dequeue`. Neither operation times out, a full queue blocks producers and an
/// empty queue blocks the consumer.
#[derive(Debug)]
pub struct PrefetchQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: NonZeroUsize,
}

impl<T> PrefetchQueue<T> {
    /// Creates a new `PrefetchQueue`.
    ///
    /// # Arguments
    /// * `capacity` - The maximum amount of items held at once.
    ///
    /// # Returns
    /// A new empty `PrefetchQueue` instance.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.get())),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Pushes `item` at the back of the queue, waiting for a free slot if it's full.
    ///
    /// # Arguments
    /// * `item` - The item to push.
    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock();

        while items.len() >= self.capacity.get() {
            self.not_full.wait(&mut items);
        }

        items.push_back(item);
        drop(items);

        self.not_empty.notify_one();
    }

    /// Pops the oldest item, waiting for one to arrive if the queue is empty.
    ///
    /// # Returns
    /// The oldest item in the queue.
    pub fn dequeue(&self) -> T {
        let mut items = self.items.lock();

        let item = loop {
            match items.pop_front() {
                Some(item) => break item,
                None => self.not_empty.wait(&mut items),
            }
        };

        drop(items);

        self.not_full.notify_one();
        item
    }

    /// The amount of items in the queue at the moment of the call.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    fn queue<T>(capacity: usize) -> Arc<PrefetchQueue<T>> {
        Arc::new(PrefetchQueue::new(NonZeroUsize::new(capacity).unwrap()))
    }

    #[test]
    fn single_producer_keeps_order() {
        let q = queue(4);
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || (0..100).for_each(|i| q.enqueue(i)))
        };

        let got: Vec<_> = (0..100).map(|_| q.dequeue()).collect();
        producer.join().unwrap();

        assert_eq!(got, (0..100).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn enqueue_blocks_while_full() {
        let q = queue(2);
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let q = Arc::clone(&q);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                q.enqueue('A');
                q.enqueue('B');
                q.enqueue('C');
                done.store(true, Ordering::SeqCst);
            })
        };

        while q.len() < 2 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "C was enqueued past capacity");
        assert_eq!(q.len(), 2);

        assert_eq!(q.dequeue(), 'A');
        producer.join().unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(q.dequeue(), 'B');
        assert_eq!(q.dequeue(), 'C');
    }

    #[test]
    fn dequeue_blocks_while_empty() {
        let q = queue(1);
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!consumer.is_finished());

        q.enqueue(7);
        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn length_stays_within_capacity() {
        const CAPACITY: usize = 3;
        const PER_PRODUCER: usize = 200;
        const PRODUCERS: usize = 4;

        let q = queue(CAPACITY);
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.enqueue((p, i));
                        assert!(q.len() <= CAPACITY);
                    }
                })
            })
            .collect();

        let mut last = [None; PRODUCERS];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            assert!(q.len() <= CAPACITY);
            let (p, i) = q.dequeue();

            // Each producer's items still arrive in order.
            assert!(last[p].is_none_or(|prev| prev < i));
            last[p] = Some(i);
        }

        producers.into_iter().for_each(|h| h.join().unwrap());
        assert!(q.is_empty());
    }
}
