use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Priority of the token that makes a worker enumerate the workspace.
pub const SCAN_PRIORITY: u32 = 0;
/// Worst priority a file can get.
pub const WORST_FILE_PRIORITY: u32 = 1000;
/// Stop tokens sort after every file.
pub const STOP_PRIORITY: u32 = 1001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Scan,
    File(PathBuf),
    Stop,
}

#[derive(Debug)]
struct Entry {
    priority: u32,
    seq: u64,
    token: Token,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap pops the greatest entry: lowest priority first, then FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Heap {
    entries: BinaryHeap<Entry>,
    seq: u64,
}

/// Blocking priority queue shared by the search workers. Lower priority
/// values come out first; equal priorities keep insertion order.
#[derive(Default)]
pub struct SearchQueue {
    heap: Mutex<Heap>,
    available: Condvar,
}

impl SearchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, priority: u32, token: Token) {
        let mut heap = self.heap.lock();
        let seq = heap.seq;
        heap.seq += 1;
        heap.entries.push(Entry { priority, seq, token });
        drop(heap);
        self.available.notify_one();
    }

    /// Takes the best token, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<Token> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock();
        loop {
            if let Some(entry) = heap.entries.pop() {
                return Some(entry.token);
            }
            if self.available.wait_until(&mut heap, deadline).timed_out() {
                return heap.entries.pop().map(|e| e.token);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How closely a candidate file name matches the file the search started
/// from: 1000 minus the length of their common prefix.
pub fn similarity_priority(candidate: &str, origin: &str) -> u32 {
    let common = candidate
        .bytes()
        .zip(origin.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    WORST_FILE_PRIORITY.saturating_sub(common as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn file(name: &str) -> Token {
        Token::File(PathBuf::from(name))
    }

    #[test]
    fn pops_by_priority_then_insertion_order() {
        let queue = SearchQueue::new();
        queue.push(STOP_PRIORITY, Token::Stop);
        queue.push(similarity_priority("other.cpp", "widget.h"), file("other.cpp"));
        queue.push(similarity_priority("widget.cpp", "widget.h"), file("widget.cpp"));
        queue.push(similarity_priority("wide.cpp", "widget.h"), file("wide.cpp"));
        queue.push(similarity_priority("zzz.cpp", "widget.h"), file("zzz.cpp"));

        let order: Vec<Token> = std::iter::from_fn(|| queue.pop(Duration::ZERO)).collect();
        assert_eq!(
            order,
            vec![
                file("widget.cpp"),
                file("wide.cpp"),
                file("other.cpp"),
                file("zzz.cpp"),
                Token::Stop
            ]
        );
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = SearchQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn pop_wakes_up_on_push() {
        let queue = Arc::new(SearchQueue::new());
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(SCAN_PRIORITY, Token::Scan);
        });
        assert_eq!(queue.pop(Duration::from_secs(10)), Some(Token::Scan));
        handle.join().expect("producer");
        assert!(queue.is_empty());
    }

    #[test]
    fn priority_rewards_common_prefixes() {
        assert_eq!(similarity_priority("abc.cpp", "abc.h"), 996);
        assert_eq!(similarity_priority("x.cpp", "abc.h"), 1000);
    }
}
