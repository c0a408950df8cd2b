use crate::deps::{Token, WaitGroup};
use crate::runtime::Schedule;
use crate::task::{Id, Notified, Task};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Something parked on a token until its earlier producers are gone.
#[derive(Debug)]
enum Waiter {
    Task(Task),
    Group(Arc<WaitGroup>),
}

/// Producers of one token, numbered in registration order.
///
/// A waiter only depends on the producers registered before it: it records
/// the next generation at attach time and is released once every lower
/// generation completed, whatever producers registered later do.
#[derive(Debug, Default)]
struct TokenEntry {
    /// Generation handed to the next producer.
    next_generation: u64,

    /// Generation of every open producer.
    open: HashMap<Id, u64>,

    /// Same generations, ordered.
    pending: BTreeSet<u64>,

    /// Waiters with the generation they wait up to. Pushed in attach order,
    /// so generations are non-decreasing from front to back.
    waiters: VecDeque<(u64, Waiter)>,
}

impl TokenEntry {
    fn open_producer(&mut self, producer: Id) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let prev = self.open.insert(producer, generation);
        debug_assert!(prev.is_none(), "{} registered twice", producer);
        self.pending.insert(generation);
    }

    fn attach(&mut self, waiter: Waiter) {
        self.waiters.push_back((self.next_generation, waiter));
    }

    /// Waiters below this generation have no open producer left.
    fn low_watermark(&self) -> u64 {
        self.pending.first().copied().unwrap_or(self.next_generation)
    }

    /// Closes the generation of `producer` and pops every waiter it was the
    /// last blocker of.
    fn close_producer(&mut self, producer: Id, token: &Token) -> SmallVec<[Waiter; 4]> {
        let Some(generation) = self.open.remove(&producer) else {
            panic!("{} signaled {} without a registered producer", producer, token);
        };
        self.pending.remove(&generation);

        let watermark = self.low_watermark();
        let mut released = SmallVec::new();

        while self.waiters.front().is_some_and(|(upto, _)| *upto <= watermark) {
            if let Some((_, waiter)) = self.waiters.pop_front() {
                released.push(waiter);
            }
        }

        released
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Resolves data-flow dependencies between tasks.
///
/// Tokens without an open producer are treated as satisfied. A consumer waits
/// for the producers of its inputs that were submitted before it, never for
/// later ones. Entries are dropped as soon as their last producer signals, so
/// the map only holds tokens with in-flight producers.
///
/// All read-modify-write sequences happen under one lock. Scheduling of
/// promoted tasks happens after the lock is released, and only by the thread
/// that observed the last dependency going away.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    tokens: Mutex<HashMap<Token, TokenEntry>>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly built task. It is either scheduled right away or
    /// parked on every input token that still has an earlier producer.
    pub(crate) fn submit<S: Schedule>(&self, task: Task, scheduler: &S) {
        let ready = {
            let mut tokens = self.tokens.lock();

            let mut blocked_on = 0;
            for input in task.ins() {
                if let Some(entry) = tokens.get_mut(input) {
                    debug_assert!(!entry.is_idle());
                    entry.attach(Waiter::Task(task.clone()));
                    blocked_on += 1;
                }
            }

            for out in task.outs() {
                tokens.entry(*out).or_default().open_producer(task.id());
            }

            if blocked_on > 0 {
                task.pending_deps.store(blocked_on, Ordering::Release);
                task.transition_to_blocked();
                false
            } else {
                task.transition_to_ready();
                true
            }
        };

        if ready {
            scheduler.schedule(Notified::new(task));
        } else {
            tracing::trace!(id = %task.id(), "task blocked on dependencies");
        }
    }

    /// Registers an out-of-band producer of `token`. The returned id signals
    /// it later through [`signal`](DependencyGraph::signal).
    pub(crate) fn add_producer(&self, token: Token) -> Id {
        let producer = Id::next();
        self.tokens.lock().entry(token).or_default().open_producer(producer);
        producer
    }

    /// Signals the completion of `producer` on every token in `outs`.
    /// Consumers whose last dependency went away are handed to `scheduler`.
    pub(crate) fn signal<S: Schedule>(&self, producer: Id, outs: &[Token], scheduler: &S) {
        let mut promoted = SmallVec::<[Task; 4]>::new();

        {
            let mut tokens = self.tokens.lock();

            for out in outs {
                let Entry::Occupied(mut entry) = tokens.entry(*out) else {
                    panic!("{} signaled {} without a registered producer", producer, out);
                };

                let released = entry.get_mut().close_producer(producer, out);

                if entry.get().is_idle() {
                    debug_assert!(entry.get().waiters.is_empty());
                    entry.remove();
                }

                for waiter in released {
                    match waiter {
                        Waiter::Task(task) => {
                            // Each release consumes exactly one pending slot,
                            // so only one thread ever sees the crossing.
                            let prev = task.pending_deps.fetch_sub(1, Ordering::AcqRel);
                            debug_assert!(prev > 0);

                            if prev == 1 {
                                promoted.push(task);
                            }
                        }
                        Waiter::Group(group) => group.done(),
                    }
                }
            }
        }

        for task in promoted {
            // A task skipped while blocked still goes through a worker, which
            // releases its tokens without running it.
            task.transition_to_ready();
            scheduler.schedule(Notified::new(task));
        }
    }

    /// Returns a wait group released once every producer of `tokens`
    /// registered so far has completed, or `None` if that is already the
    /// case.
    pub(crate) fn wait_handle(&self, tokens: &[Token]) -> Option<Arc<WaitGroup>> {
        let mut map = self.tokens.lock();

        let open = tokens
            .iter()
            .filter(|tok| map.contains_key(tok))
            .collect::<SmallVec<[&Token; 4]>>();

        if open.is_empty() {
            return None;
        }

        let group = Arc::new(WaitGroup::with_count(open.len()));
        for tok in open {
            if let Some(entry) = map.get_mut(tok) {
                entry.attach(Waiter::Group(Arc::clone(&group)));
            }
        }

        Some(group)
    }

    #[cfg(test)]
    pub(crate) fn producers(&self, token: &Token) -> usize {
        self.tokens.lock().get(token).map_or(0, |e| e.open.len())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::Qos;
    use crate::runtime::TaskOpts;
    use crate::task::State;
    use crate::test_utils::*;
    use anyhow::Result;
    use rstest::rstest;
    use std::thread;

    #[test]
    fn test_no_inputs_schedules_immediately() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let task = mock_task_with(Qos::Default, &[], &[], TaskOpts::DETACHED);

        graph.submit(task.clone(), &spy);

        assert_eq!(spy.scheduled(), vec![task.id()]);
        assert_eq!(task.state(), State::Ready);
        assert_eq!(graph.producers(&task.token()), 1);
    }

    #[test]
    fn test_unknown_input_token_is_satisfied() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let task = mock_task_with(Qos::Default, &[Token::new()], &[], TaskOpts::DETACHED);

        graph.submit(task.clone(), &spy);
        assert_eq!(spy.scheduled(), vec![task.id()]);
    }

    #[test]
    fn test_consumer_runs_after_producer() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let a = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let b = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);

        graph.submit(a.clone(), &spy);
        graph.submit(b.clone(), &spy);

        assert_eq!(spy.scheduled(), vec![a.id()]);
        assert_eq!(b.state(), State::Blocked);

        graph.signal(a.id(), a.outs(), &spy);

        assert_eq!(spy.scheduled(), vec![a.id(), b.id()]);
        assert_eq!(b.state(), State::Ready);
        assert_eq!(graph.producers(&x), 0);
    }

    #[test]
    fn test_shared_token_waits_for_every_producer() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let p1 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let p2 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let c = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);

        graph.submit(p1.clone(), &spy);
        graph.submit(p2.clone(), &spy);
        graph.submit(c.clone(), &spy);
        assert_eq!(graph.producers(&x), 2);

        graph.signal(p2.id(), p2.outs(), &spy);
        assert_eq!(c.state(), State::Blocked);

        graph.signal(p1.id(), p1.outs(), &spy);
        assert_eq!(spy.count(c.id()), 1);
    }

    #[test]
    fn test_consumer_ignores_later_producers() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let p1 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let c1 = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);
        let p2 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let c2 = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);

        for task in [&p1, &c1, &p2, &c2] {
            graph.submit(task.clone(), &spy);
        }
        assert_eq!(graph.producers(&x), 2);

        graph.signal(p1.id(), p1.outs(), &spy);
        assert_eq!(c1.state(), State::Ready);
        assert_eq!(c2.state(), State::Blocked);

        graph.signal(p2.id(), p2.outs(), &spy);
        assert_eq!(spy.scheduled(), vec![p1.id(), p2.id(), c1.id(), c2.id()]);
        assert_eq!(graph.producers(&x), 0);
    }

    #[test]
    fn test_later_producer_finishing_first_releases_nobody_early() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let p1 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let c1 = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);
        let p2 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let c2 = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);

        for task in [&p1, &c1, &p2, &c2] {
            graph.submit(task.clone(), &spy);
        }

        // c2 still waits on p1, which was submitted before it too.
        graph.signal(p2.id(), p2.outs(), &spy);
        assert_eq!(c1.state(), State::Blocked);
        assert_eq!(c2.state(), State::Blocked);

        graph.signal(p1.id(), p1.outs(), &spy);
        assert_eq!(spy.count(c1.id()), 1);
        assert_eq!(spy.count(c2.id()), 1);
    }

    #[test]
    fn test_steady_producers_do_not_starve_consumer() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let mut prev = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        graph.submit(prev.clone(), &spy);

        let consumer = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);
        graph.submit(consumer.clone(), &spy);

        // The token always has an open producer, yet the consumer only
        // waits for the one submitted before it.
        for _ in 0..8 {
            let next = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
            graph.submit(next.clone(), &spy);
            graph.signal(prev.id(), prev.outs(), &spy);
            prev = next;

            assert_eq!(spy.count(consumer.id()), 1);
            assert_eq!(graph.producers(&x), 1);
        }
    }

    #[test]
    fn test_wait_handle_ignores_later_producers() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let p1 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        graph.submit(p1.clone(), &spy);

        let group = graph.wait_handle(&[x]).unwrap();

        let p2 = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        graph.submit(p2.clone(), &spy);

        graph.signal(p1.id(), p1.outs(), &spy);
        assert_eq!(group.len(), 0);
        assert_eq!(graph.producers(&x), 1);
    }

    #[test]
    fn test_out_of_band_producer_gates_consumer() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let gate = Token::new();

        let producer = graph.add_producer(gate);
        let task = mock_task_with(Qos::Default, &[gate], &[], TaskOpts::DETACHED);
        graph.submit(task.clone(), &spy);
        assert_eq!(task.state(), State::Blocked);

        graph.signal(producer, &[gate], &spy);
        assert_eq!(spy.scheduled(), vec![task.id()]);
        assert_eq!(graph.len(), 1);
    }

    #[rstest]
    #[case::n_0(0)]
    #[case::n_1(1)]
    #[case::n_2(2)]
    #[case::n_7(7)]
    #[case::n_13(13)]
    #[case::n_20(20)]
    fn test_single_promotion_any_completion_order(#[case] n: usize) {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();

        let producers = (0..n)
            .map(|_| mock_task_with(Qos::Default, &[], &[Token::new()], TaskOpts::DETACHED))
            .collect::<Vec<_>>();

        for p in &producers {
            graph.submit(p.clone(), &spy);
        }

        let ins = producers.iter().map(|p| p.outs()[0]).collect::<Vec<_>>();
        let consumer = mock_task_with(Qos::Default, &ins, &[], TaskOpts::DETACHED);
        graph.submit(consumer.clone(), &spy);

        let mut order = (0..n).collect::<Vec<_>>();
        fastrand::shuffle(&mut order);

        for (i, idx) in order.iter().enumerate() {
            assert_eq!(spy.count(consumer.id()), 0, "promoted after {} of {}", i, n);
            graph.signal(producers[*idx].id(), producers[*idx].outs(), &spy);
        }

        assert_eq!(spy.count(consumer.id()), 1);
        assert_eq!(consumer.state(), State::Ready);
        assert_eq!(graph.len(), 1); // consumer's own token
    }

    #[test]
    fn test_concurrent_producers_promote_once() -> Result<()> {
        let graph = Arc::new(DependencyGraph::new());
        let spy = SpyScheduler::new();

        for _ in 0..50 {
            let producers = (0..8)
                .map(|_| mock_task_with(Qos::Default, &[], &[Token::new()], TaskOpts::DETACHED))
                .collect::<Vec<_>>();
            for p in &producers {
                graph.submit(p.clone(), &spy);
            }

            let ins = producers.iter().map(|p| p.outs()[0]).collect::<Vec<_>>();
            let consumer = mock_task_with(Qos::Default, &ins, &[], TaskOpts::DETACHED);
            graph.submit(consumer.clone(), &spy);

            thread::scope(|s| {
                for p in &producers {
                    let graph = &graph;
                    let spy = &spy;
                    s.spawn(move || graph.signal(p.id(), p.outs(), spy));
                }
            });

            assert_eq!(spy.count(consumer.id()), 1);
        }

        Ok(())
    }

    #[test]
    fn test_wait_handle_released_by_signal() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        assert!(graph.wait_handle(&[x]).is_none());

        let a = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        graph.submit(a.clone(), &spy);

        let group = graph.wait_handle(&[x, Token::new(), a.token()]).unwrap();
        assert_eq!(group.len(), 2);

        graph.signal(a.id(), a.outs(), &spy);
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn test_graph_releases_task_references() {
        let graph = DependencyGraph::new();
        let spy = SpyScheduler::new();
        let x = Token::new();

        let a = mock_task_with(Qos::Default, &[], &[x], TaskOpts::DETACHED);
        let b = mock_task_with(Qos::Default, &[x], &[], TaskOpts::DETACHED);

        graph.submit(a.clone(), &spy);
        graph.submit(b.clone(), &spy);
        assert_eq!(b.ref_count(), 2);

        graph.signal(a.id(), a.outs(), &spy);
        spy.clear();

        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    #[should_panic(expected = "without a registered producer")]
    fn test_signal_unknown_token_is_a_bug() {
        let graph = DependencyGraph::new();
        graph.signal(Id::next(), &[Token::new()], &SpyScheduler::new());
    }
}
