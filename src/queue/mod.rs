//! A reorderable FIFO queue of pull requests.
//!
//! [`Queue`] is a doubly linked list plus a PR-number index, giving O(1)
//! push/pop/promote/demote/remove/len. Links are stored as PR numbers into
//! the index map rather than as pointers, so the structure stays safe Rust
//! and serializes naturally.
//!
//! # Invariants
//!
//! - A PR number appears in the index exactly once, and the chain reachable
//!   by walking `next` from `head` visits exactly the indexed nodes.
//! - `promote` on the head node and `demote` on the tail node are no-ops.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, PullRequestDescriptor};

/// A single node in the queue's linked list.
#[derive(Debug, Clone)]
struct Node {
    pr: PullRequestDescriptor,
    prev: Option<u64>,
    next: Option<u64>,
}

/// A FIFO queue of pull requests with O(1) reordering.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    head: Option<u64>,
    tail: Option<u64>,
    index: HashMap<u64, Node>,
}

/// A queue entry in serialized form, ordered by `position` (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMember {
    pub pr: PullRequestDescriptor,
    pub position: usize,
}

impl Queue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Queue::default()
    }

    /// Appends a pull request to the tail of the queue.
    ///
    /// A PR that is already queued is left where it is; enqueueing is
    /// idempotent per PR number.
    pub fn push(&mut self, pr: PullRequestDescriptor) {
        let number = pr.number.0;
        if self.index.contains_key(&number) {
            return;
        }

        let node = Node {
            pr,
            prev: self.tail,
            next: None,
        };

        if let Some(tail) = self.tail {
            self.index.get_mut(&tail).expect("tail is indexed").next = Some(number);
        } else {
            self.head = Some(number);
        }

        self.tail = Some(number);
        self.index.insert(number, node);
    }

    /// Removes and returns the pull request at the head of the queue.
    pub fn pop(&mut self) -> Option<PullRequestDescriptor> {
        let head = self.head?;
        let node = self.index.remove(&head).expect("head is indexed");

        self.head = node.next;
        match self.head {
            Some(next) => self.index.get_mut(&next).expect("next is indexed").prev = None,
            None => self.tail = None,
        }

        Some(node.pr)
    }

    /// Returns true if the queue holds at least one pull request.
    pub fn peek(&self) -> bool {
        self.head.is_some()
    }

    /// Returns the number of queued pull requests.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns true if the given PR number is queued.
    pub fn contains(&self, number: PrNumber) -> bool {
        self.index.contains_key(&number.0)
    }

    /// Moves a pull request one position toward the head.
    ///
    /// No-op if the PR is not queued or already at the head.
    pub fn promote(&mut self, number: PrNumber) {
        let n = number.0;
        let Some(prev) = self.index.get(&n).and_then(|node| node.prev) else {
            return;
        };
        // prev moves after n: swap the pair (prev, n).
        self.swap_adjacent(prev, n);
    }

    /// Moves a pull request one position toward the tail.
    ///
    /// No-op if the PR is not queued or already at the tail.
    pub fn demote(&mut self, number: PrNumber) {
        let n = number.0;
        let Some(next) = self.index.get(&n).and_then(|node| node.next) else {
            return;
        };
        self.swap_adjacent(n, next);
    }

    /// Removes a specific pull request from anywhere in the queue.
    ///
    /// No-op if the PR is not queued.
    pub fn remove(&mut self, number: PrNumber) -> Option<PullRequestDescriptor> {
        let node = self.index.remove(&number.0)?;

        match node.prev {
            Some(prev) => {
                self.index.get_mut(&prev).expect("prev is indexed").next = node.next;
            }
            None => self.head = node.next,
        }

        match node.next {
            Some(next) => {
                self.index.get_mut(&next).expect("next is indexed").prev = node.prev;
            }
            None => self.tail = node.prev,
        }

        Some(node.pr)
    }

    /// Swaps two adjacent nodes where `a` is immediately before `b`.
    fn swap_adjacent(&mut self, a: u64, b: u64) {
        let before = self.index[&a].prev;
        let after = self.index[&b].next;

        {
            let node_b = self.index.get_mut(&b).expect("b is indexed");
            node_b.prev = before;
            node_b.next = Some(a);
        }
        {
            let node_a = self.index.get_mut(&a).expect("a is indexed");
            node_a.prev = Some(b);
            node_a.next = after;
        }

        match before {
            Some(p) => self.index.get_mut(&p).expect("before is indexed").next = Some(b),
            None => self.head = Some(b),
        }

        match after {
            Some(x) => self.index.get_mut(&x).expect("after is indexed").prev = Some(a),
            None => self.tail = Some(a),
        }
    }

    /// Walks the queue head to tail and returns its members in order.
    pub fn serialize(&self) -> Vec<QueueMember> {
        let mut members = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        let mut position = 1;

        while let Some(n) = cursor {
            let node = &self.index[&n];
            members.push(QueueMember {
                pr: node.pr.clone(),
                position,
            });
            position += 1;
            cursor = node.next;
        }

        members
    }

    /// Rebuilds a queue from serialized members, preserving their order.
    pub fn deserialize(members: Vec<QueueMember>) -> Self {
        let mut queue = Queue::new();
        for member in members {
            queue.push(member.pr);
        }
        queue
    }

    /// Returns the queued PR numbers head to tail, for introspection.
    pub fn items(&self) -> Vec<PrNumber> {
        self.serialize()
            .into_iter()
            .map(|member| member.pr.number)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pr(number: u64) -> PullRequestDescriptor {
        PullRequestDescriptor {
            number: PrNumber(number),
            head_branch: format!("feature-{number}"),
            base_branch: "main".to_string(),
        }
    }

    fn numbers(queue: &Queue) -> Vec<u64> {
        queue.items().into_iter().map(|n| n.0).collect()
    }

    #[test]
    fn fifo_order() {
        let mut queue = Queue::new();
        queue.push(pr(1));
        queue.push(pr(2));

        assert_eq!(queue.pop().unwrap().number, PrNumber(1));
        assert_eq!(queue.pop().unwrap().number, PrNumber(2));
        assert_eq!(queue.pop(), None);
        assert!(!queue.peek());
    }

    #[test]
    fn push_is_idempotent_per_number() {
        let mut queue = Queue::new();
        queue.push(pr(1));
        queue.push(pr(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn promote_moves_one_toward_head() {
        let mut queue = Queue::new();
        for n in 1..=4 {
            queue.push(pr(n));
        }

        queue.promote(PrNumber(4));
        assert_eq!(numbers(&queue), vec![1, 2, 4, 3]);

        queue.promote(PrNumber(4));
        queue.promote(PrNumber(4));
        assert_eq!(numbers(&queue), vec![4, 1, 2, 3]);
    }

    #[test]
    fn demote_moves_one_toward_tail() {
        let mut queue = Queue::new();
        for n in 1..=4 {
            queue.push(pr(n));
        }

        queue.demote(PrNumber(2));
        assert_eq!(numbers(&queue), vec![1, 3, 2, 4]);
    }

    #[test]
    fn promote_head_and_demote_tail_are_noops() {
        let mut queue = Queue::new();
        for n in 1..=3 {
            queue.push(pr(n));
        }

        queue.promote(PrNumber(1));
        queue.demote(PrNumber(3));
        assert_eq!(numbers(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn promote_and_demote_are_inverses_on_interior_nodes() {
        let mut queue = Queue::new();
        for n in 1..=5 {
            queue.push(pr(n));
        }

        queue.promote(PrNumber(3));
        queue.demote(PrNumber(3));
        assert_eq!(numbers(&queue), vec![1, 2, 3, 4, 5]);

        queue.demote(PrNumber(3));
        queue.promote(PrNumber(3));
        assert_eq!(numbers(&queue), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn reorder_of_absent_number_is_a_noop() {
        let mut queue = Queue::new();
        queue.push(pr(1));
        queue.promote(PrNumber(99));
        queue.demote(PrNumber(99));
        assert_eq!(numbers(&queue), vec![1]);
    }

    #[test]
    fn remove_relinks_neighbors() {
        let mut queue = Queue::new();
        for n in 1..=3 {
            queue.push(pr(n));
        }

        assert_eq!(queue.remove(PrNumber(2)).unwrap().number, PrNumber(2));
        assert_eq!(numbers(&queue), vec![1, 3]);

        assert_eq!(queue.remove(PrNumber(1)).unwrap().number, PrNumber(1));
        assert_eq!(queue.remove(PrNumber(3)).unwrap().number, PrNumber(3));
        assert!(queue.is_empty());
        assert_eq!(queue.remove(PrNumber(1)), None);
    }

    #[test]
    fn serialize_then_deserialize_preserves_order() {
        let mut queue = Queue::new();
        for n in [5, 1, 9] {
            queue.push(pr(n));
        }
        queue.promote(PrNumber(9));

        let members = queue.serialize();
        assert_eq!(
            members.iter().map(|m| m.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let rebuilt = Queue::deserialize(members);
        assert_eq!(numbers(&rebuilt), numbers(&queue));
    }

    /// An operation applied to the queue in the property test.
    #[derive(Debug, Clone)]
    enum Op {
        Push(u64),
        Pop,
        Promote(u64),
        Demote(u64),
        Remove(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..20).prop_map(Op::Push),
            Just(Op::Pop),
            (0u64..20).prop_map(Op::Promote),
            (0u64..20).prop_map(Op::Demote),
            (0u64..20).prop_map(Op::Remove),
        ]
    }

    /// Applies the same ops to the queue and to a plain Vec model, then
    /// checks that order matches and the index is consistent with the chain.
    fn check_against_model(ops: Vec<Op>) {
        let mut queue = Queue::new();
        let mut model: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                Op::Push(n) => {
                    if !model.contains(&n) {
                        model.push(n);
                    }
                    queue.push(pr(n));
                }
                Op::Pop => {
                    let expected = if model.is_empty() {
                        None
                    } else {
                        Some(model.remove(0))
                    };
                    assert_eq!(queue.pop().map(|p| p.number.0), expected);
                }
                Op::Promote(n) => {
                    if let Some(i) = model.iter().position(|&m| m == n)
                        && i > 0
                    {
                        model.swap(i - 1, i);
                    }
                    queue.promote(PrNumber(n));
                }
                Op::Demote(n) => {
                    if let Some(i) = model.iter().position(|&m| m == n)
                        && i + 1 < model.len()
                    {
                        model.swap(i, i + 1);
                    }
                    queue.demote(PrNumber(n));
                }
                Op::Remove(n) => {
                    model.retain(|&m| m != n);
                    queue.remove(PrNumber(n));
                }
            }

            assert_eq!(numbers(&queue), model);
            assert_eq!(queue.len(), model.len());
        }
    }

    proptest! {
        #[test]
        fn chain_and_index_stay_consistent(ops in prop::collection::vec(op_strategy(), 0..64)) {
            check_against_model(ops);
        }
    }
}
