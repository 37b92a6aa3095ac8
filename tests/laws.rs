//! Property tests for the chunk and stream laws.
//!
//! # Laws Tested
//!
//! ## Chunk
//! - concat preserves every element in order
//! - split_at then concat is the identity
//!
//! ## Pull
//! - flat_map with pure is the identity (both sides)
//! - flat_map is associative
//!
//! ## Stream
//! - take(n) emits exactly the first n elements
//! - chunking does not change the element sequence
//! - nested resources release in reverse acquisition order, with or without a failure

#[macro_use]
mod common;

use common::{init_test_logging, test_proptest_config, EventLog};
use proptest::prelude::*;
use sluice::{Chunk, Error, Pull, PureTarget, Stream, SyncTarget};

fn run_pull(pull: Pull<i32, i32>) -> Vec<i32> {
    Stream::from_pull(pull.flat_map(Pull::output1))
        .compile(&PureTarget)
        .to_vec()
        .unwrap()
}

/// A stream of `items` split into chunks of the given sizes.
fn chunked(items: &[i32], sizes: &[usize]) -> Stream<i32> {
    let mut rest = items;
    let mut s = Stream::empty();
    for size in sizes.iter().copied().cycle() {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(size.min(rest.len()));
        s = s.append(Stream::chunk(Chunk::from_slice(head)));
        rest = tail;
    }
    s
}

/// Nested brackets named `0..depth`; the innermost raises when `fail`.
fn nested(log: &EventLog, level: usize, depth: usize, fail: bool) -> Stream<usize> {
    if level == depth {
        return if fail {
            Stream::raise_error(Error::user("innermost"))
        } else {
            Stream::emit(level)
        };
    }
    let (acq, rel, next) = (log.clone(), log.clone(), log.clone());
    Stream::bracket(
        async move {
            acq.push(format!("acquire {level}"));
            Ok(level)
        },
        move |l| {
            rel.push(format!("release {l}"));
            async { Ok(()) }
        },
    )
    .flat_map(move |_| nested(&next, level + 1, depth, fail))
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn chunk_concat_preserves_elements(a in prop::collection::vec(any::<i32>(), 0..32),
                                       b in prop::collection::vec(any::<i32>(), 0..32)) {
        let joined = Chunk::concat(&Chunk::from_slice(&a), &Chunk::from_slice(&b));
        let expected: Vec<i32> = a.iter().chain(b.iter()).copied().collect();
        prop_assert_eq!(joined.size(), a.len() + b.len());
        prop_assert_eq!(joined.to_vec(), expected);
    }

    #[test]
    fn chunk_split_then_concat_is_identity(items in prop::collection::vec(any::<i32>(), 0..64),
                                           at in 0_usize..80) {
        let chunk = Chunk::from_slice(&items);
        let (left, right) = chunk.split_at(at);
        prop_assert_eq!(left.size(), at.min(items.len()));
        prop_assert_eq!(Chunk::concat(&left, &right).to_vec(), items);
    }

    #[test]
    fn pure_is_identity_for_flat_map(x in any::<i32>(), k in any::<i32>()) {
        let f = move |v: i32| Pull::<i32, i32>::pure(v.wrapping_mul(k));
        prop_assert_eq!(run_pull(Pull::pure(x).flat_map(f)), run_pull(f(x)));
        prop_assert_eq!(run_pull(Pull::pure(x).flat_map(Pull::pure)), vec![x]);
    }

    #[test]
    fn flat_map_is_associative(x in any::<i32>(), a in any::<i32>(), b in any::<i32>()) {
        let f = move |v: i32| Pull::<i32, ()>::output1(v).map(move |()| v.wrapping_add(a));
        let g = move |v: i32| Pull::<i32, ()>::output1(v).map(move |()| v.wrapping_mul(b));
        let left = Pull::pure(x).flat_map(f).flat_map(g);
        let right = Pull::pure(x).flat_map(move |v| f(v).flat_map(g));
        prop_assert_eq!(run_pull(left), run_pull(right));
    }

    #[test]
    fn take_emits_a_prefix(items in prop::collection::vec(any::<i32>(), 0..100),
                           sizes in prop::collection::vec(1_usize..8, 1..4),
                           n in 0_usize..120) {
        let out = chunked(&items, &sizes).take(n).compile(&PureTarget).to_vec().unwrap();
        prop_assert_eq!(out, items[..n.min(items.len())].to_vec());
    }

    #[test]
    fn chunking_is_invisible_to_elements(items in prop::collection::vec(any::<i32>(), 0..100),
                                         sizes in prop::collection::vec(1_usize..8, 1..4)) {
        let out = chunked(&items, &sizes).map(|x| x.wrapping_add(1)).compile(&PureTarget).to_vec().unwrap();
        let expected: Vec<i32> = items.iter().map(|x| x.wrapping_add(1)).collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn nested_releases_mirror_acquisitions(depth in 1_usize..12, fail in any::<bool>()) {
        init_test_logging();
        let log = EventLog::new();
        let result = nested(&log, 0, depth, fail).compile(&SyncTarget).to_vec();
        prop_assert_eq!(result.is_err(), fail);

        let acquired: Vec<String> = (0..depth).map(|l| format!("acquire {l}")).collect();
        let released: Vec<String> = (0..depth).rev().map(|l| format!("release {l}")).collect();
        let expected: Vec<String> = acquired.into_iter().chain(released).collect();
        prop_assert_eq!(log.snapshot(), expected);
    }
}

#[test]
fn laws_hold_for_the_empty_stream() {
    test_phase!("laws_hold_for_the_empty_stream");
    let out = Stream::<i32>::empty().take(3).compile(&PureTarget).to_vec().unwrap();
    assert!(out.is_empty());
    test_complete!("laws_hold_for_the_empty_stream");
}
