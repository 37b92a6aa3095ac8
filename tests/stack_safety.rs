//! Deep compositions must not grow the host stack.
//!
//! Each test builds a chain tens of thousands of binds deep and compiles it
//! on the default test thread stack.

#[macro_use]
mod common;

use common::init_test_logging;
use sluice::{Pull, PureTarget, Stream, SyncTarget};

const DEPTH: u64 = 50_000;

fn right_nested(i: u64, n: u64) -> Pull<u64, u64> {
    if i == n {
        Pull::pure(i)
    } else {
        Pull::pure(i).flat_map(move |x| right_nested(x + 1, n))
    }
}

#[test]
fn right_associated_flat_map_chain() {
    init_test_logging();
    test_phase!("right_associated_flat_map_chain");
    let pull = right_nested(0, DEPTH).flat_map(Pull::output1);
    let out = Stream::from_pull(pull).compile(&PureTarget).to_vec().unwrap();
    assert_eq!(out, vec![DEPTH]);
    test_complete!("right_associated_flat_map_chain");
}

fn right_nested_mapped(i: u64, n: u64) -> Pull<u64, u64> {
    if i == n {
        Pull::pure(0)
    } else {
        Pull::suspend(move || right_nested_mapped(i + 1, n)).map(|x| x + 1)
    }
}

#[test]
fn map_after_deep_recursion() {
    let pull = right_nested_mapped(0, DEPTH).flat_map(Pull::output1);
    let out = Stream::from_pull(pull).compile(&PureTarget).to_vec().unwrap();
    assert_eq!(out, vec![DEPTH]);
}

#[test]
fn left_associated_flat_map_chain() {
    let mut pull: Pull<u64, u64> = Pull::pure(0);
    for _ in 0..DEPTH {
        pull = pull.flat_map(|x| Pull::pure(x + 1));
    }
    let out = Stream::from_pull(pull.flat_map(Pull::output1))
        .compile(&PureTarget)
        .to_vec()
        .unwrap();
    assert_eq!(out, vec![DEPTH]);
}

#[test]
fn left_associated_appends() {
    let mut s = Stream::empty();
    for i in 0..20_000_u32 {
        s = s.append(Stream::emit(i));
    }
    let out = s.compile(&PureTarget).to_vec().unwrap();
    assert_eq!(out.len(), 20_000);
    assert_eq!(out.first(), Some(&0));
    assert_eq!(out.last(), Some(&19_999));
}

#[test]
fn flat_map_over_large_range() {
    let s = Stream::range(0, 100_000).flat_map(|x| Stream::emits(vec![x, x]));
    assert_eq!(s.compile(&PureTarget).count().unwrap(), 200_000);
}

#[test]
fn long_stream_of_evals_on_sync_target() {
    let s = Stream::range(0, 20_000).eval_map(|x| async move { Ok(x * 2) });
    let total = s.compile(&SyncTarget).fold(0_i64, |acc, x| acc + x).unwrap();
    assert_eq!(total, (0..20_000).map(|x| x * 2).sum::<i64>());
}

#[test]
fn many_sequential_scopes() {
    let s = Stream::range(0, 10_000).flat_map(|x| Stream::emit(x).scope());
    assert_eq!(s.compile(&PureTarget).last().unwrap(), Some(9_999));
}

fn nested_scopes(depth: u32) -> Pull<u32, ()> {
    if depth == 0 {
        Pull::output1(0)
    } else {
        Pull::suspend(move || nested_scopes(depth - 1)).scope()
    }
}

#[test]
fn deeply_nested_scopes_close() {
    let out = Stream::from_pull(nested_scopes(5_000))
        .compile(&PureTarget)
        .to_vec()
        .unwrap();
    assert_eq!(out, vec![0]);
}

fn right_appended(n: u64) -> Stream<u64> {
    let mut acc = Stream::emit(n);
    for i in (0..n).rev() {
        acc = Stream::emit(i).append(acc);
    }
    acc
}

#[test]
fn dropping_an_unrun_right_associated_append_chain() {
    test_phase!("dropping_an_unrun_right_associated_append_chain");
    drop(right_appended(DEPTH));
    test_complete!("dropping_an_unrun_right_associated_append_chain");
}

#[test]
fn take_from_a_right_associated_append_chain() {
    let out = right_appended(DEPTH).take(2).compile(&PureTarget).to_vec().unwrap();
    assert_eq!(out, vec![0, 1]);
}

#[test]
fn right_associated_append_chain_runs_to_the_end() {
    let s = right_appended(DEPTH);
    assert_eq!(s.compile(&PureTarget).last().unwrap(), Some(DEPTH));
}
