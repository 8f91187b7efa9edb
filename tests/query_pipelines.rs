//! Integration tests for query pipelines across execution modes.
//!
//! The central property: for any combinator chain over a finite input,
//! every mode produces the same multiset of items as the sequential run,
//! and the ordered modes reproduce the sequential order exactly.

use std::time::Duration;

use conflux::prelude::*;

fn all_params() -> Vec<ExecParams> {
    vec![
        ExecParams::sequential(),
        ExecParams::concurrent(),
        ExecParams::concurrent().with_ordered(false),
        ExecParams::parallel(),
        ExecParams::parallel().with_ordered(false),
    ]
}

#[tokio::test]
async fn test_filter_map_pipeline_all_modes() {
    for params in all_params() {
        let query = from_iter(vec![1, 2, 3, 4])
            .filter(|x| x % 2 == 0)
            .map(|x| x * 10)
            .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        if !params.ordered {
            items.sort_unstable();
        }
        assert_eq!(items, vec![20, 40], "params {params:?}");
    }
}

#[tokio::test]
async fn test_async_stages_all_modes() {
    for params in all_params() {
        let query = from_iter(0..20)
            .map_async(|x| async move { Ok(x * 2) })
            .filter(|x| x % 4 == 0)
            .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        items.sort_unstable();
        let expected: Vec<i32> = (0..20).map(|x| x * 2).filter(|x| x % 4 == 0).collect();
        assert_eq!(items, expected, "params {params:?}");
    }
}

#[tokio::test]
async fn test_ordered_concurrent_preserves_input_order_under_skew() {
    // Later items finish first; ordered delivery must hide that.
    let query = from_iter(vec![1u64, 2, 3])
        .as_concurrent()
        .map_async(|x| async move {
            tokio::time::sleep(Duration::from_millis((4 - x) * 20)).await;
            Ok(x)
        });
    assert_eq!(query.to_vec().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_unordered_concurrent_yields_completion_order() {
    let query = from_iter(vec![1u64, 2, 3])
        .as_concurrent()
        .as_unordered()
        .map_async(|x| async move {
            tokio::time::sleep(Duration::from_millis((4 - x) * 20)).await;
            Ok(x)
        });
    let items = query.to_vec().await.unwrap();
    assert_eq!(items, vec![3, 2, 1]);

    let mut sorted = items;
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_flatten_all_modes() {
    for params in all_params() {
        let query = from_iter(vec![
            from_iter(vec![1, 2]),
            from_iter(vec![3]),
            empty(),
            from_iter(vec![4, 5]),
        ])
        .flatten()
        .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        if !params.ordered {
            items.sort_unstable();
        }
        assert_eq!(items, vec![1, 2, 3, 4, 5], "params {params:?}");
    }
}

#[tokio::test]
async fn test_join_pipeline_all_modes() {
    for params in all_params() {
        let query = from_iter(vec![1, 2, 3])
            .join(
                from_iter(vec![10, 20, 30, 40]),
                |a| a % 2,
                |b| (b / 10) % 2,
                |a, b| a + b,
            )
            .map(|sum| sum * 2)
            .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        items.sort_unstable();
        assert_eq!(items.len(), 6, "params {params:?}");

        let mut expected = vec![22, 62, 44, 84, 26, 66];
        expected.sort_unstable();
        assert_eq!(items, expected, "params {params:?}");
    }
}

#[tokio::test]
async fn test_structural_chain_all_modes() {
    for params in all_params() {
        let query = from_iter(vec![2, 3])
            .map(|x| x)
            .prepend(1)
            .append(4)
            .concat(from_iter(vec![5]).map(|x| x))
            .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        if !params.ordered {
            items.sort_unstable();
        }
        assert_eq!(items, vec![1, 2, 3, 4, 5], "params {params:?}");
    }
}

#[tokio::test]
async fn test_async_edges_overlap_parent() {
    for params in all_params() {
        let query = from_iter(vec![2, 3])
            .map(|x| x)
            .prepend_async(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(1)
            })
            .append_async(|| async { Ok(4) })
            .with_params(params);
        let mut items = query.to_vec().await.unwrap();
        if !params.ordered {
            items.sort_unstable();
        }
        assert_eq!(items, vec![1, 2, 3, 4], "params {params:?}");
    }
}

#[tokio::test]
async fn test_take_skip_boundaries() {
    let transformed = from_iter(0..10).map(|x| x);

    assert!(transformed.clone().take(0).to_vec().await.unwrap().is_empty());
    assert_eq!(transformed.clone().take(3).to_vec().await.unwrap(), vec![0, 1, 2]);
    assert_eq!(transformed.clone().take(100).count().await.unwrap(), 10);
    assert_eq!(transformed.clone().skip(8).to_vec().await.unwrap(), vec![8, 9]);
    assert!(transformed.clone().skip(100).to_vec().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_take_over_literal_source_answers_count_directly() {
    // Fused slice keeps the length hint, so count needs no enumeration.
    let query = from_iter(0..100).take(5);
    assert_eq!(query.len_hint(), Some(5));
    assert_eq!(query.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_map_fusion_equivalence() {
    let fused = from_iter(vec![1, 2, 3]).map(|x| x + 1).map(|x| x * 10);
    let composed = from_iter(vec![1, 2, 3]).map(|x| (x + 1) * 10);
    assert_eq!(
        fused.to_vec().await.unwrap(),
        composed.to_vec().await.unwrap()
    );
}

#[tokio::test]
async fn test_prepend_fusion_equivalence() {
    let fused = from_iter(vec![2, 3]).prepend(1);
    let literal = from_iter(vec![1, 2, 3]);
    assert_eq!(fused.len_hint(), literal.len_hint());
    assert_eq!(
        fused.to_vec().await.unwrap(),
        literal.to_vec().await.unwrap()
    );
}

#[tokio::test]
async fn test_empty_terminals() {
    let nothing = empty::<u32>();
    assert!(!nothing.any().await.unwrap());
    assert_eq!(nothing.count().await.unwrap(), 0);
    assert!(nothing.to_vec().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_singleton_terminals() {
    let one = singleton(42);
    assert!(one.any().await.unwrap());
    assert_eq!(one.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_for_each_visits_everything() {
    let mut seen = Vec::new();
    from_iter(vec![1, 2, 3])
        .map(|x| x * 2)
        .for_each(|x| seen.push(x))
        .await
        .unwrap();
    assert_eq!(seen, vec![2, 4, 6]);
}

#[tokio::test]
async fn test_mode_switch_is_idempotent_and_sticky() {
    let query = from_iter(0..10).map(|x| x + 1).as_parallel().as_parallel();
    assert_eq!(query.params().mode, ExecutionMode::Parallel);
    assert!(query.params().ordered);

    let relaxed = query.as_unordered();
    assert_eq!(relaxed.params().mode, ExecutionMode::Parallel);
    assert!(!relaxed.params().ordered);

    let back = relaxed.as_sequential();
    assert_eq!(back.params(), ExecParams::sequential());
    assert_eq!(
        back.to_vec().await.unwrap(),
        (1..=10).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_queries_are_re_enumerable() {
    let query = from_iter(vec![1, 2, 3]).map(|x| x * 2).as_concurrent();
    assert_eq!(query.to_vec().await.unwrap(), vec![2, 4, 6]);
    assert_eq!(query.to_vec().await.unwrap(), vec![2, 4, 6]);
}
