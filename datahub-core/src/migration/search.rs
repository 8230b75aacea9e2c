use crate::Result;
use std::future::Future;

/// Finds the earliest sequence in `(start, latest]` for which `probe` holds.
///
/// `probe` answers whether a position still exists on the peer and will not
/// expire soon. The search assumes positions that pass form a contiguous
/// suffix of the range; gaps in the peer's sequence space can make it settle
/// on a later position than necessary. When no midpoint passes, `latest` is
/// returned. Without a latest sequence the peer is empty and the first
/// position after `start` is returned.
///
/// The first probe error ends the search and is returned as is.
pub async fn search_starting_sequence<F, Fut>(
    start: u64,
    latest: Option<u64>,
    mut probe: F,
) -> Result<u64>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let Some(latest) = latest else {
        return Ok(start + 1);
    };
    if latest <= start {
        return Ok(start + 1);
    }

    let mut low = start;
    let mut high = latest;
    let mut candidate = high;
    while low <= high && high - low > 1 {
        let middle = low + (high - low) / 2;
        if probe(middle).await? {
            high = middle;
            candidate = middle;
        } else {
            low = middle;
        }
        tracing::debug!("Sequence search low={} high={} middle={}", low, high, middle);
    }

    tracing::info!("Sequence search settled on {}", candidate);
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HubError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn answer(passes: bool) -> Result<bool> {
        Ok(passes)
    }

    #[tokio::test]
    async fn test_all_positions_exist() {
        let found = search_starting_sequence(0, Some(100), |_| answer(true))
            .await
            .unwrap();
        assert!((1..=100).contains(&found));
        assert_eq!(found, 1);
    }

    #[tokio::test]
    async fn test_expired_prefix_is_skipped() {
        let found =
            search_starting_sequence(0, Some(100), |sequence| answer(sequence >= 80))
                .await
                .unwrap();
        assert_eq!(found, 80);
    }

    #[tokio::test]
    async fn test_empty_peer_starts_after_start() {
        let always = |_: u64| answer(true);
        assert_eq!(search_starting_sequence(0, None, always).await.unwrap(), 1);
        assert_eq!(search_starting_sequence(5, Some(5), always).await.unwrap(), 6);
        let never = |_: u64| answer(false);
        assert_eq!(search_starting_sequence(0, Some(1), never).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nothing_passes_returns_latest() {
        let found = search_starting_sequence(0, Some(100), |_| answer(false))
            .await
            .unwrap();
        assert_eq!(found, 100);
    }

    #[tokio::test]
    async fn test_probe_count_is_logarithmic() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        search_starting_sequence(0, Some(1_000_000), move |sequence| {
            counter.fetch_add(1, Ordering::SeqCst);
            answer(sequence >= 654_321)
        })
        .await
        .unwrap();
        assert!(probes.load(Ordering::SeqCst) <= 21);
    }

    #[tokio::test]
    async fn test_search_stops_at_first_error() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let result = search_starting_sequence(0, Some(100), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>(HubError::PeerUnreachable("refused".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(HubError::PeerUnreachable(_))));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }
}
