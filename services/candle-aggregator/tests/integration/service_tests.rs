//! Multi-instrument service tests

use candle_aggregator::{AggregatorError, CandleService, InstrumentId, PriceSource};
use pretty_assertions::assert_eq;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    QuoteStep, RecordingSink, ScriptedPriceSource, assert_ohlc, dec, fast_settings,
    paused_clock, test_metrics, usdc_eth, wbtc_eth,
};
use tokio::time::sleep;

fn service(sink: &Arc<RecordingSink>) -> CandleService {
    CandleService::with_clock(
        fast_settings(1_000, 250),
        sink.clone(),
        test_metrics(),
        Arc::new(paused_clock()),
    )
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_instruments_are_aggregated_independently(
    wbtc_eth: InstrumentId,
    usdc_eth: InstrumentId,
) {
    let sink = Arc::new(RecordingSink::new());
    let mut service = service(&sink);

    service
        .track(wbtc_eth.clone(), Arc::new(ScriptedPriceSource::prices(&[15, 16, 14, 15]).with_fallback(dec(17))))
        .unwrap();
    service
        .track(usdc_eth.clone(), Arc::new(ScriptedPriceSource::prices(&[2500, 2400, 2600, 2550]).with_fallback(dec(2700))))
        .unwrap();

    sleep(Duration::from_millis(1_100)).await;
    let summaries = service.shutdown(false).await;

    let wbtc = sink.candles_for(&wbtc_eth);
    let usdc = sink.candles_for(&usdc_eth);
    assert_eq!(wbtc.len(), 1);
    assert_eq!(usdc.len(), 1);
    assert_ohlc(&wbtc[0], 15, 16, 14, 15);
    assert_ohlc(&usdc[0], 2500, 2600, 2400, 2550);
    assert_eq!(wbtc[0].window_start, usdc[0].window_start);

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[&wbtc_eth].candles_sealed, 1);
    assert_eq!(summaries[&usdc_eth].candles_sealed, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_failing_instrument_does_not_affect_others(
    wbtc_eth: InstrumentId,
    usdc_eth: InstrumentId,
) {
    let sink = Arc::new(RecordingSink::new());
    let mut service = service(&sink);

    let broken = Arc::new(ScriptedPriceSource::new(
        std::iter::repeat_with(|| QuoteStep::fail("execution reverted")).take(64),
    ));
    service.track(wbtc_eth.clone(), broken.clone()).unwrap();
    service
        .track(usdc_eth.clone(), Arc::new(ScriptedPriceSource::constant(dec(2500))))
        .unwrap();

    sleep(Duration::from_millis(2_100)).await;
    let summaries = service.shutdown(false).await;

    assert!(sink.candles_for(&wbtc_eth).is_empty());
    assert_eq!(sink.candles_for(&usdc_eth).len(), 2);

    assert_eq!(summaries[&wbtc_eth].samples, 0);
    assert_eq!(summaries[&wbtc_eth].sample_failures, u64::from(broken.calls()));
    assert_eq!(summaries[&usdc_eth].sample_failures, 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_duplicate_instrument_is_rejected(wbtc_eth: InstrumentId) {
    let sink = Arc::new(RecordingSink::new());
    let mut service = service(&sink);
    let source: Arc<dyn PriceSource> = Arc::new(ScriptedPriceSource::constant(dec(1)));

    service.track(wbtc_eth.clone(), source.clone()).unwrap();
    let err = service.track(wbtc_eth.clone(), source).unwrap_err();

    assert!(matches!(err, AggregatorError::DuplicateInstrument { ref id } if id == "WBTCETH"));
    assert_eq!(service.instruments().count(), 1);
    service.shutdown(false).await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_flush_all_and_repeated_shutdown(wbtc_eth: InstrumentId, usdc_eth: InstrumentId) {
    let sink = Arc::new(RecordingSink::new());
    let mut service = service(&sink);
    service
        .track(wbtc_eth.clone(), Arc::new(ScriptedPriceSource::constant(dec(15))))
        .unwrap();
    service
        .track(usdc_eth.clone(), Arc::new(ScriptedPriceSource::constant(dec(2500))))
        .unwrap();

    sleep(Duration::from_millis(600)).await;

    let mut flushed = service.flush_all().await;
    flushed.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[0].instrument, usdc_eth);
    assert_eq!(flushed[0].sample_count, 3);
    assert!(service.flush_all().await.is_empty());

    let summaries = service.shutdown(true).await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(sink.candles().len(), 2);

    assert!(service.shutdown(true).await.is_empty());
    assert!(service.stream(&wbtc_eth).is_none());
}
