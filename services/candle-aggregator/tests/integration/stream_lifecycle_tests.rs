//! Instrument stream lifecycle tests under paused tokio time
//!
//! The paused clock starts on a window boundary, so every sample timestamp is
//! exactly the virtual time at which its poll was issued.

use candle_aggregator::{InstrumentStream, StreamSettings};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    QuoteStep, RecordingSink, ScriptedPriceSource, assert_ohlc, at_ms, dec, fast_settings,
    init_test_logging, paused_clock, test_metrics, wbtc_eth,
};
use tokio::time::sleep;

fn spawn_stream(
    source: &Arc<ScriptedPriceSource>,
    sink: &Arc<RecordingSink>,
    settings: StreamSettings,
) -> InstrumentStream {
    InstrumentStream::spawn(
        wbtc_eth(),
        source.clone(),
        sink.clone(),
        Arc::new(paused_clock()),
        settings,
        test_metrics(),
    )
}

/// Two full windows of four samples each, then one sample of a third window
fn two_and_a_bit_windows() -> Arc<ScriptedPriceSource> {
    Arc::new(
        ScriptedPriceSource::prices(&[100, 105, 98, 101, 110, 120, 90, 115])
            .with_fallback(dec(200)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_one_candle_per_elapsed_window() {
    init_test_logging();
    let source = two_and_a_bit_windows();
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    // Polls at 0, 250, ..., 2000
    sleep(Duration::from_millis(2_100)).await;
    let summary = stream.shutdown(false).await;

    let candles = sink.candles();
    assert_eq!(candles.len(), 2);

    assert_eq!(candles[0].window_start, at_ms(0));
    assert_ohlc(&candles[0], 100, 105, 98, 101);
    assert_eq!(candles[0].sample_count, 4);

    assert_eq!(candles[1].window_start, at_ms(1_000));
    assert_eq!(candles[1].window_end, at_ms(2_000));
    assert_ohlc(&candles[1], 110, 120, 90, 115);

    assert_eq!(summary.samples, 9);
    assert_eq!(summary.candles_sealed, 2);
    assert_eq!(summary.emitter.stored, 2);
    assert_eq!(summary.late_samples, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_flush_emits_partial_window() {
    let source = two_and_a_bit_windows();
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(2_100)).await;
    let summary = stream.shutdown(true).await;

    let candles = sink.candles();
    assert_eq!(candles.len(), 3);
    assert_eq!(candles[2].window_start, at_ms(2_000));
    assert_ohlc(&candles[2], 200, 200, 200, 200);
    assert_eq!(candles[2].sample_count, 1);
    assert_eq!(summary.candles_sealed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_polls_leave_ohlc_untouched() {
    let source = Arc::new(
        ScriptedPriceSource::new([
            QuoteStep::price(100),
            QuoteStep::fail("node unavailable"),
            QuoteStep::price(110),
            QuoteStep::Price(rust_decimal::Decimal::ZERO),
        ])
        .with_fallback(dec(130)),
    );
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(1_100)).await;
    let summary = stream.shutdown(false).await;

    let candles = sink.candles();
    assert_eq!(candles.len(), 1);
    assert_ohlc(&candles[0], 100, 110, 100, 110);
    assert_eq!(candles[0].sample_count, 2);
    assert_eq!(summary.sample_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_poll_does_not_delay_later_polls_and_arrives_late() {
    // The first poll is issued at t=0 but only answers at t=1500, after its
    // window was already sealed
    let source = Arc::new(
        ScriptedPriceSource::new([
            QuoteStep::price(100).after(Duration::from_millis(1_500)),
            QuoteStep::price(101),
            QuoteStep::price(102),
            QuoteStep::price(103),
        ])
        .with_fallback(dec(110)),
    );
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(1_600)).await;
    let summary = stream.shutdown(false).await;

    let candles = sink.candles();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].window_start, at_ms(0));
    assert_ohlc(&candles[0], 101, 103, 101, 103);
    assert_eq!(candles[0].sample_count, 3);

    assert_eq!(summary.late_samples, 1);
    assert_eq!(summary.sample_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_exceeding_timeout_is_a_failure() {
    let source = Arc::new(
        ScriptedPriceSource::new([QuoteStep::price(100).after(Duration::from_secs(60))])
            .with_fallback(dec(100)),
    );
    let sink = Arc::new(RecordingSink::new());
    // Polls time out after 2.5s
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(2_600)).await;
    let summary = stream.shutdown(false).await;

    assert_eq!(summary.sample_failures, 1);
    // The stuck poll never held up the ones after it
    assert_eq!(summary.samples, 10);
}

#[tokio::test(start_paused = true)]
async fn test_flush_and_snapshot() {
    let source = Arc::new(ScriptedPriceSource::prices(&[100, 90, 95]).with_fallback(dec(96)));
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(60_000, 250));
    assert_eq!(stream.instrument(), &wbtc_eth());

    sleep(Duration::from_millis(600)).await;

    let open = stream.current().await.expect("window is open");
    assert_ohlc(&open, 100, 100, 90, 95);

    let flushed = stream.flush().await.expect("open candle is flushed");
    assert_eq!(flushed, open);
    assert!(stream.flush().await.is_none());
    assert!(stream.current().await.is_none());

    stream.shutdown(false).await;
    assert_eq!(sink.candles(), vec![flushed]);
}

#[tokio::test(start_paused = true)]
async fn test_poll_completing_after_flush_is_late() {
    // The poll issued at t=250 answers at t=1250, after window 0 was sealed
    // and window 1 was flushed
    let source = Arc::new(
        ScriptedPriceSource::new([
            QuoteStep::price(100),
            QuoteStep::price(101).after(Duration::from_millis(1_000)),
            QuoteStep::price(102),
            QuoteStep::price(103),
            QuoteStep::price(110),
        ])
        .with_fallback(dec(120)),
    );
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(1_100)).await;
    let flushed = stream.flush().await.expect("window 1 is open");
    assert_eq!(flushed.window_start, at_ms(1_000));

    sleep(Duration::from_millis(200)).await;
    let summary = stream.shutdown(false).await;

    let starts: Vec<_> = sink.candles().iter().map(|c| c.window_start).collect();
    assert_eq!(starts, vec![at_ms(0), at_ms(1_000)]);
    assert_ohlc(&sink.candles()[0], 100, 103, 100, 103);
    assert_eq!(summary.late_samples, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_partial_window() {
    let source = Arc::new(ScriptedPriceSource::constant(dec(100)));
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(60_000, 250));

    sleep(Duration::from_millis(600)).await;
    stream.stop();
    let summary = stream.shutdown(true).await;

    assert_eq!(summary.samples, 3);
    assert_eq!(summary.candles_sealed, 0);
    assert!(sink.candles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_polls_after_shutdown() {
    let source = Arc::new(ScriptedPriceSource::constant(dec(100)));
    let sink = Arc::new(RecordingSink::new());
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(600)).await;
    let first = stream.shutdown(true).await;
    let calls = source.calls();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(source.calls(), calls);
    assert_eq!(sink.candles().len(), 1);

    // Repeated shutdown reports the same summary and emits nothing new
    assert_eq!(stream.shutdown(true).await, first);
    assert_eq!(sink.candles().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_never_stalls_sampling() {
    let source = Arc::new(ScriptedPriceSource::constant(dec(100)));
    let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_secs(10)));
    let settings = StreamSettings {
        emit_queue_capacity: 1,
        ..fast_settings(100, 50)
    };
    let mut stream = spawn_stream(&source, &sink, settings);

    // Polls at 0, 50, ..., 1000 seal ten windows
    sleep(Duration::from_millis(1_020)).await;
    let summary = stream.shutdown(false).await;

    assert_eq!(summary.samples, 21);
    assert_eq!(summary.candles_sealed, 10);
    // One candle in the sink, one queued, the rest dropped
    assert_eq!(summary.emitter.dropped, 8);
    assert_eq!(summary.emitter.stored, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_does_not_block_later_candles() {
    let source = two_and_a_bit_windows();
    let sink = Arc::new(RecordingSink::failing_first(1));
    let mut stream = spawn_stream(&source, &sink, fast_settings(1_000, 250));

    sleep(Duration::from_millis(2_100)).await;
    let summary = stream.shutdown(false).await;

    assert_eq!(sink.attempts(), 2);
    assert_eq!(summary.emitter.failed, 1);
    assert_eq!(summary.emitter.stored, 1);

    let stored = sink.candles();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].window_start, at_ms(1_000));
}
