use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mic_pipeline::config::{FilterConfig, FilterKind, GainConfig, GainMode};
use mic_pipeline::filter::ContinuousFilter;
use mic_pipeline::gain::GainStage;
use mic_pipeline::pcm;
use mic_pipeline::{
    AudioSink, ByteStreamReader, ConnectError, Connector, PipelineConfig, PipelineDriver,
    PipelineError,
};

const CHUNK: usize = 1024;
/// Samples consumed before the first emitted chunk: 0.1 s of alignment plus a 3-chunk probe.
const LEAD_IN: usize = 4800 + 3 * CHUNK;

fn sine(freq_hz: f64, amplitude: f64, samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / 48_000.0;
            (amplitude * 32767.0 * (2.0 * PI * freq_hz * t).sin()) as i16
        })
        .collect()
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.serial.read_timeout = Duration::from_millis(5);
    config.filter = FilterConfig {
        kind: FilterKind::Passthrough,
        ..FilterConfig::default()
    };
    config.gain = GainConfig {
        gain_db: 0.0,
        mode: GainMode::Fixed,
    };
    config.overload.reconnect_backoff = Duration::ZERO;
    config.overload.settle_delay = Duration::ZERO;
    config.overload.probe_duration = Duration::from_millis(50);
    config.overload.sync_seconds = 0.1;
    config.overload.max_idle_reads = 3;
    config.status_interval = None;
    config
}

fn bandpass_config() -> PipelineConfig {
    let mut config = test_config();
    config.filter = FilterConfig::default();
    config
}

/// What a filter that has never seen audio makes of `chunk`.
fn fresh_bandpass(chunk: &[i16]) -> Vec<i16> {
    ContinuousFilter::new(FilterConfig::default(), 48_000)
        .process(chunk)
        .into_owned()
}

/// Replays a fixed byte stream; reads past the end return nothing.
struct ScriptedReader {
    data: Vec<u8>,
    pos: usize,
}

impl ByteStreamReader for ScriptedReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        if n == 0 {
            thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out one scripted stream per connect; an exhausted script reports a missing device.
struct ScriptedConnector {
    streams: VecDeque<Vec<u8>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn new(streams: Vec<Vec<u8>>) -> (Self, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            streams: streams.into(),
            connects: connects.clone(),
        };
        (connector, connects)
    }
}

impl Connector for ScriptedConnector {
    type Reader = ScriptedReader;

    fn connect(&mut self) -> Result<ScriptedReader, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.streams.pop_front() {
            Some(data) => Ok(ScriptedReader { data, pos: 0 }),
            None => Err(ConnectError::DeviceAbsent {
                port: "/dev/ttyTEST".to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[derive(Debug, Default)]
struct SinkLog {
    samples: Vec<i16>,
    writes: usize,
    closed: bool,
}

#[derive(Default)]
struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
    fail_on_write: Option<usize>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl MemorySink {
    fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let sink = Self::default();
        let log = sink.log.clone();
        (sink, log)
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.writes += 1;
        if self.fail_on_write == Some(log.writes) {
            anyhow::bail!("output device went away");
        }
        log.samples.extend_from_slice(samples);
        if let Some((after, cancel)) = &self.cancel_after {
            if log.writes >= *after {
                cancel.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[test]
fn stray_byte_is_dropped_before_streaming() {
    let audio = sine(440.0, 0.1, 24_000);
    let mut stream = vec![0x5a];
    stream.extend(pcm::encode_le(&audio));
    let (connector, connects) = ScriptedConnector::new(vec![stream]);
    let (sink, log) = MemorySink::new();

    let summary = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .with_sample_limit(10_000)
        .run()
        .unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(summary.samples, 10_000);
    assert_eq!(summary.chunks, 10);
    assert!(!summary.cancelled);
    assert_eq!(summary.supervisor.resyncs, 0);
    assert_eq!(summary.supervisor.reconnects, 0);

    let log = log.lock().unwrap();
    assert!(log.closed);
    assert_eq!(log.samples, audio[LEAD_IN..LEAD_IN + 10_000]);
}

#[test]
fn quiet_voice_band_tone_is_boosted_to_near_full_scale() {
    let chunks = 120;
    let audio = sine(1000.0, 0.1, LEAD_IN + (chunks + 2) * CHUNK);
    let (connector, _) = ScriptedConnector::new(vec![pcm::encode_le(&audio)]);
    let (sink, log) = MemorySink::new();

    let mut config = test_config();
    config.filter = FilterConfig::default();
    config.gain = GainConfig::default();

    let summary = PipelineDriver::new(config, connector, sink, no_cancel())
        .with_sample_limit((chunks * CHUNK) as u64)
        .run()
        .unwrap();

    assert_eq!(summary.supervisor.windows_evaluated, 2);
    assert_eq!(summary.supervisor.overloads, 0);
    assert_eq!(summary.supervisor.resyncs, 0);

    let log = log.lock().unwrap();
    assert_eq!(log.samples.len(), chunks * CHUNK);
    let settled = &log.samples[log.samples.len() / 2..];
    let peak = pcm::max_abs(settled);
    assert!(peak >= 30_000, "peak {peak}");
}

#[test]
fn flatline_resyncs_then_reconnects() {
    let mut first = pcm::encode_le(&sine(440.0, 0.1, LEAD_IN + 10 * CHUNK));
    first.extend(vec![0x7f; 50_000]);
    let second = pcm::encode_le(&sine(440.0, 0.1, 24_000));
    let (connector, connects) = ScriptedConnector::new(vec![first, second]);
    let (sink, log) = MemorySink::new();

    let summary = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .with_sample_limit(20 * CHUNK as u64)
        .run()
        .unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(summary.supervisor.flatlines, 1);
    assert_eq!(summary.supervisor.resyncs, 1);
    assert_eq!(summary.supervisor.reconnects, 1);
    assert_eq!(summary.samples, 20 * CHUNK as u64);
    assert!(log.lock().unwrap().closed);
}

#[test]
fn saturated_device_is_reported_unstable() {
    let streams = vec![vec![0x7f; 20_000]; 3];
    let (connector, connects) = ScriptedConnector::new(streams);
    let (sink, log) = MemorySink::new();

    let err = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .run()
        .unwrap_err();

    assert!(
        matches!(err, PipelineError::UnstableStream { attempts: 3, .. }),
        "{err}"
    );
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    let log = log.lock().unwrap();
    assert!(log.closed);
    assert!(log.samples.is_empty());
}

#[test]
fn missing_device_fails_after_retries() {
    let (connector, connects) = ScriptedConnector::new(Vec::new());
    let (sink, log) = MemorySink::new();

    let err = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .run()
        .unwrap_err();

    match err {
        PipelineError::ConnectFailed { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(source, ConnectError::DeviceAbsent { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    assert!(log.lock().unwrap().closed);
}

#[test]
fn torn_read_triggers_reconnect() {
    let first = pcm::encode_le(&sine(440.0, 0.1, LEAD_IN + 5 * CHUNK + 300));
    let second = pcm::encode_le(&sine(440.0, 0.1, 24_000));
    let (connector, connects) = ScriptedConnector::new(vec![first, second]);
    let (sink, _log) = MemorySink::new();

    let summary = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .with_sample_limit(10 * CHUNK as u64)
        .run()
        .unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(summary.supervisor.torn_reads, 1);
    assert_eq!(summary.supervisor.reconnects, 1);
    assert_eq!(summary.samples, 10 * CHUNK as u64);
}

#[test]
fn silent_link_escalates_to_reconnect() {
    let first = pcm::encode_le(&sine(440.0, 0.1, LEAD_IN + 3 * CHUNK));
    let (connector, connects) = ScriptedConnector::new(vec![first]);
    let (sink, log) = MemorySink::new();

    let err = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::ConnectFailed { attempts: 3, .. }));
    // One good connection, then three failed reconnects.
    assert_eq!(connects.load(Ordering::SeqCst), 4);
    let log = log.lock().unwrap();
    assert_eq!(log.samples.len(), 3 * CHUNK);
    assert!(log.closed);
}

#[test]
fn sink_failure_skips_one_chunk() {
    let audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![pcm::encode_le(&audio)]);
    let (mut sink, log) = MemorySink::new();
    sink.fail_on_write = Some(2);

    let summary = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .with_sample_limit(5 * CHUNK as u64)
        .run()
        .unwrap();

    assert_eq!(summary.sink_errors, 1);
    assert_eq!(summary.samples, 5 * CHUNK as u64);
    let log = log.lock().unwrap();
    assert_eq!(log.writes, 6);
    assert_eq!(log.samples[..CHUNK], audio[LEAD_IN..LEAD_IN + CHUNK]);
    assert_eq!(
        log.samples[CHUNK..2 * CHUNK],
        audio[LEAD_IN + 2 * CHUNK..LEAD_IN + 3 * CHUNK]
    );
}

#[test]
fn cancel_before_start_is_a_clean_exit() {
    let (connector, connects) = ScriptedConnector::new(Vec::new());
    let (sink, log) = MemorySink::new();
    let cancel = Arc::new(AtomicBool::new(true));

    let summary = PipelineDriver::new(test_config(), connector, sink, cancel)
        .run()
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.samples, 0);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert!(log.lock().unwrap().closed);
}

#[test]
fn cancel_mid_stream_stops_after_current_chunk() {
    let audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![pcm::encode_le(&audio)]);
    let cancel = no_cancel();
    let (mut sink, log) = MemorySink::new();
    sink.cancel_after = Some((4, cancel.clone()));

    let summary = PipelineDriver::new(test_config(), connector, sink, cancel)
        .run()
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.samples, 4 * CHUNK as u64);
    assert!(log.lock().unwrap().closed);
}

#[test]
fn sink_failure_restarts_filter_history() {
    let audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![pcm::encode_le(&audio)]);
    let (mut sink, log) = MemorySink::new();
    sink.fail_on_write = Some(2);

    PipelineDriver::new(bandpass_config(), connector, sink, no_cancel())
        .with_sample_limit(3 * CHUNK as u64)
        .run()
        .unwrap();

    let log = log.lock().unwrap();
    let after_failure = &log.samples[CHUNK..2 * CHUNK];
    let input = &audio[LEAD_IN + 2 * CHUNK..LEAD_IN + 3 * CHUNK];
    assert_eq!(after_failure, fresh_bandpass(input).as_slice());

    // An unbroken filter over the same reads gives a different chunk.
    let mut continuous = ContinuousFilter::new(FilterConfig::default(), 48_000);
    continuous.process(&audio[LEAD_IN..LEAD_IN + 2 * CHUNK]);
    assert_ne!(after_failure, &*continuous.process(input));
}

#[test]
fn reconnect_restarts_filter_history() {
    let first = pcm::encode_le(&sine(440.0, 0.1, LEAD_IN + 5 * CHUNK + 300));
    let second_audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![first, pcm::encode_le(&second_audio)]);
    let (sink, log) = MemorySink::new();

    let summary = PipelineDriver::new(bandpass_config(), connector, sink, no_cancel())
        .with_sample_limit(7 * CHUNK as u64)
        .run()
        .unwrap();

    assert_eq!(summary.supervisor.reconnects, 1);
    let log = log.lock().unwrap();
    assert_eq!(
        &log.samples[5 * CHUNK..6 * CHUNK],
        fresh_bandpass(&second_audio[LEAD_IN..LEAD_IN + CHUNK]).as_slice()
    );
}

#[test]
fn resync_restarts_filter_history() {
    let mut first = pcm::encode_le(&sine(440.0, 0.1, LEAD_IN + 10 * CHUNK));
    first.extend(vec![0x7f; 50_000]);
    let second_audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![first, pcm::encode_le(&second_audio)]);
    let (sink, log) = MemorySink::new();

    let summary = PipelineDriver::new(bandpass_config(), connector, sink, no_cancel())
        .with_sample_limit(15 * CHUNK as u64)
        .run()
        .unwrap();

    assert_eq!(summary.supervisor.resyncs, 1);
    // 10 clean chunks and 4 pinned ones go out before the flatline verdict.
    let log = log.lock().unwrap();
    assert_eq!(
        &log.samples[14 * CHUNK..15 * CHUNK],
        fresh_bandpass(&second_audio[LEAD_IN..LEAD_IN + CHUNK]).as_slice()
    );
}

#[test]
fn stages_adjusted_through_the_driver_shape_output() {
    let audio = sine(440.0, 0.1, 24_000);
    let (connector, _) = ScriptedConnector::new(vec![pcm::encode_le(&audio)]);
    let (sink, log) = MemorySink::new();

    let mut driver = PipelineDriver::new(test_config(), connector, sink, no_cancel())
        .with_sample_limit(2 * CHUNK as u64);
    driver
        .filter_mut()
        .reconfigure(FilterKind::Bandpass, 100.0, 3000.0);
    driver.gain_mut().update(6.0);
    assert_eq!(driver.gain_mut().gain_db(), 6.0);
    driver.run().unwrap();

    let mut filter = ContinuousFilter::new(FilterConfig::default(), 48_000);
    let gain = GainStage::new(GainConfig {
        gain_db: 6.0,
        mode: GainMode::Fixed,
    });
    let mut expected = Vec::new();
    for chunk in audio[LEAD_IN..LEAD_IN + 2 * CHUNK].chunks(CHUNK) {
        let filtered = filter.process(chunk);
        expected.extend_from_slice(&gain.apply(&filtered));
    }
    assert_eq!(log.lock().unwrap().samples, expected);
}
