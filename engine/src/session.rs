use crate::error::{PcmError, Result};
use crate::hw::latency::echo_path_delay_ms;
use crate::hw::options::{PcmConfig, PcmFlags, PcmFormat};
use crate::hw::pcm::Pcm;
use crate::processing::{AudioFrame, AudioProcessor, ChannelLayout, StreamLayouts};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fallback playback queue depth when DELAY reports nothing.
const DEFAULT_PLAYBACK_DELAY: u64 = 960;
/// Fallback capture queue depth when DELAY reports nothing.
const DEFAULT_CAPTURE_DELAY: u64 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDelay {
    /// Constant delay handed to the processor, in milliseconds.
    Fixed(u32),
    /// Playback plus capture queue depth, sampled around each transfer.
    Measured,
}

impl Default for StreamDelay {
    fn default() -> Self {
        StreamDelay::Fixed(40)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Streams on this card/device pair feed the echo canceller.
    pub echo_card: u32,
    pub echo_device: u32,
    /// Period size forced on the hardware for every open, if set.
    pub hw_period_frames: Option<u32>,
    pub rate: u32,
    pub stream_delay: StreamDelay,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            echo_card: 0,
            echo_device: 0,
            hw_period_frames: None,
            rate: 48_000,
            stream_delay: StreamDelay::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(usize);

impl StreamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Owns every open stream plus the processor wiring between the echo
/// device's capture and playback streams.
pub struct Session {
    transport: Transport,
    processor: Box<dyn AudioProcessor>,
    options: SessionOptions,
    streams: Vec<Option<Pcm>>,
    capture: Option<StreamId>,
    playback: Option<StreamId>,
    read_active: bool,
    write_active: bool,
    processor_ready: bool,
    analog_level: i32,
    playback_delay: u64,
    capture_delay: u64,
    frame: AudioFrame,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("options", &self.options)
            .field("capture", &self.capture)
            .field("playback", &self.playback)
            .field("read_active", &self.read_active)
            .field("write_active", &self.write_active)
            .field("processor_ready", &self.processor_ready)
            .finish()
    }
}

fn slot(streams: &mut [Option<Pcm>], id: StreamId) -> Result<&mut Pcm> {
    streams
        .get_mut(id.0)
        .and_then(Option::as_mut)
        .ok_or(PcmError::UnknownStream)
}

fn or_default(frames: u64, fallback: u64) -> u64 {
    if frames == 0 { fallback } else { frames }
}

/// Copies the left channel over the right in interleaved 16-bit stereo.
fn duplicate_left(data: &mut [u8]) {
    for frame in data.chunks_exact_mut(4) {
        frame.copy_within(0..2, 2);
    }
}

impl Session {
    pub fn new(
        transport: Transport,
        processor: Box<dyn AudioProcessor>,
        options: SessionOptions,
    ) -> Self {
        let frame = AudioFrame::new(options.rate, ChannelLayout::Stereo);
        Self {
            transport,
            processor,
            options,
            streams: Vec::new(),
            capture: None,
            playback: None,
            read_active: false,
            write_active: false,
            processor_ready: false,
            analog_level: 0,
            playback_delay: 0,
            capture_delay: 0,
            frame,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn open_req(
        &mut self,
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
        requested_rate: u32,
    ) -> Result<StreamId> {
        let config = self.hw_config(config);
        let pcm = self
            .transport
            .open_req(card, device, flags, &config, requested_rate);
        self.register(card, device, flags, pcm)
    }

    pub fn open(
        &mut self,
        card: u32,
        device: u32,
        flags: PcmFlags,
        config: &PcmConfig,
    ) -> Result<StreamId> {
        let config = self.hw_config(config);
        let pcm = self.transport.open(card, device, flags, &config);
        self.register(card, device, flags, pcm)
    }

    fn hw_config(&self, config: &PcmConfig) -> PcmConfig {
        let mut config = config.clone();
        if let Some(frames) = self.options.hw_period_frames {
            config.period_size = frames;
        }
        config
    }

    fn register(&mut self, card: u32, device: u32, flags: PcmFlags, pcm: Pcm) -> Result<StreamId> {
        let pcm = pcm.ready()?;
        let id = StreamId(self.streams.len());
        self.streams.push(Some(pcm));
        if card == self.options.echo_card && device == self.options.echo_device {
            let direction = flags.direction();
            if direction.is_capture() {
                self.capture = Some(id);
            } else {
                self.playback = Some(id);
            }
            debug!(stream = id.0, direction = direction.as_str(), "echo stream registered");
        }
        Ok(id)
    }

    pub fn stream(&self, id: StreamId) -> Option<&Pcm> {
        self.streams.get(id.0).and_then(Option::as_ref)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Pcm> {
        self.streams.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn capture_stream(&self) -> Option<StreamId> {
        self.capture
    }

    pub fn playback_stream(&self) -> Option<StreamId> {
        self.playback
    }

    pub fn is_processing(&self) -> bool {
        self.processor_ready
    }

    pub fn analog_level(&self) -> i32 {
        self.analog_level
    }

    /// Links stream `a` to stream `b` in the kernel.
    pub fn link(&mut self, a: StreamId, b: StreamId) -> Result<()> {
        if a == b {
            return Err(PcmError::InvalidConfig("cannot link a stream to itself".into()));
        }
        if a.0.max(b.0) >= self.streams.len() {
            return Err(PcmError::UnknownStream);
        }
        let (first, second) = if a.0 < b.0 {
            let (head, tail) = self.streams.split_at_mut(b.0);
            (head.get_mut(a.0), tail.first())
        } else {
            let (head, tail) = self.streams.split_at_mut(a.0);
            (tail.first_mut(), head.get(b.0))
        };
        match (first.and_then(Option::as_mut), second.and_then(Option::as_ref)) {
            (Some(first), Some(second)) => first.link(second),
            _ => Err(PcmError::UnknownStream),
        }
    }

    fn enable_processor(&mut self) {
        if self.processor_ready {
            return;
        }
        let status = self
            .processor
            .initialize(self.options.rate, StreamLayouts::stereo());
        if status != 0 {
            warn!(status, "processor initialize failed");
        }
        self.processor_ready = true;
        debug!(rate = self.options.rate, "echo processing enabled");
    }

    fn disable_processor(&mut self) {
        if self.processor_ready {
            debug!("echo processing disabled");
        }
        self.processor_ready = false;
    }

    fn stream_delay_ms(&self) -> u32 {
        match self.options.stream_delay {
            StreamDelay::Fixed(ms) => ms,
            StreamDelay::Measured => {
                echo_path_delay_ms(self.playback_delay, self.capture_delay, self.options.rate)
            }
        }
    }

    /// Plays `data` on `id`. On the echo playback stream the window is first
    /// fed to the processor as the far-end reference.
    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<()> {
        if self.playback == Some(id) && self.capture.is_some() {
            self.write_active = true;
            if self.read_active {
                self.enable_processor();
                self.frame.load_le_bytes(data);
                let delay = slot(&mut self.streams, id)?.delay();
                self.playback_delay = or_default(delay, DEFAULT_PLAYBACK_DELAY);
                let status = self.processor.analyze_playback(&self.frame);
                if status != 0 {
                    warn!(status, "analyze_playback failed");
                }
            }
        }
        let pcm = slot(&mut self.streams, id)?;
        self.transport.write(pcm, data)
    }

    /// Captures into `data` from `id`. On the echo capture stream, once both
    /// directions are flowing, the captured window is replaced by the
    /// processor's output.
    pub fn read(&mut self, id: StreamId, data: &mut [u8]) -> Result<()> {
        let pcm = slot(&mut self.streams, id)?;
        self.capture_delay = or_default(pcm.delay(), DEFAULT_CAPTURE_DELAY);
        let stereo16 = pcm.config().format == PcmFormat::S16Le && pcm.logical_channels() == 2;
        self.transport.read(pcm, data)?;

        if self.capture != Some(id) || self.playback.is_none() {
            return Ok(());
        }
        if !stereo16 {
            debug!("echo processing skipped, capture is not 16-bit stereo");
            return Ok(());
        }
        self.read_active = true;
        if !self.write_active {
            return Ok(());
        }
        self.enable_processor();
        duplicate_left(data);
        self.frame.load_le_bytes(data);
        self.processor.set_stream_analog_level(self.analog_level);
        let delay_ms = self.stream_delay_ms();
        if self.processor.set_stream_delay_ms(delay_ms) != 0 {
            warn!(delay_ms, "stream delay rejected");
        }
        let status = self.processor.process_capture(&mut self.frame);
        if status != 0 {
            warn!(status, "process_capture failed");
        }
        self.analog_level = self.processor.stream_analog_level();
        self.frame.store_le_bytes(data);
        Ok(())
    }

    pub fn close(&mut self, id: StreamId) -> Result<()> {
        let mut pcm = self
            .streams
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(PcmError::UnknownStream)?;
        if self.capture == Some(id) {
            self.capture = None;
            self.read_active = false;
            self.disable_processor();
        }
        if self.playback == Some(id) {
            self.playback = None;
            self.write_active = false;
            self.disable_processor();
        }
        self.transport.close(&mut pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{MockConfig, MockDevice, MockHandle};
    use crate::transport::PcmTransport;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Init(u32),
        Delay(u32),
        Level(i32),
        Analyze(Vec<i16>),
        Process(Vec<i16>),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        level: i32,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, e: Event) {
            self.events.lock().unwrap().push(e);
        }
    }

    impl AudioProcessor for Recorder {
        fn initialize(&mut self, rate: u32, _layouts: StreamLayouts) -> i32 {
            self.push(Event::Init(rate));
            0
        }

        fn set_stream_delay_ms(&mut self, ms: u32) -> i32 {
            self.push(Event::Delay(ms));
            0
        }

        fn set_stream_analog_level(&mut self, level: i32) {
            self.push(Event::Level(level));
            self.level = level;
        }

        fn stream_analog_level(&self) -> i32 {
            self.level + 5
        }

        fn process_capture(&mut self, frame: &mut AudioFrame) -> i32 {
            self.push(Event::Process(frame.data[..4].to_vec()));
            frame.data.fill(7);
            0
        }

        fn analyze_playback(&mut self, frame: &AudioFrame) -> i32 {
            self.push(Event::Analyze(frame.data[..2].to_vec()));
            0
        }
    }

    struct MockTransport {
        devices: VecDeque<MockDevice>,
    }

    impl PcmTransport for MockTransport {
        fn open(&mut self, _card: u32, _device: u32, flags: PcmFlags, config: &PcmConfig) -> Pcm {
            let device = self.devices.pop_front().unwrap();
            Pcm::open_with(Box::new(device), flags, config, None)
        }

        fn open_req(
            &mut self,
            _card: u32,
            _device: u32,
            flags: PcmFlags,
            config: &PcmConfig,
            rate: u32,
        ) -> Pcm {
            let device = self.devices.pop_front().unwrap();
            Pcm::open_with(Box::new(device), flags, config, Some(rate))
        }
    }

    fn config() -> PcmConfig {
        PcmConfig {
            channels: 2,
            rate: 48_000,
            period_size: 480,
            period_count: 4,
            ..PcmConfig::default()
        }
    }

    fn session(
        mocks: Vec<MockConfig>,
        options: SessionOptions,
    ) -> (Session, Recorder, Vec<MockHandle>) {
        let mut devices = VecDeque::new();
        let mut handles = Vec::new();
        for cfg in mocks {
            let (dev, handle) = MockDevice::new(cfg);
            devices.push_back(dev);
            handles.push(handle);
        }
        let recorder = Recorder::default();
        let session = Session::new(
            Transport::Injected(Box::new(MockTransport { devices })),
            Box::new(recorder.clone()),
            options,
        );
        (session, recorder, handles)
    }

    fn echo_pair(options: SessionOptions) -> (Session, Recorder, StreamId, StreamId, Vec<MockHandle>) {
        let (mut s, rec, handles) = session(
            vec![MockConfig::capture(), MockConfig::playback()],
            options,
        );
        let cap = s.open(0, 0, PcmFlags::IN, &config()).unwrap();
        let play = s.open(0, 0, PcmFlags::OUT, &config()).unwrap();
        handles[0].set_capture_pattern(&[0x11, 0x00, 0x22, 0x00]);
        (s, rec, cap, play, handles)
    }

    #[test]
    fn write_then_read_analyzes_then_processes_once() {
        let (mut s, rec, cap, play, _) = echo_pair(SessionOptions::default());
        assert_eq!(s.capture_stream(), Some(cap));
        assert_eq!(s.playback_stream(), Some(play));

        let mut buf = vec![0u8; 1920];
        s.read(cap, &mut buf).unwrap();
        assert!(rec.events().is_empty());
        assert_eq!(&buf[..4], &[0x11, 0x00, 0x22, 0x00]);

        let out: Vec<u8> = [3i16, 4].iter().cycle().take(960).flat_map(|v| v.to_le_bytes()).collect();
        s.write(play, &out).unwrap();
        s.read(cap, &mut buf).unwrap();

        assert_eq!(
            rec.events(),
            vec![
                Event::Init(48_000),
                Event::Analyze(vec![3, 4]),
                Event::Level(0),
                Event::Delay(40),
                Event::Process(vec![0x11, 0x11, 0x11, 0x11]),
            ]
        );
        assert!(buf.chunks(2).all(|b| i16::from_le_bytes([b[0], b[1]]) == 7));
        assert_eq!(s.analog_level(), 5);
        assert!(s.is_processing());
    }

    #[test]
    fn mono_echo_capture_is_not_processed() {
        let (mut s, rec, handles) = session(
            vec![MockConfig::capture(), MockConfig::playback()],
            SessionOptions::default(),
        );
        let mono = PcmConfig {
            requested_channels: Some(1),
            ..config()
        };
        let cap = s.open(0, 0, PcmFlags::IN, &mono).unwrap();
        let play = s.open(0, 0, PcmFlags::OUT, &config()).unwrap();
        assert_eq!(s.capture_stream(), Some(cap));
        handles[0].set_capture_pattern(&[0x10, 0x00, 0x20, 0x00]);

        let mut buf = vec![0u8; 960];
        for _ in 0..2 {
            s.read(cap, &mut buf).unwrap();
            s.write(play, &[0u8; 1920]).unwrap();
        }
        s.read(cap, &mut buf).unwrap();

        assert!(rec.events().is_empty());
        assert!(!s.is_processing());
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 0x08 + 0x10);
    }

    #[test]
    fn measured_delay_uses_fallback_depths() {
        let (mut s, rec, cap, play, _) = echo_pair(SessionOptions {
            stream_delay: StreamDelay::Measured,
            ..SessionOptions::default()
        });
        let mut buf = vec![0u8; 1920];
        s.read(cap, &mut buf).unwrap();
        s.write(play, &buf.clone()).unwrap();
        s.read(cap, &mut buf).unwrap();
        // (960 + 240) frames at 48 kHz
        assert!(rec.events().contains(&Event::Delay(25)));
    }

    #[test]
    fn streams_off_the_echo_device_pass_through() {
        let (mut s, rec, _) = session(
            vec![MockConfig::capture(), MockConfig::playback()],
            SessionOptions::default(),
        );
        let cap = s.open(1, 0, PcmFlags::IN, &config()).unwrap();
        let play = s.open(1, 0, PcmFlags::OUT, &config()).unwrap();
        let mut buf = vec![0u8; 1920];
        s.write(play, &buf.clone()).unwrap();
        s.read(cap, &mut buf).unwrap();
        s.write(play, &buf.clone()).unwrap();
        assert_eq!(s.capture_stream(), None);
        assert!(rec.events().is_empty());
    }

    #[test]
    fn failed_open_is_not_registered() {
        let (mut s, _, _) = session(
            vec![MockConfig {
                accepted_rates: Some(vec![44_100]),
                ..MockConfig::capture()
            }],
            SessionOptions::default(),
        );
        let err = s.open(0, 0, PcmFlags::IN, &config()).unwrap_err();
        assert!(matches!(err, PcmError::ConfigRejected(_)));
        assert_eq!(s.capture_stream(), None);
    }

    #[test]
    fn open_req_walks_the_rate_table() {
        let (mut s, _, handles) = session(
            vec![MockConfig {
                accepted_rates: Some(vec![32_000]),
                ..MockConfig::playback()
            }],
            SessionOptions::default(),
        );
        let id = s.open_req(0, 0, PcmFlags::OUT, &config(), 44_100).unwrap();
        assert!(s.stream(id).is_some());
        assert_eq!(handles[0].negotiated_rate(), Some(32_000));
    }

    #[test]
    fn hw_period_override_applies_to_the_hardware() {
        let (mut s, _, _) = session(
            vec![MockConfig::playback()],
            SessionOptions {
                hw_period_frames: Some(1024),
                ..SessionOptions::default()
            },
        );
        let id = s.open(0, 0, PcmFlags::OUT, &config()).unwrap();
        assert_eq!(s.stream(id).unwrap().config().period_size, 1024);
    }

    #[test]
    fn closing_a_stream_tears_down_processing() {
        let (mut s, rec, cap, play, handles) = echo_pair(SessionOptions::default());
        let mut buf = vec![0u8; 1920];
        s.read(cap, &mut buf).unwrap();
        s.write(play, &buf.clone()).unwrap();
        assert!(s.is_processing());

        s.close(play).unwrap();
        assert!(!s.is_processing());
        assert_eq!(s.playback_stream(), None);
        assert_eq!(s.capture_stream(), Some(cap));
        assert!(handles[1].is_closed());

        let before = rec.events().len();
        s.read(cap, &mut buf).unwrap();
        assert_eq!(rec.events().len(), before);
        assert!(matches!(s.write(play, &buf), Err(PcmError::UnknownStream)));
        assert!(matches!(s.close(play), Err(PcmError::UnknownStream)));
    }

    #[test]
    fn link_pairs_two_streams() {
        let (mut s, _, cap, play, handles) = echo_pair(SessionOptions::default());
        s.link(cap, play).unwrap();
        assert_eq!(handles[0].linked(), Some(MockConfig::playback().fd));
        assert!(s.link(cap, cap).is_err());
    }

    #[test]
    fn options_fill_in_defaults() {
        let opts: SessionOptions =
            serde_json::from_str(r#"{"echo_card": 1, "stream_delay": "measured"}"#).unwrap();
        assert_eq!(opts.echo_card, 1);
        assert_eq!(opts.stream_delay, StreamDelay::Measured);
        assert_eq!(opts.rate, 48_000);
        assert_eq!(opts.hw_period_frames, None);
    }
}
