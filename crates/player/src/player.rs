// Playback session: the public entry point tying loading, decoding and delivery together.

use std::sync::{Arc, Weak};

use hls::ResolvedVariant;
use media_types::StreamKind;
use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::clock::PlaybackClock;
use crate::config::PlayerConfig;
use crate::controller::{LoadingController, LoadingState, LoadingStrategy};
use crate::decode::DecodeStage;
use crate::error::Result;
use crate::http::{Fetcher, HttpSession, NetworkMonitor};
use crate::media::{
    AudioOutput, CompressedSample, DecodedSample, Decoder, PassthroughDecoder, VideoRenderer,
};
use crate::orchestrator::OrchestratedLoader;
use crate::resolver::VariantResolver;
use crate::segment_loader::ReadGate;
use crate::signal::{Signal, Subscription};
use crate::sync_link::SyncLink;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Play,
    Pause,
    Reset,
    SeekTo(f64),
}

/// Decode and output collaborators of a session.
#[derive(Clone)]
pub struct MediaOutputs {
    pub video_decoder: Arc<dyn Decoder>,
    pub audio_decoder: Arc<dyn Decoder>,
    pub renderer: Arc<dyn VideoRenderer>,
    pub audio: Option<Arc<dyn AudioOutput>>,
}

impl MediaOutputs {
    /// Pass-through decoding into `renderer`, without audio output.
    pub fn passthrough(renderer: Arc<dyn VideoRenderer>) -> Self {
        Self {
            video_decoder: Arc::new(PassthroughDecoder),
            audio_decoder: Arc::new(PassthroughDecoder),
            renderer,
            audio: None,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    url: Option<Url>,
    playing: bool,
    /// Start playing once the controller reports a loaded variant.
    autoplay: bool,
    duration: f64,
    current_time: f64,
    /// The next sample re-anchors decoding and delivery.
    waiting_for_sync: bool,
}

struct PlayerInner {
    controller: LoadingController,
    loader: Arc<OrchestratedLoader>,
    decode: DecodeStage,
    link: SyncLink,
    renderer: Arc<dyn VideoRenderer>,
    audio: Option<Arc<dyn AudioOutput>>,
    clock: PlaybackClock,
    state: Mutex<SessionState>,
    events: Signal<PlaybackEvent>,
    play_time: Signal<f64>,
}

/// One playback session of an HLS stream.
///
/// Must be created within a tokio runtime.
pub struct Player {
    inner: Arc<PlayerInner>,
    monitor: Arc<NetworkMonitor>,
    _subscriptions: Vec<Subscription>,
}

impl Player {
    /// Session fetching over HTTP with the configured client and retry policy.
    pub fn new(config: PlayerConfig, outputs: MediaOutputs) -> Result<Self> {
        let monitor = Arc::new(NetworkMonitor::new(config.monitor.clone()));
        let session = HttpSession::new(&config.http, Arc::clone(&monitor))?;
        Ok(Self::with_fetcher(config, Arc::new(session), monitor, outputs))
    }

    /// Session over any [`Fetcher`]. `monitor` should be the one the fetcher reports to.
    pub fn with_fetcher(
        config: PlayerConfig,
        fetcher: Arc<dyn Fetcher>,
        monitor: Arc<NetworkMonitor>,
        outputs: MediaOutputs,
    ) -> Self {
        let link = SyncLink::new(config.sync_link.clone(), outputs.audio.clone());
        let decode = DecodeStage::spawn(
            outputs.video_decoder,
            outputs.audio_decoder,
            link.clone(),
        );
        let clock = PlaybackClock::new();
        let resolver = Arc::new(VariantResolver::new(
            fetcher,
            Arc::clone(&monitor),
            config.http.chunk_timeout,
        ));
        let gate: Arc<dyn ReadGate> = Arc::new(link.clone());
        let loader = Arc::new(OrchestratedLoader::new(
            resolver.clone(),
            clock.clone(),
            Some(gate),
            config.loader.clone(),
            config.demux.clone(),
            config.migration.clone(),
        ));
        let controller = LoadingController::new(resolver, Arc::clone(&loader), config.abr.clone());

        let inner = Arc::new(PlayerInner {
            controller,
            loader,
            decode,
            link,
            renderer: outputs.renderer,
            audio: outputs.audio,
            clock,
            state: Mutex::new(SessionState::default()),
            events: Signal::new(),
            play_time: Signal::new(),
        });

        let weak = Arc::downgrade(&inner);
        let subscriptions = vec![
            inner.controller.watch(&monitor),
            inner.controller.state_changed().subscribe({
                let weak = Weak::clone(&weak);
                move |state: &LoadingState| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_loading_state(state);
                    }
                }
            }),
            inner.loader.output().subscribe({
                let weak = Weak::clone(&weak);
                move |sample: &CompressedSample| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_buffer(sample.clone());
                    }
                }
            }),
            inner.link.output().subscribe(move |sample: &DecodedSample| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_rendered(sample);
                }
            }),
        ];

        Self {
            inner,
            monitor,
            _subscriptions: subscriptions,
        }
    }

    /// Load `url` and start playing once a variant is ready.
    ///
    /// Loading the URL already loaded does nothing.
    pub async fn load(&self, url: Url) -> Result<()> {
        let previous = {
            let state = self.inner.state.lock();
            if state.url.as_ref() == Some(&url) {
                debug!(url = %url, "Already loaded");
                return Ok(());
            }
            state.url.clone()
        };
        if previous.is_some() {
            self.inner.reset();
        }
        {
            let mut state = self.inner.state.lock();
            state.url = Some(url.clone());
            state.autoplay = true;
            state.duration = 0.0;
            state.waiting_for_sync = true;
        }
        self.inner.loader.clear();
        self.inner.set_current_time(0.0);
        info!(url = %url, "Loading stream");
        self.inner.controller.start_loading(&url).await
    }

    pub fn play(&self) {
        self.inner.play();
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Stop playback and drop everything buffered.
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Move playback to `time`, clamped to the stream duration.
    pub fn seek(&self, time: f64) {
        self.inner.seek(time);
    }

    /// Switch between automatic and pinned variant selection. Playback restarts when the
    /// strategy actually changes.
    pub async fn set_loading_strategy(&self, strategy: LoadingStrategy) -> Result<()> {
        if self.inner.controller.strategy() == strategy {
            return Ok(());
        }
        let had_url = {
            let state = self.inner.state.lock();
            state.url.is_some()
        };
        self.inner.reset();
        if had_url {
            let mut state = self.inner.state.lock();
            state.autoplay = true;
            state.waiting_for_sync = true;
        }
        let result = match self.inner.controller.set_loading_strategy(strategy).await {
            Err(e) if e.is_choose_conflict() => Ok(()),
            other => other,
        };

        // No new variant was loaded: resume the current one where it stopped.
        let resume = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.autoplay).then_some(state.current_time)
        };
        if let Some(time) = resume
            && self.inner.loader.current_variant().is_some()
        {
            self.inner.loader.seek(time);
            self.inner.play();
        }
        result
    }

    pub fn loading_strategy(&self) -> LoadingStrategy {
        self.inner.controller.strategy()
    }

    /// Bandwidths of the master playlist variants, empty for a single-variant stream.
    pub fn loading_options(&self) -> Vec<u64> {
        self.inner.controller.loading_options()
    }

    pub fn loading_state(&self) -> LoadingState {
        self.inner.controller.state()
    }

    pub fn loading_state_changed(&self) -> &Signal<LoadingState> {
        self.inner.controller.state_changed()
    }

    pub fn current_variant(&self) -> Option<Arc<ResolvedVariant>> {
        self.inner.loader.current_variant()
    }

    pub fn duration(&self) -> f64 {
        self.inner.state.lock().duration
    }

    pub fn current_time(&self) -> f64 {
        self.inner.state.lock().current_time
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }

    pub fn events(&self) -> &Signal<PlaybackEvent> {
        &self.inner.events
    }

    /// Current playback time after every change.
    pub fn play_time(&self) -> &Signal<f64> {
        &self.inner.play_time
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.inner.loader.clear();
        self.inner.link.pause(true);
    }
}

impl PlayerInner {
    fn on_loading_state(&self, loading: &LoadingState) {
        let LoadingState::Loaded(variant) = loading else {
            return;
        };
        let autoplay = {
            let mut state = self.state.lock();
            state.duration = variant.full_duration();
            std::mem::take(&mut state.autoplay)
        };
        debug!(duration = variant.full_duration(), "Variant loaded");
        if autoplay {
            self.play();
        }
    }

    fn play(&self) {
        {
            let mut state = self.state.lock();
            if state.playing {
                return;
            }
            state.playing = true;
        }
        info!("Playback started");
        self.decode.start();
        self.link.start();
        if let Some(audio) = &self.audio {
            audio.start();
        }
        if !self.loader.is_running() {
            self.loader.start();
        }
        self.events.send(&PlaybackEvent::Play);
    }

    fn pause(&self) {
        {
            let mut state = self.state.lock();
            if !state.playing {
                return;
            }
            state.playing = false;
        }
        info!("Playback paused");
        self.pause_pipeline(false);
        self.events.send(&PlaybackEvent::Pause);
    }

    fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.autoplay = false;
        }
        debug!("Playback reset");
        self.pause_pipeline(true);
        self.events.send(&PlaybackEvent::Reset);
    }

    fn pause_pipeline(&self, reset: bool) {
        self.loader.pause(reset);
        self.decode.pause(reset);
        self.link.pause(reset);
        if let Some(audio) = &self.audio {
            audio.pause(reset);
        }
    }

    fn seek(&self, time: f64) {
        let (time, playing) = {
            let mut state = self.state.lock();
            let time = clamp_time(time, state.duration);
            state.waiting_for_sync = true;
            (time, state.playing)
        };
        info!(time, "Seeking");
        self.set_current_time(time);
        self.events.send(&PlaybackEvent::SeekTo(time));

        if playing {
            self.pause_pipeline(true);
        }
        self.loader.seek(time);
        if playing {
            self.decode.start();
            self.loader.start();
        }
    }

    /// Forward a compressed sample to decoding. The first one after a load or seek moves
    /// decoding and delivery to its timestamp.
    fn on_buffer(&self, sample: CompressedSample) {
        let (anchor, playing) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.waiting_for_sync), state.playing)
        };
        if anchor {
            let pts = sample.pts();
            debug!(pts, stream = %sample.stream, "Anchoring playback");
            self.decode.seek();
            if playing {
                self.link.seek(pts);
            } else {
                self.link.reset();
            }
            if let Some(audio) = &self.audio {
                audio.seek(pts);
            }
        }
        self.decode.submit(sample);
    }

    fn on_rendered(&self, sample: &DecodedSample) {
        if sample.kind != StreamKind::Video {
            return;
        }
        self.renderer.render(sample);
        self.set_current_time(sample.pts);
    }

    fn set_current_time(&self, time: f64) {
        let time = {
            let mut state = self.state.lock();
            state.current_time = clamp_time(time, state.duration);
            state.current_time
        };
        self.clock.set(time);
        self.play_time.send(&time);
    }
}

/// Clamp to `[0, duration]`; an unknown (zero) duration only bounds from below.
fn clamp_time(time: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        time.clamp(0.0, duration)
    } else {
        time.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::test_support::{MockFetcher, RecordingRenderer, init_tracing, serve_media};
    use reqwest::StatusCode;
    use std::time::Duration;

    struct Fixture {
        fetcher: Arc<MockFetcher>,
        renderer: Arc<RecordingRenderer>,
        player: Player,
        events: Arc<Mutex<Vec<PlaybackEvent>>>,
        _sub: Subscription,
    }

    fn fixture() -> Fixture {
        init_tracing();
        let fetcher = Arc::new(MockFetcher::new());
        let renderer = Arc::new(RecordingRenderer::default());
        let player = Player::with_fetcher(
            PlayerConfig::default(),
            fetcher.clone(),
            Arc::new(NetworkMonitor::new(MonitorConfig::default())),
            MediaOutputs::passthrough(renderer.clone()),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = player
            .events()
            .subscribe(move |e: &PlaybackEvent| sink.lock().push(*e));
        Fixture {
            fetcher,
            renderer,
            player,
            events,
            _sub: sub,
        }
    }

    fn media_url() -> Url {
        Url::parse("http://a.test/v/index.m3u8").unwrap()
    }

    #[test]
    fn test_clamp_time() {
        assert_eq!(clamp_time(-1.0, 10.0), 0.0);
        assert_eq!(clamp_time(12.0, 10.0), 10.0);
        assert_eq!(clamp_time(12.0, 0.0), 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_plays_and_renders_in_order() {
        let f = fixture();
        serve_media(&f.fetcher, "http://a.test/v/", 6, 1.0);

        f.player.load(media_url()).await.unwrap();
        assert!(f.player.is_playing());
        assert_eq!(f.player.duration(), 6.0);
        assert!(f.player.loading_options().is_empty());
        assert_eq!(f.events.lock().as_slice(), &[PlaybackEvent::Play]);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let rendered = f.renderer.rendered.lock().clone();
        assert!(!rendered.is_empty());
        assert!(rendered.windows(2).all(|w| w[0] <= w[1]));
        assert!(rendered[0] < 0.1);
        assert!(f.player.current_time() > 0.0);
        assert!(f.player.current_time() <= f.player.duration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_url_is_loaded_once() {
        let f = fixture();
        serve_media(&f.fetcher, "http://a.test/v/", 3, 1.0);
        f.player.load(media_url()).await.unwrap();
        f.player.load(media_url()).await.unwrap();
        assert_eq!(f.fetcher.hits(media_url().as_str()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_delivery() {
        let f = fixture();
        serve_media(&f.fetcher, "http://a.test/v/", 6, 1.0);
        f.player.load(media_url()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        f.player.pause();
        assert!(!f.player.is_playing());
        let count = f.renderer.rendered.lock().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.renderer.rendered.lock().len(), count);
        assert_eq!(f.events.lock().last(), Some(&PlaybackEvent::Pause));

        f.player.play();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.renderer.rendered.lock().len() > count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_restarts_at_target() {
        let f = fixture();
        serve_media(&f.fetcher, "http://a.test/v/", 8, 1.0);
        f.player.load(media_url()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        f.player.seek(3.5);
        assert_eq!(f.player.current_time(), 3.5);
        assert_eq!(f.events.lock().last(), Some(&PlaybackEvent::SeekTo(3.5)));
        assert!(f.player.is_playing());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let last = *f.renderer.rendered.lock().last().unwrap();
        assert!(last >= 3.0, "last rendered {last}");
        assert!(f.player.current_time() >= 3.0);

        // Past the end clamps to the duration.
        f.player.seek(100.0);
        assert_eq!(f.player.current_time(), 8.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_stays_empty() {
        let f = fixture();
        f.fetcher.fail(media_url().as_str(), StatusCode::NOT_FOUND);
        assert!(f.player.load(media_url()).await.is_err());
        assert_eq!(f.player.loading_state(), LoadingState::Empty);
        assert!(!f.player.is_playing());
    }

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=500,CODECS=\"avc1.42e00a\",RESOLUTION=320x180
lo/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500,CODECS=\"avc1.42e00a\",RESOLUTION=1280x720
hi/index.m3u8
";

    #[tokio::test(start_paused = true)]
    async fn test_pinning_restarts_on_pinned_variant() {
        let f = fixture();
        f.fetcher.insert("http://a.test/master.m3u8", MASTER);
        serve_media(&f.fetcher, "http://a.test/lo/", 4, 1.0);
        serve_media(&f.fetcher, "http://a.test/hi/", 4, 1.0);

        f.player
            .load(Url::parse("http://a.test/master.m3u8").unwrap())
            .await
            .unwrap();
        assert_eq!(f.player.loading_options(), vec![500, 2500]);
        assert_eq!(f.player.current_variant().unwrap().info.bandwidth, 500);

        f.player
            .set_loading_strategy(LoadingStrategy::Pinned(2500))
            .await
            .unwrap();
        assert_eq!(f.player.loading_strategy(), LoadingStrategy::Pinned(2500));
        assert_eq!(f.player.current_variant().unwrap().info.bandwidth, 2500);
        assert!(f.player.is_playing());
        let events = f.events.lock().clone();
        assert_eq!(
            events,
            vec![PlaybackEvent::Play, PlaybackEvent::Reset, PlaybackEvent::Play]
        );
    }
}
