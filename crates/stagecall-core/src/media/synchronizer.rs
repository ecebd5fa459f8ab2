//! Sequencing on top of a [`MediaBackend`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{CueTrigger, MediaBackend, MediaEvent, MediaResource, MediaResourceSpec, ResourceId};
use crate::error::PlaybackError;
use crate::lock;
use crate::scheduler::{CancelToken, Cancelled, TeardownScope};

/// Outcome of a `play` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// Refused by the autoplay policy; kept as the pending retry.
    Blocked,
    /// Unknown resource or other non-recoverable refusal.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpOutcome {
    Warmed,
    AlreadyWarm,
    /// The resource is currently playing; nothing to authorize.
    Skipped,
    /// The host refused the silent start. The resource falls back to
    /// on-demand `play`, which may itself be blocked later.
    Refused,
}

/// Notifications the runtime mirrors into its snapshot and event feed.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaNotice {
    Started(ResourceId),
    Blocked(ResourceId),
    Unblocked(ResourceId),
    /// The pending retry was dropped because the resource was stopped or
    /// another one took the foreground.
    BlockDismissed(ResourceId),
    Warmed(ResourceId),
    WarmUpRefused(ResourceId),
    CueFired { resource: ResourceId, at: Duration },
}

pub type NoticeHook = Arc<dyn Fn(MediaNotice) + Send + Sync>;

/// Owns every media resource of the running script.
///
/// Only one resource is the audible foreground at a time; starting another
/// pauses the previous one. Any number may be warmed silently.
pub struct MediaSynchronizer {
    backend: Arc<dyn MediaBackend>,
    resources: Mutex<HashMap<ResourceId, MediaResource>>,
    foreground: Mutex<Option<ResourceId>>,
    blocked: Mutex<Option<ResourceId>>,
    cue_poll: Duration,
    hook: Mutex<Option<NoticeHook>>,
    /// Resources stopped, paused or pushed out of the foreground through
    /// the synchronizer. Silent warm-up pauses never show up here.
    halted: broadcast::Sender<ResourceId>,
}

impl MediaSynchronizer {
    pub fn new(backend: Arc<dyn MediaBackend>, cue_poll: Duration) -> Self {
        Self {
            backend,
            resources: Mutex::new(HashMap::new()),
            foreground: Mutex::new(None),
            blocked: Mutex::new(None),
            cue_poll: cue_poll.max(Duration::from_millis(1)),
            hook: Mutex::new(None),
            halted: broadcast::channel(64).0,
        }
    }

    pub fn set_notice_hook(&self, hook: NoticeHook) {
        *lock(&self.hook) = Some(hook);
    }

    fn notify(&self, notice: MediaNotice) {
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            (*hook)(notice);
        }
    }

    fn halt(&self, id: &ResourceId) {
        // No receiver just means no chain is waiting on anything.
        let _ = self.halted.send(id.clone());
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Register resources with the backend. Already known resources keep
    /// their warm state.
    pub fn load(&self, specs: &[MediaResourceSpec]) {
        let mut resources = lock(&self.resources);
        for spec in specs {
            self.backend.prepare(spec);
            resources
                .entry(spec.id.clone())
                .or_insert_with(|| MediaResource::new(spec.clone()));
        }
    }

    pub fn resource(&self, id: &ResourceId) -> Option<MediaResource> {
        lock(&self.resources).get(id).cloned()
    }

    pub fn is_playing(&self, id: &ResourceId) -> bool {
        self.backend.is_playing(id)
    }

    pub fn position(&self, id: &ResourceId) -> Duration {
        self.backend.position(id)
    }

    pub fn foreground(&self) -> Option<ResourceId> {
        lock(&self.foreground).clone()
    }

    /// The resource waiting for an unblocking gesture, if any.
    pub fn blocked_resource(&self) -> Option<ResourceId> {
        lock(&self.blocked).clone()
    }

    /// Start or resume `id` as the audible foreground. Non-blocking.
    pub fn play(&self, id: &ResourceId) -> PlayOutcome {
        let previous = lock(&self.foreground).replace(id.clone());
        if let Some(previous) = previous.filter(|p| p != id) {
            if self.backend.is_playing(&previous) {
                self.backend.pause(&previous);
            }
            self.halt(&previous);
        }

        match self.backend.play(id) {
            Ok(()) => {
                if let Some(resource) = lock(&self.resources).get_mut(id) {
                    resource.record_start();
                }
                // A new foreground makes any other pending retry obsolete.
                let pending = lock(&self.blocked).take();
                match pending {
                    Some(pending) if &pending == id => {
                        self.notify(MediaNotice::Unblocked(pending));
                    }
                    Some(pending) => self.notify(MediaNotice::BlockDismissed(pending)),
                    None => {}
                }
                self.notify(MediaNotice::Started(id.clone()));
                PlayOutcome::Started
            }
            Err(PlaybackError::Blocked { .. }) => {
                warn!(resource = %id, "playback blocked, waiting for user gesture");
                *lock(&self.blocked) = Some(id.clone());
                self.notify(MediaNotice::Blocked(id.clone()));
                PlayOutcome::Blocked
            }
            Err(e) => {
                warn!(resource = %id, error = %e, "playback failed");
                PlayOutcome::Failed
            }
        }
    }

    /// Retry the pending blocked resource (the unlock overlay was tapped).
    pub fn retry_blocked(&self) -> Option<PlayOutcome> {
        let pending = self.blocked_resource()?;
        Some(self.play(&pending))
    }

    pub fn pause(&self, id: &ResourceId) {
        self.backend.pause(id);
        self.halt(id);
    }

    /// Pause and rewind. A pending blocked retry of `id` is dropped.
    pub fn stop(&self, id: &ResourceId) {
        self.backend.pause(id);
        self.backend.set_position(id, Duration::ZERO);
        self.halt(id);
        {
            let mut foreground = lock(&self.foreground);
            if foreground.as_ref() == Some(id) {
                *foreground = None;
            }
        }
        let dismissed = {
            let mut blocked = lock(&self.blocked);
            if blocked.as_ref() == Some(id) {
                blocked.take()
            } else {
                None
            }
        };
        if let Some(dismissed) = dismissed {
            self.notify(MediaNotice::BlockDismissed(dismissed));
        }
    }

    /// Pause every known resource and forget any pending blocked retry.
    pub fn stop_all(&self) {
        let ids: Vec<ResourceId> = lock(&self.resources).keys().cloned().collect();
        for id in &ids {
            if self.backend.is_playing(id) {
                self.backend.pause(id);
            }
            self.halt(id);
        }
        *lock(&self.foreground) = None;
        let dismissed = lock(&self.blocked).take();
        if let Some(dismissed) = dismissed {
            self.notify(MediaNotice::BlockDismissed(dismissed));
        }
    }

    /// Play silently, pause, rewind and restore the audible volume so later
    /// programmatic starts are authorized. Never fails.
    pub fn warm_up(&self, id: &ResourceId) -> WarmUpOutcome {
        let volume = {
            let resources = lock(&self.resources);
            match resources.get(id) {
                Some(resource) if resource.is_warmed() => return WarmUpOutcome::AlreadyWarm,
                Some(resource) => resource.volume(),
                None => {
                    warn!(resource = %id, "warm-up requested for unknown resource");
                    return WarmUpOutcome::Refused;
                }
            }
        };
        if self.backend.is_playing(id) {
            return WarmUpOutcome::Skipped;
        }

        self.backend.set_volume(id, 0.0);
        let outcome = self.backend.play(id);
        if outcome.is_ok() {
            self.backend.pause(id);
            self.backend.set_position(id, Duration::ZERO);
        }
        self.backend.set_volume(id, volume);

        match outcome {
            Ok(()) => {
                if let Some(resource) = lock(&self.resources).get_mut(id) {
                    resource.mark_warmed();
                }
                debug!(resource = %id, "warmed");
                self.notify(MediaNotice::Warmed(id.clone()));
                WarmUpOutcome::Warmed
            }
            Err(e) => {
                warn!(resource = %id, error = %e, "warm-up refused");
                self.notify(MediaNotice::WarmUpRefused(id.clone()));
                WarmUpOutcome::Refused
            }
        }
    }

    pub fn warm_up_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a ResourceId>,
    ) -> Vec<(ResourceId, WarmUpOutcome)> {
        ids.into_iter()
            .map(|id| (id.clone(), self.warm_up(id)))
            .collect()
    }

    /// When `from` completes naturally, wait `gap` and start `to`.
    ///
    /// One listener per call. If `from` is stopped, paused or replaced in
    /// the foreground first, the chain is dropped and `to` never starts.
    /// Backend pauses issued by a warm-up do not count. The listener
    /// belongs to `scope`.
    pub fn chain(
        self: &Arc<Self>,
        from: &ResourceId,
        to: &ResourceId,
        gap: Duration,
        scope: &TeardownScope,
    ) -> CancelToken {
        // Subscribe before spawning so a fast completion is not missed.
        let mut events = self.backend.subscribe();
        let mut halted = self.halted.subscribe();
        let sync = Arc::clone(self);
        let from = from.clone();
        let to = to.clone();
        scope.spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(MediaEvent::Ended { resource }) if resource == from => break,
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    },
                    halt = halted.recv() => match halt {
                        Ok(resource) if resource == from => {
                            debug!(from = %from, to = %to, "chain dropped, source stopped early");
                            return;
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    },
                }
            }
            tokio::time::sleep(gap).await;
            sync.play(&to);
        })
    }

    /// Suspend until `id` completes naturally.
    pub async fn wait_ended(&self, id: &ResourceId, scope: &TeardownScope) -> Result<(), Cancelled> {
        let mut events = self.backend.subscribe();
        if self.backend.has_ended(id) {
            return Ok(());
        }
        loop {
            let event = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(Cancelled),
                event = events.recv() => event,
            };
            match event {
                Ok(MediaEvent::Ended { resource }) if &resource == id => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if self.backend.has_ended(id) {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => return Err(Cancelled),
            }
        }
    }

    /// Arm a cue trigger that runs `on_fire` the first time `id` plays at or
    /// past `at`. The poll loop belongs to `scope`.
    pub fn arm_cue<F>(
        self: &Arc<Self>,
        id: &ResourceId,
        at: Duration,
        scope: &TeardownScope,
        on_fire: F,
    ) -> Arc<CueTrigger>
    where
        F: FnOnce() + Send + 'static,
    {
        let trigger = Arc::new(CueTrigger::new(id.clone(), at, scope.new_token()));
        let sync = Arc::clone(self);
        let polled = Arc::clone(&trigger);
        let scope_token = scope.token().clone();
        scope.spawn(async move {
            if sync.poll_cue(&polled, &scope_token).await.is_ok() {
                on_fire();
            }
        });
        trigger
    }

    /// Suspend until `id` plays at or past `at`.
    pub async fn wait_cue(
        &self,
        id: &ResourceId,
        at: Duration,
        scope: &TeardownScope,
    ) -> Result<(), Cancelled> {
        let trigger = CueTrigger::new(id.clone(), at, scope.new_token());
        self.poll_cue(&trigger, scope.token()).await
    }

    async fn poll_cue(&self, trigger: &CueTrigger, scope: &CancelToken) -> Result<(), Cancelled> {
        let mut ticker = tokio::time::interval(self.cue_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = trigger.token().cancelled() => return Err(Cancelled),
                _ = scope.cancelled() => return Err(Cancelled),
                _ = ticker.tick() => {}
            }
            let resource = trigger.resource();
            let position = self.backend.position(resource);
            if trigger.observe(position, self.backend.is_playing(resource)) {
                debug!(resource = %resource, ?position, "cue fired");
                self.notify(MediaNotice::CueFired {
                    resource: resource.clone(),
                    at: trigger.threshold(),
                });
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AutoplayPolicy, SimulatedBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn spec(id: &str, duration_ms: u64) -> MediaResourceSpec {
        MediaResourceSpec {
            id: id.into(),
            path: format!("/sounds/{id}.mp3"),
            looping: false,
            volume: 1.0,
            duration_ms: Some(duration_ms),
        }
    }

    fn setup(policy: AutoplayPolicy) -> (SimulatedBackend, Arc<MediaSynchronizer>) {
        let backend = SimulatedBackend::new(policy, Duration::from_secs(1));
        let sync = Arc::new(MediaSynchronizer::new(
            Arc::new(backend.clone()),
            Duration::from_millis(16),
        ));
        sync.load(&[spec("a", 1000), spec("b", 1000), spec("c", 3000)]);
        (backend, sync)
    }

    #[tokio::test(start_paused = true)]
    async fn chain_starts_successor_after_gap() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let (a, b) = (ResourceId::from("a"), ResourceId::from("b"));

        let started = Instant::now();
        assert_eq!(sync.play(&a), PlayOutcome::Started);
        sync.chain(&a, &b, Duration::from_millis(1000), &scope);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(!backend.is_playing(&b));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(backend.is_playing(&b));

        let b_start = backend
            .plays()
            .into_iter()
            .find(|p| p.resource == b)
            .map(|p| p.at)
            .unwrap();
        assert!(b_start >= started + Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn chain_dropped_when_source_stopped_early() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let (a, b) = (ResourceId::from("a"), ResourceId::from("b"));

        sync.play(&a);
        sync.chain(&a, &b, Duration::from_millis(100), &scope);
        tokio::time::sleep(Duration::from_millis(300)).await;
        sync.stop(&a);

        // Restart and let it finish: the dropped chain must not fire.
        sync.play(&a);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(backend.has_ended(&a));
        assert_eq!(backend.audible_plays(&b), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_dropped_when_source_leaves_foreground() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let (a, b, c) = (ResourceId::from("a"), ResourceId::from("b"), ResourceId::from("c"));

        sync.play(&a);
        sync.chain(&a, &b, Duration::ZERO, &scope);
        tokio::time::sleep(Duration::from_millis(200)).await;
        sync.play(&c);

        sync.play(&a);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(backend.has_ended(&a));
        assert_eq!(backend.audible_plays(&b), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_survives_silent_warm_up_of_source() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let (a, b) = (ResourceId::from("a"), ResourceId::from("b"));

        sync.chain(&a, &b, Duration::ZERO, &scope);
        assert_eq!(sync.warm_up(&a), WarmUpOutcome::Warmed);
        sync.play(&a);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(backend.audible_plays(&b), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_cancelled_with_scope() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let (a, b) = (ResourceId::from("a"), ResourceId::from("b"));
        sync.play(&a);
        sync.chain(&a, &b, Duration::ZERO, &scope);
        scope.close();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.audible_plays(&b), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_twice_leaves_resource_rewound_and_audible() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let b = ResourceId::from("b");

        assert_eq!(sync.warm_up(&b), WarmUpOutcome::Warmed);
        assert_eq!(sync.warm_up(&b), WarmUpOutcome::AlreadyWarm);

        assert!(!backend.is_playing(&b));
        assert_eq!(backend.position(&b), Duration::ZERO);
        assert_eq!(backend.volume(&b), Some(1.0));
        assert_eq!(backend.audible_plays(&b), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_authorizes_later_programmatic_play() {
        let (backend, sync) = setup(AutoplayPolicy::RequiresGesture);
        let b = ResourceId::from("b");

        backend.notify_user_gesture();
        assert_eq!(sync.warm_up(&b), WarmUpOutcome::Warmed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sync.play(&b), PlayOutcome::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_warm_up_is_not_fatal_and_falls_back_to_play() {
        let (backend, sync) = setup(AutoplayPolicy::RequiresGesture);
        let b = ResourceId::from("b");

        assert_eq!(sync.warm_up(&b), WarmUpOutcome::Refused);
        assert_eq!(backend.volume(&b), Some(1.0));
        assert!(!sync.resource(&b).unwrap().is_warmed());

        assert_eq!(sync.play(&b), PlayOutcome::Blocked);
        assert_eq!(sync.blocked_resource(), Some(b.clone()));

        backend.notify_user_gesture();
        assert_eq!(sync.retry_blocked(), Some(PlayOutcome::Started));
        assert_eq!(sync.blocked_resource(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_blocked_resource_drops_pending_retry() {
        let (_backend, sync) = setup(AutoplayPolicy::RequiresGesture);
        let a = ResourceId::from("a");
        let notices = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let notices = Arc::clone(&notices);
            sync.set_notice_hook(Arc::new(move |n: MediaNotice| {
                notices.lock().unwrap().push(n)
            }));
        }
        assert_eq!(sync.play(&a), PlayOutcome::Blocked);
        sync.stop(&a);
        assert_eq!(sync.blocked_resource(), None);
        assert_eq!(sync.retry_blocked(), None);
        assert_eq!(
            *notices.lock().unwrap(),
            vec![MediaNotice::Blocked(a.clone()), MediaNotice::BlockDismissed(a)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn starting_new_foreground_pauses_previous() {
        let (backend, sync) = setup(AutoplayPolicy::Allowed);
        let (a, c) = (ResourceId::from("a"), ResourceId::from("c"));
        sync.play(&c);
        sync.play(&a);
        assert!(!backend.is_playing(&c));
        assert!(backend.is_playing(&a));
        assert_eq!(sync.foreground(), Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn cue_fires_once_past_threshold() {
        let (_backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let c = ResourceId::from("c");
        let hits = Arc::new(AtomicUsize::new(0));

        sync.play(&c);
        let trigger = {
            let hits = Arc::clone(&hits);
            sync.arm_cue(&c, Duration::from_millis(1200), &scope, move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(trigger.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn cue_disarmed_on_scope_close() {
        let (_backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let c = ResourceId::from("c");
        let hits = Arc::new(AtomicUsize::new(0));

        sync.play(&c);
        let trigger = {
            let hits = Arc::clone(&hits);
            sync.arm_cue(&c, Duration::from_millis(1200), &scope, move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        scope.close();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!trigger.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ended_returns_after_natural_completion() {
        let (_backend, sync) = setup(AutoplayPolicy::Allowed);
        let scope = TeardownScope::new("stage");
        let a = ResourceId::from("a");
        let started = Instant::now();
        sync.play(&a);
        sync.wait_ended(&a, &scope).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));

        // Already ended: resolves immediately.
        sync.wait_ended(&a, &scope).await.unwrap();
    }
}
