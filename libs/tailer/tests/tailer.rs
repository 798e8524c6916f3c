use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use storage_memory::{MemoryCheckpointStore, MemoryStore};
use storetail_api::util::{checkpoint_position, position_checkpoint};
use storetail_api::{
    ChangeEnvelope, ChangeFilter, ChangeStream, Checkpoint, CheckpointStore, MutationEvent,
    MutationLog, Record, RecordId, RecordStore, StoreError,
};
use storetail_tailer::{
    ChannelNotifier, CompletionHandler, EventTailer, RecordCompleted, StartPolicy, TailerConfig,
    TailerError,
};

// ═══════════════════════════════════════════════════════════════
//  Harness
// ═══════════════════════════════════════════════════════════════

fn fast_config(start: StartPolicy) -> TailerConfig {
    TailerConfig {
        start,
        retry_initial_ms: 1,
        retry_max_ms: 5,
        max_retries: None,
    }
}

struct Running {
    tailer: Arc<EventTailer>,
    token: CancellationToken,
    handle: JoinHandle<Result<(), TailerError>>,
}

impl Running {
    async fn stop(self) -> Result<(), TailerError> {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("tailer stops in time")
            .expect("tailer task")
    }
}

fn spawn_tailer(
    log: Arc<dyn MutationLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    handler: Arc<dyn CompletionHandler>,
    config: TailerConfig,
) -> Running {
    let tailer = Arc::new(EventTailer::new(log, checkpoints, handler, config));
    let token = CancellationToken::new();
    let handle = {
        let tailer = tailer.clone();
        let token = token.clone();
        tokio::spawn(async move { tailer.run(token).await })
    };
    Running { tailer, token, handle }
}

async fn recv(rx: &mut mpsc::Receiver<RecordCompleted>) -> RecordCompleted {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("completion in time")
        .expect("channel open")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<RecordCompleted>) {
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

/// Дождаться, пока tailer сохранит `expected`.
async fn wait_for_checkpoint(store: &MemoryCheckpointStore, expected: &Checkpoint) {
    for _ in 0..200 {
        if store.load().await.unwrap().as_ref() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("checkpoint {expected} was not persisted");
}

/// Дождаться, пока tailer подпишется (Latest берёт head при старте).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

async fn complete(store: &MemoryStore, created_at_ms: i64, stored_at_ms: i64) -> RecordId {
    let id = RecordId::generate();
    store.insert(Record::new(id, created_at_ms)).await.unwrap();
    store.update_stored_at(id, stored_at_ms).await.unwrap();
    id
}

// ═══════════════════════════════════════════════════════════════
//  Delivery
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn only_stored_updates_reach_the_handler() {
    let store = MemoryStore::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let running = spawn_tailer(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;

    let id = RecordId::generate();
    store.insert(Record::new(id, 1_000)).await.unwrap();
    store.append_event(MutationEvent::update(id, &["size"])).await;
    store.update_stored_at(id, 2_000).await.unwrap();
    store.delete_by_id(id).await.unwrap();

    let got = recv(&mut rx).await;
    assert_eq!(got.record_id, id);
    assert_quiet(&mut rx).await;

    wait_for_checkpoint(&checkpoints, &got.checkpoint).await;
    let tailer = running.tailer.clone();
    assert!(running.stop().await.unwrap_err().is_cancelled());
    assert_eq!(tailer.stats().events_processed(), 1);
    assert_eq!(tailer.stats().events_skipped(), 0);
}

/// Лог без серверной фильтрации по полю: отдаёт все update'ы.
struct CoarseLog(MemoryStore);

impl MutationLog for CoarseLog {
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>> {
        let coarse = ChangeFilter { kind: filter.kind, required_field: None };
        let resume_after = resume_after.cloned();
        Box::pin(async move { self.0.subscribe(&coarse, resume_after.as_ref()).await })
    }

    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        self.0.head()
    }
}

#[tokio::test]
async fn client_side_filter_skips_without_persisting() {
    let store = MemoryStore::new();
    let id = RecordId::generate();
    store.insert(Record::new(id, 1)).await.unwrap();
    store.append_event(MutationEvent::update(id, &["size"])).await;
    store.append_event(MutationEvent::update(id, &["owner"])).await;

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let running = spawn_tailer(
        Arc::new(CoarseLog(store.clone())),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Earliest),
    );
    assert_quiet(&mut rx).await;
    assert!(checkpoints.load().await.unwrap().is_none());

    store.update_stored_at(id, 2).await.unwrap();
    let got = recv(&mut rx).await;
    assert_eq!(got.record_id, id);
    wait_for_checkpoint(&checkpoints, &got.checkpoint).await;

    let tailer = running.tailer.clone();
    running.stop().await.unwrap_err();
    assert_eq!(tailer.stats().events_skipped(), 2);
    assert_eq!(tailer.stats().events_processed(), 1);
    assert_eq!(checkpoints.history().await.len(), 1);
}

#[tokio::test]
async fn end_to_end_single_completion() {
    let store = MemoryStore::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let running = spawn_tailer(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;

    let t0 = 1_700_000_000_000;
    let id = complete(&store, t0, t0 + 10_000).await;

    let got = recv(&mut rx).await;
    assert_eq!(got.record_id, id);
    assert_quiet(&mut rx).await;
    wait_for_checkpoint(&checkpoints, &got.checkpoint).await;

    let head = store.head().await.unwrap().unwrap();
    let saved = checkpoints.load().await.unwrap().unwrap();
    assert!(checkpoint_position(&saved).unwrap() <= checkpoint_position(&head).unwrap());
    assert_eq!(saved, got.checkpoint);
    running.stop().await.unwrap_err();
}

#[tokio::test]
async fn checkpoints_are_monotonic() {
    let store = MemoryStore::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(64);
    let running = spawn_tailer(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;

    let mut last = None;
    for i in 0..10 {
        complete(&store, i, i + 1).await;
    }
    for _ in 0..10 {
        last = Some(recv(&mut rx).await.checkpoint);
    }
    let last = last.unwrap();
    wait_for_checkpoint(&checkpoints, &last).await;
    running.stop().await.unwrap_err();

    let positions: Vec<u64> = checkpoints
        .history()
        .await
        .iter()
        .map(|cp| checkpoint_position(cp).unwrap())
        .collect();
    assert_eq!(positions.len(), 10);
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn latest_ignores_history_and_earliest_replays_it() {
    let store = MemoryStore::new();
    let old = complete(&store, 1, 2).await;

    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let latest = spawn_tailer(
        Arc::new(store.clone()),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;
    let fresh = complete(&store, 3, 4).await;
    assert_eq!(recv(&mut rx).await.record_id, fresh);
    assert_quiet(&mut rx).await;
    latest.stop().await.unwrap_err();

    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let earliest = spawn_tailer(
        Arc::new(store.clone()),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(notifier),
        fast_config(StartPolicy::Earliest),
    );
    assert_eq!(recv(&mut rx).await.record_id, old);
    assert_eq!(recv(&mut rx).await.record_id, fresh);
    earliest.stop().await.unwrap_err();
}

#[tokio::test]
async fn restart_resumes_after_persisted_checkpoint() {
    let store = MemoryStore::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let first = spawn_tailer(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;
    let a = complete(&store, 1, 2).await;
    let got = recv(&mut rx).await;
    assert_eq!(got.record_id, a);
    wait_for_checkpoint(&checkpoints, &got.checkpoint).await;
    first.stop().await.unwrap_err();

    // Пока tailer лежит.
    let b = complete(&store, 3, 4).await;

    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let second = spawn_tailer(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    assert_eq!(recv(&mut rx).await.record_id, b);
    assert_quiet(&mut rx).await;
    second.stop().await.unwrap_err();
}

/// Handler, который помнит множество завершённых id и число вызовов.
#[derive(Default)]
struct SetHandler {
    seen: Mutex<HashSet<RecordId>>,
    calls: AtomicU32,
}

impl CompletionHandler for SetHandler {
    fn on_completed(&self, event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().insert(event.record_id);
            Ok(())
        })
    }
}

#[tokio::test]
async fn replay_is_idempotent_for_a_keyed_handler() {
    let store = MemoryStore::new();
    let ids: HashSet<RecordId> = {
        let mut ids = HashSet::new();
        for i in 0..3 {
            ids.insert(complete(&store, i, i + 1).await);
        }
        ids
    };

    let handler = Arc::new(SetHandler::default());
    for _ in 0..2 {
        // Потерянный checkpoint: каждый прогон начинает заново.
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let running = spawn_tailer(
            Arc::new(store.clone()),
            checkpoints.clone(),
            handler.clone(),
            fast_config(StartPolicy::Earliest),
        );
        let head = store.head().await.unwrap().unwrap();
        wait_for_checkpoint(&checkpoints, &head).await;
        running.stop().await.unwrap_err();
    }

    assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
    assert_eq!(*handler.seen.lock().unwrap(), ids);
}

// ═══════════════════════════════════════════════════════════════
//  Failures
// ═══════════════════════════════════════════════════════════════

/// Лог, который первые `fail_subscribes` подписок отвергает,
/// а каждый открытый поток обрывает после `events_per_stream` событий.
struct FlakyLog {
    inner: MemoryStore,
    fail_subscribes: AtomicU32,
    events_per_stream: u32,
    subscribes: AtomicU32,
}

/// Отдаёт `remaining` событий, затем `failure`.
struct FlakyStream {
    inner: Box<dyn ChangeStream>,
    remaining: u32,
    failure: StoreError,
}

impl ChangeStream for FlakyStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<ChangeEnvelope, StoreError>>> + Send + '_>> {
        Box::pin(async move {
            if self.remaining == 0 {
                return Some(Err(self.failure.clone()));
            }
            self.remaining -= 1;
            self.inner.next().await
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.inner.close()
    }
}

impl MutationLog for FlakyLog {
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>> {
        let filter = filter.clone();
        let resume_after = resume_after.cloned();
        Box::pin(async move {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let left = self.fail_subscribes.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_subscribes.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::io("log unavailable"));
            }
            let inner = self.inner.subscribe(&filter, resume_after.as_ref()).await?;
            Ok(Box::new(FlakyStream {
                inner,
                remaining: self.events_per_stream,
                failure: StoreError::io("connection reset"),
            }) as Box<dyn ChangeStream>)
        })
    }

    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        self.inner.head()
    }
}

#[tokio::test]
async fn transient_failures_resubscribe_without_losing_events() {
    let store = MemoryStore::new();
    let mut expected = Vec::new();
    for i in 0..5 {
        expected.push(complete(&store, i, i + 1).await);
    }

    let log = Arc::new(FlakyLog {
        inner: store.clone(),
        fail_subscribes: AtomicU32::new(2),
        events_per_stream: 2,
        subscribes: AtomicU32::new(0),
    });
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let running = spawn_tailer(
        log.clone(),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Earliest),
    );

    let mut got = Vec::new();
    for _ in 0..5 {
        got.push(recv(&mut rx).await.record_id);
    }
    assert_eq!(got, expected);
    assert_quiet(&mut rx).await;

    assert!(running.tailer.stats().resubscriptions() >= 2);
    assert!(log.subscribes.load(Ordering::SeqCst) >= 5);
    running.stop().await.unwrap_err();
}

#[tokio::test]
async fn retry_limit_turns_into_subscription_error() {
    let log = Arc::new(FlakyLog {
        inner: MemoryStore::new(),
        fail_subscribes: AtomicU32::new(u32::MAX),
        events_per_stream: 1,
        subscribes: AtomicU32::new(0),
    });
    let config = TailerConfig { max_retries: Some(3), ..fast_config(StartPolicy::Earliest) };
    let (notifier, _rx) = ChannelNotifier::channel(1);
    let tailer = EventTailer::new(log.clone(), Arc::new(MemoryCheckpointStore::new()), Arc::new(notifier), config);

    let err = tailer.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TailerError::Subscription(_)));
    assert_eq!(log.subscribes.load(Ordering::SeqCst), 4);
}

struct FailingHandler;

impl CompletionHandler for FailingHandler {
    fn on_completed(&self, _event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Err(StoreError::io("downstream unavailable")) })
    }
}

#[tokio::test]
async fn handler_failure_does_not_advance_checkpoint() {
    let store = MemoryStore::new();
    let id = complete(&store, 1, 2).await;
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let tailer = EventTailer::new(
        Arc::new(store.clone()),
        checkpoints.clone(),
        Arc::new(FailingHandler),
        fast_config(StartPolicy::Earliest),
    );

    let err = tokio::time::timeout(Duration::from_secs(2), tailer.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        TailerError::Handler { record_id, .. } => assert_eq!(record_id, id),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(checkpoints.load().await.unwrap().is_none());
    assert!(checkpoints.history().await.is_empty());
}

#[tokio::test]
async fn cancellation_while_idle_returns_cancelled() {
    let (notifier, _rx) = ChannelNotifier::channel(1);
    let running = spawn_tailer(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );
    settle().await;
    let err = running.stop().await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn nil_record_id_is_malformed() {
    let store = MemoryStore::new();
    store.append_event(MutationEvent::stored(RecordId::nil())).await;
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, _rx) = ChannelNotifier::channel(1);
    let tailer = EventTailer::new(
        Arc::new(store),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Earliest),
    );

    let err = tailer.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TailerError::MalformedEvent { .. }));
    assert!(checkpoints.load().await.unwrap().is_none());
}

#[tokio::test]
async fn expired_checkpoint_is_fatal() {
    let store = MemoryStore::with_log_retention(2);
    for i in 0..3 {
        complete(&store, i, i + 1).await;
    }
    // Лог хранит seq 5..6, а сохранён seq 1.
    let checkpoints = Arc::new(MemoryCheckpointStore::with_checkpoint(position_checkpoint(1)));
    let (notifier, _rx) = ChannelNotifier::channel(1);
    let tailer = EventTailer::new(
        Arc::new(store),
        checkpoints,
        Arc::new(notifier),
        fast_config(StartPolicy::Latest),
    );

    let err = tailer.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TailerError::CheckpointExpired(_)));
}

/// Лог, у которого после `good` событий попадается битая строка.
struct CorruptLog {
    inner: MemoryStore,
    good: u32,
    subscribes: AtomicU32,
}

impl MutationLog for CorruptLog {
    fn subscribe(
        &self,
        filter: &ChangeFilter,
        resume_after: Option<&Checkpoint>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, StoreError>> + Send + '_>> {
        let filter = filter.clone();
        let resume_after = resume_after.cloned();
        Box::pin(async move {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.subscribe(&filter, resume_after.as_ref()).await?;
            Ok(Box::new(FlakyStream {
                inner,
                remaining: self.good,
                failure: StoreError::format_err("truncated oplog line"),
            }) as Box<dyn ChangeStream>)
        })
    }

    fn head(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        self.inner.head()
    }
}

#[tokio::test]
async fn format_error_in_stream_is_malformed_and_not_retried() {
    let store = MemoryStore::new();
    let first = complete(&store, 1, 2).await;
    complete(&store, 3, 4).await;

    let log = Arc::new(CorruptLog { inner: store, good: 1, subscribes: AtomicU32::new(0) });
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let tailer = EventTailer::new(log.clone(), checkpoints.clone(), Arc::new(notifier), fast_config(StartPolicy::Earliest));

    let err = tokio::time::timeout(Duration::from_secs(2), tailer.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TailerError::MalformedEvent { .. }));
    assert_eq!(log.subscribes.load(Ordering::SeqCst), 1);

    let delivered = rx.try_recv().unwrap();
    assert_eq!(delivered.record_id, first);
    assert!(rx.try_recv().is_err());
    assert_eq!(checkpoints.load().await.unwrap(), Some(delivered.checkpoint));
}

/// Checkpoint store, у которого `save` всегда падает.
struct FailingCheckpoints {
    saves: AtomicU32,
}

impl CheckpointStore for FailingCheckpoints {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, StoreError>> + Send + '_>> {
        Box::pin(async { Ok(None) })
    }

    fn save(&self, _checkpoint: &Checkpoint) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::io("no space left on device"))
        })
    }
}

#[tokio::test]
async fn failed_checkpoint_save_stops_before_next_event() {
    let store = MemoryStore::new();
    let first = complete(&store, 1, 2).await;
    complete(&store, 3, 4).await;

    let checkpoints = Arc::new(FailingCheckpoints { saves: AtomicU32::new(0) });
    let (notifier, mut rx) = ChannelNotifier::channel(16);
    let tailer = EventTailer::new(
        Arc::new(store),
        checkpoints.clone(),
        Arc::new(notifier),
        fast_config(StartPolicy::Earliest),
    );

    let err = tokio::time::timeout(Duration::from_secs(2), tailer.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TailerError::Persistence(_)));
    assert_eq!(checkpoints.saves.load(Ordering::SeqCst), 1);

    assert_eq!(rx.try_recv().unwrap().record_id, first);
    assert!(rx.try_recv().is_err());
    assert_eq!(tailer.stats().events_processed(), 0);
}

/// Получатель, который принимает событие и больше не отвечает.
struct StuckHandler {
    entered: AtomicBool,
}

impl CompletionHandler for StuckHandler {
    fn on_completed(&self, _event: RecordCompleted) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.entered.store(true, Ordering::SeqCst);
            std::future::pending::<Result<(), StoreError>>().await
        })
    }
}

#[tokio::test]
async fn cancellation_interrupts_a_stuck_handler() {
    let store = MemoryStore::new();
    complete(&store, 1, 2).await;

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let handler = Arc::new(StuckHandler { entered: AtomicBool::new(false) });
    let running = spawn_tailer(
        Arc::new(store),
        checkpoints.clone(),
        handler.clone(),
        fast_config(StartPolicy::Earliest),
    );

    for _ in 0..200 {
        if handler.entered.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(handler.entered.load(Ordering::SeqCst));

    assert!(running.stop().await.unwrap_err().is_cancelled());
    assert!(checkpoints.history().await.is_empty());
}
