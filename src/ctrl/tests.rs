//! Controller integration tests.
//!
//! These drive whole signal flows through the hub against recording fakes:
//! no network, no real provider, and the fake clone-url call fails so no git
//! subprocess is ever spawned. Time-sensitive flows run under the paused
//! clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::hub::Hub;
use super::queue::{PrProcessor, ProcessError};
use super::signal::{BranchSignal, QueueSignal, RepoSignal};
use super::snapshot::{self, QueueSnapshot, SCHEMA_VERSION};
use crate::config::Config;
use crate::io::{
    IoError, IoResult, LinesExceedMessage, MergeConflictMessage, MessageIo, RepoIo, Registry,
    StaleBranchMessage,
};
use crate::queue::QueueMember;
use crate::types::{
    Changes, CreateOrDeleteEvent, MessageProvider, PrNumber, ProviderInfo, PullRequestAction,
    PullRequestDescriptor, PullRequestEvent, PushEvent, Repo, RepoProvider, RepoUuid, Sha,
    UserIdentity,
};

fn test_repo() -> Repo {
    Repo {
        id: RepoUuid::new("repo-1"),
        provider: RepoProvider::Github,
        provider_id: "1001".into(),
        default_branch: "main".into(),
        threshold: 100,
        message_provider: MessageProvider::Slack,
        stale_duration: Duration::from_secs(3600),
    }
}

fn test_info() -> ProviderInfo {
    ProviderInfo {
        name: "warden".into(),
        owner: "acme".into(),
        default_branch: "main".into(),
        provider_id: "1001".into(),
        installation_id: 55,
    }
}

fn push_to(repo: &Repo, branch: &str, user: Option<UserIdentity>) -> PushEvent {
    PushEvent {
        branch_ref: format!("refs/heads/{branch}"),
        before: Sha::new("1111111111111111111111111111111111111111"),
        after: Sha::new("2222222222222222222222222222222222222222"),
        repo_name: "warden".into(),
        repo_owner: "acme".into(),
        ctrl_id: repo.id.to_string(),
        installation_id: 55,
        provider_id: "1001".into(),
        commits: vec![],
        author: "dev".into(),
        user,
    }
}

fn pr(number: u64) -> PullRequestDescriptor {
    PullRequestDescriptor {
        number: PrNumber(number),
        head_branch: format!("feature-{number}"),
        base_branch: "main".into(),
    }
}

/// Repo capability fake; records call counts and never hands out a usable
/// clone URL, so the rebase flow stops before touching git.
struct FakeRepoIo {
    info: ProviderInfo,
    branches: Vec<String>,
    changes: Changes,
    info_calls: AtomicUsize,
    changes_calls: AtomicUsize,
    clone_url_calls: AtomicUsize,
}

impl FakeRepoIo {
    fn new(branches: Vec<String>, delta: i64) -> Self {
        FakeRepoIo {
            info: test_info(),
            branches,
            changes: Changes {
                added: delta,
                removed: 0,
                modified: vec!["src/main.rs".into()],
                delta,
                compare_url: "https://example.test/compare".into(),
            },
            info_calls: AtomicUsize::new(0),
            changes_calls: AtomicUsize::new(0),
            clone_url_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RepoIo for FakeRepoIo {
    async fn get_provider_info(&self, _ctrl_id: &RepoUuid) -> IoResult<ProviderInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.info.clone())
    }

    async fn get_all_branches(&self, _info: &ProviderInfo) -> IoResult<Vec<String>> {
        Ok(self.branches.clone())
    }

    async fn detect_changes(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
        _default_branch: &str,
        _target_branch: &str,
    ) -> IoResult<Changes> {
        self.changes_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.changes.clone())
    }

    async fn tokenized_clone_url(&self, _info: &ProviderInfo) -> IoResult<String> {
        self.clone_url_calls.fetch_add(1, Ordering::SeqCst);
        Err(IoError::Permanent("no token in tests".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Lines(LinesExceedMessage),
    Conflict(MergeConflictMessage),
    Stale(StaleBranchMessage),
}

#[derive(Default)]
struct FakeMessageIo {
    sent: Mutex<Vec<Sent>>,
}

impl FakeMessageIo {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl MessageIo for FakeMessageIo {
    async fn send_lines_exceed(&self, msg: LinesExceedMessage) -> IoResult<()> {
        self.sent.lock().expect("sent lock").push(Sent::Lines(msg));
        Ok(())
    }

    async fn send_merge_conflict(&self, msg: MergeConflictMessage) -> IoResult<()> {
        self.sent.lock().expect("sent lock").push(Sent::Conflict(msg));
        Ok(())
    }

    async fn send_stale_branch(&self, msg: StaleBranchMessage) -> IoResult<()> {
        self.sent.lock().expect("sent lock").push(Sent::Stale(msg));
        Ok(())
    }
}

/// Processor that records admissions in order; optionally fails everything.
#[derive(Default)]
struct RecordingProcessor {
    order: Mutex<Vec<u64>>,
    fail: bool,
}

impl RecordingProcessor {
    fn failing() -> Self {
        RecordingProcessor {
            order: Mutex::new(vec![]),
            fail: true,
        }
    }

    fn order(&self) -> Vec<u64> {
        self.order.lock().expect("order lock").clone()
    }
}

#[async_trait]
impl PrProcessor for RecordingProcessor {
    async fn process(
        &self,
        _repo: &Repo,
        _branch: &str,
        pr: &PullRequestDescriptor,
    ) -> Result<(), ProcessError> {
        self.order.lock().expect("order lock").push(pr.number.0);
        if self.fail {
            Err(ProcessError::new("checks failed"))
        } else {
            Ok(())
        }
    }
}

/// Like [`RecordingProcessor`] but each admission blocks on a semaphore
/// permit, so a test can queue more PRs while one is mid-process.
struct GatedProcessor {
    order: Mutex<Vec<u64>>,
    gate: tokio::sync::Semaphore,
}

impl GatedProcessor {
    fn new() -> Self {
        GatedProcessor {
            order: Mutex::new(vec![]),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    fn order(&self) -> Vec<u64> {
        self.order.lock().expect("order lock").clone()
    }
}

#[async_trait]
impl PrProcessor for GatedProcessor {
    async fn process(
        &self,
        _repo: &Repo,
        _branch: &str,
        pr: &PullRequestDescriptor,
    ) -> Result<(), ProcessError> {
        self.order.lock().expect("order lock").push(pr.number.0);
        let permit = self.gate.acquire().await.map_err(|_| ProcessError::new("gate closed"))?;
        permit.forget();
        Ok(())
    }
}

struct Harness {
    hub: Arc<Hub>,
    repo: Repo,
    repo_io: Arc<FakeRepoIo>,
    messages: Arc<FakeMessageIo>,
    _data_dir: tempfile::TempDir,
}

fn harness(repo_io: FakeRepoIo, processor: Arc<dyn PrProcessor>) -> Harness {
    let data_dir = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.data_dir = data_dir.path().to_path_buf();
    config.max_process_attempts = 2;

    let repo_io = Arc::new(repo_io);
    let messages = Arc::new(FakeMessageIo::default());

    let registry = Registry::new()
        .with_repo_io(RepoProvider::Github, repo_io.clone())
        .with_message_io(MessageProvider::Slack, messages.clone());

    Harness {
        hub: Hub::new(Arc::new(registry), Arc::new(config), processor),
        repo: test_repo(),
        repo_io,
        messages,
        _data_dir: data_dir,
    }
}

/// Polls `cond` until it holds; panics after five (virtual) seconds.
async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn push_over_threshold_warns_the_pusher() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 150),
        Arc::new(RecordingProcessor::default()),
    );

    let user = UserIdentity {
        login: "dev".into(),
        message_user_id: "U123".into(),
    };
    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", Some(user))),
    );

    wait_for(|| !h.messages.sent().is_empty()).await;

    let sent = h.messages.sent();
    let Sent::Lines(msg) = &sent[0] else {
        panic!("expected a lines-exceed warning, got {:?}", sent[0]);
    };
    assert_eq!(msg.delta, 150);
    assert_eq!(msg.threshold, 100);
    assert_eq!(msg.branch, "feature-x");
    // A linked identity means the warning goes to the user, not the channel.
    assert!(!msg.is_channel());
}

#[tokio::test(start_paused = true)]
async fn push_over_threshold_without_identity_warns_the_channel() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 150),
        Arc::new(RecordingProcessor::default()),
    );

    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", None)),
    );

    wait_for(|| !h.messages.sent().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Exactly one warning, addressed to the repository channel.
    let sent = h.messages.sent();
    assert_eq!(sent.len(), 1);
    let Sent::Lines(msg) = &sent[0] else {
        panic!("expected a lines-exceed warning, got {:?}", sent[0]);
    };
    assert_eq!(msg.delta, 150);
    assert!(msg.is_channel());
}

#[tokio::test(start_paused = true)]
async fn push_below_threshold_sends_no_warning() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 50),
        Arc::new(RecordingProcessor::default()),
    );

    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", None)),
    );

    wait_for(|| h.repo_io.changes_calls.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.messages.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn trunk_push_fans_out_rebase_requests() {
    let h = harness(
        FakeRepoIo::new(
            vec!["feature-a".into(), "feature-b".into(), "feature-c".into()],
            0,
        ),
        Arc::new(RecordingProcessor::default()),
    );

    // Start the trunk controller first so its roster is loaded before the
    // push arrives.
    h.hub.signal_repo(
        &h.repo,
        RepoSignal::CreateOrDelete(CreateOrDeleteEvent {
            is_created: true,
            r#ref: "feature-a".into(),
            ref_type: "branch".into(),
        }),
    );
    wait_for(|| h.hub.branch_ctrl_count() >= 1).await;

    h.hub
        .signal_repo(&h.repo, RepoSignal::Push(push_to(&h.repo, "main", None)));

    // Each rostered branch asks for a clone URL on its rebase attempt.
    wait_for(|| h.repo_io.clone_url_calls.load(Ordering::SeqCst) == 3).await;
    assert_eq!(h.hub.branch_ctrl_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn repeated_pushes_reuse_one_branch_controller() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 10),
        Arc::new(RecordingProcessor::default()),
    );

    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", None)),
    );
    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", None)),
    );

    wait_for(|| h.repo_io.changes_calls.load(Ordering::SeqCst) == 2).await;
    assert_eq!(h.hub.branch_ctrl_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn quiet_branch_warns_until_deleted() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 10),
        Arc::new(RecordingProcessor::default()),
    );

    h.hub.signal_branch(
        &h.repo,
        "feature-x",
        BranchSignal::CreateOrDelete(CreateOrDeleteEvent {
            is_created: true,
            r#ref: "feature-x".into(),
            ref_type: "branch".into(),
        }),
    );

    // One full stale interval with no pushes: exactly one warning.
    tokio::time::sleep(h.repo.stale_duration + Duration::from_secs(1)).await;
    let stale_count = |sent: &[Sent]| {
        sent.iter()
            .filter(|m| matches!(m, Sent::Stale(_)))
            .count()
    };
    wait_for(|| stale_count(&h.messages.sent()) == 1).await;

    let sent = h.messages.sent();
    let Some(Sent::Stale(msg)) = sent.iter().find(|m| matches!(m, Sent::Stale(_))) else {
        panic!("expected a stale warning");
    };
    assert_eq!(msg.provider, RepoProvider::Github);
    assert_eq!(msg.repo_name, "warden");
    assert_eq!(msg.repo_owner, "acme");
    assert_eq!(msg.branch, "feature-x");

    h.hub.signal_branch(
        &h.repo,
        "feature-x",
        BranchSignal::CreateOrDelete(CreateOrDeleteEvent {
            is_created: false,
            r#ref: "feature-x".into(),
            ref_type: "branch".into(),
        }),
    );
    wait_for(|| h.hub.branch_ctrl_count() == 0).await;

    // Two more intervals after deletion: no further warnings.
    tokio::time::sleep(h.repo.stale_duration * 2).await;
    assert_eq!(stale_count(&h.messages.sent()), 1);
}

#[tokio::test(start_paused = true)]
async fn signal_after_exit_starts_a_fresh_instance() {
    let h = harness(
        FakeRepoIo::new(vec!["feature-x".into()], 10),
        Arc::new(RecordingProcessor::default()),
    );

    let delete = CreateOrDeleteEvent {
        is_created: false,
        r#ref: "feature-x".into(),
        ref_type: "branch".into(),
    };
    h.hub
        .signal_branch(&h.repo, "feature-x", BranchSignal::CreateOrDelete(delete));
    wait_for(|| h.hub.branch_ctrl_count() == 0).await;

    // The key is now dead; the next push must get a replacement instance.
    h.hub.signal_repo(
        &h.repo,
        RepoSignal::Push(push_to(&h.repo, "feature-x", None)),
    );
    wait_for(|| h.repo_io.changes_calls.load(Ordering::SeqCst) == 1).await;
    assert_eq!(h.hub.branch_ctrl_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn labeled_pr_flows_into_the_merge_queue() {
    let processor = Arc::new(RecordingProcessor::default());
    let h = harness(FakeRepoIo::new(vec!["feature-7".into()], 10), processor.clone());

    h.hub.signal_repo(
        &h.repo,
        RepoSignal::PullRequest(PullRequestEvent {
            action: PullRequestAction::Labeled,
            number: 7,
            head_branch: "feature-7".into(),
            base_branch: "main".into(),
            label: Some("qmerge".into()),
        }),
    );

    wait_for(|| processor.order() == vec![7]).await;
}

#[tokio::test(start_paused = true)]
async fn priority_additions_jump_ahead_of_primary() {
    let processor = Arc::new(GatedProcessor::new());
    let h = harness(FakeRepoIo::new(vec![], 10), processor.clone());

    h.hub
        .signal_queue(&h.repo, "main", QueueSignal::Add(pr(1)));
    wait_for(|| processor.order() == vec![1]).await;

    // While #1 is mid-process, queue a primary and a priority PR.
    h.hub
        .signal_queue(&h.repo, "main", QueueSignal::Add(pr(2)));
    h.hub
        .signal_queue(&h.repo, "main", QueueSignal::AddPriority(pr(9)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    processor.gate.add_permits(3);

    wait_for(|| processor.order() == vec![1, 9, 2]).await;
}

#[tokio::test(start_paused = true)]
async fn failing_pr_is_dead_lettered_after_max_attempts() {
    let processor = Arc::new(RecordingProcessor::failing());
    let h = harness(FakeRepoIo::new(vec![], 10), processor.clone());

    h.hub
        .signal_queue(&h.repo, "main", QueueSignal::Add(pr(3)));

    // max_process_attempts is 2 in the harness.
    wait_for(|| processor.order() == vec![3, 3]).await;

    h.hub.shutdown();

    let path = snapshot::snapshot_path(
        &h.hub.config().snapshots_dir(),
        h.repo.id.as_str(),
        "main",
    );
    // Generous virtual budget: the write happens on a blocking thread that
    // the paused clock does not wait for.
    let snap = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if let Ok(Some(snap)) = snapshot::load(&path).await {
                break snap;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("final snapshot not written");

    assert_eq!(snap.dead, vec![pr(3)]);
    assert!(snap.primary.is_empty());
    assert!(snap.priority.is_empty());
}

#[tokio::test(start_paused = true)]
async fn queue_resumes_from_snapshot() {
    let processor = Arc::new(RecordingProcessor::default());
    let h = harness(FakeRepoIo::new(vec![], 10), processor.clone());

    let path = snapshot::snapshot_path(
        &h.hub.config().snapshots_dir(),
        h.repo.id.as_str(),
        "main",
    );
    snapshot::save(
        &path,
        &QueueSnapshot {
            schema_version: SCHEMA_VERSION,
            taken_at: chrono::Utc::now(),
            priority: vec![],
            primary: vec![QueueMember {
                pr: pr(5),
                position: 1,
            }],
            attempts: vec![],
            dead: vec![],
        },
    )
    .await
    .expect("seed snapshot");

    // Any signal starts the controller; the seeded PR must drain first.
    h.hub
        .signal_queue(&h.repo, "main", QueueSignal::Add(pr(6)));

    wait_for(|| processor.order() == vec![5, 6]).await;
}
