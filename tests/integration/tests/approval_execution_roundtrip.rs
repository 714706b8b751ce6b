use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dbgate_approval::{
    AuthorizationMatrix, Command, GatePolicy, MarkerState, MentionEvent, MessageSnapshot,
    Reaction, ReactionEvent, APPROVAL_SIGNAL, MARKER_IN_PROGRESS, MARKER_PENDING, MARKER_SUCCESS,
};
use dbgate_postgres::{
    DumpRunner, ExecutionError, QueryExecutor, QueryOutcome, ResultTable, TargetEnvironment,
};
use dbgate_slack_runtime::{
    spawn_execution_workers, ApprovalRuntime, ChatSurface, ExecutionDispatcher, ExecutionQueue,
    GateOutcome,
};
use tokio::sync::Mutex as AsyncMutex;

const BOT: &str = "UBOT";
const CHANNEL: &str = "C-OPS";
const TS: &str = "1700000000.000100";

#[derive(Default)]
struct RecordingChat {
    reactions: AsyncMutex<HashMap<String, Vec<Reaction>>>,
    messages: AsyncMutex<HashMap<String, MessageSnapshot>>,
    posts: AsyncMutex<Vec<String>>,
    uploads: AsyncMutex<Vec<(String, String, Vec<u8>)>>,
}

impl RecordingChat {
    async fn human_reacts(&self, user: &str, name: &str) {
        self.reactions
            .lock()
            .await
            .entry(TS.to_string())
            .or_default()
            .push(Reaction {
                name: name.to_string(),
                count: 1,
                users: vec![user.to_string()],
            });
    }

    async fn bot_markers(&self) -> Vec<String> {
        self.reactions
            .lock()
            .await
            .get(TS)
            .map(|reactions| {
                reactions
                    .iter()
                    .filter(|reaction| reaction.users.iter().any(|user| user == BOT))
                    .map(|reaction| reaction.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatSurface for RecordingChat {
    async fn add_marker(&self, _channel: &str, ts: &str, name: &str) -> Result<()> {
        let mut reactions = self.reactions.lock().await;
        let entry = reactions.entry(ts.to_string()).or_default();
        match entry.iter_mut().find(|reaction| reaction.name == name) {
            Some(reaction) => {
                reaction.count += 1;
                reaction.users.push(BOT.to_string());
            }
            None => entry.push(Reaction {
                name: name.to_string(),
                count: 1,
                users: vec![BOT.to_string()],
            }),
        }
        Ok(())
    }

    async fn remove_marker(&self, _channel: &str, ts: &str, name: &str) -> Result<()> {
        if let Some(reactions) = self.reactions.lock().await.get_mut(ts) {
            for reaction in reactions.iter_mut().filter(|reaction| reaction.name == name) {
                reaction.users.retain(|user| user != BOT);
                reaction.count = reaction.users.len() as u64;
            }
            reactions.retain(|reaction| reaction.count > 0);
        }
        Ok(())
    }

    async fn list_reactions(&self, _channel: &str, ts: &str) -> Result<Vec<Reaction>> {
        Ok(self
            .reactions
            .lock()
            .await
            .get(ts)
            .cloned()
            .unwrap_or_default())
    }

    async fn post_message(
        &self,
        _channel: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> Result<()> {
        self.posts.lock().await.push(text.to_string());
        Ok(())
    }

    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<MessageSnapshot>> {
        let message = self.messages.lock().await.get(ts).cloned();
        let reactions = self.list_reactions(channel, ts).await?;
        Ok(message.map(|mut message| {
            message.reactions = reactions;
            message
        }))
    }

    async fn open_direct_message(&self, user_id: &str) -> Result<String> {
        Ok(format!("D-{user_id}"))
    }

    async fn upload_file(&self, channel: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        self.uploads
            .lock()
            .await
            .push((channel.to_string(), filename.to_string(), bytes.to_vec()));
        Ok(())
    }
}

struct ScriptedExecutor {
    responses: AsyncMutex<VecDeque<QueryOutcome>>,
    environments: AsyncMutex<Vec<TargetEnvironment>>,
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        environment: TargetEnvironment,
        _resource: &str,
        _query: &str,
        _read_only: bool,
    ) -> Result<QueryOutcome, ExecutionError> {
        self.environments.lock().await.push(environment);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ExecutionError::Query {
                environment,
                message: "scripted executor exhausted".to_string(),
            })
    }
}

struct UnusedDumpRunner;

#[async_trait]
impl DumpRunner for UnusedDumpRunner {
    async fn dump(&self, resource: &str, _output_dir: &Path) -> Result<PathBuf, ExecutionError> {
        Err(ExecutionError::Dump {
            environment: TargetEnvironment::Production,
            resource: resource.to_string(),
            message: "not expected in this scenario".to_string(),
        })
    }
}

fn table(emails: &[&str]) -> ResultTable {
    ResultTable {
        columns: vec!["email".to_string()],
        rows: emails
            .iter()
            .map(|email| vec![Some(email.to_string())])
            .collect(),
    }
}

#[tokio::test]
async fn integration_read_request_runs_on_prod_after_approval() {
    let text = format!("<@{BOT}> need the signups\n&gt; PG_READ accounts:\n```SELECT email FROM users```");
    let chat = Arc::new(RecordingChat::default());
    chat.messages.lock().await.insert(
        TS.to_string(),
        MessageSnapshot {
            ts: TS.to_string(),
            user: Some("U-DEV".to_string()),
            bot_id: None,
            text: text.clone(),
            edited: false,
            reactions: Vec::new(),
        },
    );
    let executor = Arc::new(ScriptedExecutor {
        responses: AsyncMutex::new(VecDeque::from(vec![
            QueryOutcome::Rows(table(&["a@preprod.test"])),
            QueryOutcome::Rows(table(&["a@example.com", "b@example.com"])),
        ])),
        environments: AsyncMutex::new(Vec::new()),
    });
    let policy = Arc::new(GatePolicy::new(
        [CHANNEL],
        AuthorizationMatrix::new().with_approvers(Command::Read, ["U-LEAD"]),
    ));
    let (queue, receiver) = ExecutionQueue::bounded(4);
    let scratch = std::env::temp_dir();
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        chat.clone(),
        executor.clone(),
        Arc::new(UnusedDumpRunner),
        scratch,
        1024,
    ));
    let workers = spawn_execution_workers(dispatcher, receiver, 2);
    let runtime = ApprovalRuntime::new(
        policy,
        BOT.to_string(),
        chat.clone(),
        executor.clone(),
        queue,
    );

    let outcome = runtime
        .on_mention(&MentionEvent {
            channel_id: CHANNEL.to_string(),
            user_id: "U-DEV".to_string(),
            ts: TS.to_string(),
            text,
            edited: false,
            bot_id: None,
        })
        .await
        .expect("mention");
    assert_eq!(outcome, GateOutcome::AwaitingApproval(Command::Read));
    assert_eq!(chat.bot_markers().await, vec![MARKER_PENDING.to_string()]);

    chat.human_reacts("U-LEAD", APPROVAL_SIGNAL).await;
    let outcome = runtime
        .on_reaction(&ReactionEvent {
            channel_id: CHANNEL.to_string(),
            user_id: "U-LEAD".to_string(),
            reaction: APPROVAL_SIGNAL.to_string(),
            item_ts: TS.to_string(),
            item_user: Some("U-DEV".to_string()),
            bot_id: None,
        })
        .await
        .expect("reaction");
    assert_eq!(outcome, GateOutcome::Dispatched(Command::Read));

    for _ in 0..200 {
        if chat.posts.lock().await.iter().any(|post| post == "DONE!") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let posts = chat.posts.lock().await.clone();
    assert_eq!(posts.len(), 3, "posts: {posts:?}");
    assert!(posts[0].contains("Total rows: 1"));
    assert_eq!(
        posts[1],
        "I hear ya <@U-DEV>! Approved by <@U-LEAD>. Standby..."
    );
    assert_eq!(posts[2], "DONE!");
    assert_eq!(
        *executor.environments.lock().await,
        vec![
            TargetEnvironment::Preproduction,
            TargetEnvironment::Production
        ]
    );
    assert_eq!(
        *chat.uploads.lock().await,
        vec![(
            "D-U-DEV".to_string(),
            "accounts.csv".to_string(),
            b"email\na@example.com\nb@example.com".to_vec()
        )]
    );
    let markers = chat.bot_markers().await;
    assert_eq!(markers, vec![MARKER_SUCCESS.to_string()]);
    assert!(!markers.contains(&MARKER_IN_PROGRESS.to_string()));
    assert_eq!(
        MarkerState::from_reactions(&chat.list_reactions(CHANNEL, TS).await.expect("list"), BOT),
        MarkerState::Succeeded
    );

    drop(runtime);
    for worker in workers {
        worker.await.expect("worker exits once the queue closes");
    }
}
