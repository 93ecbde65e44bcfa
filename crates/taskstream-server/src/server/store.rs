//! Per-session bookkeeping of submitted tasks and their results.
//!
//! Every session owns the set of task ids submitted to it and a map from
//! result key to [`ResultState`]. A key enters the map as
//! [`ResultState::Pending`] when the task expecting it is accepted, and moves
//! to [`ResultState::Ready`] or [`ResultState::Failed`] once that task ran.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use taskstream_core::{
    WorkItem,
    proto::create_task_reply::{CreationStatus, TaskInfo, creation_status},
};
use tokio::sync::RwLock;

/// State of a single result key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultState {
    Pending { task_id: String },
    Ready { task_id: String, data: Bytes },
    Failed { task_id: String, message: String },
}

#[derive(Debug, Default)]
struct Session {
    tasks: HashSet<String>,
    results: HashMap<String, ResultState>,
}

impl Session {
    /// Checks `item` against the tasks and keys already known to the session.
    fn check(&self, item: &WorkItem) -> Result<(), String> {
        if self.tasks.contains(&item.id) {
            return Err(format!("task {} already exists in this session", item.id));
        }

        if item.expected_output_keys.is_empty() {
            return Err(format!("task {} expects no output keys", item.id));
        }

        let mut keys = HashSet::with_capacity(item.expected_output_keys.len());
        for key in &item.expected_output_keys {
            if !keys.insert(key.as_str()) {
                return Err(format!("output key {key} is listed twice by task {}", item.id));
            }
            if let Some(owner) = self.results.get(key) {
                return Err(format!(
                    "output key {key} is already owned by task {}",
                    owner.task_id()
                ));
            }
        }

        if let Some(missing) = item
            .data_dependencies
            .iter()
            .find(|key| !self.results.contains_key(*key))
        {
            return Err(format!("data dependency {missing} is unknown"));
        }

        Ok(())
    }

    fn settle(&mut self, item: &WorkItem, state: impl Fn(&str) -> ResultState) {
        for key in &item.expected_output_keys {
            if let Some(slot) = self.results.get_mut(key) {
                if matches!(slot, ResultState::Pending { task_id } if *task_id == item.id) {
                    *slot = state(&item.id);
                }
            }
        }
    }
}

impl ResultState {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Pending { task_id }
            | Self::Ready { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

/// Shared task and result store for all sessions.
#[derive(Debug, Default)]
pub struct ResultStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch of items submitted to `session`.
    ///
    /// Items are checked in submission order, so an item may depend on the
    /// output keys of an item accepted before it in the same batch. Returns
    /// one [`CreationStatus`] per item, in order, together with the accepted
    /// items.
    pub async fn register(
        &self,
        session: &str,
        items: Vec<WorkItem>,
    ) -> (Vec<CreationStatus>, Vec<WorkItem>) {
        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(session.to_string()).or_default();

        let mut statuses = Vec::with_capacity(items.len());
        let mut accepted = Vec::with_capacity(items.len());

        for item in items {
            let status = match state.check(&item) {
                Ok(()) => {
                    state.tasks.insert(item.id.clone());
                    for key in &item.expected_output_keys {
                        state.results.insert(
                            key.clone(),
                            ResultState::Pending {
                                task_id: item.id.clone(),
                            },
                        );
                    }
                    let info = TaskInfo {
                        task_id: item.id.clone(),
                        expected_output_keys: item.expected_output_keys.clone(),
                        data_dependencies: item.data_dependencies.clone(),
                    };
                    accepted.push(item);
                    creation_status::Status::TaskInfo(info)
                }
                Err(reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Rejected task {}: {reason}", item.id);
                    creation_status::Status::Error(reason)
                }
            };
            statuses.push(CreationStatus {
                status: Some(status),
            });
        }

        (statuses, accepted)
    }

    /// Publishes `data` under every output key of `item`.
    pub async fn complete(&self, session: &str, item: &WorkItem, data: Bytes) {
        if let Some(state) = self.sessions.write().await.get_mut(session) {
            state.settle(item, |task_id| ResultState::Ready {
                task_id: task_id.to_string(),
                data: data.clone(),
            });
        }
    }

    /// Marks every output key of `item` as failed.
    pub async fn fail(&self, session: &str, item: &WorkItem, message: &str) {
        if let Some(state) = self.sessions.write().await.get_mut(session) {
            state.settle(item, |task_id| ResultState::Failed {
                task_id: task_id.to_string(),
                message: message.to_string(),
            });
        }
    }

    pub async fn get(&self, session: &str, key: &str) -> Option<ResultState> {
        self.sessions
            .read()
            .await
            .get(session)
            .and_then(|state| state.results.get(key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, outputs: &[&str], dependencies: &[&str]) -> WorkItem {
        WorkItem::new(id, Bytes::from_static(b"payload"))
            .with_expected_output_keys(outputs.iter().copied())
            .with_data_dependencies(dependencies.iter().copied())
    }

    fn error_of(status: &CreationStatus) -> Option<&str> {
        match &status.status {
            Some(creation_status::Status::Error(reason)) => Some(reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn accepted_items_start_pending() {
        let store = ResultStore::new();
        let (statuses, accepted) = store.register("s", vec![item("t1", &["o1"], &[])]).await;

        assert_eq!(accepted.len(), 1);
        assert!(matches!(
            &statuses[0].status,
            Some(creation_status::Status::TaskInfo(info)) if info.task_id == "t1"
        ));
        assert_eq!(
            store.get("s", "o1").await,
            Some(ResultState::Pending {
                task_id: "t1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn invalid_items_are_rejected_individually() {
        let store = ResultStore::new();
        let items = vec![
            item("t1", &["o1"], &[]),
            item("t1", &["o2"], &[]),
            item("t2", &["o1"], &[]),
            item("t3", &[], &[]),
            item("t4", &["o4"], &["missing"]),
            item("t5", &["o5", "o5"], &[]),
            item("t6", &["o6"], &["o1"]),
        ];
        let (statuses, accepted) = store.register("s", items).await;

        let ids: Vec<_> = accepted.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t6"]);

        assert!(error_of(&statuses[0]).is_none());
        assert!(error_of(&statuses[1]).unwrap().contains("already exists"));
        assert!(error_of(&statuses[2]).unwrap().contains("owned by task t1"));
        assert!(error_of(&statuses[3]).unwrap().contains("no output keys"));
        assert!(error_of(&statuses[4]).unwrap().contains("missing"));
        assert!(error_of(&statuses[5]).unwrap().contains("listed twice"));
        assert!(error_of(&statuses[6]).is_none());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = ResultStore::new();
        store.register("a", vec![item("t1", &["o1"], &[])]).await;
        let (_, accepted) = store.register("b", vec![item("t1", &["o1"], &[])]).await;

        assert_eq!(accepted.len(), 1);
        assert_eq!(store.get("c", "o1").await, None);
    }

    #[tokio::test]
    async fn completion_and_failure_settle_pending_keys() {
        let store = ResultStore::new();
        let ok = item("t1", &["o1", "o2"], &[]);
        let bad = item("t2", &["o3"], &[]);
        store.register("s", vec![ok.clone(), bad.clone()]).await;

        store.complete("s", &ok, Bytes::from_static(b"done")).await;
        store.fail("s", &bad, "boom").await;

        for key in ["o1", "o2"] {
            assert_eq!(
                store.get("s", key).await,
                Some(ResultState::Ready {
                    task_id: "t1".to_string(),
                    data: Bytes::from_static(b"done"),
                })
            );
        }
        assert_eq!(
            store.get("s", "o3").await,
            Some(ResultState::Failed {
                task_id: "t2".to_string(),
                message: "boom".to_string(),
            })
        );

        // Settled keys do not change again.
        store.fail("s", &ok, "late").await;
        assert!(matches!(
            store.get("s", "o1").await,
            Some(ResultState::Ready { .. })
        ));
    }
}
