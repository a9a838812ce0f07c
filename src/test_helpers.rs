//! In-memory doubles for schema tests.
//!
//! [`RecordingDialect`] serves both dialect boundaries: opened or built clients append every
//! call to a shared log that tests assert on.

#![allow(dead_code)]

use crate::define::{ColumnDefine, TableDefine};
use crate::dialect::remote::{RemoteDialect, RemoteSettings, RemoteType};
use crate::dialect::{Dialect, DialectClient, RoutingKey};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::query::{Condition, QueryInfo};
use crate::row::Row;
use crate::schema::transaction::TransactionConfig;
use crate::task::{TaskInfo, TaskQueue, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Build(RemoteType),
    Begin,
    Commit,
    Rollback,
    Close,
    DialectClose,
    InitSharding(usize),
    InitTable(RoutingKey),
    TableColumns(RoutingKey),
    Insert(RoutingKey),
    Retrieve(RoutingKey),
    Update(RoutingKey),
    Delete(RoutingKey),
    LockRecord(RoutingKey),
    Query(RoutingKey),
    QueryForUpdate(RoutingKey),
    QueryTotal(RoutingKey),
    Truncate(RoutingKey),
    Drop(RoutingKey),
}

#[derive(Default)]
struct Recorder {
    calls: Vec<Call>,
    reply: Option<Row>,
    last_projection: Vec<String>,
    live: HashMap<String, Vec<ColumnDefine>>,
    fail_close: bool,
    retry: Option<(u32, Duration)>,
    properties: BTreeMap<String, String>,
    last_settings: Option<RemoteSettings>,
}

#[derive(Default)]
pub struct RecordingDialect {
    recorder: Arc<Mutex<Recorder>>,
}

fn lock(recorder: &Mutex<Recorder>) -> MutexGuard<'_, Recorder> {
    recorder.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingDialect {
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.recorder).calls.clone()
    }

    /// Row returned by `retrieve` and (as a single row) by `query`.
    pub fn reply_row(&self, row: Row) {
        lock(&self.recorder).reply = Some(row);
    }

    pub fn last_projection(&self) -> Vec<String> {
        lock(&self.recorder).last_projection.clone()
    }

    /// Columns `table_columns` reports for a logical table.
    pub fn live_columns(&self, table: &str, columns: Vec<ColumnDefine>) {
        lock(&self.recorder).live.insert(table.to_string(), columns);
    }

    pub fn fail_close(&self) {
        lock(&self.recorder).fail_close = true;
    }

    pub fn retry(&self) -> Option<(u32, Duration)> {
        lock(&self.recorder).retry
    }

    pub fn property(&self, name: &str, value: &str) {
        lock(&self.recorder)
            .properties
            .insert(name.to_string(), value.to_string());
    }

    pub fn last_settings(&self) -> Option<RemoteSettings> {
        lock(&self.recorder).last_settings.clone()
    }

    fn record(&self, call: Call) {
        lock(&self.recorder).calls.push(call);
    }

    fn client(&self) -> Box<dyn DialectClient> {
        Box::new(RecordingClient {
            recorder: Arc::clone(&self.recorder),
        })
    }

    fn build(&self, settings: &RemoteSettings) -> Box<dyn DialectClient> {
        let mut recorder = lock(&self.recorder);
        recorder.calls.push(Call::Build(settings.remote_type));
        recorder.last_settings = Some(settings.clone());
        drop(recorder);
        self.client()
    }
}

impl Dialect for RecordingDialect {
    fn open(&self) -> Result<Box<dyn DialectClient>> {
        self.record(Call::Open);
        Ok(self.client())
    }

    fn config_retry(&self, count: u32, period: Duration) {
        lock(&self.recorder).retry = Some((count, period));
    }

    fn close(&self) -> Result<()> {
        self.record(Call::DialectClose);
        Ok(())
    }
}

impl RemoteDialect for RecordingDialect {
    fn properties(&self) -> BTreeMap<String, String> {
        lock(&self.recorder).properties.clone()
    }

    fn build_soap(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        Ok(self.build(settings))
    }

    fn build_rest(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        Ok(self.build(settings))
    }

    fn config_retry(&self, count: u32, period: Duration) {
        lock(&self.recorder).retry = Some((count, period));
    }

    fn close(&self) -> Result<()> {
        self.record(Call::DialectClose);
        Ok(())
    }
}

pub struct RecordingClient {
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingClient {
    fn record(&self, call: Call) {
        lock(&self.recorder).calls.push(call);
    }

    fn reply(&self) -> Option<Row> {
        lock(&self.recorder).reply.clone()
    }
}

impl DialectClient for RecordingClient {
    fn begin_transaction(&mut self, _config: &TransactionConfig) -> Result<()> {
        self.record(Call::Begin);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.record(Call::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.record(Call::Rollback);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record(Call::Close);
        if lock(&self.recorder).fail_close {
            return Err(BridgeError::transport(
                ErrorCode::Backend,
                &[&"recording", &"close refused"],
            ));
        }
        Ok(())
    }

    fn init_sharding(&mut self, tables: &[Arc<TableDefine>]) -> Result<()> {
        self.record(Call::InitSharding(tables.len()));
        Ok(())
    }

    fn init_table(&mut self, route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        self.record(Call::InitTable(route.clone()));
        Ok(())
    }

    fn table_columns(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
    ) -> Result<Vec<ColumnDefine>> {
        self.record(Call::TableColumns(route.clone()));
        Ok(lock(&self.recorder)
            .live
            .get(define.name())
            .cloned()
            .unwrap_or_default())
    }

    fn insert(&mut self, route: &RoutingKey, _define: &TableDefine, data: &Row) -> Result<Row> {
        self.record(Call::Insert(route.clone()));
        Ok(data.clone())
    }

    fn retrieve(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
        columns: &[String],
    ) -> Result<Row> {
        let mut recorder = lock(&self.recorder);
        recorder.calls.push(Call::Retrieve(route.clone()));
        recorder.last_projection = columns.to_vec();
        Ok(recorder.reply.clone().unwrap_or_default())
    }

    fn update(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _data: &Row,
        _filter: &[Condition],
    ) -> Result<u64> {
        self.record(Call::Update(route.clone()));
        Ok(1)
    }

    fn delete(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
    ) -> Result<u64> {
        self.record(Call::Delete(route.clone()));
        Ok(1)
    }

    fn lock_record(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
    ) -> Result<bool> {
        self.record(Call::LockRecord(route.clone()));
        Ok(true)
    }

    fn query(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _info: &QueryInfo,
    ) -> Result<Vec<Row>> {
        self.record(Call::Query(route.clone()));
        Ok(self.reply().into_iter().collect())
    }

    fn query_for_update(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _filter: &[Condition],
        columns: &[String],
    ) -> Result<Vec<Row>> {
        let mut recorder = lock(&self.recorder);
        recorder.calls.push(Call::QueryForUpdate(route.clone()));
        recorder.last_projection = columns.to_vec();
        Ok(recorder.reply.clone().into_iter().collect())
    }

    fn query_total(
        &mut self,
        route: &RoutingKey,
        _define: &TableDefine,
        _info: &QueryInfo,
    ) -> Result<u64> {
        self.record(Call::QueryTotal(route.clone()));
        Ok(self.reply().map_or(0, |_| 1))
    }

    fn truncate_table(&mut self, route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        self.record(Call::Truncate(route.clone()));
        Ok(())
    }

    fn drop_table(&mut self, route: &RoutingKey, _define: &TableDefine) -> Result<()> {
        self.record(Call::Drop(route.clone()));
        Ok(())
    }
}

/// Task queue kept in memory.
#[derive(Default)]
pub struct MemoryTaskQueue {
    running: AtomicBool,
    tasks: Mutex<Vec<TaskInfo>>,
}

impl MemoryTaskQueue {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<TaskInfo>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn initialize(&self, _base_path: &Path) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.tasks().clear();
        Ok(())
    }

    fn add_task(&self, task: TaskInfo) -> Result<()> {
        self.tasks().push(task);
        Ok(())
    }

    fn process_task(&self, task_code: &str, node_id: &str) -> Result<bool> {
        let mut tasks = self.tasks();
        match tasks
            .iter_mut()
            .find(|t| t.task_code == task_code && t.status == TaskStatus::Pending)
        {
            Some(task) => {
                task.status = TaskStatus::Processing;
                task.node_id = Some(node_id.to_string());
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn drop_expired(&self, expire_time: DateTime<Utc>) -> Result<usize> {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|t| !(t.is_finished() && t.updated_at < expire_time));
        Ok(before - tasks.len())
    }

    fn drop_task(&self, user_code: &str, task_code: &str) -> Result<bool> {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|t| !(t.user_code == user_code && t.task_code == task_code));
        Ok(tasks.len() < before)
    }

    fn next_task(&self, node_id: &str) -> Result<Option<TaskInfo>> {
        let code = self
            .tasks()
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
            .map(|t| t.task_code.clone());
        match code {
            Some(code) if self.process_task(&code, node_id)? => Ok(self
                .tasks()
                .iter()
                .find(|t| t.task_code == code)
                .cloned()),
            _ => Ok(None),
        }
    }

    fn finish_task(&self, task_code: &str, has_error: bool, message: &str) -> Result<()> {
        if let Some(task) = self.tasks().iter_mut().find(|t| t.task_code == task_code) {
            task.status = if has_error {
                TaskStatus::Failed
            } else {
                TaskStatus::Finished
            };
            task.message = Some(message.to_string());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    fn task_list(&self, user_code: &str, page: u64, page_size: u64) -> Result<Vec<TaskInfo>> {
        let mut tasks: Vec<TaskInfo> = self
            .tasks()
            .iter()
            .filter(|t| t.user_code == user_code)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let skip = page.saturating_sub(1).saturating_mul(page_size) as usize;
        Ok(tasks.into_iter().skip(skip).take(page_size as usize).collect())
    }

    fn task_info(&self, user_code: &str, task_code: &str) -> Result<Option<TaskInfo>> {
        Ok(self
            .tasks()
            .iter()
            .find(|t| t.user_code == user_code && t.task_code == task_code)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[test]
    fn test_memory_queue_task_lifecycle() {
        let queue = MemoryTaskQueue::default();
        queue.initialize(Path::new("/tmp")).unwrap();
        queue
            .add_task(TaskInfo::new("t-1", "alice", TaskType::Import))
            .unwrap();

        let task = queue.next_task("node-a").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.node_id.as_deref(), Some("node-a"));
        assert!(!queue.process_task("t-1", "node-b").unwrap());

        queue.finish_task("t-1", true, "bad row 3").unwrap();
        let info = queue.task_info("alice", "t-1").unwrap().unwrap();
        assert_eq!(info.status, TaskStatus::Failed);
        assert_eq!(queue.task_list("alice", 1, 10).unwrap().len(), 1);

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(queue.drop_expired(later).unwrap(), 1);
        assert!(!queue.drop_task("alice", "t-1").unwrap());
    }
}
