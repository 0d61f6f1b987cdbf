//! The RPC surface itself: one `async_trait` method per call in spec §6,
//! and an in-process dispatcher that backs it with an `EngineRouter`.

use std::time::Duration;

use async_trait::async_trait;

use matching_engine::prelude::*;

use crate::error::{unwrap_outcome, MatchingServiceError};
use crate::types::*;

#[async_trait]
pub trait MatchingService: Send + Sync {
    async fn add_activity_task(&self, request: AddTaskRequest) -> Result<(), MatchingServiceError>;
    async fn add_decision_task(&self, request: AddTaskRequest) -> Result<(), MatchingServiceError>;

    async fn poll_for_activity_task(
        &self,
        request: PollRequest,
    ) -> Result<PolledTaskResponse, MatchingServiceError>;
    async fn poll_for_decision_task(
        &self,
        request: PollRequest,
    ) -> Result<PolledTaskResponse, MatchingServiceError>;

    async fn query_workflow(
        &self,
        request: QueryWorkflowRequest,
    ) -> Result<matching_types::QueryCompletion, MatchingServiceError>;
    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), MatchingServiceError>;

    async fn cancel_outstanding_poll(
        &self,
        request: CancelOutstandingPollRequest,
    ) -> Result<(), MatchingServiceError>;

    async fn describe_task_list(
        &self,
        request: DescribeTaskListRequest,
    ) -> Result<DescribeTaskListResponse, MatchingServiceError>;
    async fn list_task_list_partitions(
        &self,
        request: ListTaskListPartitionsRequest,
    ) -> Result<ListTaskListPartitionsResponse, MatchingServiceError>;
}

/// Default query deadline when a caller doesn't hand one through (the RPC
/// request shape carries no deadline field, matching the original's
/// context-based timeout convention).
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Implements `MatchingService` directly on top of an `EngineRouter`, with
/// no network hop — this is how a worker hosted in the same process as the
/// matching engine would call it.
pub struct InProcessMatchingService {
    router: EngineRouter,
}

impl InProcessMatchingService {
    pub fn new(router: EngineRouter) -> Self {
        Self { router }
    }

    fn identity(domain_id: &str, task_list: &str, task_type: TaskListType) -> TaskListIdentity {
        let (root, partition) = TaskListIdentity::parse_wire_name(task_list);
        TaskListIdentity::root(domain_id, root, task_type).child(partition)
    }

    async fn add_task(
        &self,
        request: AddTaskRequest,
        task_type: TaskListType,
    ) -> Result<(), MatchingServiceError> {
        let id = Self::identity(&request.domain_id, &request.task_list, task_type);
        let kind = request.task_list_kind;
        let new_task = NewTask {
            domain_id: request.domain_id,
            workflow_execution: request.workflow_execution,
            schedule_id: request.schedule_id,
            schedule_to_start_timeout_seconds: request.schedule_to_start_timeout_seconds,
        };
        unwrap_outcome(self.router.add_task(id, kind, new_task).await)
    }

    async fn poll(
        &self,
        request: PollRequest,
        task_type: TaskListType,
    ) -> Result<PolledTaskResponse, MatchingServiceError> {
        let id = Self::identity(&request.domain_id, &request.task_list, task_type);
        let polled = unwrap_outcome(
            self.router
                .poll(id, request.task_list_kind, request.poller_id, request.metadata.max_tasks_per_second)
                .await,
        )?;
        Ok(match polled {
            None => PolledTaskResponse::Empty,
            Some(PolledTask { item, .. }) => match item {
                MatchedItem::Task(task) => PolledTaskResponse::Task(task),
                MatchedItem::Query(query) => PolledTaskResponse::Query(query),
            },
        })
    }
}

#[async_trait]
impl MatchingService for InProcessMatchingService {
    async fn add_activity_task(&self, request: AddTaskRequest) -> Result<(), MatchingServiceError> {
        self.add_task(request, TaskListType::Activity).await
    }

    async fn add_decision_task(&self, request: AddTaskRequest) -> Result<(), MatchingServiceError> {
        self.add_task(request, TaskListType::Decision).await
    }

    async fn poll_for_activity_task(
        &self,
        request: PollRequest,
    ) -> Result<PolledTaskResponse, MatchingServiceError> {
        self.poll(request, TaskListType::Activity).await
    }

    async fn poll_for_decision_task(
        &self,
        request: PollRequest,
    ) -> Result<PolledTaskResponse, MatchingServiceError> {
        self.poll(request, TaskListType::Decision).await
    }

    async fn query_workflow(
        &self,
        request: QueryWorkflowRequest,
    ) -> Result<matching_types::QueryCompletion, MatchingServiceError> {
        // Queries are always routed against the decision task list, per the
        // original semantics of query dispatch riding the decision backlog.
        let id = Self::identity(&request.domain_id, &request.task_list, TaskListType::Decision);
        unwrap_outcome(
            self.router
                .query_workflow(
                    id,
                    request.task_list_kind,
                    request.workflow_execution,
                    request.query,
                    DEFAULT_QUERY_TIMEOUT,
                )
                .await,
        )
    }

    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), MatchingServiceError> {
        let id = Self::identity(&request.domain_id, &request.task_list, TaskListType::Decision);
        unwrap_outcome(
            self.router
                .respond_query_completed(id, request.task_list_kind, request.query_id, request.completion)
                .await,
        )
    }

    async fn cancel_outstanding_poll(
        &self,
        request: CancelOutstandingPollRequest,
    ) -> Result<(), MatchingServiceError> {
        let id = Self::identity(&request.domain_id, &request.task_list, request.task_list_type);
        unwrap_outcome(
            self.router
                .cancel_outstanding_poll(id, request.task_list_kind, &request.poller_id)
                .await,
        )
    }

    async fn describe_task_list(
        &self,
        request: DescribeTaskListRequest,
    ) -> Result<DescribeTaskListResponse, MatchingServiceError> {
        let id = Self::identity(&request.domain_id, &request.task_list, request.task_list_type);
        let result = unwrap_outcome(self.router.describe_task_list(id, request.task_list_kind).await)?;
        Ok(DescribeTaskListResponse {
            pollers: result.pollers,
            task_list_status: request.include_task_list_status.then(|| TaskListStatus {
                backlog_count_hint: result.backlog_count_hint,
                read_level: result.read_level,
                ack_level: result.ack_level,
            }),
        })
    }

    async fn list_task_list_partitions(
        &self,
        request: ListTaskListPartitionsRequest,
    ) -> Result<ListTaskListPartitionsResponse, MatchingServiceError> {
        let root = TaskListIdentity::root(&request.domain_id, &request.task_list, TaskListType::Activity);
        let activity = self.router.list_task_list_partitions(&root).await;
        let decision_root = TaskListIdentity::root(&request.domain_id, &request.task_list, TaskListType::Decision);
        let decision = self.router.list_task_list_partitions(&decision_root).await;

        let to_partition = |(id, owner): (TaskListIdentity, Option<String>)| TaskListPartition {
            key: id.wire_name(),
            owner_host_name: owner.unwrap_or_default(),
        };

        Ok(ListTaskListPartitionsResponse {
            activity_task_list_partitions: activity.into_iter().map(to_partition).collect(),
            decision_task_list_partitions: decision.into_iter().map(to_partition).collect(),
        })
    }
}
