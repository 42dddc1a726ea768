//! Change-triggered dispatch: event → active schedules → device topic.

use crate::bus::{BusConnector, DevicePublisher};
use crate::error::DispatchError;
use crate::event::{extract_device_id, DeviceId, EventError};
use crate::schedule::{resolve_active_schedules, ScheduleQuery};
use crate::store::ScheduleStore;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Outcome of one successful dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchReport {
    pub device_id: DeviceId,
    pub topic: String,
    pub schedule_count: usize,
}

/// Handles one change event at a time, end to end.
///
/// Invocations share no mutable state; each resolves the full current set
/// and opens its own bus session.
#[derive(Clone)]
pub struct SchedulePipeline {
    store: Arc<dyn ScheduleStore>,
    publisher: DevicePublisher,
}

impl SchedulePipeline {
    pub fn new(store: Arc<dyn ScheduleStore>, bus: Arc<dyn BusConnector>) -> Self {
        Self {
            store,
            publisher: DevicePublisher::new(bus),
        }
    }

    /// Runs the pipeline for one decoded trigger body.
    ///
    /// `caller_auth` is the inbound `Authorization` header, forwarded to the
    /// store. Nothing is published unless the read succeeded.
    pub async fn dispatch(
        &self,
        body: &Value,
        caller_auth: Option<String>,
    ) -> Result<DispatchReport, DispatchError> {
        self.traced(self.run(body, caller_auth)).await
    }

    /// Runs the pipeline for a raw request body. A body that is not JSON is
    /// an invalid event.
    pub async fn dispatch_json(
        &self,
        body: &[u8],
        caller_auth: Option<String>,
    ) -> Result<DispatchReport, DispatchError> {
        self.traced(async {
            let event: Value = match serde_json::from_slice(body) {
                Ok(event) => event,
                Err(e) => {
                    return Err(DispatchError::InvalidEvent(EventError::Malformed(
                        e.to_string(),
                    )))
                }
            };
            self.run(&event, caller_auth).await
        })
        .await
    }

    /// Runs one invocation inside its own span and logs the outcome.
    async fn traced<F>(&self, invocation: F) -> Result<DispatchReport, DispatchError>
    where
        F: Future<Output = Result<DispatchReport, DispatchError>>,
    {
        let span = info_span!("dispatch", invocation_id = %Uuid::now_v7());

        async {
            let result = invocation.await;
            match &result {
                Ok(report) => info!(
                    device_id = %report.device_id,
                    topic = %report.topic,
                    count = report.schedule_count,
                    "Dispatched schedules"
                ),
                Err(e) => error!(kind = e.kind(), error = %e, "Schedule dispatch failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        body: &Value,
        caller_auth: Option<String>,
    ) -> Result<DispatchReport, DispatchError> {
        debug!(body = %body, "Received change event");

        let device_id = extract_device_id(body)?;
        let query = ScheduleQuery::new(device_id).with_caller_auth(caller_auth);

        let payload = resolve_active_schedules(self.store.as_ref(), &query).await?;
        let topic = self.publisher.publish(&query.device_id, &payload).await?;

        Ok(DispatchReport {
            device_id: query.device_id,
            topic,
            schedule_count: payload.len(),
        })
    }
}
