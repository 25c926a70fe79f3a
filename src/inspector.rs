//! Background record inspection by identifier.
//!
//! The inspector owns a private context on its own task. Callers hand it
//! [`RecordId`]s through an [`InspectorHandle`]; the worker resolves each id in
//! its own context and replies with a plain snapshot. Live records and contexts
//! never cross the task boundary.

use crate::error::StoreError;
use crate::store::{Container, Context, RecordId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub id: RecordId,
    pub title: String,
    pub cast: Vec<String>,
}

type Reply = oneshot::Sender<Result<Option<RecordSummary>, StoreError>>;

struct InspectRequest {
    id: RecordId,
    reply: Reply,
}

pub struct RecordInspector {
    context: Context,
    requests: mpsc::Receiver<InspectRequest>,
}

impl RecordInspector {
    /// Start a worker with a context of its own. It stops once every handle is
    /// dropped.
    pub fn spawn(container: Container) -> InspectorHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

        tokio::spawn(async move {
            let inspector = RecordInspector {
                context: container.new_context(),
                requests: rx,
            };
            inspector.run().await
        });

        InspectorHandle { requests: tx }
    }

    async fn run(mut self) {
        log::debug!("inspector started");

        while let Some(request) = self.requests.recv().await {
            let result = self.inspect(request.id).await;
            if request.reply.send(result).is_err() {
                log::debug!("inspector: caller for {} went away", request.id);
            }
        }

        log::debug!("inspector stopped");
    }

    async fn inspect(&mut self, id: RecordId) -> Result<Option<RecordSummary>, StoreError> {
        // Every request reads the committed state, not what an earlier one loaded.
        self.context.reset();

        match self.context.model(id).await {
            Ok(record) => {
                log::trace!("inspector: resolved {} ({})", id, record.title);
                Ok(Some(RecordSummary {
                    id,
                    title: record.title.clone(),
                    cast: record.cast.clone(),
                }))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Cloneable sender side of a [`RecordInspector`].
#[derive(Clone)]
pub struct InspectorHandle {
    requests: mpsc::Sender<InspectRequest>,
}

impl InspectorHandle {
    /// Resolve `id` on the worker. `Ok(None)` when no such record is committed.
    pub async fn inspect(&self, id: RecordId) -> Result<Option<RecordSummary>, StoreError> {
        let (reply, response) = oneshot::channel();

        self.requests
            .send(InspectRequest { id, reply })
            .await
            .map_err(|_| StoreError::WorkerGone)?;

        response.await.map_err(|_| StoreError::WorkerGone)?
    }
}
