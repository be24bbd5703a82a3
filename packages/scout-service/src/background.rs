//! Fire-and-forget persistence of conversation contexts.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::ConversationStore;
use scout_domain::context_cache::CachedRetrievalContext;

pub(crate) struct ContextWrite {
	pub(crate) tenant_id: String,
	pub(crate) conversation_id: String,
	pub(crate) context: CachedRetrievalContext,
}

enum Job {
	Write(Box<ContextWrite>),
	Flush(oneshot::Sender<()>),
}

/// Bounded queue drained by one Tokio task. Each write is attempted once and a failure is
/// logged once.
pub(crate) struct ContextWriter {
	tx: mpsc::Sender<Job>,
}
impl ContextWriter {
	pub(crate) fn spawn(store: Arc<dyn ConversationStore>, capacity: usize) -> Self {
		let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));

		tokio::spawn(async move {
			while let Some(job) = rx.recv().await {
				match job {
					Job::Write(write) => {
						let ContextWrite { tenant_id, conversation_id, context } = *write;

						if let Err(err) = store.write(&tenant_id, &conversation_id, &context).await {
							tracing::warn!(
								error = %err,
								tenant_id = %tenant_id,
								conversation_id = %conversation_id,
								"Context cache write failed."
							);
						}
					},
					Job::Flush(done) => {
						let _ = done.send(());
					},
				}
			}
		});

		Self { tx }
	}

	/// Never waits. A full queue drops the write.
	pub(crate) fn submit(&self, write: ContextWrite) {
		let conversation_id = write.conversation_id.clone();

		match self.tx.try_send(Job::Write(Box::new(write))) {
			Ok(()) => {},
			Err(mpsc::error::TrySendError::Full(_)) => {
				tracing::warn!(
					conversation_id = %conversation_id,
					"Context cache write queue is full. Dropping write."
				);
			},
			Err(mpsc::error::TrySendError::Closed(_)) => {
				tracing::warn!(
					conversation_id = %conversation_id,
					"Context cache writer has stopped. Dropping write."
				);
			},
		}
	}

	pub(crate) async fn flush(&self) {
		let (done_tx, done_rx) = oneshot::channel();

		if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
			let _ = done_rx.await;
		}
	}
}
