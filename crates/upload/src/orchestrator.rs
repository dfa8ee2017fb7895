//! Multipart upload orchestrator.
//!
//! One call to [`MultipartUploader::upload`] runs up to
//! `max_upload_attempts` full attempts. Each attempt resumes the server
//! session, uploads the parts its bitmap still lacks under the concurrency
//! limit, adds each part as it lands, and finalizes.

use std::future::Future;
use std::sync::Arc;

use commons_protocol::{AddPartState, MultipartUploadStatus, ProtocolError};
use commons_transfer::{TransferContext, part_range};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::{MultipartApi, PartTransport};
use crate::error::UploadError;
use crate::part::{AbortCause, AbortSignal, PartUploader};
use crate::types::{HandlePartResult, UploadAttempt, UploadOutcome, UploadState};
use crate::url_cache::PresignedUrlCache;

/// Drives multipart uploads against one service and one object store.
pub struct MultipartUploader {
    api: Arc<dyn MultipartApi>,
    transport: Arc<dyn PartTransport>,
    ctx: TransferContext,
}

impl MultipartUploader {
    pub fn new(
        api: Arc<dyn MultipartApi>,
        transport: Arc<dyn PartTransport>,
        ctx: TransferContext,
    ) -> Self {
        Self {
            api,
            transport,
            ctx,
        }
    }

    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Uploads `attempt`, retrying whole attempts on recoverable failures.
    ///
    /// `force_restart` only applies to the first attempt; later attempts
    /// resume the session from its bitmap.
    pub async fn upload(&self, attempt: &UploadAttempt) -> Result<UploadOutcome, UploadError> {
        let max_attempts = self.ctx.config.max_upload_attempts.max(1);
        if let Some(size) = attempt.file_size() {
            self.ctx.progress.set_total(size);
        }

        let mut last_state = String::from("no session");
        let mut attempt_no: u32 = 1;
        loop {
            self.check_cancelled()?;
            let force_restart = attempt.force_restart && attempt_no == 1;

            match self.run_attempt(attempt, force_restart, &mut last_state).await {
                Ok(status) => {
                    let file_handle_id = status
                        .result_file_handle_id
                        .ok_or(ProtocolError::MissingField("resultFileHandleId"))?;
                    self.ctx.progress.notify();
                    info!(
                        upload_id = %status.upload_id,
                        file_handle_id = %file_handle_id,
                        attempts = attempt_no,
                        "multipart upload completed"
                    );
                    return Ok(UploadOutcome {
                        upload_id: status.upload_id,
                        file_handle_id,
                        attempts: attempt_no,
                    });
                }
                Err(_) if self.ctx.is_cancelled() => return Err(UploadError::Cancelled),
                Err(e) if e.is_recoverable() && attempt_no < max_attempts => {
                    warn!(
                        file = attempt.request.file_name(),
                        attempt = attempt_no,
                        max_attempts,
                        error = %e,
                        "upload attempt failed, resuming"
                    );
                    let delay = self.ctx.config.retry.delay_for_retry(attempt_no);
                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt_no += 1;
                }
                Err(e) if e.is_recoverable() => {
                    error!(
                        file = attempt.request.file_name(),
                        attempts = attempt_no,
                        error = %e,
                        "upload failed, attempts exhausted"
                    );
                    return Err(UploadError::Exhausted {
                        attempts: attempt_no,
                        last_state: format!("{last_state}; {e}"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_attempt(
        &self,
        attempt: &UploadAttempt,
        force_restart: bool,
        last_state: &mut String,
    ) -> Result<MultipartUploadStatus, UploadError> {
        let status = self
            .cancellable(
                self.api
                    .create_or_resume_upload(&attempt.request, force_restart),
            )
            .await?;
        *last_state = describe(&status);
        let upload_id = status.upload_id.clone();
        enter(&upload_id, UploadState::Initiated);

        if status.is_completed() {
            enter(&upload_id, UploadState::Completed);
            return Ok(status);
        }

        let remaining = status.remaining_parts()?;
        let already_done = status.part_count() - remaining.len();
        if already_done > 0 {
            info!(
                upload_id = %upload_id,
                done = already_done,
                remaining = remaining.len(),
                "resuming multipart upload"
            );
        }
        self.ctx
            .progress
            .set_transferred(self.completed_bytes(attempt, &status)?);

        if !remaining.is_empty() {
            enter(&upload_id, UploadState::PartsPending);
            if let Err(e) = self.upload_parts(attempt, &upload_id, remaining).await {
                enter(&upload_id, UploadState::Aborted);
                return Err(e);
            }
        }

        enter(&upload_id, UploadState::PartsComplete);
        let done = self
            .cancellable(self.api.complete_upload(&upload_id))
            .await?;
        *last_state = describe(&done);
        if !done.is_completed() {
            return Err(UploadError::Incomplete {
                state: describe(&done),
            });
        }
        enter(&upload_id, UploadState::Completed);
        Ok(done)
    }

    /// Uploads `remaining` parts with at most `max_threads` in flight.
    ///
    /// Progress is advanced only here, as completions are handled.
    async fn upload_parts(
        &self,
        attempt: &UploadAttempt,
        upload_id: &str,
        remaining: Vec<u32>,
    ) -> Result<(), UploadError> {
        let cache = Arc::new(PresignedUrlCache::new(
            Arc::clone(&self.api),
            upload_id,
            attempt.content_type(),
        ));
        self.cancellable(cache.fetch(&remaining)).await?;

        let abort = Arc::new(AbortSignal::default());
        let uploader = Arc::new(PartUploader {
            cache,
            transport: Arc::clone(&self.transport),
            source: attempt.source.clone(),
            part_size: attempt.request.part_size(),
            retry: self.ctx.config.retry.clone(),
            abort: Arc::clone(&abort),
        });

        let limit = self.ctx.config.max_threads.max(1);
        let mut pending = remaining.into_iter();
        let mut tasks = JoinSet::new();
        loop {
            while tasks.len() < limit && !abort.is_set() {
                let Some(part) = pending.next() else {
                    break;
                };
                let uploader = Arc::clone(&uploader);
                let cancel = self.ctx.cancel.clone();
                tasks.spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(UploadError::Cancelled),
                        r = uploader.upload(part) => r,
                    };
                    (part, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((_, Ok(Some(done)))) => match self.add_part(upload_id, &done).await {
                    Ok(()) => self.ctx.progress.add(done.size),
                    Err(UploadError::Cancelled) => {
                        signal_abort(&abort, upload_id, AbortCause::Cancelled)
                    }
                    Err(e) => signal_abort(&abort, upload_id, AbortCause::Failed(e.to_string())),
                },
                Ok((_, Ok(None))) => {}
                Ok((_, Err(UploadError::Cancelled))) => {
                    signal_abort(&abort, upload_id, AbortCause::Cancelled)
                }
                Ok((part, Err(e))) => signal_abort(
                    &abort,
                    upload_id,
                    AbortCause::Failed(format!("part {part}: {e}")),
                ),
                Err(e) => signal_abort(
                    &abort,
                    upload_id,
                    AbortCause::Failed(format!("part task failed: {e}")),
                ),
            }
        }

        match abort.cause() {
            None => Ok(()),
            Some(AbortCause::Cancelled) => Err(UploadError::Cancelled),
            Some(AbortCause::Failed(reason)) => Err(UploadError::Aborted { reason }),
        }
    }

    async fn add_part(&self, upload_id: &str, part: &HandlePartResult) -> Result<(), UploadError> {
        let resp = self
            .cancellable(self.api.add_part(upload_id, part.part_number, &part.md5_hex))
            .await?;
        match resp.add_part_state {
            AddPartState::AddSuccess => {
                debug!(upload_id, part = part.part_number, "part added");
                Ok(())
            }
            AddPartState::AddFailed => Err(UploadError::AddPartFailed {
                part: part.part_number,
                message: resp.error_message.unwrap_or_default(),
            }),
        }
    }

    /// Bytes already on the server according to the session bitmap.
    fn completed_bytes(
        &self,
        attempt: &UploadAttempt,
        status: &MultipartUploadStatus,
    ) -> Result<u64, UploadError> {
        let Some(file_size) = attempt.file_size() else {
            return Ok(0);
        };
        let part_size = attempt.request.part_size();
        let mut total = 0;
        for (i, done) in status.completed_parts()?.into_iter().enumerate() {
            if done {
                total += part_range(i as u32 + 1, part_size, file_size)?.1;
            }
        }
        Ok(total)
    }

    /// Service calls retry transient failures themselves; this only stops
    /// waiting on them, backoff included, once the transfer is cancelled.
    async fn cancellable<T>(
        &self,
        call: impl Future<Output = Result<T, UploadError>>,
    ) -> Result<T, UploadError> {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(UploadError::Cancelled),
            r = call => r,
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.ctx.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn signal_abort(abort: &AbortSignal, upload_id: &str, cause: AbortCause) {
    let first = abort.trigger(cause.clone());
    if !first {
        return;
    }
    match cause {
        AbortCause::Cancelled => warn!(upload_id, "upload cancelled, stopping part uploads"),
        AbortCause::Failed(reason) => error!(upload_id, %reason, "aborting upload attempt"),
    }
}

fn enter(upload_id: &str, state: UploadState) {
    debug!(upload_id, state = %state, "upload state");
}

fn describe(status: &MultipartUploadStatus) -> String {
    format!(
        "upload {} {:?} partsState={}",
        status.upload_id, status.state, status.parts_state
    )
}
