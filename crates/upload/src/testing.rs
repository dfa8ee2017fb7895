//! In-memory fakes of the multipart service and object storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use commons_protocol::{
    AddPartResponse, AddPartState, MultipartRequest, MultipartUploadState, MultipartUploadStatus,
    PartPresignedUrl,
};
use commons_transfer::{checksum_bytes, part_count};

use crate::api::{MultipartApi, PartTransport, PutResponse, UploadFuture};
use crate::error::UploadError;

struct Session {
    parts: Vec<bool>,
    completed: bool,
}

#[derive(Default)]
struct ServerState {
    sessions: HashMap<String, Session>,
    by_key: HashMap<String, String>,
    next_id: u32,
    generation: u32,
    last_presign: Vec<u32>,
    added: Vec<(u32, String)>,
    force_flags: Vec<bool>,
    failing_adds: Vec<u32>,
    stalled_completes: u32,
    hang_creates: bool,
}

/// Fake multipart service keeping sessions and bitmaps in memory.
#[derive(Default)]
pub(crate) struct FakeServer {
    state: Mutex<ServerState>,
    presign_calls: AtomicU32,
    complete_calls: AtomicU32,
    /// Part count used for server-side copies.
    pub copy_parts: usize,
}

fn session_key(request: &MultipartRequest) -> String {
    match request {
        MultipartRequest::Upload(r) => {
            format!("{}:{}:{}", r.content_md5_hex, r.file_name, r.part_size_bytes)
        }
        MultipartRequest::Copy(r) => format!(
            "copy:{}:{}:{}",
            r.source_file_handle_association.file_handle_id, r.file_name, r.part_size_bytes
        ),
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            copy_parts: 2,
            ..Self::default()
        }
    }

    /// Pre-creates the session `request` would resume, with the given bitmap.
    pub fn seed_session(&self, request: &MultipartRequest, parts_state: &str) -> String {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let id = format!("upload-{}", s.next_id);
        s.sessions.insert(
            id.clone(),
            Session {
                parts: parts_state.chars().map(|c| c == '1').collect(),
                completed: false,
            },
        );
        s.by_key.insert(session_key(request), id.clone());
        id
    }

    /// `add_part` reports ADD_FAILED for `part`, once.
    pub fn fail_add_once(&self, part: u32) {
        self.state.lock().unwrap().failing_adds.push(part);
    }

    /// Create calls never return, like a client stuck in retry backoff.
    pub fn hang_creates(&self) {
        self.state.lock().unwrap().hang_creates = true;
    }

    /// The next `n` finalize calls leave the session in UPLOADING.
    pub fn stall_completes(&self, n: u32) {
        self.state.lock().unwrap().stalled_completes = n;
    }

    pub fn presign_calls(&self) -> u32 {
        self.presign_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> u32 {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn last_presign_request(&self) -> Vec<u32> {
        self.state.lock().unwrap().last_presign.clone()
    }

    pub fn added_parts(&self) -> Vec<(u32, String)> {
        self.state.lock().unwrap().added.clone()
    }

    pub fn force_flags(&self) -> Vec<bool> {
        self.state.lock().unwrap().force_flags.clone()
    }

    fn status(id: &str, session: &Session) -> MultipartUploadStatus {
        MultipartUploadStatus {
            upload_id: id.to_string(),
            state: if session.completed {
                MultipartUploadState::Completed
            } else {
                MultipartUploadState::Uploading
            },
            parts_state: session
                .parts
                .iter()
                .map(|&done| if done { '1' } else { '0' })
                .collect(),
            result_file_handle_id: session.completed.then(|| format!("fh-{id}")),
            started_by: None,
            updated_on: None,
        }
    }
}

impl MultipartApi for FakeServer {
    fn create_or_resume_upload(
        &self,
        request: &MultipartRequest,
        force_restart: bool,
    ) -> UploadFuture<'_, MultipartUploadStatus> {
        let key = session_key(request);
        let parts = match request {
            MultipartRequest::Upload(r) => {
                part_count(r.file_size_bytes, r.part_size_bytes) as usize
            }
            MultipartRequest::Copy(_) => self.copy_parts,
        };
        Box::pin(async move {
            let hang = {
                let mut s = self.state.lock().unwrap();
                s.force_flags.push(force_restart);
                s.hang_creates
            };
            if hang {
                std::future::pending::<()>().await;
            }
            let mut s = self.state.lock().unwrap();
            let existing = s.by_key.get(&key).cloned().filter(|_| !force_restart);
            let id = match existing {
                Some(id) => id,
                None => {
                    s.next_id += 1;
                    let id = format!("upload-{}", s.next_id);
                    s.sessions.insert(
                        id.clone(),
                        Session {
                            parts: vec![false; parts],
                            completed: false,
                        },
                    );
                    s.by_key.insert(key, id.clone());
                    id
                }
            };
            Ok(Self::status(&id, &s.sessions[&id]))
        })
    }

    fn presigned_part_urls(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
        _content_type: Option<&str>,
    ) -> UploadFuture<'_, Vec<PartPresignedUrl>> {
        let upload_id = upload_id.to_string();
        let part_numbers = part_numbers.to_vec();
        Box::pin(async move {
            self.presign_calls.fetch_add(1, Ordering::SeqCst);
            let mut s = self.state.lock().unwrap();
            let generation = s.generation;
            s.generation += 1;
            s.last_presign = part_numbers.clone();
            Ok(part_numbers
                .into_iter()
                .map(|n| PartPresignedUrl {
                    part_number: n,
                    upload_presigned_url: format!(
                        "https://storage.test/{upload_id}/{n}?gen={generation}"
                    ),
                    signed_headers: HashMap::new(),
                })
                .collect())
        })
    }

    fn add_part(
        &self,
        upload_id: &str,
        part_number: u32,
        md5_hex: &str,
    ) -> UploadFuture<'_, AddPartResponse> {
        let upload_id = upload_id.to_string();
        let md5_hex = md5_hex.to_string();
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            if let Some(pos) = s.failing_adds.iter().position(|&p| p == part_number) {
                s.failing_adds.remove(pos);
                return Ok(AddPartResponse {
                    upload_id,
                    part_number,
                    add_part_state: AddPartState::AddFailed,
                    error_message: Some("checksum did not match".into()),
                });
            }
            s.added.push((part_number, md5_hex));
            let session = s
                .sessions
                .get_mut(&upload_id)
                .ok_or_else(|| UploadError::Api {
                    status: 404,
                    reason: "no such upload".into(),
                })?;
            session.parts[part_number as usize - 1] = true;
            Ok(AddPartResponse {
                upload_id,
                part_number,
                add_part_state: AddPartState::AddSuccess,
                error_message: None,
            })
        })
    }

    fn complete_upload(&self, upload_id: &str) -> UploadFuture<'_, MultipartUploadStatus> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            let mut s = self.state.lock().unwrap();
            let stalled = s.stalled_completes > 0;
            if stalled {
                s.stalled_completes -= 1;
            }
            let session = s.sessions.get_mut(&upload_id).ok_or_else(|| UploadError::Api {
                status: 404,
                reason: "no such upload".into(),
            })?;
            if !stalled && session.parts.iter().all(|&d| d) {
                session.completed = true;
            }
            Ok(Self::status(&upload_id, session))
        })
    }
}

type FailureRule = Box<dyn Fn(u32, &str) -> Option<u16> + Send + Sync>;

/// Fake object storage. Stores part bodies and fails PUTs by rule.
pub(crate) struct FakeStorage {
    objects: Mutex<BTreeMap<u32, Bytes>>,
    calls: AtomicU32,
    started: Mutex<Vec<u32>>,
    fail: FailureRule,
    gate: Option<Arc<tokio::sync::Barrier>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::failing(|_, _| None)
    }

    /// `rule(call_index, url)` returns a status to answer with instead of 200.
    /// Call indices start at 1.
    pub fn failing(rule: impl Fn(u32, &str) -> Option<u16> + Send + Sync + 'static) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
            fail: Box::new(rule),
            gate: None,
        }
    }

    /// Every PUT waits on `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<tokio::sync::Barrier>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Part numbers whose PUT reached storage, in call order.
    pub fn started_parts(&self) -> Vec<u32> {
        self.started.lock().unwrap().clone()
    }

    /// Concatenation of every stored part in part order.
    pub fn assembled(&self) -> Vec<u8> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .flat_map(|b| b.iter().copied())
            .collect()
    }
}

fn part_of(url: &str) -> u32 {
    url.split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl PartTransport for FakeStorage {
    fn put_part(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
        body: Bytes,
    ) -> UploadFuture<'_, PutResponse> {
        let url = url.to_string();
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let part = part_of(&url);
            self.started.lock().unwrap().push(part);
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
            if let Some(status) = (self.fail)(call, &url) {
                return Ok(PutResponse { status, etag: None });
            }
            let etag = format!("\"{}\"", checksum_bytes(format!("copy-{part}").as_bytes()));
            self.objects.lock().unwrap().insert(part, body);
            Ok(PutResponse {
                status: 200,
                etag: Some(etag),
            })
        })
    }
}
