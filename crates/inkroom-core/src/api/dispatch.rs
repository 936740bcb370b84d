//! Asynchronous completion of REST calls.
//!
//! Calls are submitted with a [`Ticket`] and their results collected later
//! through `poll()`, so the owner never blocks. Room-scoped tickets carry the
//! epoch of the room membership they were issued for; the owner compares it
//! with the current epoch when the result comes back.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use super::{
    ApiError, ApiResult, ChatRecord, CreatedRoom, RoomApi, RoomSummary, SaveResponse,
    SaveSnapshotRequest, SnapshotBody,
};
use crate::codec::StoredOperation;

/// Identifies one submitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Room epoch the call belongs to; [`Ticket::GLOBAL`] for calls outside a room.
    pub epoch: u64,
    pub id: u64,
}

impl Ticket {
    pub const GLOBAL: u64 = 0;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    CreateRoom { name: String },
    ListRooms,
    FetchBaseline { room_id: String },
    FetchOperations { room_id: String, after_sequence: u64 },
    FetchChatHistory { room_id: String },
    SaveBaseline { room_id: String, request: SaveSnapshotRequest },
}

impl ApiRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ApiRequest::CreateRoom { .. } => "create room",
            ApiRequest::ListRooms => "list rooms",
            ApiRequest::FetchBaseline { .. } => "fetch baseline",
            ApiRequest::FetchOperations { .. } => "fetch operations",
            ApiRequest::FetchChatHistory { .. } => "fetch chat history",
            ApiRequest::SaveBaseline { .. } => "save baseline",
        }
    }

    /// The response this request produces when it fails before reaching the API.
    pub fn failed(&self, error: ApiError) -> ApiResponse {
        match self {
            ApiRequest::CreateRoom { .. } => ApiResponse::RoomCreated(Err(error)),
            ApiRequest::ListRooms => ApiResponse::Rooms(Err(error)),
            ApiRequest::FetchBaseline { .. } => ApiResponse::Baseline(Err(error)),
            ApiRequest::FetchOperations { .. } => ApiResponse::Operations(Err(error)),
            ApiRequest::FetchChatHistory { .. } => ApiResponse::ChatHistory(Err(error)),
            ApiRequest::SaveBaseline { .. } => ApiResponse::Saved(Err(error)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    RoomCreated(ApiResult<CreatedRoom>),
    Rooms(ApiResult<Vec<RoomSummary>>),
    Baseline(ApiResult<SnapshotBody>),
    Operations(ApiResult<Vec<StoredOperation>>),
    ChatHistory(ApiResult<Vec<ChatRecord>>),
    Saved(ApiResult<SaveResponse>),
}

/// Run one request against `api`.
pub fn execute<A: RoomApi + ?Sized>(api: &A, token: &str, request: ApiRequest) -> ApiResponse {
    match request {
        ApiRequest::CreateRoom { name } => ApiResponse::RoomCreated(api.create_room(token, &name)),
        ApiRequest::ListRooms => ApiResponse::Rooms(api.list_rooms(token)),
        ApiRequest::FetchBaseline { room_id } => {
            ApiResponse::Baseline(api.fetch_baseline(token, &room_id))
        }
        ApiRequest::FetchOperations {
            room_id,
            after_sequence,
        } => ApiResponse::Operations(api.fetch_operations(token, &room_id, after_sequence)),
        ApiRequest::FetchChatHistory { room_id } => {
            ApiResponse::ChatHistory(api.fetch_chat_history(token, &room_id))
        }
        ApiRequest::SaveBaseline { room_id, request } => {
            ApiResponse::Saved(api.save_baseline(token, &room_id, &request))
        }
    }
}

/// Runs REST calls without blocking the caller.
pub trait ApiDispatcher {
    fn submit(&mut self, ticket: Ticket, token: String, request: ApiRequest);

    /// Completed calls, in completion order.
    fn poll(&mut self) -> Vec<(Ticket, ApiResponse)>;
}

/// Runs each call at submit time and hands the result back on the next poll.
pub struct InlineDispatcher<A> {
    api: A,
    ready: Vec<(Ticket, ApiResponse)>,
}

impl<A: RoomApi> InlineDispatcher<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            ready: Vec::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

impl<A: RoomApi> ApiDispatcher for InlineDispatcher<A> {
    fn submit(&mut self, ticket: Ticket, token: String, request: ApiRequest) {
        log::debug!("API {} (ticket {:?})", request.name(), ticket);
        let response = execute(&self.api, &token, request);
        self.ready.push((ticket, response));
    }

    fn poll(&mut self) -> Vec<(Ticket, ApiResponse)> {
        std::mem::take(&mut self.ready)
    }
}

struct Job {
    ticket: Ticket,
    token: String,
    request: ApiRequest,
}

/// Runs calls one at a time on a background thread.
pub struct ThreadedDispatcher {
    /// Channel to send jobs to the worker thread.
    job_tx: Sender<Job>,
    /// Channel to receive completions from the worker thread.
    result_rx: Receiver<(Ticket, ApiResponse)>,
    /// Calls that could not be handed to the worker.
    failed: Vec<(Ticket, ApiResponse)>,
    _worker: JoinHandle<()>,
}

impl ThreadedDispatcher {
    pub fn spawn<A: RoomApi + Send + 'static>(api: A) -> Self {
        let (job_tx, job_rx) = channel::<Job>();
        let (result_tx, result_rx) = channel();

        let worker = thread::spawn(move || {
            log::info!("API worker started");
            while let Ok(job) = job_rx.recv() {
                log::debug!("API {} (ticket {:?})", job.request.name(), job.ticket);
                let response = execute(&api, &job.token, job.request);
                if result_tx.send((job.ticket, response)).is_err() {
                    break;
                }
            }
            log::info!("API worker exiting");
        });

        Self {
            job_tx,
            result_rx,
            failed: Vec::new(),
            _worker: worker,
        }
    }
}

impl ApiDispatcher for ThreadedDispatcher {
    fn submit(&mut self, ticket: Ticket, token: String, request: ApiRequest) {
        let failure = request.failed(ApiError::Network("API worker is gone".to_string()));
        if self.job_tx.send(Job { ticket, token, request }).is_err() {
            log::error!("API worker is gone, failing ticket {:?}", ticket);
            self.failed.push((ticket, failure));
        }
    }

    fn poll(&mut self) -> Vec<(Ticket, ApiResponse)> {
        let mut done = std::mem::take(&mut self.failed);
        done.extend(self.result_rx.try_iter());
        done
    }
}
