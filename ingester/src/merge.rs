//! The bidirectional `MergeProfilesPprof` session.
//!
//! Protocol, driven by the client:
//!
//! 1. client sends the selection request;
//! 2. server responds with the candidate series and profiles;
//! 3. client sends a selection bitmap over the candidates;
//! 4. server responds with an empty message (selection consumed), then with
//!    the merged pprof payload.
//!
//! The server side runs as a task over any [`ProfileQuerier`], so the same
//! protocol serves local heads and long-term blocks.

use std::sync::Arc;

use tokio::sync::mpsc;

use query_backend::{CandidateProfile, ProfileCandidates, ProfileQuerier, QueryError, SelectProfilesRequest};

/// A client → server message.
#[derive(Debug, Default)]
pub struct MergeProfilesPprofRequest {
    /// Set on the first message only.
    pub request: Option<SelectProfilesRequest>,
    /// Selection bitmap over the candidate profiles, on the second message.
    pub profiles: Vec<bool>,
}

/// A server → client message.
#[derive(Debug, Default)]
pub struct MergeProfilesPprofResponse {
    pub selected_profiles: Option<ProfileCandidates>,
    /// Encoded merged pprof profile, on the final message.
    pub result: Option<Vec<u8>>,
}

/// Errors surfaced to the session client.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("merge session closed")]
    SessionClosed,

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// The client half of a merge session.
#[derive(Debug)]
pub struct BidiStream {
    tx: mpsc::Sender<MergeProfilesPprofRequest>,
    rx: mpsc::Receiver<Result<MergeProfilesPprofResponse, QueryError>>,
}

impl BidiStream {
    pub async fn send(&self, request: MergeProfilesPprofRequest) -> Result<(), MergeError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| MergeError::SessionClosed)
    }

    pub async fn receive(&mut self) -> Result<MergeProfilesPprofResponse, MergeError> {
        match self.rx.recv().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(MergeError::Query(e)),
            None => Err(MergeError::SessionClosed),
        }
    }
}

/// Open a merge session over `querier`. The server task lives until the
/// protocol completes or either side hangs up.
pub fn merge_profiles_pprof(querier: Arc<dyn ProfileQuerier>) -> BidiStream {
    let (req_tx, req_rx) = mpsc::channel(4);
    let (resp_tx, resp_rx) = mpsc::channel(4);
    tokio::spawn(session(querier, req_rx, resp_tx));
    BidiStream {
        tx: req_tx,
        rx: resp_rx,
    }
}

async fn session(
    querier: Arc<dyn ProfileQuerier>,
    mut req_rx: mpsc::Receiver<MergeProfilesPprofRequest>,
    resp_tx: mpsc::Sender<Result<MergeProfilesPprofResponse, QueryError>>,
) {
    let Some(first) = req_rx.recv().await else {
        return;
    };
    let Some(request) = first.request else {
        let _ = resp_tx
            .send(Err(QueryError::InvalidArgument(
                "first session message must carry a request".into(),
            )))
            .await;
        return;
    };

    let candidates = match querier.select_profiles(&request).await {
        Ok(candidates) => candidates,
        Err(e) => {
            let _ = resp_tx.send(Err(e)).await;
            return;
        }
    };
    let profiles = candidates.profiles.clone();
    if resp_tx
        .send(Ok(MergeProfilesPprofResponse {
            selected_profiles: Some(candidates),
            result: None,
        }))
        .await
        .is_err()
    {
        return;
    }

    let Some(selection) = req_rx.recv().await else {
        return;
    };
    let selected: Vec<CandidateProfile> = profiles
        .iter()
        .zip(selection.profiles.iter())
        .filter(|(_, &keep)| keep)
        .map(|(c, _)| *c)
        .collect();

    // Selection consumed; the merge result follows.
    if resp_tx
        .send(Ok(MergeProfilesPprofResponse::default()))
        .await
        .is_err()
    {
        return;
    }

    match querier.merge_pprof(&request, &selected).await {
        Ok(profile) => {
            let _ = resp_tx
                .send(Ok(MergeProfilesPprofResponse {
                    selected_profiles: None,
                    result: Some(pprof::encode_profile(&profile)),
                }))
                .await;
        }
        Err(e) => {
            let _ = resp_tx.send(Err(e)).await;
        }
    }
}
